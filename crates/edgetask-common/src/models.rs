//! 数据模型模块
//!
//! 该模块定义了 EdgeTask 项目中使用的核心数据模型，包括 EdgeTask、EdgeCluster
//! 两个自定义资源以及受管资源的标识类型。

pub mod edge_cluster;
pub mod edge_task;
pub mod resource;
