//! EdgeTask Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 EdgeTask 项目中所有组件共享的数据结构和错误处理。
//! 包括 EdgeTask / EdgeCluster 自定义资源、资源标识以及统一的错误类型。

pub mod error;
pub mod models;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::edge_cluster::*;
pub use models::edge_task::*;
pub use models::resource::*;
