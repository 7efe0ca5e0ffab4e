//! EdgeTask 控制平面组件
//!
//! 该模块实现边缘任务控制循环所依赖的边缘侧组件：边缘集群客户端及其缓存、
//! 资源类型注册表、基于差异的资源同步以及按资源类型的远端状态监听。
//! 使用 kube-rs 框架与边缘集群的 Kubernetes API 交互。

pub mod edge;
pub mod scheme;
pub mod sync;
pub mod utils;
pub mod watch;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use edge::{EdgeClient, EdgeClientFactory, EdgeClientHolder, ProxyClientFactory};
pub use scheme::EdgeObject;
pub use sync::{ResourceSyncer, SyncOptions, SyncOutcome};
pub use utils::RetryPolicy;
pub use watch::{StatusWatcher, WatchCallback, WatchControl};
