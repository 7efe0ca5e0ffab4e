//! 资源同步模块
//!
//! 先比较受管资源与期望资源得出同步计划，再经由边缘集群客户端执行。

mod diff;
mod syncer;

pub use diff::{diff, SyncPlan};
pub use syncer::{ResourceSyncer, SyncOptions, SyncOutcome, ANNOTATION_IGNORE_OPTIONS};
