//! 远端资源状态监听模块

mod status_watcher;

pub use status_watcher::{ClusterWatcher, StatusWatcher, WatchCallback, WatchControl};
