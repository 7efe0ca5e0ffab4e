//! 远端资源状态监听
//!
//! 每个边缘集群一个 [`ClusterWatcher`]，按资源类型各启动一个 watch 任务。
//! 期望的类型集合是该集群上各任务受管资源类型的并集。每次
//! [`ClusterWatcher::set_watch`] 都会比较期望的类型集合与正在运行的类型，
//! 停止并等待过期的任务退出，再为新增的类型启动任务。
//! watch 失败后任务直接退出，不自动重启，由下一次 `set_watch` 恢复。

use edgetask_common::{EdgeTask, Error, ResourceKind, Result};
use futures::StreamExt;
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::edge::{EdgeClient, EdgeClientHolder, ListQuery, WatchEvent};
use crate::scheme::EdgeObject;

/// 回调的返回值，`Stop` 使对应的 watch 任务退出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchControl {
    Continue,
    Stop,
}

/// 观察到对象时的回调，可能被多个任务并发调用
pub type WatchCallback = Arc<dyn Fn(&EdgeObject) -> WatchControl + Send + Sync>;

struct WatchHandle {
    id: u64,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

type HandleMap = Arc<Mutex<HashMap<ResourceKind, WatchHandle>>>;

/// 单个边缘集群的 watch 集合
pub struct ClusterWatcher {
    cluster_id: String,
    client: Arc<dyn EdgeClient>,
    base: CancellationToken,
    handles: HandleMap,
    /// 任务 -> 该任务需要的类型
    desired: Mutex<HashMap<String, BTreeSet<ResourceKind>>>,
    next_id: AtomicU64,
}

impl ClusterWatcher {
    /// 客户端必须支持 watch
    pub fn new(
        cluster_id: &str,
        client: Arc<dyn EdgeClient>,
        base: CancellationToken,
    ) -> Result<Self> {
        if !client.supports_watch() {
            return Err(Error::WatchUnsupported(cluster_id.to_string()));
        }
        Ok(Self {
            cluster_id: cluster_id.to_string(),
            client,
            base,
            handles: Arc::new(Mutex::new(HashMap::new())),
            desired: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// 按任务的受管资源调整 watch
    pub async fn set_watch(&self, task: &EdgeTask, callback: WatchCallback) {
        let kinds: BTreeSet<ResourceKind> = task
            .managed_resources()
            .iter()
            .map(|r| r.resource_kind())
            .collect();
        let key = task_key(task);

        // 持有锁直到调整完成，避免并发调整以旧的并集覆盖新的
        let mut desired = self.desired.lock().await;
        if kinds.is_empty() {
            desired.remove(&key);
        } else {
            desired.insert(key, kinds);
        }
        let union: BTreeSet<ResourceKind> = desired.values().flatten().cloned().collect();
        self.set_kinds(union, callback).await;
    }

    /// 将 watch 的资源类型调整为 `desired`
    pub async fn set_kinds(&self, desired: BTreeSet<ResourceKind>, callback: WatchCallback) {
        let stale: Vec<(ResourceKind, WatchHandle)> = {
            let mut handles = self.handles.lock().await;
            let stale_kinds: Vec<ResourceKind> = handles
                .keys()
                .filter(|kind| !desired.contains(*kind))
                .cloned()
                .collect();
            let stale = stale_kinds
                .into_iter()
                .filter_map(|kind| handles.remove(&kind).map(|h| (kind, h)))
                .collect();

            for kind in desired {
                if handles.contains_key(&kind) {
                    continue;
                }
                let handle = self.spawn(kind.clone(), callback.clone());
                handles.insert(kind, handle);
            }
            stale
        };

        // 在锁外等待退出，退出中的任务需要获取锁来注销自己
        self.stop_handles(stale).await;
    }

    /// 撤销任务的 watch 需求，停止不再被任何任务需要的类型
    pub async fn remove_watch(&self, task: &EdgeTask) {
        let mut desired = self.desired.lock().await;
        if desired.remove(&task_key(task)).is_none() {
            return;
        }
        let union: BTreeSet<ResourceKind> = desired.values().flatten().cloned().collect();
        let stale: Vec<(ResourceKind, WatchHandle)> = {
            let mut handles = self.handles.lock().await;
            let stale_kinds: Vec<ResourceKind> = handles
                .keys()
                .filter(|kind| !union.contains(*kind))
                .cloned()
                .collect();
            stale_kinds
                .into_iter()
                .filter_map(|kind| handles.remove(&kind).map(|h| (kind, h)))
                .collect()
        };
        self.stop_handles(stale).await;
    }

    async fn stop_handles(&self, stale: Vec<(ResourceKind, WatchHandle)>) {
        for (kind, handle) in stale {
            debug!("停止边缘集群 {} 上 {} 的 watch", self.cluster_id, kind);
            handle.stop.cancel();
            if let Err(e) = handle.task.await {
                warn!("watch 任务 {} 异常退出: {}", kind, e);
            }
        }
    }

    fn spawn(&self, kind: ResourceKind, callback: WatchCallback) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = self.base.child_token();
        let worker = Worker {
            id,
            cluster_id: self.cluster_id.clone(),
            kind,
            client: self.client.clone(),
            callback,
            stop: stop.clone(),
            handles: self.handles.clone(),
        };
        let task = tokio::spawn(worker.run());
        WatchHandle { id, stop, task }
    }

    /// 正在运行的 watch 类型
    pub async fn watched_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.handles.lock().await.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// 停止所有 watch 并等待退出
    pub async fn stop_all(&self) {
        let handles: Vec<(ResourceKind, WatchHandle)> = self.handles.lock().await.drain().collect();
        self.stop_handles(handles).await;
        self.desired.lock().await.clear();
    }
}

fn task_key(task: &EdgeTask) -> String {
    format!("{}/{}", task.namespace().unwrap_or_default(), task.name_any())
}

struct Worker {
    id: u64,
    cluster_id: String,
    kind: ResourceKind,
    client: Arc<dyn EdgeClient>,
    callback: WatchCallback,
    stop: CancellationToken,
    handles: HandleMap,
}

impl Worker {
    async fn run(self) {
        info!("开始 watch 边缘集群 {} 上的 {}", self.cluster_id, self.kind);
        tokio::select! {
            _ = self.stop.cancelled() => {
                debug!("边缘集群 {} 上 {} 的 watch 已取消", self.cluster_id, self.kind);
            }
            result = self.watch() => match result {
                Ok(()) => debug!("边缘集群 {} 上 {} 的 watch 结束", self.cluster_id, self.kind),
                Err(e) => error!("边缘集群 {} 上 {} 的 watch 失败: {}", self.cluster_id, self.kind, e),
            }
        }

        let mut handles = self.handles.lock().await;
        if handles.get(&self.kind).map(|h| h.id) == Some(self.id) {
            handles.remove(&self.kind);
        }
    }

    async fn watch(&self) -> Result<()> {
        let objects = self.client.list(&self.kind, &ListQuery::default()).await?;
        for obj in objects {
            if (self.callback)(&EdgeObject::from_dynamic(obj)) == WatchControl::Stop {
                return Ok(());
            }
        }

        let mut stream = self.client.watch(&self.kind).await?;
        while let Some(event) = stream.next().await {
            match event {
                WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                    if (self.callback)(&EdgeObject::from_dynamic(obj)) == WatchControl::Stop {
                        return Ok(());
                    }
                }
                WatchEvent::Deleted(_) => {}
                WatchEvent::Error(msg) => return Err(Error::Watch(msg)),
            }
        }
        Ok(())
    }
}

/// 所有边缘集群的 watch 注册表
pub struct StatusWatcher {
    holder: Arc<EdgeClientHolder>,
    base: CancellationToken,
    clusters: Mutex<HashMap<String, Arc<ClusterWatcher>>>,
}

impl StatusWatcher {
    /// 创建新的状态监听器，取消 `base` 会终止所有 watch
    pub fn new(holder: Arc<EdgeClientHolder>, base: CancellationToken) -> Self {
        Self {
            holder,
            base,
            clusters: Mutex::new(HashMap::new()),
        }
    }

    /// 为任务的目标集群调整 watch
    pub async fn start_watch(&self, task: &EdgeTask, callback: WatchCallback) -> Result<()> {
        let cluster_id = task.target_cluster_name();
        let watcher = match self.cluster(&cluster_id).await {
            Ok(watcher) => watcher,
            Err(e) => {
                error!("无法监听边缘集群 {}: {}", cluster_id, e);
                return Err(e);
            }
        };
        watcher.set_watch(task, callback).await;
        Ok(())
    }

    /// 任务被删除后撤销其 watch，目标集群从未监听过时不做任何事
    pub async fn stop_watch(&self, task: &EdgeTask) {
        let cluster_id = task.target_cluster_name();
        let watcher = self.clusters.lock().await.get(&cluster_id).cloned();
        if let Some(watcher) = watcher {
            watcher.remove_watch(task).await;
        }
    }

    async fn cluster(&self, cluster_id: &str) -> Result<Arc<ClusterWatcher>> {
        let mut clusters = self.clusters.lock().await;
        if let Some(watcher) = clusters.get(cluster_id) {
            return Ok(watcher.clone());
        }
        let client = self.holder.get(cluster_id).await?;
        let watcher = Arc::new(ClusterWatcher::new(
            cluster_id,
            client,
            self.base.child_token(),
        )?);
        clusters.insert(cluster_id.to_string(), watcher.clone());
        Ok(watcher)
    }

    /// 某个集群正在运行的 watch 类型
    pub async fn watched_kinds(&self, cluster_id: &str) -> Vec<ResourceKind> {
        let watcher = self.clusters.lock().await.get(cluster_id).cloned();
        match watcher {
            Some(watcher) => watcher.watched_kinds().await,
            None => Vec::new(),
        }
    }

    /// 停止所有 watch
    pub async fn shutdown(&self) {
        self.base.cancel();
        let watchers: Vec<_> = self.clusters.lock().await.drain().map(|(_, w)| w).collect();
        for watcher in watchers {
            watcher.stop_all().await;
        }
        info!("已停止所有边缘集群的 watch");
    }
}
