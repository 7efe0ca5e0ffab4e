//! 资源协调模块
//!
//! 单个 EdgeTask 的协调流程：渲染 -> 等待集群在线 -> 差异下发 -> 健康检查。
//! 删除时先清理远端资源再移除 finalizer。状态只在发生变化时写回。

use edgetask_common::{
    ConditionStatus, EdgePhase, EdgeTask, EdgeTaskConditionType, EdgeTaskPhase,
    EdgeTaskResourceStatus, EdgeTaskStatus, Error, ResourceRef, Result,
};
use edgetask_controller::utils::hash_resources;
use edgetask_controller::{
    EdgeClientHolder, ResourceSyncer, StatusWatcher, SyncOutcome, WatchCallback,
};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::conditions::{reason, ConditionTracker};
use crate::health::check_resource;
use crate::render::ResourceRenderer;
use crate::store::TaskStore;

/// 一次协调的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 本轮完成，按周期重新协调
    Done,
    /// 立即重新协调
    Requeue,
    /// 等待任务本身发生变化
    AwaitChange,
}

/// EdgeTask 协调器
pub struct TaskReconciler {
    store: Arc<dyn TaskStore>,
    holder: Arc<EdgeClientHolder>,
    renderer: ResourceRenderer,
    syncer: ResourceSyncer,
    status_watch: Option<(Arc<StatusWatcher>, WatchCallback)>,
}

impl TaskReconciler {
    pub fn new(store: Arc<dyn TaskStore>, holder: Arc<EdgeClientHolder>, syncer: ResourceSyncer) -> Self {
        Self {
            store,
            holder,
            renderer: ResourceRenderer::new(),
            syncer,
            status_watch: None,
        }
    }

    /// 资源未就绪时监听远端状态，变化时通过 `callback` 触发协调
    pub fn with_status_watch(mut self, watcher: Arc<StatusWatcher>, callback: WatchCallback) -> Self {
        self.status_watch = Some((watcher, callback));
        self
    }

    /// 协调一个任务
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut task) = self.store.get_task(namespace, name).await? else {
            debug!("任务 {}/{} 已不存在", namespace, name);
            return Ok(ReconcileOutcome::AwaitChange);
        };
        info!("协调任务 {}/{}", namespace, name);

        let mut saved = task.status_or_default();
        let mut status = saved.clone();
        let result = if task.metadata.deletion_timestamp.is_some() {
            self.remove(&mut task, &mut saved, &mut status).await
        } else {
            self.reconcile_task(&mut task, &mut saved, &mut status).await
        };

        // 出错时同样写回已记录的条件，协调错误优先返回
        let persisted = self.save_status(&task, &mut saved, &status).await;
        let outcome = result?;
        persisted?;
        Ok(outcome)
    }

    async fn reconcile_task(
        &self,
        task: &mut EdgeTask,
        saved: &mut EdgeTaskStatus,
        status: &mut EdgeTaskStatus,
    ) -> Result<ReconcileOutcome> {
        if !task.has_finalizer() {
            task.add_finalizer();
            self.store.patch_metadata(task).await?;
            info!("已为任务 {} 添加 finalizer", task.name_any());
            return Ok(ReconcileOutcome::Requeue);
        }

        let resources = match self.renderer.render(task) {
            Ok(resources) => {
                ConditionTracker::new(&mut status.conditions).update(
                    EdgeTaskConditionType::Prepared,
                    true,
                    reason::RENDER_SUCCEED,
                    "",
                );
                resources
            }
            Err(e) => {
                warn!("任务 {} 的资源清单无效: {}", task.name_any(), e);
                status.phase = Some(EdgeTaskPhase::Failed);
                ConditionTracker::new(&mut status.conditions).update(
                    EdgeTaskConditionType::Prepared,
                    false,
                    reason::RENDER_FAILED,
                    e.to_string(),
                );
                return Ok(ReconcileOutcome::AwaitChange);
            }
        };

        let cluster = self.wait_for_cluster(task, status).await?;
        self.apply(task, &cluster, &resources, saved, status).await?;
        self.check_health(task, &cluster, status).await
    }

    /// 确认目标集群存在且在线，返回集群名称
    async fn wait_for_cluster(&self, task: &EdgeTask, status: &mut EdgeTaskStatus) -> Result<String> {
        let cluster = task.target_cluster_name();
        let namespace = task.namespace().unwrap_or_default();
        let mut conditions = ConditionTracker::new(&mut status.conditions);
        match self.store.get_cluster(&namespace, &cluster).await? {
            None => {
                status.phase = Some(EdgeTaskPhase::Waiting);
                conditions.update(
                    EdgeTaskConditionType::Online,
                    false,
                    reason::CLUSTER_NOT_FOUND,
                    format!("edge cluster {cluster} not found"),
                );
                info!("任务 {} 的边缘集群 {} 不存在", task.name_any(), cluster);
                Err(Error::ClusterNotFound(cluster))
            }
            Some(edge) if edge.phase() != EdgePhase::Online => {
                status.phase = Some(EdgeTaskPhase::Waiting);
                conditions.update(
                    EdgeTaskConditionType::Online,
                    false,
                    reason::CLUSTER_NOT_ONLINE,
                    "edge cluster is not online",
                );
                info!("任务 {} 的边缘集群 {} 未在线", task.name_any(), cluster);
                Err(Error::ClusterNotOnline(cluster))
            }
            Some(_) => {
                conditions.update(EdgeTaskConditionType::Online, true, reason::CLUSTER_ONLINE, "");
                Ok(cluster)
            }
        }
    }

    async fn apply(
        &self,
        task: &mut EdgeTask,
        cluster: &str,
        resources: &[DynamicObject],
        saved: &mut EdgeTaskStatus,
        status: &mut EdgeTaskStatus,
    ) -> Result<()> {
        let hash = hash_resources(resources)?;
        // 资源列表丢失时哈希不可信
        let roster_lost = !resources.is_empty() && status.resources_status.is_empty();
        if task.resources_hash() == Some(hash.as_str()) && !roster_lost {
            debug!("任务 {} 的资源未变化，跳过下发", task.name_any());
            return Ok(());
        }

        let mut conditions = ConditionTracker::new(&mut status.conditions);
        conditions.remove(EdgeTaskConditionType::Available);
        let client = match self.holder.get(cluster).await {
            Ok(client) => client,
            Err(e) => {
                conditions.update(
                    EdgeTaskConditionType::Distributed,
                    false,
                    reason::APPLY_FAILED,
                    e.to_string(),
                );
                return Err(e);
            }
        };

        let previous: Vec<ResourceRef> = status.resources_status.iter().map(|r| r.key()).collect();
        let outcome = self.syncer.sync(client.as_ref(), &previous, resources).await;
        status.resources_status = merge_roster(std::mem::take(&mut status.resources_status), &outcome);

        match outcome.error() {
            Some(e) => {
                warn!("下发任务 {} 的资源失败: {}", task.name_any(), e);
                conditions.update(
                    EdgeTaskConditionType::Distributed,
                    false,
                    reason::APPLY_FAILED,
                    e.to_string(),
                );
                Err(e)
            }
            None => {
                conditions.update(
                    EdgeTaskConditionType::Distributed,
                    true,
                    reason::APPLY_SUCCEED,
                    "",
                );
                // 资源列表写入成功后才记录哈希，否则下一轮会跳过下发
                self.save_status(task, saved, status).await?;
                task.set_resources_hash(&hash);
                self.store.patch_metadata(task).await?;
                info!(
                    "已将任务 {} 的 {} 个资源下发到边缘集群 {}",
                    task.name_any(),
                    outcome.managed.len(),
                    cluster
                );
                Ok(())
            }
        }
    }

    async fn check_health(
        &self,
        task: &EdgeTask,
        cluster: &str,
        status: &mut EdgeTaskStatus,
    ) -> Result<ReconcileOutcome> {
        let client = match self.holder.get(cluster).await {
            Ok(client) => client,
            Err(e) => {
                ConditionTracker::new(&mut status.conditions).update(
                    EdgeTaskConditionType::Available,
                    ConditionStatus::Unknown,
                    reason::CLIENT_NOT_READY,
                    e.to_string(),
                );
                return Err(e);
            }
        };

        for resource in status.resources_status.iter_mut() {
            check_resource(client.as_ref(), resource).await;
        }

        if status.resources_status.iter().all(|r| r.ready) {
            status.phase = Some(EdgeTaskPhase::Running);
            ConditionTracker::new(&mut status.conditions).update(
                EdgeTaskConditionType::Available,
                true,
                reason::ALL_READY,
                "",
            );
            return Ok(ReconcileOutcome::Done);
        }

        status.phase = Some(EdgeTaskPhase::Waiting);
        let pending: Vec<String> = status
            .resources_status
            .iter()
            .filter(|r| !r.ready)
            .map(|r| r.key().to_string())
            .collect();
        info!("任务 {} 仍有资源未就绪: {}", task.name_any(), pending.join(", "));

        if let Some((watcher, callback)) = &self.status_watch {
            let mut watched = task.clone();
            watched.status = Some(status.clone());
            if watcher.start_watch(&watched, callback.clone()).await.is_err() {
                debug!("任务 {} 未能监听远端状态，等待周期协调", task.name_any());
            }
        }
        Ok(ReconcileOutcome::Done)
    }

    /// 删除流程：清理远端资源后移除 finalizer
    async fn remove(
        &self,
        task: &mut EdgeTask,
        saved: &mut EdgeTaskStatus,
        status: &mut EdgeTaskStatus,
    ) -> Result<ReconcileOutcome> {
        if !task.has_finalizer() {
            return Ok(ReconcileOutcome::AwaitChange);
        }

        if !status.resources_status.is_empty() {
            let cluster = self.wait_for_cluster(task, status).await?;
            let client = self.holder.get(&cluster).await?;
            let previous: Vec<ResourceRef> = status.resources_status.iter().map(|r| r.key()).collect();
            let outcome = self.syncer.sync(client.as_ref(), &previous, &[]).await;
            status.resources_status = merge_roster(std::mem::take(&mut status.resources_status), &outcome);
            if let Some(e) = outcome.error() {
                warn!("清理任务 {} 的远端资源失败: {}", task.name_any(), e);
                ConditionTracker::new(&mut status.conditions).update(
                    EdgeTaskConditionType::Cleaned,
                    false,
                    reason::REMOVE_FAILED,
                    e.to_string(),
                );
                return Err(e);
            }
        }

        ConditionTracker::new(&mut status.conditions).update(
            EdgeTaskConditionType::Cleaned,
            true,
            reason::REMOVE_SUCCEED,
            "",
        );
        // finalizer 移除后对象可能立即消失，状态必须先写回
        self.save_status(task, saved, status).await?;
        task.remove_finalizer();
        self.store.patch_metadata(task).await?;
        if let Some((watcher, _)) = &self.status_watch {
            watcher.stop_watch(task).await;
        }
        info!("任务 {} 的远端资源已清理", task.name_any());
        Ok(ReconcileOutcome::AwaitChange)
    }

    async fn save_status(&self, task: &EdgeTask, saved: &mut EdgeTaskStatus, status: &EdgeTaskStatus) -> Result<()> {
        if saved == status {
            return Ok(());
        }
        let namespace = task.namespace().unwrap_or_default();
        self.store.patch_status(&namespace, &task.name_any(), status).await?;
        *saved = status.clone();
        Ok(())
    }
}

/// 以同步结果为准重建资源列表，已有条目保留其检查结果
fn merge_roster(previous: Vec<EdgeTaskResourceStatus>, outcome: &SyncOutcome) -> Vec<EdgeTaskResourceStatus> {
    let mut existing: HashMap<ResourceRef, EdgeTaskResourceStatus> =
        previous.into_iter().map(|r| (r.key(), r)).collect();
    outcome
        .managed
        .iter()
        .map(|key| {
            existing
                .remove(key)
                .unwrap_or_else(|| EdgeTaskResourceStatus::from(key.clone()))
        })
        .collect()
}
