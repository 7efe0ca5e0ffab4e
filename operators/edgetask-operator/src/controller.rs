//! 控制器模块
//!
//! 将协调器接入 kube-runtime：监听 EdgeTask，监听 EdgeCluster 的上线变化，
//! 以及远端状态变化触发的协调请求。失败按重试策略退避，连续失败超过上限后
//! 退回周期协调。

use anyhow::{Context as _, Result};
use edgetask_common::{EdgeCluster, EdgeTask, Error};
use edgetask_controller::utils::format_duration;
use edgetask_controller::{
    EdgeClientHolder, EdgeObject, ProxyClientFactory, ResourceSyncer, RetryPolicy,
    StatusWatcher, WatchCallback, WatchControl,
};
use futures::channel::mpsc;
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::reconcile::{ReconcileOutcome, TaskReconciler};
use crate::store::KubeTaskStore;
use crate::trigger::ConnectivityTrigger;

/// 协调上下文
pub struct Context {
    reconciler: TaskReconciler,
    retry: RetryPolicy,
    resync: Duration,
    attempts: Mutex<HashMap<ObjectRef<EdgeTask>, u32>>,
}

impl Context {
    pub fn new(reconciler: TaskReconciler, retry: RetryPolicy, resync: Duration) -> Self {
        Self {
            reconciler,
            retry,
            resync,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn reset(&self, task: &ObjectRef<EdgeTask>) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task);
    }

    /// 记录一次失败，返回连续失败次数
    fn record_failure(&self, task: &ObjectRef<EdgeTask>) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(task.clone()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        *attempt
    }

    fn action_for(&self, outcome: ReconcileOutcome) -> Action {
        match outcome {
            ReconcileOutcome::Done => Action::requeue(self.resync),
            ReconcileOutcome::Requeue => Action::requeue(Duration::ZERO),
            ReconcileOutcome::AwaitChange => Action::await_change(),
        }
    }
}

async fn reconcile(task: Arc<EdgeTask>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = task.namespace().unwrap_or_default();
    let outcome = ctx.reconciler.reconcile(&namespace, &task.name_any()).await?;
    ctx.reset(&ObjectRef::from_obj(task.as_ref()));
    Ok(ctx.action_for(outcome))
}

fn error_policy(task: Arc<EdgeTask>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(task.as_ref());
    if !error.is_retryable() {
        warn!("任务 {} 协调失败且无法重试: {}", key, error);
        return Action::await_change();
    }
    let attempt = ctx.record_failure(&key);
    match ctx.retry.backoff(attempt) {
        Some(delay) => {
            warn!(
                "任务 {} 第 {} 次协调失败: {}，{} 后重试",
                key,
                attempt,
                error,
                format_duration(delay)
            );
            Action::requeue(delay)
        }
        None => {
            error!(
                "任务 {} 已连续失败 {} 次: {}，改为 {} 后重新协调",
                key,
                attempt,
                error,
                format_duration(ctx.resync)
            );
            Action::requeue(ctx.resync)
        }
    }
}

/// 远端对象变化时，将其所属任务送入协调队列
pub fn enqueue_callback(tx: mpsc::UnboundedSender<ObjectRef<EdgeTask>>) -> WatchCallback {
    Arc::new(move |obj: &EdgeObject| {
        let Some((name, namespace)) = obj.edge_task() else {
            return WatchControl::Continue;
        };
        match tx.unbounded_send(ObjectRef::new(&name).within(&namespace)) {
            Ok(()) => WatchControl::Continue,
            Err(_) => WatchControl::Stop,
        }
    })
}

/// 运行控制器直到 `shutdown` 被取消
pub async fn run(client: Client, config: &OperatorConfig, shutdown: CancellationToken) -> Result<()> {
    let holder = Arc::new(
        EdgeClientHolder::new(&config.edge_server, Arc::new(ProxyClientFactory))
            .context("创建边缘集群客户端缓存失败")?,
    );
    let store = Arc::new(KubeTaskStore::new(client.clone()));
    let mut reconciler = TaskReconciler::new(
        store,
        holder.clone(),
        ResourceSyncer::new(config.sync_options()),
    );

    let (tx, rx) = mpsc::unbounded();
    let status_watcher = if config.enable_status_watch {
        let status_watcher = Arc::new(StatusWatcher::new(holder, shutdown.child_token()));
        reconciler = reconciler.with_status_watch(status_watcher.clone(), enqueue_callback(tx));
        Some(status_watcher)
    } else {
        None
    };
    let ctx = Arc::new(Context::new(
        reconciler,
        config.retry_policy(),
        config.resync_interval(),
    ));

    let tasks: Api<EdgeTask> = Api::all(client.clone());
    let clusters: Api<EdgeCluster> = Api::all(client);
    let controller = Controller::new(tasks, watcher::Config::default()).with_config(
        controller::Config::default().concurrency(config.max_concurrent_reconciles),
    );
    let task_store = controller.store();
    let trigger = ConnectivityTrigger::new();

    info!(
        "启动 EdgeTask 控制器，边缘服务: {}，并发: {}",
        config.edge_server, config.max_concurrent_reconciles
    );
    let signal = shutdown.clone();
    controller
        .watches(clusters, watcher::Config::default(), move |cluster| {
            trigger.observe(&cluster, &task_store.state())
        })
        .reconcile_on(rx)
        .graceful_shutdown_on(async move { signal.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((task, _)) => debug!("任务 {} 协调完成", task),
                Err(e) => debug!("协调调度错误: {}", e),
            }
        })
        .await;

    if let Some(status_watcher) = status_watcher {
        status_watcher.shutdown().await;
    }
    info!("EdgeTask 控制器已停止");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeTaskStore;
    use edgetask_common::{inject_edge_task, EdgeTaskSpec, ResourceKind};
    use edgetask_controller::testing::FakeClientFactory;
    use edgetask_controller::SyncOptions;
    use kube::api::DynamicObject;

    fn context(retry: RetryPolicy) -> Context {
        let holder = Arc::new(
            EdgeClientHolder::new("http://edge-server", Arc::new(FakeClientFactory::default())).unwrap(),
        );
        let reconciler = TaskReconciler::new(
            Arc::new(FakeTaskStore::default()),
            holder,
            ResourceSyncer::new(SyncOptions::default()),
        );
        Context::new(reconciler, retry, Duration::from_secs(300))
    }

    fn task() -> Arc<EdgeTask> {
        let mut task = EdgeTask::new("nginx", EdgeTaskSpec::default());
        task.metadata.namespace = Some("default".into());
        Arc::new(task)
    }

    #[test]
    fn test_error_policy_backs_off_then_falls_back_to_resync() {
        let ctx = Arc::new(context(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }));
        let err = Error::ClusterNotOnline("edge-1".into());

        assert_eq!(
            error_policy(task(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(
            error_policy(task(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(2))
        );
        assert_eq!(
            error_policy(task(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(300))
        );

        ctx.reset(&ObjectRef::from_obj(task().as_ref()));
        assert_eq!(
            error_policy(task(), &err, ctx),
            Action::requeue(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_permanent_error_waits_for_change() {
        let ctx = Arc::new(context(RetryPolicy::default()));
        let action = error_policy(task(), &Error::Render("bad yaml".into()), ctx);
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn test_outcome_actions() {
        let ctx = context(RetryPolicy::default());
        assert_eq!(ctx.action_for(ReconcileOutcome::Done), Action::requeue(Duration::from_secs(300)));
        assert_eq!(ctx.action_for(ReconcileOutcome::Requeue), Action::requeue(Duration::ZERO));
        assert_eq!(ctx.action_for(ReconcileOutcome::AwaitChange), Action::await_change());
    }

    #[tokio::test]
    async fn test_missing_task_resets_attempts() {
        let ctx = Arc::new(context(RetryPolicy::default()));
        let key = ObjectRef::from_obj(task().as_ref());
        ctx.record_failure(&key);
        let action = reconcile(task(), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(ctx.record_failure(&key), 1);
    }

    #[test]
    fn test_enqueue_callback() {
        let (tx, mut rx) = mpsc::unbounded();
        let callback = enqueue_callback(tx);
        let kind = ResourceKind::new("v1", "ConfigMap");

        let mut owned = DynamicObject::new("cfg", &kind.api_resource()).within("default");
        inject_edge_task(&mut owned, "nginx", "tenant-a");
        let stray = DynamicObject::new("other", &kind.api_resource()).within("default");

        assert_eq!(callback(&EdgeObject::from_dynamic(stray)), WatchControl::Continue);
        assert_eq!(callback(&EdgeObject::from_dynamic(owned.clone())), WatchControl::Continue);
        let queued = rx.try_next().unwrap().unwrap();
        assert_eq!(queued, ObjectRef::new("nginx").within("tenant-a"));

        drop(rx);
        assert_eq!(callback(&EdgeObject::from_dynamic(owned)), WatchControl::Stop);
    }
}
