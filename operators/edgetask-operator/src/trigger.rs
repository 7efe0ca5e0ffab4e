//! 边缘集群上线触发
//!
//! 记录每个边缘集群上一次观察到的阶段。集群从其他阶段变为 Online 时，
//! 立即触发同命名空间中以该集群为目标且尚未运行的任务，不必等待周期协调。

use edgetask_common::{EdgeCluster, EdgePhase, EdgeTask, EdgeTaskPhase};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// 集群连接状态变化的观察者
#[derive(Default)]
pub struct ConnectivityTrigger {
    phases: Mutex<HashMap<(String, String), EdgePhase>>,
}

impl ConnectivityTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 观察一次集群变化，返回需要立即协调的任务
    pub fn observe(&self, cluster: &EdgeCluster, tasks: &[Arc<EdgeTask>]) -> Vec<ObjectRef<EdgeTask>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let current = cluster.phase();
        let previous = self
            .phases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((namespace.clone(), name.clone()), current);

        let came_online = current == EdgePhase::Online
            && matches!(previous, Some(p) if p != EdgePhase::Online);
        if !came_online || cluster.metadata.deletion_timestamp.is_some() {
            return Vec::new();
        }

        let triggered: Vec<ObjectRef<EdgeTask>> = tasks
            .iter()
            .filter(|t| t.namespace().as_deref() == Some(namespace.as_str()))
            .filter(|t| t.target_cluster_name() == name)
            .filter(|t| t.status.as_ref().and_then(|s| s.phase) != Some(EdgeTaskPhase::Running))
            .map(|t| ObjectRef::from_obj(t.as_ref()))
            .collect();
        if !triggered.is_empty() {
            info!(
                "边缘集群 {}/{} 已上线，立即协调 {} 个任务",
                namespace,
                name,
                triggered.len()
            );
        }
        triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgetask_common::{EdgeClusterSpec, EdgeClusterStatus, EdgeTaskSpec, EdgeTaskStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn cluster(phase: EdgePhase) -> EdgeCluster {
        let mut cluster = EdgeCluster::new("edge-1", EdgeClusterSpec::default());
        cluster.metadata.namespace = Some("default".into());
        cluster.status = Some(EdgeClusterStatus {
            phase: Some(phase),
            ..Default::default()
        });
        cluster
    }

    fn task(name: &str, namespace: &str, target: &str, phase: Option<EdgeTaskPhase>) -> Arc<EdgeTask> {
        let mut task = EdgeTask::new(
            name,
            EdgeTaskSpec {
                edge_cluster_name: target.to_string(),
                resources: vec![],
            },
        );
        task.metadata.namespace = Some(namespace.into());
        task.status = Some(EdgeTaskStatus {
            phase,
            ..Default::default()
        });
        Arc::new(task)
    }

    fn names(refs: Vec<ObjectRef<EdgeTask>>) -> Vec<String> {
        refs.into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_transition_into_online_triggers_waiting_tasks() {
        let trigger = ConnectivityTrigger::new();
        let tasks = vec![
            task("edge-1", "default", "", Some(EdgeTaskPhase::Waiting)),
            task("nginx", "default", "edge-1", None),
            task("running", "default", "edge-1", Some(EdgeTaskPhase::Running)),
            task("other", "default", "edge-2", Some(EdgeTaskPhase::Waiting)),
            task("elsewhere", "tenant-a", "edge-1", Some(EdgeTaskPhase::Waiting)),
        ];

        assert!(trigger.observe(&cluster(EdgePhase::Offline), &tasks).is_empty());
        let mut triggered = names(trigger.observe(&cluster(EdgePhase::Online), &tasks));
        triggered.sort();
        assert_eq!(triggered, vec!["edge-1".to_string(), "nginx".to_string()]);
    }

    #[test]
    fn test_level_is_not_a_transition() {
        let trigger = ConnectivityTrigger::new();
        let tasks = vec![task("nginx", "default", "edge-1", Some(EdgeTaskPhase::Waiting))];

        // 首次观察没有上一个阶段
        assert!(trigger.observe(&cluster(EdgePhase::Online), &tasks).is_empty());
        assert!(trigger.observe(&cluster(EdgePhase::Online), &tasks).is_empty());
        assert!(trigger.observe(&cluster(EdgePhase::Waiting), &tasks).is_empty());
        assert_eq!(trigger.observe(&cluster(EdgePhase::Online), &tasks).len(), 1);
    }

    #[test]
    fn test_deleting_cluster_is_ignored() {
        let trigger = ConnectivityTrigger::new();
        let tasks = vec![task("nginx", "default", "edge-1", Some(EdgeTaskPhase::Waiting))];
        trigger.observe(&cluster(EdgePhase::Offline), &tasks);

        let mut deleting = cluster(EdgePhase::Online);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(trigger.observe(&deleting, &tasks).is_empty());
    }
}
