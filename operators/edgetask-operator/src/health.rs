//! 远端资源健康检查
//!
//! 默认策略：能读取到资源即视为存在且就绪，读取失败视为不存在。
//! Deployment 额外要求就绪副本数等于期望副本数，未就绪时收集 Pod 与事件用于诊断。

use edgetask_common::{
    EdgeTaskPodStatus, EdgeTaskResourceEvent, EdgeTaskResourceStatus, ResourceKind,
};
use edgetask_controller::edge::{EdgeClient, ListQuery};
use edgetask_controller::EdgeObject;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, warn};

/// 检查单个资源并就地更新其状态
pub async fn check_resource(client: &dyn EdgeClient, status: &mut EdgeTaskResourceStatus) {
    let key = status.key();
    match client.get(&key).await {
        Ok(obj) => {
            status.exists = true;
            status.ready = true;
            status.message.clear();
            if let EdgeObject::Deployment(deployment) = EdgeObject::from_dynamic(obj) {
                check_deployment(client, &deployment, status).await;
            }
        }
        Err(e) => {
            debug!("读取资源 {} 失败: {}", key, e);
            status.exists = false;
            status.ready = false;
            status.message = e.to_string();
        }
    }
}

async fn check_deployment(
    client: &dyn EdgeClient,
    deployment: &Deployment,
    status: &mut EdgeTaskResourceStatus,
) {
    let spec = deployment.spec.as_ref();
    status.images = spec
        .and_then(|s| s.template.spec.as_ref())
        .map(|pod| pod.containers.iter().filter_map(|c| c.image.clone()).collect())
        .unwrap_or_default();

    let observed = deployment
        .status
        .as_ref()
        .and_then(|s| s.observed_generation);
    if observed != deployment.metadata.generation {
        status.ready = false;
        status.message = "deployment not observed".to_string();
        return;
    }

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready == desired {
        status.events.clear();
        status.pods_status.clear();
        return;
    }

    status.ready = false;
    status.message = format!("replicas not ready: {ready}/{desired}");

    let labels = spec
        .and_then(|s| s.selector.match_labels.clone())
        .unwrap_or_default();
    if labels.is_empty() {
        return;
    }
    let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
    let pods = match client
        .list(
            &ResourceKind::new("v1", "Pod"),
            &ListQuery::in_namespace(&namespace).labels(labels),
        )
        .await
    {
        Ok(pods) => pods,
        Err(e) => {
            warn!("列出 Deployment {} 的 Pod 失败: {}", status.name, e);
            return;
        }
    };

    let mut pods_status = Vec::new();
    let mut events = Vec::new();
    for obj in pods {
        let typed = EdgeObject::from_dynamic(obj);
        let Some(pod) = typed.as_pod() else {
            continue;
        };
        pods_status.push(EdgeTaskPodStatus {
            name: typed.name().to_string(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default(),
        });
        let Some(uid) = pod.metadata.uid.as_deref() else {
            continue;
        };
        match pod_events(client, &namespace, uid).await {
            Ok(found) => events.extend(found),
            Err(e) => {
                warn!("列出 Pod {} 的事件失败: {}", typed.name(), e);
                return;
            }
        }
    }
    events.sort_by_key(|e| e.last_timestamp);
    status.pods_status = pods_status;
    status.events = events;
}

async fn pod_events(
    client: &dyn EdgeClient,
    namespace: &str,
    uid: &str,
) -> edgetask_common::Result<Vec<EdgeTaskResourceEvent>> {
    let query = ListQuery::in_namespace(namespace).field("involvedObject.uid", uid);
    let objects = client.list(&ResourceKind::new("v1", "Event"), &query).await?;
    Ok(objects
        .into_iter()
        .filter_map(|obj| {
            let typed = EdgeObject::from_dynamic(obj);
            let event = typed.as_event()?;
            let involved = &event.involved_object;
            Some(EdgeTaskResourceEvent {
                type_: event.type_.clone().unwrap_or_default(),
                reason: event.reason.clone().unwrap_or_default(),
                message: event.message.clone().unwrap_or_default(),
                count: event.count.unwrap_or_default(),
                involved_object: format!(
                    "{}/{}",
                    involved.kind.as_deref().unwrap_or_default(),
                    involved.name.as_deref().unwrap_or_default()
                ),
                last_timestamp: event.last_timestamp.as_ref().map(|t| t.0),
            })
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use edgetask_common::ResourceRef;
    use edgetask_controller::testing::FakeEdgeClient;

    fn status_for(reference: ResourceRef) -> EdgeTaskResourceStatus {
        EdgeTaskResourceStatus::from(reference)
    }

    #[tokio::test]
    async fn test_generic_resource_exists() {
        let client = FakeEdgeClient::default();
        let kind = ResourceKind::new("v1", "ConfigMap");
        client.insert(kube::api::DynamicObject::new("cfg", &kind.api_resource()).within("default"));

        let mut status = status_for(ResourceRef::new(&kind, "default", "cfg"));
        check_resource(&client, &mut status).await;
        assert!(status.exists);
        assert!(status.ready);

        let mut missing = status_for(ResourceRef::new(&kind, "default", "other"));
        check_resource(&client, &mut missing).await;
        assert!(!missing.exists);
        assert!(!missing.ready);
        assert!(!missing.message.is_empty());
    }

    #[tokio::test]
    async fn test_ready_deployment() {
        let client = FakeEdgeClient::default();
        client.insert(deployment("web", 2, 2));

        let mut status = status_for(deployment_ref("web"));
        status.message = "replicas not ready: 1/2".into();
        check_resource(&client, &mut status).await;
        assert!(status.ready);
        assert!(status.message.is_empty());
        assert_eq!(status.images, vec!["nginx:1.25".to_string()]);
    }

    #[tokio::test]
    async fn test_generation_not_observed() {
        let client = FakeEdgeClient::default();
        let mut obj = deployment("web", 2, 2);
        obj.metadata.generation = Some(2);
        client.insert(obj);

        let mut status = status_for(deployment_ref("web"));
        check_resource(&client, &mut status).await;
        assert!(status.exists);
        assert!(!status.ready);
        assert_eq!(status.message, "deployment not observed");
    }

    #[test_log::test(tokio::test)]
    async fn test_unready_deployment_collects_sorted_events() {
        let client = FakeEdgeClient::default();
        client.insert(deployment("web", 2, 1));
        client.insert(pod("web-a", "web", "uid-a", "Running"));
        client.insert(pod("web-b", "web", "uid-b", "Pending"));
        client.insert(pod("db-a", "db", "uid-c", "Pending"));
        client.insert(event("ev-2", "web-b", "uid-b", "FailedScheduling", "2024-01-01T00:00:20Z"));
        client.insert(event("ev-1", "web-b", "uid-b", "BackOff", "2024-01-01T00:00:10Z"));
        client.insert(event("ev-3", "db-a", "uid-c", "FailedMount", "2024-01-01T00:00:05Z"));

        let mut status = status_for(deployment_ref("web"));
        check_resource(&client, &mut status).await;

        assert!(!status.ready);
        assert_eq!(status.message, "replicas not ready: 1/2");
        let pods: Vec<_> = status.pods_status.iter().map(|p| (p.name.as_str(), p.phase.as_str())).collect();
        assert_eq!(pods, vec![("web-a", "Running"), ("web-b", "Pending")]);
        let reasons: Vec<_> = status.events.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["BackOff", "FailedScheduling"]);
        assert_eq!(status.events[0].involved_object, "Pod/web-b");
    }

    #[tokio::test]
    async fn test_events_cleared_once_ready() {
        let client = FakeEdgeClient::default();
        client.insert(deployment("web", 2, 1));
        client.insert(pod("web-a", "web", "uid-a", "Pending"));
        client.insert(event("ev-1", "web-a", "uid-a", "BackOff", "2024-01-01T00:00:10Z"));

        let mut status = status_for(deployment_ref("web"));
        check_resource(&client, &mut status).await;
        assert_eq!(status.events.len(), 1);

        client.update(&deployment_ref("web"), |obj| set_ready_replicas(obj, 2));
        check_resource(&client, &mut status).await;
        assert!(status.ready);
        assert!(status.events.is_empty());
        assert!(status.pods_status.is_empty());
    }
}
