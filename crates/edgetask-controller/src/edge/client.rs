//! 边缘集群客户端
//!
//! 通过隧道代理访问边缘集群的 Kubernetes API。所有资源都以
//! `DynamicObject` 处理，类型化由 [`crate::scheme`] 负责。

use async_trait::async_trait;
use edgetask_common::{Error, ResourceKind, ResourceRef, Result};
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery;
use kube::runtime::watcher;
use kube::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// 服务端应用时使用的字段管理者
pub const FIELD_MANAGER: &str = "edgetask-operator";

/// watch 事件
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    /// 终止性错误，收到后 watch 应当退出
    Error(String),
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

/// list 查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// 为空时查询所有命名空间
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl ListQuery {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn label_selector(&self) -> Option<String> {
        join_selector(&self.labels)
    }

    pub fn field_selector(&self) -> Option<String> {
        join_selector(&self.fields)
    }
}

fn join_selector(pairs: &BTreeMap<String, String>) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// 边缘集群客户端抽象
#[async_trait]
pub trait EdgeClient: Send + Sync {
    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject>;

    async fn list(&self, kind: &ResourceKind, query: &ListQuery) -> Result<Vec<DynamicObject>>;

    /// 创建或更新资源
    async fn apply(&self, obj: &DynamicObject) -> Result<()>;

    /// 删除资源，资源不存在时返回 [`Error::NotFound`]
    async fn delete(&self, reference: &ResourceRef) -> Result<()>;

    fn supports_watch(&self) -> bool {
        false
    }

    /// 从当前版本开始 watch 一类资源
    async fn watch(&self, kind: &ResourceKind) -> Result<WatchStream> {
        Err(Error::WatchUnsupported(kind.to_string()))
    }
}

/// 基于 kube-rs 的边缘集群客户端
///
/// 资源的复数形式通过发现接口查询并缓存，查询失败时按 kube 的默认规则推断，
/// 且不缓存推断结果，以便 CRD 安装后重新查询。
#[derive(Clone)]
pub struct KubeEdgeClient {
    client: Client,
    resources: Arc<RwLock<HashMap<ResourceKind, ApiResource>>>,
}

impl KubeEdgeClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn api_resource(&self, kind: &ResourceKind) -> ApiResource {
        if let Some(ar) = self.resources.read().await.get(kind) {
            return ar.clone();
        }
        match discovery::pinned_kind(&self.client, &kind.gvk()).await {
            Ok((ar, _)) => {
                self.resources.write().await.insert(kind.clone(), ar.clone());
                ar
            }
            Err(e) => {
                debug!("发现 {} 失败，按默认规则推断: {}", kind, e);
                kind.api_resource()
            }
        }
    }

    async fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = self.api_resource(kind).await;
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn map_kube_error(err: kube::Error, reference: &ResourceRef) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(reference.to_string()),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl EdgeClient for KubeEdgeClient {
    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        let api = self.api(&reference.resource_kind(), reference.namespace()).await;
        api.get(&reference.name)
            .await
            .map_err(|e| map_kube_error(e, reference))
    }

    async fn list(&self, kind: &ResourceKind, query: &ListQuery) -> Result<Vec<DynamicObject>> {
        let api = self.api(kind, query.namespace.as_deref()).await;
        let mut params = ListParams::default();
        if let Some(labels) = query.label_selector() {
            params = params.labels(&labels);
        }
        if let Some(fields) = query.field_selector() {
            params = params.fields(&fields);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<()> {
        let reference = ResourceRef::from_object(obj);
        let api = self.api(&reference.resource_kind(), reference.namespace()).await;
        let mut obj = obj.clone();
        obj.metadata.managed_fields = None;
        obj.metadata.resource_version = None;
        debug!("服务端应用资源 {}", reference);
        api.patch(
            &reference.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await
        .map_err(|e| map_kube_error(e, &reference))?;
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let api = self.api(&reference.resource_kind(), reference.namespace()).await;
        api.delete(&reference.name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, reference))?;
        Ok(())
    }

    fn supports_watch(&self) -> bool {
        true
    }

    async fn watch(&self, kind: &ResourceKind) -> Result<WatchStream> {
        let api = self.api(kind, None).await;
        // watcher 启动时的首次全量列举由调用方自行完成，这里跳过
        let mut initial = true;
        let stream = watcher(api, watcher::Config::default()).flat_map(move |event| {
            let events = match event {
                Ok(watcher::Event::Applied(obj)) => vec![WatchEvent::Modified(obj)],
                Ok(watcher::Event::Deleted(obj)) => vec![WatchEvent::Deleted(obj)],
                Ok(watcher::Event::Restarted(_)) if initial => {
                    initial = false;
                    vec![]
                }
                Ok(watcher::Event::Restarted(objs)) => {
                    objs.into_iter().map(WatchEvent::Added).collect()
                }
                Err(e) => vec![WatchEvent::Error(e.to_string())],
            };
            stream::iter(events)
        });
        Ok(stream.boxed())
    }
}
