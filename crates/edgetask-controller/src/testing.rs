//! 测试辅助：内存中的边缘集群客户端与工厂
//!
//! 只在测试或启用 `testing` 特性时编译，供本 crate 与 operator 的单元测试使用。

use async_trait::async_trait;
use edgetask_common::{Error, ResourceKind, ResourceRef, Result};
use futures::channel::mpsc;
use futures::StreamExt;
use kube::api::DynamicObject;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::edge::{EdgeClient, EdgeClientFactory, ListQuery, WatchEvent, WatchStream};

/// 内存中的边缘集群
#[derive(Default)]
pub struct FakeEdgeClient {
    objects: Mutex<BTreeMap<ResourceRef, DynamicObject>>,
    applied: Mutex<Vec<ResourceRef>>,
    deleted: Mutex<Vec<ResourceRef>>,
    fail_apply: Mutex<BTreeSet<ResourceRef>>,
    fail_delete: Mutex<BTreeSet<ResourceRef>>,
    watchers: Mutex<HashMap<ResourceKind, Vec<mpsc::UnboundedSender<WatchEvent>>>>,
    watch_calls: AtomicUsize,
    watchable: bool,
}

impl FakeEdgeClient {
    /// 支持 watch 的客户端
    pub fn watchable() -> Self {
        Self {
            watchable: true,
            ..Default::default()
        }
    }

    /// 直接写入远端对象，不计入 apply 次数
    pub fn insert(&self, obj: DynamicObject) {
        let key = ResourceRef::from_object(&obj);
        lock(&self.objects).insert(key, obj);
    }

    pub fn object(&self, reference: &ResourceRef) -> Option<DynamicObject> {
        lock(&self.objects).get(reference).cloned()
    }

    /// 修改远端对象的数据
    pub fn update(&self, reference: &ResourceRef, f: impl FnOnce(&mut DynamicObject)) {
        if let Some(obj) = lock(&self.objects).get_mut(reference) {
            f(obj);
        }
    }

    pub fn applied(&self) -> Vec<ResourceRef> {
        lock(&self.applied).clone()
    }

    pub fn deleted(&self) -> Vec<ResourceRef> {
        lock(&self.deleted).clone()
    }

    pub fn fail_apply_on(&self, reference: ResourceRef) {
        lock(&self.fail_apply).insert(reference);
    }

    pub fn fail_delete_on(&self, reference: ResourceRef) {
        lock(&self.fail_delete).insert(reference);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_apply).clear();
        lock(&self.fail_delete).clear();
    }

    /// 已建立的 watch 次数
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// 向某类资源的所有 watch 推送事件，返回仍然存活的接收方数量
    pub fn emit(&self, kind: &ResourceKind, event: WatchEvent) -> usize {
        let mut watchers = lock(&self.watchers);
        let Some(senders) = watchers.get_mut(kind) else {
            return 0;
        };
        senders.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        senders.len()
    }

    /// 关闭某类资源的所有 watch
    pub fn close_watches(&self, kind: &ResourceKind) {
        lock(&self.watchers).remove(kind);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn field_matches(obj: &DynamicObject, path: &str, expected: &str) -> bool {
    let Ok(value) = serde_json::to_value(obj) else {
        return false;
    };
    let found = path
        .split('.')
        .try_fold(&value, |v, segment| v.get(segment));
    match found {
        Some(serde_json::Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

fn labels_match(obj: &DynamicObject, labels: &BTreeMap<String, String>) -> bool {
    let empty = BTreeMap::new();
    let actual = obj.metadata.labels.as_ref().unwrap_or(&empty);
    labels.iter().all(|(k, v)| actual.get(k) == Some(v))
}

#[async_trait]
impl EdgeClient for FakeEdgeClient {
    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        self.object(reference)
            .ok_or_else(|| Error::NotFound(reference.to_string()))
    }

    async fn list(&self, kind: &ResourceKind, query: &ListQuery) -> Result<Vec<DynamicObject>> {
        let objects = lock(&self.objects);
        Ok(objects
            .iter()
            .filter(|(key, _)| key.resource_kind() == *kind)
            .filter(|(key, _)| match &query.namespace {
                Some(ns) => &key.namespace == ns,
                None => true,
            })
            .filter(|(_, obj)| labels_match(obj, &query.labels))
            .filter(|(_, obj)| {
                query
                    .fields
                    .iter()
                    .all(|(path, expected)| field_matches(obj, path, expected))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<()> {
        let key = ResourceRef::from_object(obj);
        if lock(&self.fail_apply).contains(&key) {
            return Err(Error::EdgeClient(format!("apply {key} rejected")));
        }
        lock(&self.applied).push(key.clone());
        let mut objects = lock(&self.objects);
        let mut obj = obj.clone();
        // 服务端应用不会覆盖 status
        if let Some(existing) = objects.get(&key) {
            if obj.data.get("status").is_none() {
                if let Some(status) = existing.data.get("status") {
                    obj.data["status"] = status.clone();
                }
            }
        }
        objects.insert(key, obj);
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        if lock(&self.fail_delete).contains(reference) {
            return Err(Error::EdgeClient(format!("delete {reference} rejected")));
        }
        match lock(&self.objects).remove(reference) {
            Some(_) => {
                lock(&self.deleted).push(reference.clone());
                Ok(())
            }
            None => Err(Error::NotFound(reference.to_string())),
        }
    }

    fn supports_watch(&self) -> bool {
        self.watchable
    }

    async fn watch(&self, kind: &ResourceKind) -> Result<WatchStream> {
        if !self.watchable {
            return Err(Error::WatchUnsupported(kind.to_string()));
        }
        let (tx, rx) = mpsc::unbounded();
        lock(&self.watchers).entry(kind.clone()).or_default().push(tx);
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(rx.boxed())
    }
}

/// 为每个集群 ID 返回一个内存客户端的工厂
#[derive(Default)]
pub struct FakeClientFactory {
    clients: Mutex<HashMap<String, Arc<FakeEdgeClient>>>,
    unreachable: Mutex<BTreeSet<String>>,
    created: AtomicUsize,
    watchable: bool,
}

impl FakeClientFactory {
    /// 创建的客户端都支持 watch
    pub fn watchable() -> Self {
        Self {
            watchable: true,
            ..Default::default()
        }
    }

    /// 取得集群对应的客户端，不存在时创建
    pub fn client(&self, cluster_id: &str) -> Arc<FakeEdgeClient> {
        lock(&self.clients)
            .entry(cluster_id.to_string())
            .or_insert_with(|| {
                Arc::new(if self.watchable {
                    FakeEdgeClient::watchable()
                } else {
                    FakeEdgeClient::default()
                })
            })
            .clone()
    }

    /// 之后为该集群创建客户端都会失败
    pub fn set_unreachable(&self, cluster_id: &str, unreachable: bool) {
        let mut set = lock(&self.unreachable);
        if unreachable {
            set.insert(cluster_id.to_string());
        } else {
            set.remove(cluster_id);
        }
    }

    /// 工厂被调用创建客户端的次数
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EdgeClientFactory for FakeClientFactory {
    fn create(&self, _server: &str, cluster_id: &str) -> Result<Arc<dyn EdgeClient>> {
        if lock(&self.unreachable).contains(cluster_id) {
            return Err(Error::EdgeClient(format!("tunnel to {cluster_id} is down")));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.client(cluster_id))
    }
}
