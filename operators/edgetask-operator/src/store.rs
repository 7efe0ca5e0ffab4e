//! 控制平面读写
//!
//! 协调器只通过 [`TaskStore`] 访问控制平面上的 EdgeTask 与 EdgeCluster，
//! 便于在测试中替换。

use async_trait::async_trait;
use edgetask_common::{EdgeCluster, EdgeTask, EdgeTaskStatus, Error, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// EdgeTask/EdgeCluster 的存取
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 读取任务，不存在时返回 None
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<EdgeTask>>;

    /// 读取边缘集群，不存在时返回 None
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EdgeCluster>>;

    /// 写回任务的 finalizer 与注解
    async fn patch_metadata(&self, task: &EdgeTask) -> Result<()>;

    /// 写回任务状态
    async fn patch_status(&self, namespace: &str, name: &str, status: &EdgeTaskStatus) -> Result<()>;
}

/// 基于 kube 客户端的实现
#[derive(Clone)]
pub struct KubeTaskStore {
    client: Client,
}

impl KubeTaskStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskStore for KubeTaskStore {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<EdgeTask>> {
        let api: Api<EdgeTask> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EdgeCluster>> {
        let api: Api<EdgeCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_metadata(&self, task: &EdgeTask) -> Result<()> {
        let namespace = task
            .namespace()
            .ok_or_else(|| Error::Config(format!("任务 {} 缺少命名空间", task.name_any())))?;
        let api: Api<EdgeTask> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "metadata": {
                "finalizers": task.finalizers(),
                "annotations": task.annotations(),
            }
        });
        debug!("更新任务 {}/{} 的元数据", namespace, task.name_any());
        api.patch(&task.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: &EdgeTaskStatus) -> Result<()> {
        let api: Api<EdgeTask> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        debug!("更新任务 {}/{} 的状态", namespace, name);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! 内存中的控制平面

    use super::*;
    use edgetask_common::{EdgeClusterSpec, EdgeClusterStatus, EdgePhase};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Key = (String, String);

    #[derive(Default)]
    pub struct FakeTaskStore {
        tasks: Mutex<BTreeMap<Key, EdgeTask>>,
        clusters: Mutex<BTreeMap<Key, EdgeCluster>>,
        status_patches: AtomicUsize,
        metadata_patches: AtomicUsize,
        failing_status_patches: AtomicUsize,
    }

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    impl FakeTaskStore {
        pub fn insert_task(&self, task: EdgeTask) {
            let k = key(&task.namespace().unwrap_or_default(), &task.name_any());
            self.tasks.lock().unwrap().insert(k, task);
        }

        pub fn task(&self, namespace: &str, name: &str) -> Option<EdgeTask> {
            self.tasks.lock().unwrap().get(&key(namespace, name)).cloned()
        }

        pub fn status(&self, namespace: &str, name: &str) -> EdgeTaskStatus {
            self.task(namespace, name)
                .map(|t| t.status_or_default())
                .unwrap_or_default()
        }

        /// 模拟用户修改任务
        pub fn update_task(&self, namespace: &str, name: &str, f: impl FnOnce(&mut EdgeTask)) {
            if let Some(task) = self.tasks.lock().unwrap().get_mut(&key(namespace, name)) {
                f(task);
            }
        }

        /// 模拟用户删除任务：存在 finalizer 时只设置删除时间
        pub fn delete_task(&self, namespace: &str, name: &str) {
            let mut tasks = self.tasks.lock().unwrap();
            let k = key(namespace, name);
            let erase = match tasks.get_mut(&k) {
                Some(task) if !task.finalizers().is_empty() => {
                    task.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                    false
                }
                Some(_) => true,
                None => false,
            };
            if erase {
                tasks.remove(&k);
            }
        }

        pub fn set_cluster_phase(&self, namespace: &str, name: &str, phase: EdgePhase) {
            let mut cluster = EdgeCluster::new(name, EdgeClusterSpec::default());
            cluster.metadata.namespace = Some(namespace.to_string());
            cluster.status = Some(EdgeClusterStatus {
                phase: Some(phase),
                ..Default::default()
            });
            self.clusters.lock().unwrap().insert(key(namespace, name), cluster);
        }

        pub fn status_patches(&self) -> usize {
            self.status_patches.load(Ordering::SeqCst)
        }

        pub fn metadata_patches(&self) -> usize {
            self.metadata_patches.load(Ordering::SeqCst)
        }

        /// 接下来的 `count` 次状态写入失败
        pub fn fail_status_patches(&self, count: usize) {
            self.failing_status_patches.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TaskStore for FakeTaskStore {
        async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<EdgeTask>> {
            Ok(self.task(namespace, name))
        }

        async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EdgeCluster>> {
            Ok(self.clusters.lock().unwrap().get(&key(namespace, name)).cloned())
        }

        async fn patch_metadata(&self, task: &EdgeTask) -> Result<()> {
            self.metadata_patches.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.tasks.lock().unwrap();
            let k = key(&task.namespace().unwrap_or_default(), &task.name_any());
            let Some(stored) = tasks.get_mut(&k) else {
                return Err(Error::NotFound(format!("EdgeTask {}/{}", k.0, k.1)));
            };
            stored.metadata.finalizers = task.metadata.finalizers.clone();
            stored.metadata.annotations = task.metadata.annotations.clone();
            // 删除中的对象在 finalizer 清空后被真正移除
            if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
                tasks.remove(&k);
            }
            Ok(())
        }

        async fn patch_status(&self, namespace: &str, name: &str, status: &EdgeTaskStatus) -> Result<()> {
            let failing = self
                .failing_status_patches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(Error::EdgeClient("status update conflict".into()));
            }
            self.status_patches.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.tasks.lock().unwrap();
            let Some(stored) = tasks.get_mut(&key(namespace, name)) else {
                return Err(Error::NotFound(format!("EdgeTask {namespace}/{name}")));
            };
            stored.status = Some(status.clone());
            Ok(())
        }
    }
}
