//! 资源同步
//!
//! 按同步计划通过边缘集群客户端创建、更新和删除资源，
//! 并返回同步后仍然受管的资源列表。单个资源失败不会中断其余资源。

use edgetask_common::{Error, ResourceKind, ResourceRef, Result};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::diff::{diff, SyncPlan};
use crate::edge::EdgeClient;

/// 资源上的忽略选项，取值可包含 `OnUpdate`、`OnDelete`
pub const ANNOTATION_IGNORE_OPTIONS: &str = "edgetask.io/ignore-options";

/// 同步选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// 创建资源前确保命名空间存在
    pub create_namespace: bool,
    /// 允许删除 CustomResourceDefinition
    pub clean_crd: bool,
}

/// 同步结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    /// 同步后受管的资源，已排序
    pub managed: Vec<ResourceRef>,
    /// 失败的资源及原因
    pub failures: Vec<(ResourceRef, String)>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 汇总所有失败为一个错误
    pub fn error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let details = self
            .failures
            .iter()
            .map(|(key, reason)| format!("{key}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::Sync(details))
    }
}

fn has_ignore_option<K: kube::Resource>(obj: &K, option: &str) -> bool {
    obj.annotations()
        .get(ANNOTATION_IGNORE_OPTIONS)
        .map(|v| v.split(',').any(|o| o.trim() == option))
        .unwrap_or(false)
}

fn is_crd(key: &ResourceRef) -> bool {
    key.kind == "CustomResourceDefinition" && key.api_version.starts_with("apiextensions.k8s.io/")
}

/// 资源同步器
#[derive(Debug, Clone, Default)]
pub struct ResourceSyncer {
    options: SyncOptions,
}

impl ResourceSyncer {
    /// 创建新的资源同步器
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// 计算差异并同步
    pub async fn sync(
        &self,
        client: &dyn EdgeClient,
        previous: &[ResourceRef],
        desired: &[DynamicObject],
    ) -> SyncOutcome {
        let plan = diff(previous, desired);
        debug!(
            "同步计划: 创建 {} 个，更新 {} 个，删除 {} 个",
            plan.creates.len(),
            plan.updates.len(),
            plan.removes.len()
        );
        self.apply(client, plan).await
    }

    /// 执行同步计划，计划为空时不访问远端
    pub async fn apply(&self, client: &dyn EdgeClient, plan: SyncPlan) -> SyncOutcome {
        let mut managed = BTreeSet::new();
        let mut failures = Vec::new();
        let mut namespaces = BTreeSet::new();

        for obj in &plan.creates {
            let key = ResourceRef::from_object(obj);
            match self.apply_one(client, obj, &mut namespaces).await {
                Ok(()) => {
                    info!("已创建资源 {}", key);
                    managed.insert(key);
                }
                Err(e) => {
                    warn!("创建资源 {} 失败: {}", key, e);
                    failures.push((key, e.to_string()));
                }
            }
        }

        for obj in &plan.updates {
            let key = ResourceRef::from_object(obj);
            if has_ignore_option(obj, "OnUpdate") {
                debug!("资源 {} 设置了 OnUpdate 忽略选项，跳过更新", key);
                managed.insert(key);
                continue;
            }
            // 更新失败的资源仍然存在于远端，继续受管
            if let Err(e) = self.apply_one(client, obj, &mut namespaces).await {
                warn!("更新资源 {} 失败: {}", key, e);
                failures.push((key.clone(), e.to_string()));
            }
            managed.insert(key);
        }

        for key in &plan.removes {
            match self.remove_one(client, key).await {
                Ok(()) => {}
                Err(e) => {
                    warn!("删除资源 {} 失败: {}", key, e);
                    failures.push((key.clone(), e.to_string()));
                    managed.insert(key.clone());
                }
            }
        }

        SyncOutcome {
            managed: managed.into_iter().collect(),
            failures,
        }
    }

    async fn apply_one(
        &self,
        client: &dyn EdgeClient,
        obj: &DynamicObject,
        namespaces: &mut BTreeSet<String>,
    ) -> Result<()> {
        if self.options.create_namespace {
            if let Some(ns) = obj.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                if !namespaces.contains(ns) {
                    ensure_namespace(client, ns).await?;
                    namespaces.insert(ns.to_string());
                }
            }
        }
        client.apply(obj).await
    }

    async fn remove_one(&self, client: &dyn EdgeClient, key: &ResourceRef) -> Result<()> {
        if is_crd(key) && !self.options.clean_crd {
            info!("未开启 CRD 清理，保留资源 {}", key);
            return Ok(());
        }
        let live = match client.get(key).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                debug!("资源 {} 已不存在", key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if has_ignore_option(&live, "OnDelete") {
            info!("资源 {} 设置了 OnDelete 忽略选项，保留但不再受管", key);
            return Ok(());
        }
        match client.delete(key).await {
            Ok(()) => {
                info!("已删除资源 {}", key);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn ensure_namespace(client: &dyn EdgeClient, namespace: &str) -> Result<()> {
    let kind = ResourceKind::new("v1", "Namespace");
    let reference = ResourceRef::new(&kind, "", namespace);
    match client.get(&reference).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            info!("创建命名空间 {}", namespace);
            client.apply(&reference.to_object()).await
        }
        Err(e) => Err(e),
    }
}
