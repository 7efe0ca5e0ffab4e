//! 资源标识模型
//!
//! 边缘任务以 (Kind, APIVersion, Name, Namespace) 标识其管理的每个远端资源，
//! 以 (APIVersion, Kind) 标识一类资源。

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 资源类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKind {
    /// 如 `apps/v1`、`v1`
    pub api_version: String,
    /// 如 `Deployment`
    pub kind: String,
}

impl ResourceKind {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// 拆分出 group 与 version，核心组的 group 为空
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self.group_version();
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// 由 GVK 推导的 API 资源描述，复数形式按 kube 的默认规则推断
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }

    pub fn is(&self, api_version: &str, kind: &str) -> bool {
        self.api_version == api_version && self.kind == kind
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version, self.kind)
    }
}

/// 单个资源的引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(
        kind: &ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: kind.api_version.clone(),
            kind: kind.kind.clone(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// 从结构化对象中提取引用，缺失的字段以空串代替
    pub fn from_object(obj: &DynamicObject) -> Self {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        Self {
            api_version,
            kind,
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_version, &self.kind)
    }

    /// 集群级资源返回 None
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// 构造只有身份信息的对象，用于删除等只需要标识的操作
    pub fn to_object(&self) -> DynamicObject {
        let ar = self.resource_kind().api_resource();
        let obj = DynamicObject::new(&self.name, &ar);
        match self.namespace() {
            Some(ns) => obj.within(ns),
            None => obj,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{}",
            self.api_version, self.kind, self.namespace, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("apps/v1", "apps", "v1")]
    #[case("v1", "", "v1")]
    #[case("apiextensions.k8s.io/v1", "apiextensions.k8s.io", "v1")]
    fn test_group_version(#[case] api_version: &str, #[case] group: &str, #[case] version: &str) {
        let kind = ResourceKind::new(api_version, "Anything");
        assert_eq!(kind.group_version(), (group, version));
    }

    #[test]
    fn test_ref_from_object() {
        let kind = ResourceKind::new("apps/v1", "Deployment");
        let obj = DynamicObject::new("web", &kind.api_resource()).within("default");
        let reference = ResourceRef::from_object(&obj);
        assert_eq!(reference, ResourceRef::new(&kind, "default", "web"));
        assert_eq!(reference.to_object().metadata.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn test_cluster_scoped_ref() {
        let kind = ResourceKind::new("v1", "Namespace");
        let reference = ResourceRef::new(&kind, "", "edge");
        assert!(reference.namespace().is_none());
        assert!(reference.to_object().metadata.namespace.is_none());
    }
}
