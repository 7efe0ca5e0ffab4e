//! EdgeTask 自定义资源
//!
//! EdgeTask 描述一组需要下发到某个边缘集群的任意资源清单。
//! 其状态（阶段、条件、资源状态）是控制器对外暴露的唯一契约。

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::ResourceRef;

/// 清理远端资源前必须存在的 finalizer
pub const EDGE_TASK_FINALIZER: &str = "edgetask.io/finalizer";

/// 记录上次成功渲染的资源列表哈希
pub const ANNOTATION_RESOURCES_HASH: &str = "edgetask.io/resources-hash";

/// 标记远端资源所属的任务，值为 `<name>/<namespace>`
pub const ANNOTATION_EDGE_TASK: &str = "edgetask.io/edge-task";

/// 边缘任务规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "edgetask.io",
    version = "v1beta1",
    kind = "EdgeTask",
    namespaced,
    status = "EdgeTaskStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskSpec {
    /// 目标边缘集群，为空时使用任务名称
    #[serde(default)]
    pub edge_cluster_name: String,

    /// 原始资源清单，每一项可以是对象，也可以是包含多个文档的 YAML 文本
    #[serde(default)]
    #[schemars(schema_with = "raw_resources_schema")]
    pub resources: Vec<serde_json::Value>,
}

fn raw_resources_schema(_: &mut SchemaGenerator) -> Schema {
    let mut item = SchemaObject::default();
    item.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}

/// 任务阶段
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum EdgeTaskPhase {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

/// 条件类型
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum EdgeTaskConditionType {
    /// 资源清单已渲染
    Prepared,
    /// 边缘集群在线
    Online,
    /// 资源已下发
    Distributed,
    /// 资源均已就绪
    Available,
    /// 远端资源已清理
    Cleaned,
}

/// 条件状态
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// 任务条件
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskCondition {
    #[serde(rename = "type")]
    pub type_: EdgeTaskConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl EdgeTaskCondition {
    pub fn new(
        type_: EdgeTaskConditionType,
        status: impl Into<ConditionStatus>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
            last_update_time: None,
        }
    }

    /// 忽略时间戳比较两个条件的内容
    pub fn same_content(&self, other: &EdgeTaskCondition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// 资源相关的事件，来自远端集群
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskResourceEvent {
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub count: i32,
    /// 事件关联的对象，如 `Pod/web-5d9c-abcde`
    #[serde(default)]
    pub involved_object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// 工作负载下的 Pod 概要
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskPodStatus {
    pub name: String,
    #[serde(default)]
    pub phase: String,
}

/// 单个受管资源的状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskResourceStatus {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// 工作负载当前使用的镜像
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub events: Vec<EdgeTaskResourceEvent>,
    #[serde(default)]
    pub pods_status: Vec<EdgeTaskPodStatus>,
}

impl EdgeTaskResourceStatus {
    pub fn key(&self) -> ResourceRef {
        ResourceRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl From<ResourceRef> for EdgeTaskResourceStatus {
    fn from(reference: ResourceRef) -> Self {
        Self {
            api_version: reference.api_version,
            kind: reference.kind,
            name: reference.name,
            namespace: reference.namespace,
            ..Default::default()
        }
    }
}

/// 任务状态。所有字段都会被序列化，合并补丁才能清空列表。
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTaskStatus {
    #[serde(default)]
    pub phase: Option<EdgeTaskPhase>,
    #[serde(default)]
    pub conditions: Vec<EdgeTaskCondition>,
    #[serde(default)]
    pub resources_status: Vec<EdgeTaskResourceStatus>,
}

impl EdgeTask {
    /// 目标边缘集群名称
    pub fn target_cluster_name(&self) -> String {
        if self.spec.edge_cluster_name.is_empty() {
            self.name_any()
        } else {
            self.spec.edge_cluster_name.clone()
        }
    }

    pub fn status_or_default(&self) -> EdgeTaskStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == EDGE_TASK_FINALIZER)
    }

    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.finalizers_mut().push(EDGE_TASK_FINALIZER.to_string());
        }
    }

    pub fn remove_finalizer(&mut self) {
        self.finalizers_mut().retain(|f| f != EDGE_TASK_FINALIZER);
    }

    pub fn resources_hash(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_RESOURCES_HASH))
            .map(String::as_str)
    }

    pub fn set_resources_hash(&mut self, hash: &str) {
        self.annotations_mut()
            .insert(ANNOTATION_RESOURCES_HASH.to_string(), hash.to_string());
    }

    /// 当前记录为受管的资源
    pub fn managed_resources(&self) -> Vec<ResourceRef> {
        self.status
            .as_ref()
            .map(|s| s.resources_status.iter().map(|r| r.key()).collect())
            .unwrap_or_default()
    }
}

/// 在远端资源上标记所属任务
pub fn inject_edge_task(obj: &mut DynamicObject, name: &str, namespace: &str) {
    obj.annotations_mut().insert(
        ANNOTATION_EDGE_TASK.to_string(),
        format!("{name}/{namespace}"),
    );
}

/// 解析远端资源所属任务，返回 (name, namespace)
pub fn extract_edge_task<K: Resource>(obj: &K) -> Option<(String, String)> {
    let value = obj.annotations().get(ANNOTATION_EDGE_TASK)?;
    let parts: Vec<&str> = value.split('/').collect();
    match parts.as_slice() {
        [name, namespace] if !name.is_empty() && !namespace.is_empty() => {
            Some((name.to_string(), namespace.to_string()))
        }
        _ => None,
    }
}
