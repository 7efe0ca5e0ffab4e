//! 资源类型注册表
//!
//! 对已注册的类型返回结构化对象，其余类型保留为 `DynamicObject`。

use edgetask_common::{extract_edge_task, Error, ResourceRef, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use tracing::debug;

/// 远端对象，已注册类型为结构化表示
#[derive(Debug, Clone)]
pub enum EdgeObject {
    Deployment(Box<Deployment>),
    Pod(Box<Pod>),
    Event(Box<Event>),
    Untyped(Box<DynamicObject>),
}

fn convert<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

/// 查找类型并转换，未注册的类型返回错误
pub fn lookup(obj: &DynamicObject) -> Result<EdgeObject> {
    let kind = ResourceRef::from_object(obj).resource_kind();
    if kind.is("apps/v1", "Deployment") {
        Ok(EdgeObject::Deployment(Box::new(convert(obj)?)))
    } else if kind.is("v1", "Pod") {
        Ok(EdgeObject::Pod(Box::new(convert(obj)?)))
    } else if kind.is("v1", "Event") {
        Ok(EdgeObject::Event(Box::new(convert(obj)?)))
    } else {
        Err(Error::NotFound(format!("类型 {kind} 未注册")))
    }
}

impl EdgeObject {
    /// 转换为结构化对象，失败时退回通用表示
    pub fn from_dynamic(obj: DynamicObject) -> Self {
        match lookup(&obj) {
            Ok(typed) => typed,
            Err(e) => {
                debug!("使用通用对象表示: {}", e);
                EdgeObject::Untyped(Box::new(obj))
            }
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            EdgeObject::Deployment(d) => &d.metadata,
            EdgeObject::Pod(p) => &p.metadata,
            EdgeObject::Event(e) => &e.metadata,
            EdgeObject::Untyped(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn is_typed(&self) -> bool {
        !matches!(self, EdgeObject::Untyped(_))
    }

    /// 对象所属的任务 (name, namespace)
    pub fn edge_task(&self) -> Option<(String, String)> {
        match self {
            EdgeObject::Deployment(d) => extract_edge_task(&**d),
            EdgeObject::Pod(p) => extract_edge_task(&**p),
            EdgeObject::Event(e) => extract_edge_task(&**e),
            EdgeObject::Untyped(o) => extract_edge_task(&**o),
        }
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            EdgeObject::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            EdgeObject::Pod(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            EdgeObject::Event(e) => Some(e),
            _ => None,
        }
    }
}
