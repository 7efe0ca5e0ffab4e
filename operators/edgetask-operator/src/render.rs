//! 资源清单渲染
//!
//! 任务的每一项资源可以是单个对象，也可以是包含多个 YAML 文档的文本。
//! 渲染失败属于用户输入错误，只能通过修改任务来恢复。

use edgetask_common::{inject_edge_task, EdgeTask, Error, Result};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::Deserialize;

/// 资源清单渲染器
#[derive(Debug, Clone, Default)]
pub struct ResourceRenderer;

impl ResourceRenderer {
    pub fn new() -> Self {
        Self
    }

    /// 渲染任务的全部资源，并在每个资源上标记所属任务
    pub fn render(&self, task: &EdgeTask) -> Result<Vec<DynamicObject>> {
        let name = task.name_any();
        let namespace = task.namespace().unwrap_or_default();
        let mut objects = Vec::new();
        for (index, raw) in task.spec.resources.iter().enumerate() {
            let parsed = parse_raw(raw)
                .map_err(|e| Error::Render(format!("第 {index} 项资源: {e}")))?;
            objects.extend(parsed);
        }
        for obj in objects.iter_mut() {
            inject_edge_task(obj, &name, &namespace);
        }
        Ok(objects)
    }
}

fn parse_raw(raw: &serde_json::Value) -> Result<Vec<DynamicObject>> {
    match raw {
        serde_json::Value::Null => Ok(vec![]),
        serde_json::Value::String(text) => split_yaml(text),
        serde_json::Value::Object(_) => Ok(vec![to_object(raw.clone())?]),
        serde_json::Value::Array(items) => {
            let mut objects = Vec::new();
            for item in items {
                objects.extend(parse_raw(item)?);
            }
            Ok(objects)
        }
        other => Err(Error::Render(format!("不支持的资源格式: {other}"))),
    }
}

/// 拆分多文档 YAML，跳过空文档
fn split_yaml(text: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_json::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(to_object(value)?);
    }
    Ok(objects)
}

fn to_object(value: serde_json::Value) -> Result<DynamicObject> {
    let obj: DynamicObject = serde_json::from_value(value)?;
    let (api_version, kind) = obj
        .types
        .as_ref()
        .map(|t| (t.api_version.as_str(), t.kind.as_str()))
        .unwrap_or_default();
    if api_version.is_empty() || kind.is_empty() {
        return Err(Error::Render("资源缺少 apiVersion 或 kind".to_string()));
    }
    if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::Render(format!("{api_version} {kind} 缺少 metadata.name")));
    }
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgetask_common::{extract_edge_task, EdgeTaskSpec};
    use rstest::rstest;
    use serde_json::json;

    fn task(resources: Vec<serde_json::Value>) -> EdgeTask {
        let mut task = EdgeTask::new(
            "nginx",
            EdgeTaskSpec {
                edge_cluster_name: "edge-1".into(),
                resources,
            },
        );
        task.metadata.namespace = Some("default".into());
        task
    }

    #[test]
    fn test_render_object_and_multi_document_text() {
        let bundle = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cfg
  namespace: default
data:
  key: value
---
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: default
"#;
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"replicas": 2}
        });
        let objects = ResourceRenderer::new()
            .render(&task(vec![deployment, json!(bundle)]))
            .unwrap();
        let names: Vec<_> = objects
            .iter()
            .map(|o| {
                let t = o.types.as_ref().unwrap();
                format!("{}/{}", t.kind, o.name_any())
            })
            .collect();
        assert_eq!(names, vec!["Deployment/web", "ConfigMap/cfg", "Service/web"]);
        assert_eq!(objects[1].data["data"]["key"], "value");
        for obj in &objects {
            assert_eq!(
                extract_edge_task(obj),
                Some(("nginx".to_string(), "default".to_string()))
            );
        }
    }

    #[test]
    fn test_empty_resources() {
        let objects = ResourceRenderer::new()
            .render(&task(vec![serde_json::Value::Null, json!("")]))
            .unwrap();
        assert!(objects.is_empty());
    }

    #[rstest]
    #[case::invalid_yaml(json!("kind: [unclosed"))]
    #[case::missing_kind(json!({"apiVersion": "v1", "metadata": {"name": "x"}}))]
    #[case::missing_name(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}))]
    #[case::scalar(json!(42))]
    #[case::nested_scalar(json!([{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}, true]))]
    fn test_render_error(#[case] raw: serde_json::Value) {
        let err = ResourceRenderer::new().render(&task(vec![raw])).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
        assert!(!err.is_retryable());
    }
}
