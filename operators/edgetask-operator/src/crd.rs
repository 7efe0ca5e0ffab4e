//! 自定义资源定义模块
//!
//! 生成 EdgeTask 与 EdgeCluster 的 CRD 清单，供部署时注册到控制平面。

use edgetask_common::{EdgeCluster, EdgeTask};
use kube::CustomResourceExt;

/// 以多文档 YAML 输出全部 CRD
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let documents = [EdgeTask::crd(), EdgeCluster::crd()]
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}
