//! EdgeCluster 自定义资源
//!
//! 边缘集群的连接状态由隧道服务维护，控制器只读取其阶段。

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 边缘集群规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "edgetask.io",
    version = "v1beta1",
    kind = "EdgeCluster",
    namespaced,
    status = "EdgeClusterStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"LastOnline","type":"string","jsonPath":".status.tunnel.lastOnlineTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EdgeClusterSpec {
    /// 注册信息
    #[serde(default)]
    pub register: RegisterInfo,
}

/// 注册信息
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInfo {
    /// 注册到的 hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_name: Option<String>,
    /// 边缘证书过期时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// 边缘集群阶段
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum EdgePhase {
    Waiting,
    Online,
    Offline,
}

/// 隧道连接状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_online_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_offline_timestamp: Option<DateTime<Utc>>,
}

/// 边缘集群状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<EdgePhase>,
    #[serde(default)]
    pub tunnel: TunnelStatus,
}

impl EdgeCluster {
    /// 当前阶段，未上报时视为 Waiting
    pub fn phase(&self) -> EdgePhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or(EdgePhase::Waiting)
    }

    /// 只有在线的集群才允许下发与检查
    pub fn is_online(&self) -> bool {
        self.phase() == EdgePhase::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_defaults_to_waiting() {
        let cluster = EdgeCluster::new("edge-1", EdgeClusterSpec::default());
        assert_eq!(cluster.phase(), EdgePhase::Waiting);
        assert!(!cluster.is_online());
    }

    #[test]
    fn test_phase_from_status() {
        let mut cluster = EdgeCluster::new("edge-1", EdgeClusterSpec::default());
        cluster.status = Some(EdgeClusterStatus {
            phase: Some(EdgePhase::Online),
            ..Default::default()
        });
        assert!(cluster.is_online());
    }
}
