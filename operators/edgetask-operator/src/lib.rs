//! EdgeTask Operator - 将资源清单下发并维持在边缘集群上
//!
//! 该模块实现了 EdgeTask 的 Kubernetes Operator：渲染任务中的资源清单，
//! 在目标边缘集群在线时按差异下发，检查远端资源健康并回写任务状态。

pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod reconcile;
pub mod render;
pub mod store;
pub mod trigger;

use anyhow::{Context, Result};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;

/// Operator 主结构体
pub struct EdgeTaskOperator {
    /// Kubernetes 客户端
    client: Client,
    /// 运行配置
    config: OperatorConfig,
}

impl EdgeTaskOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("创建 Kubernetes 客户端失败")?;
        Ok(Self { client, config })
    }

    /// 运行 Operator，直到 `shutdown` 被取消
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        controller::run(self.client.clone(), &self.config, shutdown).await
    }
}
