//! 边缘集群客户端工厂

use edgetask_common::{Error, Result};
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use super::client::{EdgeClient, KubeEdgeClient};

/// 根据边缘服务地址与集群 ID 创建客户端
#[cfg_attr(test, automock)]
pub trait EdgeClientFactory: Send + Sync {
    fn create(&self, server: &str, cluster_id: &str) -> Result<Arc<dyn EdgeClient>>;
}

/// 经由边缘服务代理接口访问边缘集群
#[derive(Debug, Default, Clone)]
pub struct ProxyClientFactory;

/// 边缘集群 API 的代理地址
pub fn proxy_url(server: &str, cluster_id: &str) -> String {
    format!(
        "{}/v1/edge-clusters/{}/proxy",
        server.trim_end_matches('/'),
        cluster_id
    )
}

impl EdgeClientFactory for ProxyClientFactory {
    fn create(&self, server: &str, cluster_id: &str) -> Result<Arc<dyn EdgeClient>> {
        let url = proxy_url(server, cluster_id);
        let uri = http::Uri::try_from(url.as_str())
            .map_err(|e| Error::EdgeClient(format!("无效的代理地址 {url}: {e}")))?;
        let client = kube::Client::try_from(kube::Config::new(uri))?;
        info!("已创建边缘集群 {} 的客户端: {}", cluster_id, url);
        Ok(Arc::new(KubeEdgeClient::new(client)))
    }
}
