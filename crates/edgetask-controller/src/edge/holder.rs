//! 边缘集群客户端缓存
//!
//! 每个边缘集群 ID 对应一个客户端，首次使用时通过工厂创建。
//! 缓存不做淘汰，生命周期与进程一致；边缘集群数量有限，这里接受该取舍。

use edgetask_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::client::EdgeClient;
use super::factory::EdgeClientFactory;

/// 边缘集群客户端缓存
pub struct EdgeClientHolder {
    /// 边缘服务地址
    server: String,
    /// 客户端工厂
    factory: Arc<dyn EdgeClientFactory>,
    /// 集群 ID -> 客户端
    clients: RwLock<HashMap<String, Arc<dyn EdgeClient>>>,
}

impl EdgeClientHolder {
    /// 创建客户端缓存，边缘服务地址必须带有 http:// 或 https:// 前缀
    pub fn new(server: &str, factory: Arc<dyn EdgeClientFactory>) -> Result<Self> {
        if !server.starts_with("http://") && !server.starts_with("https://") {
            return Err(Error::Config(format!(
                "边缘服务地址缺少协议前缀: {server}"
            )));
        }
        Ok(Self {
            server: server.to_string(),
            factory,
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// 获取集群客户端，不存在时创建并缓存
    pub async fn get(&self, cluster_id: &str) -> Result<Arc<dyn EdgeClient>> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(cluster_id) {
                debug!("从缓存获取边缘集群客户端: {}", cluster_id);
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // 等待写锁期间可能已被其他调用方创建
        if let Some(client) = clients.get(cluster_id) {
            return Ok(client.clone());
        }
        let client = self.factory.create(&self.server, cluster_id)?;
        clients.insert(cluster_id.to_string(), client.clone());
        info!(
            "缓存边缘集群 {} 的客户端，当前缓存数量: {}",
            cluster_id,
            clients.len()
        );
        Ok(client)
    }

    /// 当前缓存的客户端数量
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
