//! 边缘集群访问
//!
//! 包含客户端抽象、经由代理创建客户端的工厂，以及按集群缓存客户端的持有者。

mod client;
mod factory;
mod holder;

pub use client::{EdgeClient, KubeEdgeClient, ListQuery, WatchEvent, WatchStream, FIELD_MANAGER};
pub use factory::{proxy_url, EdgeClientFactory, ProxyClientFactory};
pub use holder::EdgeClientHolder;

#[cfg(test)]
pub use factory::MockEdgeClientFactory;
