//! 错误处理模块
//!
//! 该模块提供 EdgeTask 项目的统一错误类型。错误分为两类：
//! 用户输入导致的永久性错误（如清单无法解析），以及连接或远端调用导致的
//! 临时性错误，后者由控制器按退避策略重试。

use thiserror::Error;

/// EdgeTask 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 资源清单渲染失败，属于用户输入错误
    #[error("渲染资源清单失败: {0}")]
    Render(String),

    /// 目标边缘集群不存在
    #[error("边缘集群 {0} 不存在")]
    ClusterNotFound(String),

    /// 目标边缘集群未在线
    #[error("边缘集群 {0} 未在线")]
    ClusterNotOnline(String),

    /// 边缘集群客户端错误
    #[error("边缘集群客户端错误: {0}")]
    EdgeClient(String),

    /// 远端资源不存在
    #[error("资源 {0} 不存在")]
    NotFound(String),

    /// 边缘集群客户端不支持 watch
    #[error("边缘集群 {0} 的客户端不支持 watch")]
    WatchUnsupported(String),

    /// watch 过程中收到错误事件
    #[error("watch 错误: {0}")]
    Watch(String),

    /// 资源同步失败（可能为部分失败）
    #[error("同步资源失败: {0}")]
    Sync(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// 是否值得重试。渲染错误只能靠修改资源清单恢复，重试没有意义。
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Render(_) | Error::Config(_))
    }

    /// 是否为远端资源不存在
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

/// EdgeTask 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
