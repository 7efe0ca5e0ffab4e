//! 配置管理模块
//!
//! 配置按以下顺序叠加，后者覆盖前者：内置默认值、配置文件（YAML/JSON）、
//! `EDGETASK_` 前缀的环境变量、命令行参数。

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use edgetask_controller::{RetryPolicy, SyncOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 命令行参数
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "edgetask-operator", version, about = "将资源清单下发并维持在边缘集群上")]
pub struct Cli {
    /// 配置文件路径，支持 .yaml/.yml/.json
    #[arg(short, long, env = "EDGETASK_CONFIG")]
    pub config: Option<PathBuf>,

    /// 边缘服务地址，如 https://edge-server:8080
    #[arg(long)]
    pub edge_server: Option<String>,

    /// 最大并发协调数
    #[arg(long)]
    pub max_concurrent_reconciles: Option<u16>,

    /// 日志级别
    #[arg(long)]
    pub log_level: Option<String>,

    /// 是否监听远端资源状态变化
    #[arg(long)]
    pub enable_status_watch: Option<bool>,

    /// 打印 CRD 定义后退出
    #[arg(long)]
    pub print_crds: bool,
}

/// 重试配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 连续失败的最大快速重试次数
    pub max_attempts: u32,
    /// 首次重试等待（毫秒）
    pub base_delay_ms: u64,
    /// 重试等待上限（秒）
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_secs: 60,
        }
    }
}

/// 资源同步配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub create_namespace: bool,
    pub clean_crd: bool,
}

/// Operator 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 边缘服务地址，必须带有 http:// 或 https:// 前缀
    pub edge_server: String,
    /// 最大并发协调数
    pub max_concurrent_reconciles: u16,
    /// 定期重新协调的间隔（秒）
    pub resync_interval_secs: u64,
    pub retry: RetryConfig,
    pub sync: SyncConfig,
    /// 是否监听远端资源状态变化
    pub enable_status_watch: bool,
    /// 日志级别，`RUST_LOG` 优先
    pub log_level: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            edge_server: String::new(),
            max_concurrent_reconciles: 4,
            resync_interval_secs: 300,
            retry: RetryConfig::default(),
            sync: SyncConfig::default(),
            enable_status_watch: true,
            log_level: "info".to_string(),
        }
    }
}

fn file_format(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
        Some("json") => Ok(FileFormat::Json),
        _ => Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
    }
}

impl OperatorConfig {
    /// 按默认值、配置文件、环境变量、命令行的顺序加载配置
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = &cli.config {
            let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;
            builder = builder.add_source(File::with_name(config_file).format(file_format(path)?));
        }

        builder = builder.add_source(
            Environment::with_prefix("EDGETASK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(edge_server) = &cli.edge_server {
            builder = builder.set_override("edge_server", edge_server.as_str())?;
        }
        if let Some(n) = cli.max_concurrent_reconciles {
            builder = builder.set_override("max_concurrent_reconciles", i64::from(n))?;
        }
        if let Some(level) = &cli.log_level {
            builder = builder.set_override("log_level", level.as_str())?;
        }
        if let Some(enabled) = cli.enable_status_watch {
            builder = builder.set_override("enable_status_watch", enabled)?;
        }

        let config: OperatorConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("配置格式错误")?;
        config.validate()?;
        Ok(config)
    }

    /// 检查配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.edge_server.is_empty() {
            return Err(anyhow!("缺少边缘服务地址 edge_server"));
        }
        if !self.edge_server.starts_with("http://") && !self.edge_server.starts_with("https://") {
            return Err(anyhow!(
                "边缘服务地址必须以 http:// 或 https:// 开头: {}",
                self.edge_server
            ));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(anyhow!("max_concurrent_reconciles 必须大于 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            create_namespace: self.sync.create_namespace,
            clean_crd: self.sync.clean_crd,
        }
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "edgetask-operator-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_cli_only() {
        let cli = Cli {
            edge_server: Some("http://edge-server:8080".into()),
            ..Default::default()
        };
        let config = OperatorConfig::load(&cli).unwrap();
        assert_eq!(config.edge_server, "http://edge-server:8080");
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_yaml_file_with_cli_override() {
        let path = write_config(
            "config.yaml",
            r#"
edge_server: https://edge.example.com
resync_interval_secs: 60
retry:
  max_attempts: 3
sync:
  create_namespace: true
"#,
        );
        let cli = Cli {
            config: Some(path.clone()),
            max_concurrent_reconciles: Some(8),
            ..Default::default()
        };
        let config = OperatorConfig::load(&cli).unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(config.edge_server, "https://edge.example.com");
        assert_eq!(config.max_concurrent_reconciles, 8);
        assert_eq!(config.resync_interval(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.sync_options().create_namespace);
        assert!(!config.sync_options().clean_crd);
    }

    #[test]
    fn test_unsupported_file_format() {
        let cli = Cli {
            config: Some(PathBuf::from("/etc/edgetask/config.toml")),
            ..Default::default()
        };
        assert!(OperatorConfig::load(&cli).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = OperatorConfig::default();
        assert!(config.validate().is_err());
        config.edge_server = "edge-server:8080".into();
        assert!(config.validate().is_err());
        config.edge_server = "https://edge-server:8080".into();
        assert!(config.validate().is_ok());
        config.max_concurrent_reconciles = 0;
        assert!(config.validate().is_err());
    }
}
