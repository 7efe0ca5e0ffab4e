//! 控制器工具函数
//!
//! 资源内容哈希、重试退避策略以及日志中使用的时长格式化。

use edgetask_common::Result;
use kube::api::DynamicObject;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// 计算资源列表的 SHA-256 哈希，只用于判断内容是否变化
pub fn hash_resources(resources: &[DynamicObject]) -> Result<String> {
    let bytes = serde_json::to_vec(resources)?;
    Ok(sha256_hash(&bytes))
}

/// 计算字节串的 SHA-256 哈希
pub fn sha256_hash(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 连续失败的最大快速重试次数
    pub max_attempts: u32,
    /// 首次重试的等待时间
    pub base_delay: Duration,
    /// 等待时间上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败（从 1 开始）后的等待时间，超过最大次数返回 None
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// 格式化持续时间为人类可读的字符串
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();

    if seconds == 0 {
        return format!("{} 毫秒", duration.as_millis());
    }

    if seconds < 60 {
        return format!("{} 秒", seconds);
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{} 分钟 {} 秒", minutes, seconds % 60);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{} 小时 {} 分钟", hours, minutes % 60);
    }

    let days = hours / 24;
    format!("{} 天 {} 小时", days, hours % 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgetask_common::ResourceKind;
    use rstest::rstest;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250 毫秒");
        assert_eq!(format_duration(Duration::from_secs(30)), "30 秒");
        assert_eq!(format_duration(Duration::from_secs(90)), "1 分钟 30 秒");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1 小时 0 分钟");
        assert_eq!(format_duration(Duration::from_secs(86400)), "1 天 0 小时");
    }

    #[test]
    fn test_sha256_hash() {
        let hash = sha256_hash(b"hello");
        assert_eq!(hash, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }

    #[test]
    fn test_hash_resources_is_stable() {
        let kind = ResourceKind::new("v1", "ConfigMap");
        let a = DynamicObject::new("a", &kind.api_resource()).within("default");
        let b = DynamicObject::new("b", &kind.api_resource()).within("default");
        let first = hash_resources(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(first, hash_resources(&[a.clone(), b.clone()]).unwrap());
        assert_ne!(first, hash_resources(&[b, a]).unwrap());
        assert_eq!(first.len(), 64);
    }

    #[rstest]
    #[case(1, Some(100))]
    #[case(2, Some(200))]
    #[case(4, Some(800))]
    #[case(5, Some(1000))]
    #[case(6, Some(1000))]
    #[case(7, None)]
    #[case(0, None)]
    fn test_backoff(#[case] attempt: u32, #[case] expected_ms: Option<u64>) {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(attempt), expected_ms.map(Duration::from_millis));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: 100,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        };
        assert_eq!(policy.backoff(64), Some(Duration::from_secs(300)));
    }
}
