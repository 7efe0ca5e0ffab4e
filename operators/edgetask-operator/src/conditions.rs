//! 任务条件维护
//!
//! 条件列表按类型唯一，更新时保持原有顺序，新类型追加到末尾。

use chrono::{DateTime, Utc};
use edgetask_common::{ConditionStatus, EdgeTaskCondition, EdgeTaskConditionType};

/// 条件原因
pub mod reason {
    pub const RENDER_SUCCEED: &str = "RenderResourcesSucceed";
    pub const RENDER_FAILED: &str = "RenderResourcesFailed";
    pub const CLUSTER_ONLINE: &str = "EdgeClusterOnline";
    pub const CLUSTER_NOT_FOUND: &str = "EdgeClusterNotFound";
    pub const CLUSTER_NOT_ONLINE: &str = "EdgeClusterNotOnline";
    pub const APPLY_SUCCEED: &str = "ApplyResourcesSucceed";
    pub const APPLY_FAILED: &str = "ApplyResourcesFailed";
    pub const ALL_READY: &str = "AllResourcesReady";
    pub const CLIENT_NOT_READY: &str = "EdgeClientNotReady";
    pub const REMOVE_SUCCEED: &str = "RemoveResourcesSucceed";
    pub const REMOVE_FAILED: &str = "RemoveResourcesFailed";
}

/// 条件列表的更新器
pub struct ConditionTracker<'a> {
    conditions: &'a mut Vec<EdgeTaskCondition>,
}

impl<'a> ConditionTracker<'a> {
    pub fn new(conditions: &'a mut Vec<EdgeTaskCondition>) -> Self {
        Self { conditions }
    }

    pub fn get(&self, type_: EdgeTaskConditionType) -> Option<&EdgeTaskCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// 写入条件，内容没有变化时不做任何修改，返回是否发生了变化
    pub fn set(&mut self, condition: EdgeTaskCondition) -> bool {
        self.set_at(condition, Utc::now())
    }

    pub fn set_at(&mut self, mut condition: EdgeTaskCondition, now: DateTime<Utc>) -> bool {
        condition.last_update_time = Some(now);
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) if existing.same_content(&condition) => false,
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(now))
                } else {
                    Some(now)
                };
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_time = Some(now);
                self.conditions.push(condition);
                true
            }
        }
    }

    /// 便捷写法
    pub fn update(
        &mut self,
        type_: EdgeTaskConditionType,
        status: impl Into<ConditionStatus>,
        reason: &str,
        message: impl Into<String>,
    ) -> bool {
        self.set(EdgeTaskCondition::new(type_, status, reason, message))
    }

    /// 移除条件，返回是否存在
    pub fn remove(&mut self, type_: EdgeTaskConditionType) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.type_ != type_);
        before != self.conditions.len()
    }
}
