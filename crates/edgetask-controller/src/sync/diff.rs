//! 资源差异计算
//!
//! 比较上次记录的受管资源与本次渲染的资源，得出需要创建、更新和删除的资源。

use edgetask_common::ResourceRef;
use kube::api::DynamicObject;
use std::collections::BTreeSet;

/// 同步计划
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// 之前未受管的资源
    pub creates: Vec<DynamicObject>,
    /// 之前已受管、本次仍然需要的资源
    pub updates: Vec<DynamicObject>,
    /// 不再需要的资源
    pub removes: Vec<ResourceRef>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.removes.is_empty()
    }
}

/// 计算同步计划。期望资源中重复的标识只保留最后一个。
pub fn diff(previous: &[ResourceRef], desired: &[DynamicObject]) -> SyncPlan {
    let previous: BTreeSet<&ResourceRef> = previous.iter().collect();
    let mut plan = SyncPlan::default();
    let mut seen = BTreeSet::new();

    for obj in desired.iter().rev() {
        let key = ResourceRef::from_object(obj);
        if !seen.insert(key.clone()) {
            continue;
        }
        if previous.contains(&key) {
            plan.updates.push(obj.clone());
        } else {
            plan.creates.push(obj.clone());
        }
    }
    plan.creates.reverse();
    plan.updates.reverse();

    plan.removes = previous
        .into_iter()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    plan
}
