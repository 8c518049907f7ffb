//! 回合意图与能力编排计划
//!
//! 意图决定本回合调用哪些能力、哪些必需哪些可降级，
//! 以及是否存在顺序依赖（测评结果先于自适应档案更新）。

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityId;

/// 回合意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnIntent {
    /// 学习新内容
    Learn,
    /// 练习巩固
    Practice,
    /// 测评
    Assess,
    /// 复习已完成主题
    Review,
}

/// 一个回合的能力编排计划
#[derive(Debug, Clone)]
pub struct CapabilityPlan {
    /// 必需能力：任一失败则整回合转重试响应
    pub required: Vec<CapabilityId>,
    /// 可选能力：失败时用缓存或略过
    pub optional: Vec<CapabilityId>,
    /// 顺序依赖：吃掉前面全部结果后串行执行
    pub followup: Option<CapabilityId>,
}

impl TurnIntent {
    /// 按意图生成编排计划
    pub fn plan(&self, voice_requested: bool) -> CapabilityPlan {
        let mut plan = match self {
            TurnIntent::Learn | TurnIntent::Practice => CapabilityPlan {
                required: vec![CapabilityId::Content],
                optional: vec![CapabilityId::Engagement, CapabilityId::Analytics],
                followup: None,
            },
            // 自适应档案必须读到测评结果才能跑，串行挂在后面
            TurnIntent::Assess => CapabilityPlan {
                required: vec![CapabilityId::Assessment],
                optional: vec![CapabilityId::Engagement],
                followup: Some(CapabilityId::Adaptive),
            },
            TurnIntent::Review => CapabilityPlan {
                required: vec![CapabilityId::Content],
                optional: vec![CapabilityId::Analytics],
                followup: None,
            },
        };
        if voice_requested {
            plan.optional.push(CapabilityId::Voice);
        }
        plan
    }
}

impl CapabilityPlan {
    /// 某能力在本计划中是否必需
    pub fn is_required(&self, capability: CapabilityId) -> bool {
        self.required.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learn_requires_content_only() {
        let plan = TurnIntent::Learn.plan(false);
        assert_eq!(plan.required, vec![CapabilityId::Content]);
        assert!(plan.optional.contains(&CapabilityId::Engagement));
        assert!(plan.followup.is_none());
        assert!(!plan.optional.contains(&CapabilityId::Voice));
    }

    #[test]
    fn test_assess_chains_adaptive_after_assessment() {
        let plan = TurnIntent::Assess.plan(false);
        assert_eq!(plan.required, vec![CapabilityId::Assessment]);
        assert_eq!(plan.followup, Some(CapabilityId::Adaptive));
    }

    #[test]
    fn test_voice_joins_as_optional() {
        let plan = TurnIntent::Practice.plan(true);
        assert!(plan.optional.contains(&CapabilityId::Voice));
        assert!(!plan.is_required(CapabilityId::Voice));
    }
}
