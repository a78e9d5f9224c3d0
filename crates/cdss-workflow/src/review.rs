//! 推荐审核状态机
//!
//! `Unreviewed → {Accepted, Rejected}`，两个终态不再接受任何事件

use cdss_core::{CdssError, Result, ReviewState};
use std::collections::HashMap;

/// 审核事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewEvent {
    Accept,
    Reject,
}

impl ReviewEvent {
    pub fn from_decision(accepted: bool) -> Self {
        if accepted {
            ReviewEvent::Accept
        } else {
            ReviewEvent::Reject
        }
    }

    /// 指标标签
    pub fn decision(&self) -> &'static str {
        match self {
            ReviewEvent::Accept => "accepted",
            ReviewEvent::Reject => "rejected",
        }
    }
}

/// 审核状态机
#[derive(Debug)]
pub struct ReviewStateMachine {
    transitions: HashMap<(ReviewState, ReviewEvent), ReviewState>,
}

impl ReviewStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert((ReviewState::Unreviewed, ReviewEvent::Accept), ReviewState::Accepted);
        transitions.insert((ReviewState::Unreviewed, ReviewEvent::Reject), ReviewState::Rejected);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: ReviewState, event: ReviewEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: ReviewState, event: ReviewEvent) -> Result<ReviewState> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| CdssError::InvalidStateTransition {
                from: from.as_str().to_string(),
                event: format!("{:?}", event),
            })
    }
}

impl Default for ReviewStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = ReviewStateMachine::new();
        assert_eq!(
            sm.transition(ReviewState::Unreviewed, ReviewEvent::Accept).unwrap(),
            ReviewState::Accepted
        );
        assert_eq!(
            sm.transition(ReviewState::Unreviewed, ReviewEvent::Reject).unwrap(),
            ReviewState::Rejected
        );
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let sm = ReviewStateMachine::new();
        for state in [ReviewState::Accepted, ReviewState::Rejected] {
            for event in [ReviewEvent::Accept, ReviewEvent::Reject] {
                assert!(!sm.can_transition(state, event));
                assert!(matches!(
                    sm.transition(state, event),
                    Err(CdssError::InvalidStateTransition { .. })
                ));
            }
        }
    }
}
