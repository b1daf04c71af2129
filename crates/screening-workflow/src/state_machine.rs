//! 筛查周期状态机
//!
//! 管理筛查周期从创建、影像采集、AI分析到医生评审的完整生命周期状态转换

use screening_core::{EpisodeStatus, Result, ScreeningError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 筛查周期状态转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EpisodeEvent {
    CaptureStarted,      // 开始影像采集
    ImageAttached,       // 影像挂接
    AnalysisSucceeded,   // AI分析全部成功
    AnalysisFailed,      // AI分析失败（可重试）
    DiagnosisDrafted,    // 诊断草稿已生成
    ReviewFinalized,     // 评审签署
    ReviewRejected,      // 评审驳回
    ReanalysisRequested, // 请求重新分析
    Discarded,           // 行政作废
}

/// 筛查周期状态机
#[derive(Debug)]
pub struct EpisodeStateMachine {
    transitions: HashMap<(EpisodeStatus, EpisodeEvent), EpisodeStatus>,
}

impl EpisodeStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert(
            (EpisodeStatus::Created, EpisodeEvent::CaptureStarted),
            EpisodeStatus::ImagesPending,
        );
        transitions.insert(
            (EpisodeStatus::ImagesPending, EpisodeEvent::ImageAttached),
            EpisodeStatus::AnalysisReady,
        );
        transitions.insert(
            (EpisodeStatus::AnalysisReady, EpisodeEvent::ImageAttached),
            EpisodeStatus::AnalysisReady,
        );
        transitions.insert(
            (EpisodeStatus::AnalysisReady, EpisodeEvent::AnalysisSucceeded),
            EpisodeStatus::AnalysisComplete,
        );
        transitions.insert(
            (EpisodeStatus::AnalysisReady, EpisodeEvent::AnalysisFailed),
            EpisodeStatus::AnalysisReady,
        );
        transitions.insert(
            (EpisodeStatus::AnalysisComplete, EpisodeEvent::DiagnosisDrafted),
            EpisodeStatus::ReviewPending,
        );
        transitions.insert(
            (EpisodeStatus::ReviewPending, EpisodeEvent::ReviewFinalized),
            EpisodeStatus::Finalized,
        );
        transitions.insert(
            (EpisodeStatus::ReviewPending, EpisodeEvent::ReviewRejected),
            EpisodeStatus::Rejected,
        );
        transitions.insert(
            (EpisodeStatus::Rejected, EpisodeEvent::ReanalysisRequested),
            EpisodeStatus::AnalysisReady,
        );

        // 任何非终止状态都可以行政作废
        for status in [
            EpisodeStatus::Created,
            EpisodeStatus::ImagesPending,
            EpisodeStatus::AnalysisReady,
            EpisodeStatus::AnalysisComplete,
            EpisodeStatus::ReviewPending,
            EpisodeStatus::Rejected,
        ] {
            transitions.insert((status, EpisodeEvent::Discarded), EpisodeStatus::Discarded);
        }

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: &EpisodeStatus, event: &EpisodeEvent) -> bool {
        self.transitions.contains_key(&(from.clone(), event.clone()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &EpisodeStatus, event: &EpisodeEvent) -> Result<EpisodeStatus> {
        match self.transitions.get(&(from.clone(), event.clone())) {
            Some(to) => Ok(to.clone()),
            None => Err(self.invalid_transition(from, event)),
        }
    }

    /// 构造包含可用事件列表的转换错误，客户端可据此提示下一步操作
    pub fn invalid_transition(&self, from: &EpisodeStatus, event: &EpisodeEvent) -> ScreeningError {
        let allowed: Vec<String> = self
            .possible_events(from)
            .iter()
            .map(|e| format!("{:?}", e))
            .collect();

        ScreeningError::InvalidTransition {
            from: format!("{:?}", from),
            event: format!("{:?}", event),
            allowed: allowed.join(", "),
        }
    }

    /// 获取所有可能的状态
    pub fn all_states() -> Vec<EpisodeStatus> {
        vec![
            EpisodeStatus::Created,
            EpisodeStatus::ImagesPending,
            EpisodeStatus::AnalysisReady,
            EpisodeStatus::AnalysisComplete,
            EpisodeStatus::ReviewPending,
            EpisodeStatus::Finalized,
            EpisodeStatus::Rejected,
            EpisodeStatus::Discarded,
        ]
    }

    /// 获取状态当前可接受的全部事件
    pub fn possible_events(&self, current_state: &EpisodeStatus) -> Vec<EpisodeEvent> {
        let mut events: Vec<EpisodeEvent> = self
            .transitions
            .keys()
            .filter(|(state, _)| state == current_state)
            .map(|(_, event)| event.clone())
            .collect();
        events.sort_by_key(|e| format!("{:?}", e));
        events
    }
}

impl Default for EpisodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_transitions() {
        let sm = EpisodeStateMachine::new();

        assert!(sm.can_transition(&EpisodeStatus::Created, &EpisodeEvent::CaptureStarted));
        assert!(sm.can_transition(&EpisodeStatus::ImagesPending, &EpisodeEvent::ImageAttached));
        assert!(sm.can_transition(&EpisodeStatus::AnalysisReady, &EpisodeEvent::AnalysisSucceeded));
        assert!(sm.can_transition(&EpisodeStatus::ReviewPending, &EpisodeEvent::ReviewFinalized));
        assert!(sm.can_transition(&EpisodeStatus::Rejected, &EpisodeEvent::ReanalysisRequested));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = EpisodeStateMachine::new();

        assert!(!sm.can_transition(&EpisodeStatus::Created, &EpisodeEvent::AnalysisSucceeded));
        assert!(!sm.can_transition(&EpisodeStatus::Finalized, &EpisodeEvent::Discarded));
        assert!(!sm.can_transition(&EpisodeStatus::Discarded, &EpisodeEvent::ImageAttached));
        assert!(!sm.can_transition(&EpisodeStatus::ReviewPending, &EpisodeEvent::ImageAttached));
    }

    #[test]
    fn test_transition_execution() {
        let sm = EpisodeStateMachine::new();

        let result = sm.transition(&EpisodeStatus::AnalysisReady, &EpisodeEvent::AnalysisFailed);
        assert_eq!(result.unwrap(), EpisodeStatus::AnalysisReady);

        let result = sm.transition(&EpisodeStatus::Created, &EpisodeEvent::ReviewFinalized);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_transition_lists_allowed_events() {
        let sm = EpisodeStateMachine::new();

        let err = sm
            .transition(&EpisodeStatus::ReviewPending, &EpisodeEvent::ImageAttached)
            .unwrap_err();
        match err {
            ScreeningError::InvalidTransition { from, allowed, .. } => {
                assert_eq!(from, "ReviewPending");
                assert!(allowed.contains("ReviewFinalized"));
                assert!(allowed.contains("ReviewRejected"));
                assert!(allowed.contains("Discarded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_states_accept_no_events() {
        let sm = EpisodeStateMachine::new();
        let all_events = [
            EpisodeEvent::CaptureStarted,
            EpisodeEvent::ImageAttached,
            EpisodeEvent::AnalysisSucceeded,
            EpisodeEvent::AnalysisFailed,
            EpisodeEvent::DiagnosisDrafted,
            EpisodeEvent::ReviewFinalized,
            EpisodeEvent::ReviewRejected,
            EpisodeEvent::ReanalysisRequested,
            EpisodeEvent::Discarded,
        ];

        for status in [EpisodeStatus::Finalized, EpisodeStatus::Discarded] {
            for event in &all_events {
                assert!(!sm.can_transition(&status, event), "{:?} + {:?}", status, event);
            }
        }
    }

    fn arb_event() -> impl Strategy<Value = EpisodeEvent> {
        prop::sample::select(vec![
            EpisodeEvent::CaptureStarted,
            EpisodeEvent::ImageAttached,
            EpisodeEvent::AnalysisSucceeded,
            EpisodeEvent::AnalysisFailed,
            EpisodeEvent::DiagnosisDrafted,
            EpisodeEvent::ReviewFinalized,
            EpisodeEvent::ReviewRejected,
            EpisodeEvent::ReanalysisRequested,
            EpisodeEvent::Discarded,
        ])
    }

    proptest! {
        /// 任意事件序列下，状态始终停留在合法状态集内，
        /// 且一旦进入终止状态，后续事件全部被拒绝
        #[test]
        fn prop_random_sequences_stay_legal(events in prop::collection::vec(arb_event(), 0..40)) {
            let sm = EpisodeStateMachine::new();
            let legal = EpisodeStateMachine::all_states();
            let mut status = EpisodeStatus::Created;

            for event in &events {
                let before = status.clone();
                match sm.transition(&status, event) {
                    Ok(next) => {
                        prop_assert!(!before.is_terminal(), "终止状态 {:?} 接受了 {:?}", before, event);
                        prop_assert!(legal.contains(&next));
                        status = next;
                    }
                    Err(err) => {
                        prop_assert!(matches!(err, ScreeningError::InvalidTransition { .. }), "expected InvalidTransition error");
                    }
                }
            }
        }

        /// 只有评审签署事件能到达 Finalized，且签署前必然经过 ReviewPending
        #[test]
        fn prop_finalized_only_via_review(events in prop::collection::vec(arb_event(), 0..40)) {
            let sm = EpisodeStateMachine::new();
            let mut status = EpisodeStatus::Created;
            let mut visited_review_pending = false;

            for event in &events {
                if let Ok(next) = sm.transition(&status, event) {
                    if next == EpisodeStatus::ReviewPending {
                        visited_review_pending = true;
                    }
                    if next == EpisodeStatus::Finalized {
                        prop_assert_eq!(event.clone(), EpisodeEvent::ReviewFinalized);
                        prop_assert_eq!(&status, &EpisodeStatus::ReviewPending);
                        prop_assert!(visited_review_pending);
                    }
                    status = next;
                }
            }
        }
    }
}
