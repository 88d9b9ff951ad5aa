//! 协调引擎错误类型
//!
//! 配置缺失、后端失败、提示词一致性校验失败、取消等都在这里归类；
//! 「尚无 Approach」「执行记录不足」属于可识别状态而非错误，分别由 RouteDecision / DiscoveryOutcome 表达。

use thiserror::Error;

use crate::addm::LoopState;

/// 协调引擎运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    /// 缺少某个决策所需的上下文（如 research 决策没有 focus_areas），或配置越界
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 生成后端调用失败，消息原样透传
    #[error("Backend error: {0}")]
    Backend(String),

    /// 提示词未通过一致性校验（缺少章节标签、含被弃用的合并指令等）
    #[error("Prompt rejected: {0}")]
    PromptRejected(String),

    /// 调用方在两个章节之间取消了循环
    #[error("Cancelled")]
    Cancelled,

    #[error("Simulation error: {0}")]
    Simulation(String),
}

/// ADDM 循环失败：携带错误与失败时的循环状态（当前轮次、已产出章节），由调用方决定恢复、丢弃或上报
#[derive(Error, Debug, Clone)]
#[error("ADDM loop stopped at iteration {}/{}: {source}", .state.current_iteration, .state.max_iterations)]
pub struct LoopFailure {
    #[source]
    pub source: CoordinationError,
    pub state: LoopState,
}

impl LoopFailure {
    pub fn new(source: CoordinationError, mut state: LoopState) -> Self {
        state.error = Some(source.to_string());
        Self { source, state }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, CoordinationError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_failure_records_error_on_state() {
        let state = LoopState::new(3);
        let failure = LoopFailure::new(CoordinationError::Backend("503".to_string()), state);
        assert_eq!(failure.state.error.as_deref(), Some("Backend error: 503"));
        assert!(!failure.is_cancelled());
        assert!(failure.to_string().contains("iteration 0/3"));
    }

    #[test]
    fn test_cancelled_failure() {
        let failure = LoopFailure::new(CoordinationError::Cancelled, LoopState::new(2));
        assert!(failure.is_cancelled());
    }
}
