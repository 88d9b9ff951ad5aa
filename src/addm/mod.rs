//! ADDM 决策循环
//!
//! - state：循环状态与已产出章节
//! - quality：内容质量特征与打分
//! - ddm：多备选漂移扩散模型
//! - decision / regulator：决策类型与默认决策函数（证据 + DDM）
//! - loop_：驱动 initial → research* → enhance / complete 的循环

pub mod ddm;
pub mod decision;
pub mod loop_;
pub mod quality;
pub mod regulator;
pub mod state;

pub use ddm::{DdmResult, MultiAlternativeDdm};
pub use decision::{
    Decision, DecisionInput, DecisionKind, DecisionOutcome, DecisionPolicy, RefinementStrategy,
};
pub use loop_::{AddmLoop, LoopEvent, LoopOutcome, LoopSession, Termination};
pub use quality::{HeuristicScorer, QualityMetrics, QualityScorer};
pub use regulator::{adjust_for_iteration, assess_evidence, DecisionRegulator, Evidence};
pub use state::{LoopState, Section, SectionKind};
