//! 核心层：错误类型与端到端的协调引擎

pub mod engine;
pub mod error;

pub use engine::{
    create_llm_from_config, CoordinationEngine, DiscoveryRun, EngineSnapshot, PerformerSummary,
    TaskReport, DEFAULT_SPECIALIST,
};
pub use error::{CoordinationError, LoopFailure};
