//! ADDM - 自适应协调引擎
//!
//! 模块划分：
//! - **addm**: 多轮决策循环（DDM 决策调节器、循环状态、质量打分）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与端到端的 CoordinationEngine
//! - **discovery**: 执行历史与基于相似度的模式发现
//! - **ledger**: 随时间衰减的信号账本
//! - **llm**: 生成后端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **prompt**: 分章节提示词编译与一致性校验
//! - **registry**: Specialist / Approach 表现注册表
//! - **router**: 任务画像与 Approach / Specialist 路由
//! - **store**: 按键原子更新的键值存储接口

pub mod addm;
pub mod config;
pub mod core;
pub mod discovery;
pub mod ledger;
pub mod llm;
pub mod observability;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod store;

pub use crate::core::{CoordinationEngine, CoordinationError, LoopFailure, TaskReport};
