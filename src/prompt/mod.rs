//! 分章节提示词：编译器 + 一致性校验

pub mod compiler;
pub mod validator;

pub use compiler::{
    assemble_sections, parse_sections, ParsedSection, PromptContext, PromptKind, PromptPair,
    SectionedPromptCompiler,
};
pub use validator::{find_forbidden_phrase, PromptValidator, FORBIDDEN_PHRASES};
