//! 分章节提示词编译
//!
//! 每种章节各有一套 system/user 提示词，system 提示词以 `[SECTION:...]` 标签开头：
//! - initial：独立完整的基础内容，不提轮次
//! - research(n)：只写 focus_areas 上的新增内容，不引用、不复述其他章节
//! - enhance：基于之前每个章节（逐个列出，而不是先合并）的唯一综合版本，像唯一回答一样呈现
//! - compile：把带标签的章节合成一个层级结构的文档，这是唯一允许做去重的地方
//!
//! 章节之间靠「互不重叠」的生成指令保持一致，而不是事后让模型做自由文本去重。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::addm::{Decision, LoopState, RefinementStrategy, Section, SectionKind};
use crate::config::WorkflowMode;
use crate::core::CoordinationError;
use crate::registry::{Approach, SignatureRequirements, StyleMetadata};

/// 提示词用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptKind {
    Initial,
    Research { index: usize },
    Enhance,
    Compile,
}

impl PromptKind {
    /// system 提示词开头的标签
    pub fn tag(&self) -> String {
        match self {
            PromptKind::Initial => "[SECTION:INITIAL]".to_string(),
            PromptKind::Research { index } => format!("[SECTION:RESEARCH-{index}]"),
            PromptKind::Enhance => "[SECTION:ENHANCE]".to_string(),
            PromptKind::Compile => "[SECTION:COMPILE]".to_string(),
        }
    }

    /// 生成内容的提示词（initial / research）不得含去重、合并类指令
    pub fn is_content_generation(&self) -> bool {
        matches!(self, PromptKind::Initial | PromptKind::Research { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPair {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    /// research 提示词要求覆盖的方向
    pub focus_areas: Vec<String>,
}

/// 编译提示词所需的任务上下文
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub workflow_mode: WorkflowMode,
    pub approach: Option<&'a Approach>,
    pub strategy: Option<&'a RefinementStrategy>,
}

impl<'a> PromptContext<'a> {
    pub fn new(task: &'a str, workflow_mode: WorkflowMode) -> Self {
        Self {
            task,
            workflow_mode,
            approach: None,
            strategy: None,
        }
    }

    pub fn with_approach(mut self, approach: &'a Approach) -> Self {
        self.approach = Some(approach);
        self
    }

    pub fn with_strategy(mut self, strategy: Option<&'a RefinementStrategy>) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SectionedPromptCompiler;

impl SectionedPromptCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 为产出下一个章节编译提示词；Complete 不产出章节，research 缺少 focus_areas 都是配置错误
    pub fn compile(
        &self,
        decision: &Decision,
        state: &LoopState,
        ctx: &PromptContext<'_>,
    ) -> Result<PromptPair, CoordinationError> {
        match decision {
            Decision::Initial => Ok(self.initial(ctx)),
            Decision::Research { focus_areas } => {
                let focus: Vec<String> = focus_areas
                    .iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                if focus.is_empty() {
                    return Err(CoordinationError::Configuration(
                        "research decision requires at least one focus area".to_string(),
                    ));
                }
                Ok(self.research(state.research_count() + 1, focus, state, ctx))
            }
            Decision::Enhance => {
                if state.sections.is_empty() {
                    return Err(CoordinationError::Configuration(
                        "enhance decision requires at least one prior section".to_string(),
                    ));
                }
                Ok(self.enhance(&state.sections, ctx))
            }
            Decision::Complete => Err(CoordinationError::Configuration(
                "complete decision produces no section prompt".to_string(),
            )),
        }
    }

    fn initial(&self, ctx: &PromptContext<'_>) -> PromptPair {
        let kind = PromptKind::Initial;
        let mut system = format!(
            "{}\nYou are writing the foundation response to the user's request. \
             Produce standalone content that reads as a complete answer on its own: \
             introduce the topic, cover the core points and close with a clear takeaway.\n",
            kind.tag()
        );
        system.push_str(&style_block(ctx));
        system.push_str(mode_block(ctx.workflow_mode));
        PromptPair {
            kind,
            system,
            user: ctx.task.to_string(),
            focus_areas: Vec::new(),
        }
    }

    fn research(
        &self,
        index: usize,
        focus_areas: Vec<String>,
        state: &LoopState,
        ctx: &PromptContext<'_>,
    ) -> PromptPair {
        let kind = PromptKind::Research { index };
        let mut system = format!(
            "{}\nYou are writing an independent expansion section for the user's request. \
             Write strictly additive content that covers only the focus areas listed below. \
             Do not reference, summarize or restate any other section, and do not write an introduction \
             or conclusion for the topic as a whole.\n\nFocus areas:\n",
            kind.tag()
        );
        for area in &focus_areas {
            system.push_str(&format!("- {area}\n"));
        }
        let covered: Vec<&str> = state
            .requested_facets
            .iter()
            .filter(|f| !focus_areas.iter().any(|a| a.eq_ignore_ascii_case(f)))
            .map(String::as_str)
            .collect();
        if !covered.is_empty() {
            system.push_str("\nAlready covered elsewhere (out of scope here):\n");
            for c in covered {
                system.push_str(&format!("- {c}\n"));
            }
        }
        if let Some(strategy) = ctx.strategy {
            if !strategy.constraints.is_empty() {
                system.push_str("\nConstraints:\n");
                for c in &strategy.constraints {
                    system.push_str(&format!("- {c}\n"));
                }
            }
        }
        system.push_str(&style_block(ctx));
        let user = format!(
            "Request: {}\n\nWrite the expansion section on: {}",
            ctx.task,
            focus_areas.join("; ")
        );
        PromptPair {
            kind,
            system,
            user,
            focus_areas,
        }
    }

    fn enhance(&self, sections: &[Section], ctx: &PromptContext<'_>) -> PromptPair {
        let kind = PromptKind::Enhance;
        let mut system = format!(
            "{}\nWrite the single authoritative answer to the user's request, using all of the source \
             material provided. Integrate every source, eliminating redundancy, and present the result \
             as if it were the only response: no remarks about sources, drafts, sections or revisions.\n",
            kind.tag()
        );
        if let Some(strategy) = ctx.strategy {
            if !strategy.target_improvements.is_empty() {
                system.push_str("\nPay particular attention to:\n");
                for t in &strategy.target_improvements {
                    system.push_str(&format!("- {t}\n"));
                }
            }
        }
        system.push_str(&style_block(ctx));

        let mut user = format!("Request: {}\n\nSource material:\n", ctx.task);
        for (i, section) in sections.iter().enumerate() {
            user.push_str(&format!(
                "\n### Source {} ({})\n{}\n",
                i + 1,
                section.label,
                section.content.trim()
            ));
        }
        PromptPair {
            kind,
            system,
            user,
            focus_areas: Vec::new(),
        }
    }

    /// 循环结束后把全部章节编译成一个文档
    pub fn compile_document(
        &self,
        sections: &[Section],
        ctx: &PromptContext<'_>,
    ) -> Result<PromptPair, CoordinationError> {
        if sections.is_empty() {
            return Err(CoordinationError::Configuration(
                "nothing to compile: no sections".to_string(),
            ));
        }
        let kind = PromptKind::Compile;
        let mut system = format!(
            "{}\nYou are given labeled sections that answer the same request. Combine them into exactly one \
             hierarchically structured document. Eliminate duplicate facts; when a concept appears more than \
             once keep the most detailed version. Keep every distinct fact, example and source. \
             Output only the final document, without section markers.\n",
            kind.tag()
        );
        system.push_str(&style_block(ctx));
        let user = format!(
            "Request: {}\n\n{}",
            ctx.task,
            assemble_sections(sections)
        );
        Ok(PromptPair {
            kind,
            system,
            user,
            focus_areas: Vec::new(),
        })
    }
}

fn style_block(ctx: &PromptContext<'_>) -> String {
    let default_style = StyleMetadata::default();
    let default_signature = SignatureRequirements::default();
    let (style, signature) = match ctx.approach {
        Some(a) => (&a.style, &a.signature),
        None => (&default_style, &default_signature),
    };

    let mut block = format!(
        "\nStyle:\n- Tone: {}\n- Structure: {}\n- Depth: {}\n",
        style.tone(),
        style.structure(),
        style.depth()
    );
    if !style.emphasis.is_empty() {
        block.push_str(&format!("- Emphasize: {}\n", style.emphasis.join(", ")));
    }
    if let Some(extra) = &style.instructions {
        block.push_str(&format!("- {extra}\n"));
    }

    let mut reqs = Vec::new();
    if let Some(n) = signature.min_paragraphs {
        reqs.push(format!("at least {n} paragraphs"));
    }
    if signature.require_examples {
        reqs.push("concrete examples".to_string());
    }
    if signature.require_sources {
        reqs.push("named sources for key claims".to_string());
    }
    if let Some(n) = signature.max_chars {
        reqs.push(format!("no more than {n} characters"));
    }
    if !reqs.is_empty() {
        block.push_str(&format!("Requirements: {}\n", reqs.join("; ")));
    }
    block
}

fn mode_block(mode: WorkflowMode) -> &'static str {
    match mode {
        WorkflowMode::ResearchAssembly => {
            "\nGround claims in evidence and name sources where possible.\n"
        }
        WorkflowMode::NewsAnalysis => {
            "\nSeparate reported facts from analysis and note who is affected.\n"
        }
    }
}

const SECTION_PATTERN: &str =
    r#"(?s)<<<SECTION kind=([a-z]+) label="([^"\n]*)">>>\n(.*?)\n<<<END SECTION>>>"#;

fn section_re() -> Result<&'static Regex, CoordinationError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SECTION_PATTERN))
        .as_ref()
        .map_err(|e| CoordinationError::Configuration(format!("section pattern: {e}")))
}

/// 以 `<<<` 开头的内容行（忽略前导反斜杠）前加一个 `\`，保证内容里不会出现分隔行
fn escape_markers(content: &str) -> String {
    content
        .split('\n')
        .map(|line| {
            if line.trim_start_matches('\\').starts_with("<<<") {
                format!("\\{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_markers(content: &str) -> String {
    content
        .split('\n')
        .map(|line| match line.strip_prefix('\\') {
            Some(rest) if rest.trim_start_matches('\\').starts_with("<<<") => rest,
            _ => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 带标签的章节文本（编译文档时的输入格式）
pub fn assemble_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| {
            format!(
                "<<<SECTION kind={} label=\"{}\">>>\n{}\n<<<END SECTION>>>",
                s.kind,
                s.label.replace('"', "'"),
                escape_markers(&s.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 从 assemble_sections 的输出中解析出的章节
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    pub kind: SectionKind,
    pub label: String,
    pub content: String,
}

/// assemble_sections 的逆操作；未知的章节类型报错
pub fn parse_sections(text: &str) -> Result<Vec<ParsedSection>, CoordinationError> {
    let re = section_re()?;
    re.captures_iter(text)
        .map(|caps| {
            let kind_name = caps.get(1).map_or("", |m| m.as_str());
            let kind = SectionKind::parse(kind_name).ok_or_else(|| {
                CoordinationError::Configuration(format!("unknown section kind: {kind_name}"))
            })?;
            Ok(ParsedSection {
                kind,
                label: caps.get(2).map_or("", |m| m.as_str()).to_string(),
                content: unescape_markers(caps.get(3).map_or("", |m| m.as_str())),
            })
        })
        .collect()
}
