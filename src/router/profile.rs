//! 任务画像：把任务文本转成特征向量（领域 / 意图 / 长度 / 工作流模式）
//!
//! 关键词匹配，按优先级取第一个命中的类别；特征形如 `domain:code`，值为 1.0。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::WorkflowMode;
use crate::discovery::FeatureVector;

/// 进入路由器的一个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    /// 主领域（specialist 的领域集中度按它统计）
    pub domain: String,
    pub features: FeatureVector,
    pub workflow_mode: WorkflowMode,
}

impl Task {
    pub fn new(prompt: impl Into<String>, workflow_mode: WorkflowMode) -> Self {
        TaskProfiler::profile(&prompt.into(), workflow_mode)
    }
}

pub struct TaskProfiler;

impl TaskProfiler {
    pub fn profile(prompt: &str, workflow_mode: WorkflowMode) -> Task {
        let lower = prompt.to_lowercase();
        let domain = Self::domain(&lower);
        let intent = Self::intent(&lower);
        let length = match prompt.chars().count() {
            0..=99 => "short",
            100..=499 => "medium",
            _ => "long",
        };
        let mode = match workflow_mode {
            WorkflowMode::ResearchAssembly => "research_assembly",
            WorkflowMode::NewsAnalysis => "news_analysis",
        };

        let mut features = FeatureVector::new();
        features.insert(format!("domain:{domain}"), 1.0);
        features.insert(format!("intent:{intent}"), 1.0);
        features.insert(format!("length:{length}"), 1.0);
        features.insert(format!("mode:{mode}"), 1.0);

        Task {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            domain: domain.to_string(),
            features,
            workflow_mode,
        }
    }

    fn domain(content: &str) -> &'static str {
        if Self::contains_any(
            content,
            &[
                "代码", "编程", "函数", "bug", "compile", "rust", "python", "javascript",
                "typescript", "implement", "refactor", "debug", "function", "struct", "api",
            ],
        ) {
            return "code";
        }
        if Self::contains_any(
            content,
            &["新闻", "news", "headline", "breaking", "announced", "election", "market today"],
        ) {
            return "news";
        }
        if Self::contains_any(
            content,
            &["研究", "论文", "research", "study", "paper", "literature", "evidence", "history of"],
        ) {
            return "research";
        }
        if Self::contains_any(content, &["商业", "business", "strategy", "market", "revenue", "startup"])
        {
            return "business";
        }
        "general"
    }

    fn intent(content: &str) -> &'static str {
        if Self::contains_any(content, &["比较", "compare", " vs ", "versus", "difference between"]) {
            return "comparison";
        }
        if Self::contains_any(
            content,
            &["分析", "评估", "analyze", "analyse", "evaluate", "assess", "why"],
        ) {
            return "analysis";
        }
        if Self::contains_any(content, &["总结", "摘要", "summarize", "summary", "tl;dr", "overview"]) {
            return "summary";
        }
        if Self::contains_any(content, &["解释", "如何", "explain", "how", "what is", "describe"]) {
            return "explanation";
        }
        if Self::contains_any(content, &["写", "write", "draft", "create", "generate", "compose"]) {
            return "creation";
        }
        "general"
    }

    fn contains_any(content: &str, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| content.contains(k))
    }
}
