//! Mock 生成后端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：根据系统提示词中的章节标签生成一段结构化的确定性内容
//! - ScriptedLlmClient：按顺序返回预设结果（可含失败），并记录收到的请求

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, Message, Role, TokenStream};

/// 流式输出时每段字符数
const CHUNK_CHARS: usize = 32;

fn chunked(content: String) -> TokenStream {
    let chars: Vec<char> = content.chars().collect();
    let chunks: Vec<Result<String, String>> = chars
        .chunks(CHUNK_CHARS)
        .map(|c| Ok(c.iter().collect::<String>()))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// Mock 客户端：取系统提示词里的 `[SECTION:...]` 标签与最后一条 User 消息，拼出一段 Markdown
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn section_tag(messages: &[Message]) -> String {
        messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| {
                let start = m.content.find("[SECTION:")?;
                let rest = &m.content[start + 1..];
                let end = rest.find(']')?;
                Some(rest[..end].to_string())
            })
            .unwrap_or_else(|| "SECTION:GENERAL".to_string())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.lines().next().unwrap_or("").to_string())
            .unwrap_or_else(|| "(no input)".to_string());
        let tag = Self::section_tag(messages);

        Ok(format!(
            "## {tag}\n\n\
             **Overview.** This part addresses: {last_user}. According to the available \
             background, the topic has 3 main aspects worth covering.\n\n\
             **Details.** For example, each aspect is described with its context, such as \
             prior work and current practice.\n\n\
             **Takeaways.**\n\n1. The first point.\n2. The second point.\n3. However, trade-offs remain."
        ))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.complete(messages).await?;
        Ok(chunked(content))
    }
}

/// 按脚本返回的客户端：每次调用弹出一个预设结果，耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 全部成功的脚本
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.complete(messages).await?;
        Ok(chunked(content))
    }
}
