//! 发往生成后端的消息
//!
//! 角色与 OpenAI 兼容 API 一致；系统提示词以第一条 System 消息承载。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 把系统提示词放在消息列表最前面（已有的 System 消息会被替换）
pub fn with_system_prompt(system_prompt: &str, messages: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(Message::system(system_prompt));
    out.extend(messages.iter().filter(|m| m.role != Role::System).cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_system_prompt_replaces_existing() {
        let msgs = vec![Message::system("old"), Message::user("hi")];
        let out = with_system_prompt("new", &msgs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Message::system("new"));
        assert_eq!(out[1], Message::user("hi"));
    }
}
