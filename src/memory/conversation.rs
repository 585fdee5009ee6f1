//! 既往对话：从代码托管平台导出的评论 JSON 中加载，并格式化为提示词片段
//!
//! 评论条目形如 `{"user": {"login", "type"}, "body", "author_association"}`。

use std::path::Path;

use serde::Deserialize;

/// 对话全文上限（字符），超出时从前面截断
pub const MAX_CONVERSATION_SIZE: usize = 50_000;
/// 分类提示词中每条评论保留的字符数
const CLASSIFY_SNIPPET_LEN: usize = 500;

/// 评论作者在仓库中的身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    Owner,
    Member,
    Collaborator,
    Other,
}

impl Association {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "OWNER" => Self::Owner,
            "MEMBER" => Self::Member,
            "COLLABORATOR" => Self::Collaborator,
            _ => Self::Other,
        }
    }

    /// 维护者身份：其意见优先于普通参与者
    pub fn is_authority(self) -> bool {
        !matches!(self, Self::Other)
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Member => "MEMBER",
            Self::Collaborator => "COLLABORATOR",
            Self::Other => "NONE",
        }
    }
}

/// 一条既往评论
#[derive(Debug, Clone)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub is_bot: bool,
    pub association: Association,
}

impl Comment {
    pub fn user(author: impl Into<String>, body: impl Into<String>, association: Association) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            is_bot: false,
            association,
        }
    }

    pub fn bot(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            is_bot: true,
            association: Association::Other,
        }
    }
}

#[derive(Deserialize)]
struct RawUser {
    login: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct RawComment {
    user: RawUser,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author_association: Option<String>,
}

/// 加载对话文件；不存在或格式错误时返回空列表
pub fn load_conversation(path: &Path) -> Vec<Comment> {
    if !path.exists() {
        return Vec::new();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|data| serde_json::from_str::<Vec<RawComment>>(&data).map_err(Into::into));
    match parsed {
        Ok(raw) => raw
            .into_iter()
            .map(|c| Comment {
                is_bot: c.user.kind == "Bot",
                author: c.user.login,
                body: c.body.unwrap_or_default(),
                association: Association::parse(c.author_association.as_deref().unwrap_or("NONE")),
            })
            .collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load conversation");
            Vec::new()
        }
    }
}

/// 主提示词中的完整对话：标注机器人回复，最后一条人工评论标为「respond to this」
pub fn format_conversation(issue_body: &str, comments: &[Comment]) -> String {
    let last_user = comments.iter().rposition(|c| !c.is_bot);
    let mut parts = vec![format!("**Original issue:**\n{}", issue_body)];
    for (i, c) in comments.iter().enumerate() {
        let label = if c.is_bot {
            "Bot response".to_string()
        } else if Some(i) == last_user {
            format!("Latest comment by @{} (respond to this)", c.author)
        } else {
            format!("Comment by @{}", c.author)
        };
        parts.push(format!("**{}:**\n{}", label, c.body));
    }

    let text = parts.join("\n\n---\n\n");
    let total = text.chars().count();
    if total <= MAX_CONVERSATION_SIZE {
        return text;
    }
    let tail: String = text.chars().skip(total - MAX_CONVERSATION_SIZE).collect();
    format!("... (earlier conversation truncated)\n\n{}", tail)
}

/// 回复判定用的简短对话
pub fn conversation_snippet(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return "(no prior messages)".to_string();
    }
    comments
        .iter()
        .map(|c| format!("**{}:** {}", c.author, c.body))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 意图分类用的对话：每条带身份标签，正文截断
pub fn tagged_conversation(comments: &[Comment]) -> String {
    comments
        .iter()
        .map(|c| {
            let tag = if c.association.is_authority() {
                c.association.tag()
            } else if c.is_bot {
                "BOT"
            } else {
                "USER"
            };
            let body: String = c.body.chars().take(CLASSIFY_SNIPPET_LEN).collect();
            format!("[{}] @{}: {}", tag, c.author, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_conversation_from_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");
        std::fs::write(
            &path,
            r#"[
                {"user": {"login": "alice", "type": "User"}, "body": "it crashes", "author_association": "NONE"},
                {"user": {"login": "helper[bot]", "type": "Bot"}, "body": "try X"},
                {"user": {"login": "owner", "type": "User"}, "body": "please fix", "author_association": "OWNER"}
            ]"#,
        )
        .unwrap();

        let comments = load_conversation(&path);
        assert_eq!(comments.len(), 3);
        assert!(comments[1].is_bot);
        assert_eq!(comments[2].association, Association::Owner);
        assert!(load_conversation(&dir.path().join("missing.json")).is_empty());
    }

    #[test]
    fn test_format_marks_latest_human_comment() {
        let comments = vec![
            Comment::user("alice", "first", Association::Other),
            Comment::user("bob", "second", Association::Member),
            Comment::bot("helper", "reply"),
        ];
        let text = format_conversation("body", &comments);
        assert!(text.starts_with("**Original issue:**\nbody"));
        assert!(text.contains("**Comment by @alice:**"));
        assert!(text.contains("**Latest comment by @bob (respond to this):**"));
        assert!(text.contains("**Bot response:**"));
    }

    #[test]
    fn test_format_truncates_from_front() {
        let comments = vec![Comment::user("alice", "y".repeat(MAX_CONVERSATION_SIZE), Association::Other)];
        let text = format_conversation("x", &comments);
        assert!(text.starts_with("... (earlier conversation truncated)"));
        assert!(text.ends_with('y'));
        assert!(!text.contains("Original issue"));
    }

    #[test]
    fn test_tagged_conversation_uses_authority() {
        let comments = vec![
            Comment::user("owner", "won't do this", Association::Owner),
            Comment::bot("helper", "ok"),
            Comment::user("alice", "z".repeat(600), Association::Other),
        ];
        let text = tagged_conversation(&comments);
        assert!(text.starts_with("[OWNER] @owner: won't do this"));
        assert!(text.contains("[BOT] @helper: ok"));
        let last = text.rsplit("\n\n").next().unwrap();
        assert_eq!(last.chars().count(), "[USER] @alice: ".len() + 500);
    }
}
