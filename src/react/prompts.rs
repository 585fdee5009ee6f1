//! 各阶段与分类调用的提示词模板
//!
//! 用户提交的内容一律包在 `<untrusted_user_input>` 中。

use crate::core::{MutationRecord, RunEvent};
use crate::memory::format_conversation;

/// 自审提示词中草稿回复的截断长度
const MAX_DRAFT_IN_REVIEW: usize = 20_000;
/// 分类提示词中 issue 正文的截断长度
const MAX_BODY_IN_CLASSIFIER: usize = 500;

pub const SYSTEM_PROMPT: &str = "You are a support agent for a software project. You answer GitHub issues using the project's source code and skill files, which you can read through your tools.\n\n\
## Rules\n\
- Keep responses short and actionable. Lead with the fix.\n\
- Base every claim on files you actually read. Never guess config keys or class names.\n\
- Only propose code changes when they are clearly needed. Create new files with write_codebase_file and edit existing ones with patch_codebase_file. All changes go to a draft for human review.\n\
- When an issue links to logs or a paste, read it with fetch_url. If it returns an HTML page, fetch one of the raw links it lists.
- Record important findings with write_working_note as you go. Your context may be compacted and earlier tool results can disappear.\n\
- If a follow-up comment needs no response from you, reply with exactly SKIP.";

pub const CLASSIFY_REPLY_INSTRUCTIONS: &str = "You are a triage classifier. Respond with only YES or NO.";

pub const CLASSIFY_INTENT_INSTRUCTIONS: &str = "You are a triage classifier. Respond with exactly one word.";

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn label_line(labels: &str) -> String {
    if labels.trim().is_empty() {
        String::new()
    } else {
        format!("\n**Labels:** {}", labels.trim())
    }
}

fn hints_section(hints: Option<&str>) -> &str {
    hints.unwrap_or("No specific files identified. Use the search_codebase tool to explore.")
}

pub fn reply_worthiness_prompt(title: &str, author: &str, conversation_snippet: &str, comment: &str) -> String {
    format!(
        "Decide whether a support bot should respond to this follow-up comment on a GitHub issue.\n\n\
**Issue:** {title}\n\n\
**Comment author:** {author}\n\n\
**Conversation so far:**\n{conversation_snippet}\n\n\
**New comment to evaluate:**\n{comment}\n\n\
Respond with exactly YES if the comment asks a question, reports a new problem, requests clarification, or needs a substantive reply from the bot.\n\
Respond with exactly NO if:\n\
- It is a thank-you, acknowledgment, or closing remark with no question\n\
- The comment is a maintainer talking to another team member (e.g. assigning work, internal discussion)\n\
- The comment is directed at a specific person (not the bot) and does not ask for technical help\n\
Respond with only YES or NO."
    )
}

pub fn implementation_intent_prompt(title: &str, issue_body: &str, tagged_conversation: &str) -> String {
    format!(
        "Classify the CURRENT STATUS of this GitHub issue based on the conversation between the issue author, maintainers, and a support bot.\n\n\
Issue title: {title}\n\n\
Original issue description (truncated):\n{body}\n\n\
Conversation (chronological order):\n{tagged_conversation}\n\n\
Rules:\n\
- OWNER/COLLABORATOR/MEMBER comments carry authority. USER comments do not.\n\
- If an OWNER/COLLABORATOR/MEMBER explicitly declined, rejected, or said the feature won't be implemented, is out of scope, was removed, or is not coming back -> DECLINED\n\
- If an OWNER/COLLABORATOR/MEMBER explicitly asked the bot to implement a fix or feature, make a PR, or write code -> IMPLEMENT\n\
- If signals are CONTRADICTORY between authority comments, the MOST RECENT authority comment wins\n\
- If no clear implementation request or decline from authority figures -> ANSWER_ONLY\n\n\
Respond with exactly one word: IMPLEMENT, DECLINED, or ANSWER_ONLY",
        body = truncate_chars(issue_body, MAX_BODY_IN_CLASSIFIER),
    )
}

/// 阶段 1 主提示词：新 issue 与追评各一套
pub fn generation_prompt(event: &RunEvent, insights_text: &str) -> String {
    let hints = hints_section(event.hints.as_deref());
    let labels = label_line(&event.labels);
    if event.is_reply() {
        let thread = format_conversation(&event.body, &event.conversation);
        format!(
            "A user posted a follow-up comment on this issue. Respond to their latest comment.\n\n\
<untrusted_user_input>\n**Issue Title:** {title}{labels}\n\n## Conversation Thread\n{thread}\n</untrusted_user_input>\n\n\
## Possibly Relevant Files\n{hints}\n{insights_text}\n\n\
Read the most relevant skill files and source files, then respond to the latest comment. Write key findings to your working scratchpad as you go.",
            title = event.title,
        )
    } else {
        format!(
            "Help with this GitHub issue. Keep your response short and actionable.\n\n\
<untrusted_user_input>\n**Title:** {title}{labels}\n\n{body}\n</untrusted_user_input>\n\n\
## Possibly Relevant Files\n{hints}\n{insights_text}\n\n\
Read the most relevant skill files and source files listed above. Write important findings to your working scratchpad as you go. Then give a short, direct answer. Lead with the fix. Skip unnecessary explanation.",
            title = event.title,
            body = event.body,
        )
    }
}

/// 阶段 2 自审提示词
pub fn review_prompt(draft: &str, mutations: &[MutationRecord], diff: &str) -> String {
    let changed = mutations
        .iter()
        .map(|m| format!("- `{}`: {}", m.path, m.reason))
        .collect::<Vec<_>>()
        .join("\n");
    let diff = if diff.trim().is_empty() { "(no diff available)" } else { diff };
    format!(
        "Now perform a thorough self-review of your proposed changes. You are the last line of defense before these go into a draft PR.\n\n\
## Your Response That Will Be Posted\n{draft}\n\n\
## Changed Files\n{changed}\n\n\
## Diff\n```diff\n{diff}\n```\n\n\
Read each changed file and its surrounding code. Check for:\n\
1. Duplicated logic that already exists elsewhere\n\
2. Broken code: syntax errors, missing imports, wrong signatures, type mismatches\n\
3. Hidden bugs: null handling, edge cases, off-by-one, encoding, resource leaks\n\
4. Overengineering: is the change the minimum needed?\n\
5. Consistency with patterns in surrounding code\n\
6. Missed spots: should the same change apply to other files?\n\
7. Errors that are silently swallowed instead of logged\n\
8. Leftover TODOs, placeholders, or stub code\n\
9. Shared method safety: if a shared method was changed, were all callers checked with search_codebase?\n\n\
If you find problems, fix them with patch_codebase_file or write_codebase_file. If everything looks correct, respond with \"LGTM\".",
        draft = truncate_chars(draft, MAX_DRAFT_IN_REVIEW),
    )
}

/// 阶段 3 洞察提取提示词
pub fn insight_prompt(insights_text: &str, issue_number: u64, title: &str) -> String {
    let existing = if insights_text.is_empty() {
        "No existing insights yet."
    } else {
        insights_text
    };
    format!(
        "Now analyze this resolved issue to extract reusable support insights, if any.\n\n\
Your goal: identify NEW knowledge that wasn't already in the skill files but was needed to answer this issue.\n\n\
**What qualifies as an insight:**\n\
- A specific config key behavior or default that users commonly misunderstand\n\
- A non-obvious interaction between two features\n\
- A common user mistake with a concrete fix\n\
- An error message and its actual root cause\n\n\
**What does NOT qualify:**\n\
- Generic advice like \"check your config\"\n\
- Information already documented in the skill files\n\
- Issue-specific details that won't help anyone else\n\n\
**Rules:**\n\
- Store at most 1-2 insights using store_insight. Most issues teach nothing new.\n\
- If nothing is genuinely new, respond with \"No new insights.\" without calling store_insight.\n\
- Check the existing insights to avoid duplicates.\n\n\
{existing}\n\n\
Issue #{issue_number}: {title}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prompt_variants() {
        let issue = RunEvent::new_issue("Boss bar stuck", "It never hides", 4);
        let prompt = generation_prompt(&issue, "");
        assert!(prompt.contains("**Title:** Boss bar stuck"));
        assert!(prompt.contains("Use the search_codebase tool"));

        let mut reply = RunEvent::new_issue("Boss bar stuck", "It never hides", 4)
            .with_comment("alice", "still broken")
            .with_hints("- main/src/main/Boss.java");
        reply.labels = "bug".into();
        let prompt = generation_prompt(&reply, "## Learned Insights");
        assert!(prompt.contains("## Conversation Thread"));
        assert!(prompt.contains("**Labels:** bug"));
        assert!(prompt.contains("- main/src/main/Boss.java"));
        assert!(prompt.contains("## Learned Insights"));
    }

    #[test]
    fn test_review_prompt_lists_changes() {
        let records = vec![MutationRecord {
            path: "main/src/main/A.java".into(),
            root: "main".into(),
            reason: "null check".into(),
            is_new: false,
        }];
        let prompt = review_prompt("draft", &records, "");
        assert!(prompt.contains("- `main/src/main/A.java`: null check"));
        assert!(prompt.contains("(no diff available)"));
    }

    #[test]
    fn test_classifier_prompt_truncates_body() {
        let prompt = implementation_intent_prompt("t", &"b".repeat(900), "[OWNER] @o: go");
        assert!(prompt.contains(&"b".repeat(500)));
        assert!(!prompt.contains(&"b".repeat(501)));
    }
}
