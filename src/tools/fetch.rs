//! URL 抓取工具 - 读取用户贴出的日志、paste 或文档链接
//!
//! 只读，任何意图下都保留。纯文本响应原样返回（超过上限截断）；HTML 响应返回页面内的链接
//! 和 html2text 提取的可读文本，方便 Agent 改为抓取 raw / API 地址。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 返回内容上限（字符）
pub const MAX_FETCH_SIZE: usize = 100_000;
pub const FETCH_TIMEOUT_SECS: u64 = 15;
const MAX_LINKS: usize = 20;
/// 只在 HTML 开头这么多字节内找链接
const LINK_SCAN_BYTES: usize = 15_000;
const ERROR_BODY_CHARS: usize = 500;
const USER_AGENT: &str = "Mozilla/5.0 (bee-responder)";

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"href=["']([^"']+)["']"#).expect("href pattern is valid"))
}

fn asset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\.(css|js|png|jpg|jpeg|gif|svg|ico|woff2?|ttf|eot)(\?.*)?$").expect("asset pattern is valid")
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchUrlParams {
    /// The full URL to fetch, starting with https:// or http://
    url: String,
}

/// fetch_url 工具
pub struct FetchUrlTool {
    client: Client,
    max_chars: usize,
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_chars: MAX_FETCH_SIZE,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("Request timed out after {}s", FETCH_TIMEOUT_SECS)
            } else {
                format!("Could not reach {}: {}", url, e)
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Could not read response from {}: {}", url, e))?;
        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_CHARS).collect();
            return Err(format!("HTTP {} fetching {}: {}", status.as_u16(), url, snippet));
        }

        let body = body.trim_start_matches('\u{FEFF}');
        if is_html(body) {
            return Ok(self.describe_html(body, url));
        }
        Ok(truncate(body, self.max_chars))
    }

    fn describe_html(&self, html: &str, url: &str) -> String {
        let mut parts = vec!["This URL returned an HTML page, not raw text. The content may be loaded via JavaScript.".to_string()];
        let links = extract_links(html, url);
        if !links.is_empty() {
            parts.push("\nLinks found on the page (try fetching a raw/api/plain URL):".to_string());
            parts.extend(links.iter().map(|l| format!("  - {}", l)));
        }
        let text = from_read(html.as_bytes(), 120).unwrap_or_default();
        if !text.trim().is_empty() {
            parts.push(format!("\nPage text:\n{}", text.trim()));
        }
        truncate(&parts.join("\n"), self.max_chars)
    }
}

fn is_html(content: &str) -> bool {
    let head: String = content.chars().take(500).collect();
    let head = head.trim_start();
    ["<!DOCTYPE", "<!doctype", "<html", "<HTML"].iter().any(|p| head.starts_with(p))
}

fn truncate(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n... (truncated at {} characters)", &content[..idx], max_chars),
        None => content.to_string(),
    }
}

/// 页面内链接：跳过锚点、脚本与静态资源，相对地址按来源 URL 补全，去重后最多 MAX_LINKS 条
fn extract_links(html: &str, source_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(source_url) else {
        return Vec::new();
    };
    let window = match html.char_indices().nth(LINK_SCAN_BYTES) {
        Some((idx, _)) => &html[..idx],
        None => html,
    };
    let source = source_url.trim_end_matches('/');

    let mut links: Vec<String> = Vec::new();
    for capture in href_pattern().captures_iter(window) {
        let href = &capture[1];
        if href.starts_with('#') || href.starts_with("javascript:") || asset_pattern().is_match(href) {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        let clean = resolved.to_string();
        if clean.trim_end_matches('/') == source || links.contains(&clean) {
            continue;
        }
        links.push(clean);
        if links.len() == MAX_LINKS {
            break;
        }
    }
    links
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL and return it as text. If the page is HTML (e.g. a paste site with JS-rendered content), it returns the links found on the page so you can identify and fetch the raw/API/plain-text URL instead."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchUrlParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: FetchUrlParams = parse_args(args)?;
        let url = params.url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err("URL must start with https:// or http://".to_string());
        }
        tracing::info!(url = %url, "fetch_url tool execute");
        self.fetch(url).await
    }
}
