//! 洞察存储：从已解决的 issue 中提炼的可复用知识
//!
//! 按作用域分两份 JSON 文件（`{project}.json` 与 `global.json`），两者互不影响。
//! 运行期间 `append` 只做校验和缓冲，运行结束时 `flush` 合并、剔除过期条目并截断到上限后落盘。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 每个作用域最多保留的条目数
pub const MAX_INSIGHTS: usize = 50;
/// 过期天数
pub const INSIGHT_EXPIRY_DAYS: i64 = 90;
pub const MIN_INSIGHT_LEN: usize = 20;
pub const MAX_INSIGHT_LEN: usize = 500;
/// 单次运行最多记录的洞察数
pub const MAX_INSIGHTS_PER_RUN: usize = 2;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Insight too short ({0} chars). Must be specific and actionable.")]
    TooShort(usize),

    #[error("Insight too long ({0} chars). Keep to 1-3 concise sentences.")]
    TooLong(usize),

    #[error("scope must be 'project' or 'global', got '{0}'")]
    InvalidScope(String),

    #[error("Already stored {0} insights for this issue. Do not store more.")]
    RunLimitReached(usize),

    #[error("Failed to persist insights to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Insight file {path} is unreadable, refusing to overwrite: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsightScope {
    #[default]
    Project,
    Global,
}

impl FromStr for InsightScope {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            other => Err(InsightError::InvalidScope(other.to_string())),
        }
    }
}

/// 持久化的洞察条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub topic: String,
    #[serde(rename = "insight")]
    pub text: String,
    #[serde(default, alias = "relatedSkill")]
    pub related_skill: String,
    #[serde(default)]
    pub scope: InsightScope,
    pub date: NaiveDate,
    #[serde(default, alias = "issueId")]
    pub issue: u64,
}

/// Agent 通过 store_insight 提交的新洞察（尚未带日期和 issue 号）
#[derive(Debug, Clone)]
pub struct NewInsight {
    pub topic: String,
    pub text: String,
    pub related_skill: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
struct PendingInsight {
    topic: String,
    text: String,
    related_skill: String,
    scope: InsightScope,
}

/// 洞察存储
pub struct InsightStore {
    dir: PathBuf,
    project_id: String,
    max_insights: usize,
    expiry_days: i64,
    pending: Mutex<Vec<PendingInsight>>,
}

impl InsightStore {
    pub fn new(dir: impl AsRef<Path>, project_id: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            project_id: project_id.into(),
            max_insights: MAX_INSIGHTS,
            expiry_days: INSIGHT_EXPIRY_DAYS,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limits(mut self, max_insights: usize, expiry_days: i64) -> Self {
        self.max_insights = max_insights;
        self.expiry_days = expiry_days;
        self
    }

    pub fn path(&self, scope: InsightScope) -> PathBuf {
        match scope {
            InsightScope::Project => self.dir.join(format!("{}.json", self.project_id)),
            InsightScope::Global => self.dir.join("global.json"),
        }
    }

    /// 读取某作用域的持久化条目；文件不存在或无法解析时视为空
    pub fn load(&self, scope: InsightScope) -> Vec<Insight> {
        match self.read_entries(scope) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load insights");
                Vec::new()
            }
        }
    }

    /// 逐条解析：单条记录字段缺失或格式错误时跳过该条，其余照常保留；
    /// 文件本身不是 JSON 数组时报错
    fn read_entries(&self, scope: InsightScope) -> Result<Vec<Insight>, InsightError> {
        let path = self.path(scope);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(InsightError::Persist {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let records: Vec<serde_json::Value> = serde_json::from_str(&data).map_err(|source| InsightError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;

        let total = records.len();
        let entries: Vec<Insight> = records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value::<Insight>(record) {
                Ok(insight) => Some(insight),
                Err(e) => {
                    tracing::warn!(path = %path.display(), index, error = %e, "skipping invalid insight record");
                    None
                }
            })
            .collect();
        if entries.len() < total {
            tracing::warn!(path = %path.display(), skipped = total - entries.len(), "dropped invalid insight records");
        }
        Ok(entries)
    }

    /// 读取并剔除过期 / 超额条目（仅内存，不落盘）
    pub fn load_pruned(&self, scope: InsightScope, today: NaiveDate) -> Vec<Insight> {
        prune_insights(self.load(scope), today, self.max_insights, self.expiry_days)
    }

    /// 校验并缓冲一条新洞察
    pub fn append(&self, insight: NewInsight) -> Result<(), InsightError> {
        let len = insight.text.chars().count();
        if len < MIN_INSIGHT_LEN {
            return Err(InsightError::TooShort(len));
        }
        if len > MAX_INSIGHT_LEN {
            return Err(InsightError::TooLong(len));
        }
        let scope = InsightScope::from_str(&insight.scope)?;

        let mut pending = self.lock_pending();
        if pending.len() >= MAX_INSIGHTS_PER_RUN {
            return Err(InsightError::RunLimitReached(pending.len()));
        }
        tracing::info!(topic = %insight.topic, ?scope, "insight buffered");
        pending.push(PendingInsight {
            topic: insight.topic,
            text: insight.text,
            related_skill: insight.related_skill,
            scope,
        });
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// 合并该作用域的缓冲条目并落盘，返回写入的新条目数；没有缓冲条目时不触碰文件。
    /// 已有文件无法解析时返回 Corrupt，不覆盖原文件
    pub fn flush(&self, scope: InsightScope, today: NaiveDate, issue: u64) -> Result<usize, InsightError> {
        let fresh: Vec<Insight> = {
            let mut pending = self.lock_pending();
            let (taken, rest): (Vec<_>, Vec<_>) = pending.drain(..).partition(|p| p.scope == scope);
            *pending = rest;
            taken
                .into_iter()
                .map(|p| Insight {
                    topic: p.topic,
                    text: p.text,
                    related_skill: p.related_skill,
                    scope: p.scope,
                    date: today,
                    issue,
                })
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        let added = fresh.len();
        let mut entries = self.read_entries(scope)?;
        entries.extend(fresh);
        let merged = prune_insights(entries, today, self.max_insights, self.expiry_days);

        let path = self.path(scope);
        let persist_err = |source| InsightError::Persist {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(persist_err)?;
        std::fs::write(&path, serde_json::to_string_pretty(&merged)?).map_err(persist_err)?;

        tracing::info!(?scope, added, total = merged.len(), "insights persisted");
        Ok(added)
    }

    /// 依次落盘两个作用域；一个失败不影响另一个
    pub fn flush_all(&self, today: NaiveDate, issue: u64) -> Vec<Result<usize, InsightError>> {
        [InsightScope::Project, InsightScope::Global]
            .into_iter()
            .map(|scope| self.flush(scope, today, issue))
            .collect()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingInsight>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 剔除早于 `today - expiry_days` 的条目，按日期稳定排序后保留最近的 `max` 条
pub fn prune_insights(entries: Vec<Insight>, today: NaiveDate, max: usize, expiry_days: i64) -> Vec<Insight> {
    let cutoff = today - Duration::days(expiry_days);
    let mut valid: Vec<Insight> = entries.into_iter().filter(|i| i.date >= cutoff).collect();
    valid.sort_by_key(|i| i.date);
    if valid.len() > max {
        valid.drain(..valid.len() - max);
    }
    valid
}

/// 拼成提示词中的「已学洞察」段落；两边都为空时返回空串
pub fn format_for_prompt(project: &[Insight], global: &[Insight]) -> String {
    if project.is_empty() && global.is_empty() {
        return String::new();
    }
    let mut lines = vec!["## Learned Insights (from previous issues, supplementary to skill files)".to_string()];
    for i in project.iter().chain(global) {
        let tag = match i.scope {
            InsightScope::Project => format!("[{}]", i.topic),
            InsightScope::Global => format!("[global/{}]", i.topic),
        };
        lines.push(format!("- **{}** (#{}): {}", tag, i.issue, i.text));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn entry(topic: &str, date: &str) -> Insight {
        Insight {
            topic: topic.to_string(),
            text: "a concrete and actionable insight".to_string(),
            related_skill: String::new(),
            scope: InsightScope::Project,
            date: day(date),
            issue: 1,
        }
    }

    fn new_insight(text: &str, scope: &str) -> NewInsight {
        NewInsight {
            topic: "bosses".to_string(),
            text: text.to_string(),
            related_skill: "bosses".to_string(),
            scope: scope.to_string(),
        }
    }

    #[test]
    fn test_prune_keeps_most_recent_within_window() {
        let today = day("2026-06-01");
        // 10 条过期 + 60 条有效
        let mut entries: Vec<Insight> = (0..10).map(|i| entry(&format!("old{}", i), "2025-01-01")).collect();
        for i in 0..60i64 {
            let date = today - Duration::days(59 - i);
            entries.push(entry(&format!("t{}", i), &date.format("%Y-%m-%d").to_string()));
        }

        let pruned = prune_insights(entries, today, MAX_INSIGHTS, INSIGHT_EXPIRY_DAYS);
        assert_eq!(pruned.len(), 50);
        assert_eq!(pruned.first().unwrap().topic, "t10");
        assert_eq!(pruned.last().unwrap().topic, "t59");
        assert!(pruned.iter().all(|i| !i.topic.starts_with("old")));
    }

    #[test]
    fn test_prune_size_is_min_of_valid_and_cap() {
        let today = day("2026-06-01");
        for (n, k) in [(5usize, 2usize), (70, 30), (70, 5), (0, 0)] {
            let mut entries = Vec::new();
            for i in 0..n {
                let date = if i < k { "2020-01-01" } else { "2026-05-30" };
                entries.push(entry(&i.to_string(), date));
            }
            let pruned = prune_insights(entries, today, MAX_INSIGHTS, INSIGHT_EXPIRY_DAYS);
            assert_eq!(pruned.len(), (n - k).min(MAX_INSIGHTS));
        }
    }

    #[test]
    fn test_append_validates_length_scope_and_run_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");

        assert!(matches!(store.append(new_insight("too short", "project")), Err(InsightError::TooShort(9))));
        assert!(matches!(
            store.append(new_insight(&"x".repeat(501), "project")),
            Err(InsightError::TooLong(501))
        ));
        assert!(matches!(
            store.append(new_insight("long enough insight text here", "team")),
            Err(InsightError::InvalidScope(_))
        ));

        store.append(new_insight("boss bars need a world reload", "project")).unwrap();
        store.append(new_insight("folia requires region schedulers", "global")).unwrap();
        assert!(matches!(
            store.append(new_insight("a third insight is one too many", "project")),
            Err(InsightError::RunLimitReached(2))
        ));
        assert_eq!(store.pending_count(), 2);
    }

    #[test]
    fn test_flush_scopes_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");
        let today = day("2026-06-01");

        store.append(new_insight("boss bars need a world reload", "project")).unwrap();
        store.append(new_insight("folia requires region schedulers", "global")).unwrap();

        assert_eq!(store.flush(InsightScope::Project, today, 42).unwrap(), 1);
        assert!(!store.path(InsightScope::Global).exists());
        assert_eq!(store.pending_count(), 1);

        let project = store.load(InsightScope::Project);
        assert_eq!(project.len(), 1);
        assert_eq!(project[0].issue, 42);
        assert_eq!(project[0].date, today);

        let results = store.flush_all(today, 42);
        assert_eq!(results.iter().map(|r| *r.as_ref().unwrap()).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(store.load(InsightScope::Global)[0].scope, InsightScope::Global);
    }

    #[test]
    fn test_flush_prunes_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo").with_limits(3, 90);
        let today = day("2026-06-01");
        let existing = vec![
            entry("expired", "2025-12-01"),
            entry("a", "2026-05-01"),
            entry("b", "2026-05-02"),
            entry("c", "2026-05-03"),
        ];
        std::fs::write(
            store.path(InsightScope::Project),
            serde_json::to_string(&existing).unwrap(),
        )
        .unwrap();

        store.append(new_insight("boss bars need a world reload", "project")).unwrap();
        store.flush(InsightScope::Project, today, 9).unwrap();

        let topics: Vec<String> = store.load(InsightScope::Project).into_iter().map(|i| i.topic).collect();
        assert_eq!(topics, vec!["b", "c", "bosses"]);
    }

    #[test]
    fn test_load_accepts_camel_case_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");
        std::fs::write(
            store.path(InsightScope::Global),
            r#"[{"topic":"t","insight":"some insight text","relatedSkill":"s","scope":"global","date":"2026-01-02","issueId":5}]"#,
        )
        .unwrap();
        let loaded = store.load(InsightScope::Global);
        assert_eq!(loaded[0].related_skill, "s");
        assert_eq!(loaded[0].issue, 5);

        std::fs::write(store.path(InsightScope::Project), "not json").unwrap();
        assert!(store.load(InsightScope::Project).is_empty());
    }

    #[test]
    fn test_flush_keeps_valid_records_next_to_invalid_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");
        let today = day("2026-06-01");
        std::fs::write(
            store.path(InsightScope::Project),
            r#"[
  {"topic":"a","insight":"first persisted insight text","date":"2026-05-01","issue":1},
  {"topic":"b","insight":"second persisted insight text","date":"2026-05-02","issue":2},
  {"topic":"c","insight":"record without any date field","issue":3}
]"#,
        )
        .unwrap();

        store.append(new_insight("boss bars need a world reload", "project")).unwrap();
        assert_eq!(store.flush(InsightScope::Project, today, 9).unwrap(), 1);

        let topics: Vec<String> = store.load(InsightScope::Project).into_iter().map(|i| i.topic).collect();
        assert_eq!(topics, vec!["a", "b", "bosses"]);
    }

    #[test]
    fn test_flush_refuses_to_overwrite_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");
        let path = store.path(InsightScope::Project);
        std::fs::write(&path, "{ truncated").unwrap();

        store.append(new_insight("boss bars need a world reload", "project")).unwrap();
        let err = store.flush(InsightScope::Project, day("2026-06-01"), 9).unwrap_err();
        assert!(matches!(err, InsightError::Corrupt { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ truncated");
    }

    #[test]
    fn test_format_for_prompt_tags_scope() {
        assert_eq!(format_for_prompt(&[], &[]), "");
        let mut global = entry("folia", "2026-05-01");
        global.scope = InsightScope::Global;
        let text = format_for_prompt(&[entry("bosses", "2026-05-01")], &[global]);
        assert!(text.contains("- **[bosses]** (#1): a concrete"));
        assert!(text.contains("- **[global/folia]** (#1)"));
    }
}
