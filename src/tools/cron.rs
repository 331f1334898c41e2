//! Cron tool: scheduled job records under `cron/jobs.json`.
//!
//! The runtime only maintains the on-disk job list; an out-of-process
//! worker executes due jobs. All mutations are read-modify-write under an
//! exclusive lock.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    /// 5-field cron expression (minute hour dom month dow), UTC.
    pub schedule: String,
    /// Message fed to the agent when the job fires.
    pub command: String,
    pub channel: Option<String>,
    pub sender: Option<String>,
    pub created_at_ms: i64,
    pub next_run_at_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CronStore {
    version: u32,
    jobs: Vec<CronJob>,
}

impl Default for CronStore {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Cron expression handling
// ---------------------------------------------------------------------------

fn parse_cron_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }
    if let Some(step_str) = field.strip_prefix("*/") {
        let step = step_str.parse::<u32>().ok()?;
        if step == 0 {
            return None;
        }
        return Some((min..=max).step_by(step as usize).collect());
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo = lo.parse::<u32>().ok()?;
            let hi = hi.parse::<u32>().ok()?;
            if lo > hi || !(min..=max).contains(&lo) || !(min..=max).contains(&hi) {
                return None;
            }
            values.extend(lo..=hi);
        } else {
            let value = part.parse::<u32>().ok()?;
            if !(min..=max).contains(&value) {
                return None;
            }
            values.push(value);
        }
    }
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Next fire time for a 5-field cron expression after `now`, in epoch ms.
pub fn next_run_from_expr(expr: &str, now: i64) -> Option<i64> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    let minutes = parse_cron_field(fields[0], 0, 59)?;
    let hours = parse_cron_field(fields[1], 0, 23)?;
    let dom = parse_cron_field(fields[2], 1, 31)?;
    let month = parse_cron_field(fields[3], 1, 12)?;
    let dow = parse_cron_field(fields[4], 0, 6)?;

    let mut candidate = DateTime::from_timestamp_millis(now)?
        .with_second(0)?
        .with_nanosecond(0)?
        + Duration::minutes(1);
    let limit = candidate + Duration::days(366);

    while candidate <= limit {
        if minutes.contains(&candidate.minute())
            && hours.contains(&candidate.hour())
            && dom.contains(&candidate.day())
            && month.contains(&candidate.month())
            && dow.contains(&candidate.weekday().num_days_from_sunday())
        {
            return Some(candidate.timestamp_millis());
        }
        candidate += Duration::minutes(1);
    }
    None
}

/// Whether the expression parses and has a future run time.
pub fn is_valid_cron_expr(expr: &str) -> bool {
    next_run_from_expr(expr, now_ms()).is_some()
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

fn store_path(dir: &Path) -> PathBuf {
    dir.join("jobs.json")
}

fn load_store(dir: &Path) -> Result<CronStore> {
    let path = store_path(dir);
    if !path.exists() {
        return Ok(CronStore::default());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content).unwrap_or_default())
}

fn save_store(dir: &Path, store: &CronStore) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join("jobs.json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(store)?)?;
    std::fs::rename(&tmp, store_path(dir))?;
    Ok(())
}

/// Run `f` over the store with the cron lock held.
fn with_store<T>(dir: &Path, f: impl FnOnce(&mut CronStore) -> Result<T>) -> Result<T> {
    std::fs::create_dir_all(dir)?;
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(dir.join(".lock"))?;
    lock.lock_exclusive()
        .map_err(|e| BashError::Tool(format!("cron lock failed: {}", e)))?;

    let mut store = load_store(dir)?;
    let result = f(&mut store);
    if result.is_ok() {
        save_store(dir, &store)?;
    }
    let _ = lock.unlock();
    result
}

/// The `cron` tool: add/list/remove/run over the job store.
pub struct CronTool;

impl CronTool {
    fn dir(ctx: &ToolContext) -> PathBuf {
        crate::config::cron_dir(&ctx.state_dir)
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs. Actions: add, list, remove, run."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove", "run"],
                    "description": "Action to perform"
                },
                "id": {
                    "type": "string",
                    "description": "Job id (remove, run)"
                },
                "schedule": {
                    "type": "string",
                    "description": "5-field cron expression, UTC (add)"
                },
                "command": {
                    "type": "string",
                    "description": "Message the job sends to the agent (add)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'action' argument".into()))?;
        let dir = Self::dir(ctx);

        match action {
            "add" => {
                let schedule = args
                    .get("schedule")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BashError::Tool("cron add requires 'schedule'".into()))?;
                let command = args
                    .get("command")
                    .and_then(|v| v.as_str())
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| BashError::Tool("cron add requires 'command'".into()))?;

                if !is_valid_cron_expr(schedule) {
                    return Ok(ToolOutput::error(format!(
                        "invalid cron expression '{}'",
                        schedule
                    )));
                }

                let job = CronJob {
                    id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
                    schedule: schedule.to_string(),
                    command: command.to_string(),
                    channel: ctx.channel.clone(),
                    sender: ctx.sender.clone(),
                    created_at_ms: now_ms(),
                    next_run_at_ms: next_run_from_expr(schedule, now_ms()),
                    last_run_at_ms: None,
                };
                let record = serde_json::to_value(&job)?;
                with_store(&dir, |store| {
                    store.jobs.push(job);
                    Ok(())
                })?;
                Ok(ToolOutput::json(&record))
            }
            "list" => {
                let store = load_store(&dir)?;
                Ok(ToolOutput::json(&json!({
                    "jobs": store.jobs,
                    "count": store.jobs.len(),
                })))
            }
            "remove" => {
                let id = args
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BashError::Tool("cron remove requires 'id'".into()))?;
                let removed = with_store(&dir, |store| {
                    let before = store.jobs.len();
                    store.jobs.retain(|j| j.id != id);
                    Ok(before != store.jobs.len())
                })?;
                if removed {
                    Ok(ToolOutput::json(&json!({"id": id, "removed": true})))
                } else {
                    Ok(ToolOutput::error(format!("no cron job with id '{}'", id)))
                }
            }
            "run" => {
                let id = args
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BashError::Tool("cron run requires 'id'".into()))?;
                let job = with_store(&dir, |store| {
                    let Some(job) = store.jobs.iter_mut().find(|j| j.id == id) else {
                        return Err(BashError::NotFound(format!("cron job '{}'", id)));
                    };
                    job.last_run_at_ms = Some(now_ms());
                    job.next_run_at_ms = next_run_from_expr(&job.schedule, now_ms());
                    Ok(job.clone())
                })?;
                Ok(ToolOutput::json(&serde_json::to_value(&job)?))
            }
            other => Err(BashError::Tool(format!("unknown cron action '{}'", other))),
        }
    }
}
