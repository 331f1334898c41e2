//! Session store: append-only JSONL logs per conversation scope.
//!
//! The session file is the source of truth; mutations hold an exclusive
//! advisory lock on a `.lock` sidecar so concurrent handlers for the same
//! identity serialize, while `load` stays lock-free and tolerates a torn
//! trailing line.

mod entry;

pub use entry::{entries_to_messages, Entry};

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::config::SessionScope;
use crate::error::{BashError, Result};
use crate::protocol::ChatMessage;

/// Scoped JSONL session store rooted at `{state_root}/sessions`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

/// RAII guard for an exclusive session lock; released on drop.
pub struct SessionLock {
    _file: File,
}

impl SessionStore {
    /// Create a store rooted at the given sessions directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the session file path for an identity under a scope.
    ///
    /// - per-sender: `{root}/{agent}/{channel}/{sender}.jsonl`
    ///   (an empty sender falls back to the per-channel path)
    /// - per-channel: `{root}/{agent}/{channel}.jsonl`
    /// - global: `{root}/{agent}.jsonl`
    pub fn path_for(
        &self,
        agent_id: &str,
        channel: &str,
        sender: &str,
        scope: SessionScope,
    ) -> PathBuf {
        let agent = sanitize_component(agent_id);
        let channel_part = sanitize_component(channel);
        match scope {
            SessionScope::Global => self.root.join(format!("{}.jsonl", agent)),
            SessionScope::PerChannel => self
                .root
                .join(agent)
                .join(format!("{}.jsonl", channel_part)),
            SessionScope::PerSender => {
                if sender.is_empty() {
                    self.root
                        .join(agent)
                        .join(format!("{}.jsonl", channel_part))
                } else {
                    self.root
                        .join(agent)
                        .join(channel_part)
                        .join(format!("{}.jsonl", sanitize_component(sender)))
                }
            }
        }
    }

    /// Acquire the exclusive advisory lock for a session file.
    ///
    /// Hold the returned guard across a whole run so two handlers for the
    /// same identity cannot interleave appends.
    pub fn lock(&self, path: &Path) -> Result<SessionLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = lock_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()
            .map_err(|e| BashError::Session(format!("lock failed for {:?}: {}", path, e)))?;
        Ok(SessionLock { _file: file })
    }

    /// Append one entry as a single JSONL line.
    pub fn append(&self, path: &Path, entry: &Entry) -> Result<()> {
        let _guard = self.lock(path)?;
        self.append_locked(path, entry)
    }

    /// Append while the caller already holds the session lock.
    pub fn append_locked(&self, path: &Path, entry: &Entry) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Load the last `limit` entries (all when `None`), lock-free.
    ///
    /// Unparseable lines are skipped with a warning; the file is never
    /// auto-truncated on corruption.
    pub fn load(&self, path: &Path, limit: Option<usize>) -> Result<Vec<Entry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        let mut entries: Vec<Entry> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable session line");
                }
            }
        }
        if let Some(n) = limit {
            if entries.len() > n {
                entries.drain(..entries.len() - n);
            }
        }
        Ok(entries)
    }

    /// Load entries and project them into normalized messages.
    pub fn load_as_messages(&self, path: &Path, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        let entries = self.load(path, limit)?;
        Ok(entries_to_messages(&entries))
    }

    /// Atomically truncate the file to its last `keep` entries.
    pub fn prune(&self, path: &Path, keep: usize) -> Result<()> {
        let _guard = self.lock(path)?;
        self.prune_locked(path, keep)
    }

    /// Prune while the caller already holds the session lock.
    pub fn prune_locked(&self, path: &Path, keep: usize) -> Result<()> {
        let entries = self.load(path, None)?;
        if entries.len() <= keep {
            return Ok(());
        }
        let tail = &entries[entries.len() - keep..];
        let mut buf = String::new();
        for entry in tail {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, buf)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Truncate the session to zero entries. Idempotent.
    pub fn clear(&self, path: &Path) -> Result<()> {
        let _guard = self.lock(path)?;
        self.clear_locked(path)
    }

    fn clear_locked(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::write(path, b"")?;
        }
        Ok(())
    }

    /// Remove the session file entirely.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let _guard = self.lock(path)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let _ = std::fs::remove_file(lock_path_for(path));
        Ok(())
    }

    /// Clear the session when its newest entry is older than `minutes`.
    ///
    /// Returns whether the reset fired. Disabled for `minutes <= 0`. The
    /// caller is expected to hold the session lock already.
    pub fn check_idle_reset(&self, path: &Path, minutes: i64) -> Result<bool> {
        if minutes <= 0 {
            return Ok(false);
        }
        let entries = self.load(path, None)?;
        let Some(last_ts) = entries.iter().rev().find_map(|e| e.ts_ms()) else {
            return Ok(false);
        };
        let idle_ms = Entry::now_ms() - last_ts;
        if idle_ms > minutes * 60_000 {
            self.clear_locked(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Newest value stored under a meta key, if any.
    pub fn meta_get(&self, path: &Path, key: &str) -> Result<Option<String>> {
        let entries = self.load(path, None)?;
        for entry in entries.iter().rev() {
            if let Entry::Meta { data } = entry {
                if let Some(value) = data.get(key).and_then(|v| v.as_str()) {
                    return Ok(Some(value.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Count of non-meta entries.
    pub fn entry_count(&self, path: &Path) -> Result<usize> {
        Ok(self
            .load(path, None)?
            .iter()
            .filter(|e| !matches!(e, Entry::Meta { .. }))
            .count())
    }

    /// All session files under the store root, as paths relative to it.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        if self.root.exists() {
            walk_jsonl(&self.root, &self.root, &mut found)?;
        }
        found.sort();
        Ok(found)
    }
}

fn walk_jsonl(root: &Path, dir: &Path, found: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_jsonl(root, &path, found)?;
        } else if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            if let Ok(rel) = path.strip_prefix(root) {
                found.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Sanitize an identity component for use as a filesystem name.
///
/// Percent-encodes separator and reserved characters so the mapping is
/// bijective and distinct identities never collide on disk.
fn sanitize_component(component: &str) -> String {
    let mut result = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '.' if result.is_empty() => result.push_str("%2E"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    if result.is_empty() {
        result.push('_');
    }
    result
}
