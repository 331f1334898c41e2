//! Configuration loading and state-directory management.
//!
//! Configuration lives at `{state_root}/config.json`. String values may
//! reference environment variables as `$VAR`; references are expanded at
//! read time. The state root comes from `BASHCLAW_STATE_DIR`, defaulting to
//! `~/.bashclaw`.

mod types;

pub use types::*;

use crate::error::{BashError, Result};
use fs2::FileExt;
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Process-local configuration cache; invalidated explicitly via [`reload`].
static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// The bashclaw state root: `$BASHCLAW_STATE_DIR` or `~/.bashclaw`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BASHCLAW_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bashclaw")
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Path of the config file under the state root.
    pub fn path() -> PathBuf {
        state_dir().join("config.json")
    }

    /// Load configuration from the default path.
    ///
    /// A missing file yields defaults; a present but invalid file is a
    /// startup-fatal configuration error.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with `$VAR` expansion.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut raw: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| BashError::Config(format!("invalid config JSON: {}", e)))?;
        expand_env_refs(&mut raw);
        serde_json::from_value(raw)
            .map_err(|e| BashError::Config(format!("invalid config shape: {}", e)))
    }

    /// The cached global configuration, loading it on first use.
    pub fn global() -> Config {
        let lock = CONFIG.get_or_init(|| RwLock::new(Config::load().unwrap_or_default()));
        lock.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Reload the global configuration from disk (call after writes).
    pub fn reload() -> Result<Config> {
        let fresh = Config::load()?;
        if let Some(lock) = CONFIG.get() {
            if let Ok(mut guard) = lock.write() {
                *guard = fresh.clone();
            }
        } else {
            let _ = CONFIG.set(RwLock::new(fresh.clone()));
        }
        Ok(fresh)
    }
}

/// Walk a JSON tree, expanding `$VAR` references inside string values.
///
/// Unset variables expand to the empty string. A literal dollar sign can be
/// written as `$$`.
fn expand_env_refs(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains('$') {
                *s = expand_env_str(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_env_refs(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                expand_env_refs(v);
            }
        }
        _ => {}
    }
}

fn expand_env_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&'$') => {
                chars.next();
                out.push('$');
            }
            Some(&next) if next.is_ascii_alphabetic() || next == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

// ============================================================================
// State directory layout
// ============================================================================

/// Accessors for the state directory layout. Directories are created on
/// demand by the subsystems that own them.
pub fn sessions_dir(root: &Path) -> PathBuf {
    root.join("sessions")
}

pub fn memory_dir(root: &Path) -> PathBuf {
    root.join("memory")
}

pub fn cron_dir(root: &Path) -> PathBuf {
    root.join("cron")
}

pub fn spawn_dir(root: &Path) -> PathBuf {
    root.join("spawn")
}

pub fn logs_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

// ============================================================================
// .env handling
// ============================================================================

/// Load `{root}/.env` (KEY=VALUE lines) into the process environment.
///
/// Existing environment variables win over file entries. Comment lines
/// (`#`) and blanks are skipped.
pub fn load_dotenv(root: &Path) {
    let path = root.join(".env");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if !key.is_empty() && std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

/// Persist a KEY=VALUE override into `{root}/.env`.
///
/// Rewrites the file with the entry replaced or appended, using a
/// lock-then-rename so concurrent writers cannot interleave. The file is
/// created with mode 0600.
pub fn persist_env(root: &Path, key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.contains('=') || key.contains('\n') || value.contains('\n') {
        return Err(BashError::Config(format!("invalid env entry '{}'", key)));
    }
    std::fs::create_dir_all(root)?;

    let path = root.join(".env");
    let lock_path = root.join(".env.lock");
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()
        .map_err(|e| BashError::Config(format!("env lock failed: {}", e)))?;

    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in existing.lines() {
        match line.split_once('=') {
            Some((k, _)) if k.trim() == key => {
                lines.push(format!("{}={}", key, value));
                replaced = true;
            }
            _ => lines.push(line.to_string()),
        }
    }
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    let tmp = root.join(".env.tmp");
    {
        let mut opts = std::fs::OpenOptions::new();
        opts.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp)?;
        file.write_all(lines.join("\n").as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)?;

    let _ = lock.unlock();
    std::env::set_var(key, value);
    Ok(())
}
