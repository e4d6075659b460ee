//! Preference store: durable, cross-session log of learned user preferences.
//!
//! The store is a single JSON file:
//!
//! ```json
//! {
//!   "preferences": [
//!     {"text": "...", "context": "...", "timestamp": "...", "applicationCount": 0}
//!   ],
//!   "lastUpdated": "2026-01-01T00:00:00+00:00"
//! }
//! ```
//!
//! Every mutation takes a sibling `.lock` file, re-reads the store from disk,
//! applies the change and writes it back with temp-file + fsync + rename, so
//! concurrent sessions never lose each other's updates and a crash mid-write
//! leaves the previous file intact. A missing file is an empty store.
//!
//! Waiting for the lock blocks the calling thread, so async callers use the
//! `*_async` mutations, which run on tokio's blocking pool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scout_core::utils::timestamp;

/// Attempts to take the lock before giving up.
const LOCK_RETRIES: u32 = 500;
/// Pause between lock attempts.
const LOCK_BACKOFF: Duration = Duration::from_millis(10);
/// A lock file older than this is considered abandoned.
const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// One learned preference.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    #[serde(alias = "preference")]
    pub text: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, alias = "times_applied")]
    pub application_count: u32,
}

/// On-disk layout of the store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceFile {
    #[serde(default)]
    pub preferences: Vec<PreferenceRecord>,
    #[serde(default, alias = "last_updated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Errors raised by store mutations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("preference store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preference store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for preference store lock {0}")]
    Locked(PathBuf),

    #[error("preference store task failed: {0}")]
    Task(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ─────────────────────────────────────────────
// PreferenceStore
// ─────────────────────────────────────────────

/// File-backed preference store.
#[derive(Clone, Debug)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    /// Create a store handle. Nothing touches the disk until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ────────────── Reads ──────────────

    /// Read the whole store. A missing file is an empty store.
    pub fn load(&self) -> Result<PreferenceFile, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(PreferenceFile::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PreferenceFile::default()),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }

    /// All preferences in append order. I/O errors are logged and read as empty.
    pub fn list(&self) -> Vec<PreferenceRecord> {
        match self.load() {
            Ok(file) => file.preferences,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "preferences unavailable");
                Vec::new()
            }
        }
    }

    /// The `n` most recently added preferences, oldest first.
    pub fn recent(&self, n: usize) -> Vec<PreferenceRecord> {
        let mut all = self.list();
        let skip = all.len().saturating_sub(n);
        all.drain(..skip);
        all
    }

    // ────────────── Mutations ──────────────

    /// Promote feedback into a durable preference.
    ///
    /// Returns `false` when the text is blank or an equal text
    /// (case-insensitive) is already stored.
    pub fn promote(&self, text: &str, context: &str) -> Result<bool, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let added = self.mutate(|prefs| {
            let needle = text.to_lowercase();
            if prefs.iter().any(|p| p.text.to_lowercase() == needle) {
                return (false, false);
            }
            prefs.push(PreferenceRecord {
                text: text.to_string(),
                context: context.to_string(),
                timestamp: timestamp(),
                application_count: 0,
            });
            (true, true)
        })?;

        if added {
            info!(preference = text, "preference stored");
        } else {
            debug!(preference = text, "preference already stored");
        }
        Ok(added)
    }

    /// Increment `applicationCount` for each stored preference whose text
    /// matches one of `texts` (case-insensitive).
    pub fn mark_applied(&self, texts: &[String]) -> Result<usize, StoreError> {
        if texts.is_empty() {
            return Ok(0);
        }
        let wanted: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();

        self.mutate(|prefs| {
            let mut touched = 0;
            for pref in prefs.iter_mut() {
                if wanted.contains(&pref.text.to_lowercase()) {
                    pref.application_count += 1;
                    touched += 1;
                }
            }
            (touched, touched > 0)
        })
    }

    /// Remove the preference at `index` (0-based, append order).
    pub fn remove(&self, index: usize) -> Result<Option<PreferenceRecord>, StoreError> {
        let removed = self.mutate(|prefs| {
            if index < prefs.len() {
                (Some(prefs.remove(index)), true)
            } else {
                (None, false)
            }
        })?;
        if let Some(ref rec) = removed {
            info!(preference = %rec.text, "preference removed");
        }
        Ok(removed)
    }

    /// Delete every stored preference. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let count = self.mutate(|prefs| {
            let n = prefs.len();
            prefs.clear();
            (n, n > 0)
        })?;
        info!(count, "preferences cleared");
        Ok(count)
    }

    // ────────────── Async mutations ──────────────

    /// [`promote`](Self::promote) off the async runtime threads.
    pub async fn promote_async(&self, text: &str, context: &str) -> Result<bool, StoreError> {
        let (text, context) = (text.to_string(), context.to_string());
        self.blocking(move |store| store.promote(&text, &context)).await
    }

    /// [`mark_applied`](Self::mark_applied) off the async runtime threads.
    pub async fn mark_applied_async(&self, texts: Vec<String>) -> Result<usize, StoreError> {
        self.blocking(move |store| store.mark_applied(&texts)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(PreferenceStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Lock, reload, apply `f`, and write back if `f` reports a change.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<PreferenceRecord>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let _lock = StoreLock::acquire(&self.path)?;

        let mut file = self.load()?;
        let (out, changed) = f(&mut file.preferences);
        if changed {
            file.last_updated = Some(timestamp());
            let json = serde_json::to_string_pretty(&file)?;
            atomic_write_text(&self.path, &json)?;
            debug!(path = %self.path.display(), count = file.preferences.len(), "preferences saved");
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// Lock file + atomic write
// ─────────────────────────────────────────────

/// Exclusive lock held via a `<store>.lock` file. Released on drop.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store: &Path) -> Result<Self, StoreError> {
        let mut lock_name = store.as_os_str().to_owned();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        for _ in 0..LOCK_RETRIES {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut f) => {
                    let _ = writeln!(f, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        warn!(lock = %path.display(), "breaking stale preference lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(LOCK_BACKOFF);
                }
                Err(e) => return Err(io_err(&path)(e)),
            }
        }

        Err(StoreError::Locked(path))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_stale(lock: &Path) -> bool {
    std::fs::metadata(lock)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

/// Write `content` to a temp file next to `path`, fsync it, then rename over `path`.
fn atomic_write_text(path: &Path, content: &str) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err(parent))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("preferences.json");
    let temp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut temp_file = std::fs::File::create(&temp_path).map_err(io_err(&temp_path))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(io_err(&temp_path))?;
    temp_file.sync_all().map_err(io_err(&temp_path))?;

    std::fs::rename(&temp_path, path).map_err(io_err(path))?;
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, PreferenceStore) {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs").join("preferences.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.list().is_empty());
        assert!(store.load().unwrap().preferences.is_empty());
    }

    #[test]
    fn test_promote_dedupes_case_insensitive() {
        let (_dir, store) = make_store();
        assert!(store.promote("Use shorter stories", "session").unwrap());
        assert!(!store.promote("use SHORTER stories", "session").unwrap());

        let prefs = store.list();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].text, "Use shorter stories");
        assert_eq!(prefs[0].application_count, 0);
    }

    #[test]
    fn test_blank_text_not_promoted() {
        let (_dir, store) = make_store();
        assert!(!store.promote("   ", "ctx").unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_format_camel_case() {
        let (_dir, store) = make_store();
        store.promote("Always include accessibility", "cli").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["preferences"][0]["text"], "Always include accessibility");
        assert_eq!(raw["preferences"][0]["context"], "cli");
        assert_eq!(raw["preferences"][0]["applicationCount"], 0);
        assert!(raw["lastUpdated"].is_string());
    }

    #[test]
    fn test_reads_legacy_layout() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"preferences":[{"preference":"Be concise","context":"","timestamp":"t","times_applied":2}],"last_updated":"t"}"#,
        )
        .unwrap();

        let prefs = store.list();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].text, "Be concise");
        assert_eq!(prefs[0].application_count, 2);
    }

    #[test]
    fn test_mark_applied_increments() {
        let (_dir, store) = make_store();
        store.promote("A", "").unwrap();
        store.promote("B", "").unwrap();

        let touched = store.mark_applied(&["a".to_string()]).unwrap();
        assert_eq!(touched, 1);
        store.mark_applied(&["A".to_string(), "B".to_string()]).unwrap();

        let prefs = store.list();
        assert_eq!(prefs[0].application_count, 2);
        assert_eq!(prefs[1].application_count, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let (_dir, store) = make_store();
        store.promote("one", "").unwrap();
        store.promote("two", "").unwrap();
        store.promote("three", "").unwrap();

        let removed = store.remove(1).unwrap().unwrap();
        assert_eq!(removed.text, "two");
        assert!(store.remove(10).unwrap().is_none());

        let texts: Vec<String> = store.list().into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["one", "three"]);

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_recent_keeps_append_order() {
        let (_dir, store) = make_store();
        for t in ["a", "b", "c", "d"] {
            store.promote(t, "").unwrap();
        }
        let texts: Vec<String> = store.recent(2).into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["c", "d"]);
        assert_eq!(store.recent(10).len(), 4);
    }

    #[test]
    fn test_corrupt_file_reads_empty_but_refuses_writes() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(store.list().is_empty());
        assert!(matches!(store.promote("x", ""), Err(StoreError::Json(_))));
        // Previous content untouched
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test]
    fn test_lock_released_after_mutation() {
        let (_dir, store) = make_store();
        store.promote("x", "").unwrap();
        let mut lock = store.path().as_os_str().to_owned();
        lock.push(".lock");
        assert!(!PathBuf::from(lock).exists());
    }

    #[tokio::test]
    async fn test_async_mutation_waits_for_lock_off_runtime() {
        let (_dir, store) = make_store();
        store.promote("Keep it short", "").unwrap();

        // Another process holds the lock.
        let mut lock = store.path().as_os_str().to_owned();
        lock.push(".lock");
        let lock = PathBuf::from(lock);
        std::fs::write(&lock, "4242").unwrap();

        // Runs on the same single-threaded runtime: it only gets to release
        // the lock if the waiting mutation does not block that thread.
        let release = {
            let lock = lock.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::remove_file(&lock).unwrap();
            })
        };

        let touched = store
            .mark_applied_async(vec!["keep it short".into()])
            .await
            .unwrap();
        release.await.unwrap();

        assert_eq!(touched, 1);
        assert_eq!(store.list()[0].application_count, 1);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_promote_async_dedupes() {
        let (_dir, store) = make_store();
        assert!(store.promote_async("Use tables", "cli").await.unwrap());
        assert!(!store.promote_async("use TABLES", "cli").await.unwrap());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_concurrent_promotions_are_not_lost() {
        let (_dir, store) = make_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..5 {
                        store.promote(&format!("pref {t}-{i}"), "").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.list().len(), 40);
    }
}
