use crate::errors::{AppError, AppResult};
use crate::persist::{quarantine, read_json, write_json_atomic};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type SettingsDocument = BTreeMap<String, Map<String, Value>>;

pub mod keys {
    pub const BUDGET: &str = "Budget";
    pub const MONTHLY_THRESHOLD: &str = "monthly_threshold";

    pub const LOGGING: &str = "Logging";
    pub const DEBUG_MODE: &str = "debug_mode";

    pub const UI: &str = "Ui";
    pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
    pub const START_HIDDEN: &str = "start_hidden";
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

    pub const TRAY: &str = "Tray";
    pub const ENABLED: &str = "enabled";
}

pub trait FromSetting: Sized {
    fn from_setting(value: &Value) -> Option<Self>;
}

pub trait IntoSetting {
    fn into_setting(self) -> AppResult<Value>;
}

impl FromSetting for bool {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(*flag),
            Value::Number(number) => number.as_i64().map(|n| n != 0),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromSetting for i64 {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromSetting for u64 {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromSetting for u32 {
    fn from_setting(value: &Value) -> Option<Self> {
        u64::from_setting(value).and_then(|n| u32::try_from(n).ok())
    }
}

impl FromSetting for f64 {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok().filter(|n: &f64| n.is_finite()),
            _ => None,
        }
    }
}

impl FromSetting for Decimal {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
            Value::String(text) => Decimal::from_str(text.trim()).ok(),
            _ => None,
        }
    }
}

impl FromSetting for String {
    fn from_setting(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(text.clone()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

impl IntoSetting for bool {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::Bool(self))
    }
}

impl IntoSetting for i64 {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoSetting for i32 {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoSetting for u32 {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoSetting for u64 {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoSetting for f64 {
    fn into_setting(self) -> AppResult<Value> {
        Number::from_f64(self)
            .map(Value::Number)
            .ok_or_else(|| AppError::InvalidInput(format!("setting value is not finite: {}", self)))
    }
}

impl IntoSetting for Decimal {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::String(self.to_string()))
    }
}

impl IntoSetting for String {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::String(self.trim().to_string()))
    }
}

impl IntoSetting for &str {
    fn into_setting(self) -> AppResult<Value> {
        Ok(Value::String(self.trim().to_string()))
    }
}

#[derive(Debug, Default)]
struct SettingsState {
    document: SettingsDocument,
    generation: u64,
}

/// Process-wide configuration, shared as `Arc<SettingsStore>`.
///
/// Readers and writers serialize on `state`, which is held only while the
/// in-memory document changes. Disk writes happen under `persisted` so two
/// writers never interleave on the file, and a writer whose snapshot is older
/// than what is already on disk skips its write.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<SettingsState>,
    persisted: Mutex<u64>,
}

impl SettingsStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        let document = match read_json::<SettingsDocument>(path) {
            Ok(Some(document)) => {
                tracing::info!(path = %path.to_string_lossy(), "settings loaded");
                document
            }
            Ok(None) => {
                tracing::info!(path = %path.to_string_lossy(), "settings file not found; created on first save");
                SettingsDocument::new()
            }
            Err(AppError::Malformed(reason)) => {
                tracing::warn!(path = %path.to_string_lossy(), error = %reason, "settings file is malformed; starting from defaults");
                quarantine(path)?;
                SettingsDocument::new()
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(SettingsState {
                document,
                generation: 0,
            }),
            persisted: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: FromSetting>(&self, section: &str, key: &str, default: T) -> T {
        let state = self.state();
        let Some(value) = state.document.get(section).and_then(|entries| entries.get(key)) else {
            return default;
        };
        match T::from_setting(value) {
            Some(coerced) => coerced,
            None => {
                tracing::warn!(section, key, value = %value, "setting does not coerce; using default");
                default
            }
        }
    }

    pub fn set<V: IntoSetting>(&self, section: &str, key: &str, value: V) -> AppResult<()> {
        if section.trim().is_empty() || key.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "cannot set a setting with an empty section or key".to_string(),
            ));
        }
        let value = value.into_setting()?;
        self.update(|document| {
            document
                .entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })?;
        tracing::debug!(section, key, "setting updated");
        Ok(())
    }

    pub fn delete(&self, section: &str, key: &str) -> AppResult<bool> {
        self.update(|document| {
            document
                .get_mut(section)
                .map(|entries| entries.remove(key).is_some())
                .unwrap_or(false)
        })
    }

    pub fn delete_section(&self, section: &str) -> AppResult<bool> {
        self.update(|document| document.remove(section).is_some())
    }

    pub fn clear(&self) -> AppResult<()> {
        self.update(SettingsDocument::clear)?;
        tracing::info!("all settings cleared");
        Ok(())
    }

    pub fn section(&self, section: &str) -> Map<String, Value> {
        self.state().document.get(section).cloned().unwrap_or_default()
    }

    pub fn sections(&self) -> Vec<String> {
        self.state().document.keys().cloned().collect()
    }

    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.state()
            .document
            .get(section)
            .is_some_and(|entries| entries.contains_key(key))
    }

    pub fn flush(&self) -> AppResult<()> {
        let (generation, snapshot) = {
            let state = self.state();
            (state.generation, state.document.clone())
        };
        self.persist(generation, &snapshot)
    }

    fn update<R>(&self, apply: impl FnOnce(&mut SettingsDocument) -> R) -> AppResult<R> {
        let (result, generation, snapshot) = {
            let mut state = self.state();
            let result = apply(&mut state.document);
            state.generation += 1;
            (result, state.generation, state.document.clone())
        };
        self.persist(generation, &snapshot)?;
        Ok(result)
    }

    fn persist(&self, generation: u64, snapshot: &SettingsDocument) -> AppResult<()> {
        let mut persisted = self
            .persisted
            .lock()
            .map_err(|_| AppError::Internal("settings persist mutex poisoned".to_string()))?;
        if *persisted >= generation {
            return Ok(());
        }
        if let Err(error) = write_json_atomic(&self.path, snapshot) {
            tracing::error!(path = %self.path.to_string_lossy(), error = %error, "failed to save settings");
            return Err(error);
        }
        *persisted = generation;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, SettingsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    fn open_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::open(&dir.path().join("settings.json")).expect("open settings")
    }

    #[test]
    fn absent_keys_return_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        assert_eq!(settings.get("X", "Y", 5i64), 5);
        assert!(settings.get(keys::TRAY, keys::ENABLED, true));
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn coercion_failures_fall_back_to_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        settings.set("Ui", "poll_interval_ms", "fast").expect("set");
        assert_eq!(settings.get("Ui", "poll_interval_ms", 100u64), 100);
        assert_eq!(settings.get("Ui", "poll_interval_ms", String::new()), "fast");
    }

    #[test]
    fn string_booleans_follow_ini_conventions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"Logging":{"debug_mode":"Yes","quiet":"off","odd":"maybe"}}"#).expect("seed");
        let settings = SettingsStore::open(&path).expect("open");
        assert!(settings.get("Logging", "debug_mode", false));
        assert!(!settings.get("Logging", "quiet", true));
        assert!(settings.get("Logging", "odd", true));
    }

    #[test]
    fn set_persists_and_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        settings
            .set(keys::BUDGET, keys::MONTHLY_THRESHOLD, Decimal::from_str("1500.00").expect("decimal"))
            .expect("set budget");
        settings.set("Export", "default_location", "  /home/user/exports  ").expect("set path");

        let reopened = open_in(&dir);
        assert_eq!(
            reopened.get(keys::BUDGET, keys::MONTHLY_THRESHOLD, Decimal::ZERO),
            Decimal::from_str("1500").expect("decimal")
        );
        assert_eq!(
            reopened.get("Export", "default_location", String::new()),
            "/home/user/exports"
        );
    }

    #[test]
    fn invalid_writes_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        assert!(matches!(settings.set("", "key", true), Err(AppError::InvalidInput(_))));
        assert!(matches!(settings.set("A", "b", f64::NAN), Err(AppError::InvalidInput(_))));
        assert!(settings.sections().is_empty());
    }

    #[test]
    fn delete_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        settings.set("A", "one", 1i64).expect("set");
        settings.set("A", "two", 2i64).expect("set");
        settings.set("B", "three", 3i64).expect("set");

        assert!(settings.delete("A", "one").expect("delete"));
        assert!(!settings.delete("A", "one").expect("delete again"));
        assert!(settings.has_key("A", "two"));
        assert_eq!(settings.section("A").len(), 1);
        assert!(settings.delete_section("B").expect("delete section"));
        assert_eq!(settings.sections(), vec!["A".to_string()]);

        settings.clear().expect("clear");
        assert!(open_in(&dir).sections().is_empty());
    }

    #[test]
    fn malformed_file_is_quarantined() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "[Budget]\nmonthly_threshold = 10\n").expect("seed");
        let settings = SettingsStore::open(&path).expect("open");
        assert!(settings.sections().is_empty());
        let quarantined = fs::read_dir(dir.path())
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn failed_write_keeps_file_and_reports_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = open_in(&dir);
        settings.set("A", "key", 1i64).expect("first set");
        let before = fs::read(settings.path()).expect("read");

        crate::persist::fail_next_persist();
        let error = settings.set("A", "key", 2i64).expect_err("injected failure");
        assert!(error.is_retryable());
        assert_eq!(fs::read(settings.path()).expect("read"), before);

        // The value stays visible in memory and reaches disk on the next flush.
        assert_eq!(settings.get("A", "key", 0i64), 2);
        settings.flush().expect("flush");
        assert_eq!(open_in(&dir).get("A", "key", 0i64), 2);
    }

    #[test]
    fn concurrent_sets_all_reach_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Arc::new(open_in(&dir));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let settings = Arc::clone(&settings);
                std::thread::spawn(move || {
                    for index in 0..10 {
                        settings
                            .set(&format!("Worker{}", worker), &format!("k{}", index), index as i64)
                            .expect("concurrent set");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker joined");
        }

        let reopened = open_in(&dir);
        for worker in 0..8 {
            assert_eq!(reopened.section(&format!("Worker{}", worker)).len(), 10);
        }
    }
}
