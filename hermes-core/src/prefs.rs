//! Persistent boolean preferences with change subscriptions.
//!
//! # Storage layout
//!
//! ```text
//! ~/.hermes/
//!   prefs.yaml      (flat `key: bool` map, mode 0600)
//! ```
//!
//! # API pattern
//!
//! As with the rest of the crate, anything that touches the filesystem has an
//! `_at(home: &Path, …)` form used by tests and a no-arg wrapper that derives
//! `home` from `dirs::home_dir()`.
//!
//! Subscriptions are scoped: [`PreferenceStore::on_change`] hands back a
//! [`Subscription`] guard, and dropping the guard unregisters the callback.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::error::{prefs_io, PrefsError};

/// Whether the frequent cadence runs. Defaults to `true`.
pub const PREF_FREQUENT_SYNC_ENABLED: &str = "frequent_sync_enabled";

/// Whether active alarm items raise the alarm notification. Defaults to `true`.
pub const PREF_ALARMS_ENABLED: &str = "alarms_enabled";

const DEFAULTS: [(&str, bool); 2] = [
    (PREF_FREQUENT_SYNC_ENABLED, true),
    (PREF_ALARMS_ENABLED, true),
];

/// Built-in default for a known key; `None` for anything else.
pub fn default_for(key: &str) -> Option<bool> {
    DEFAULTS
        .iter()
        .find(|(known, _)| *known == key)
        .map(|(_, value)| *value)
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct Listener {
    id: u64,
    key: String,
    callback: Callback,
}

/// `<home>/.hermes/prefs.yaml`. Pure, no I/O.
pub fn prefs_path_at(home: &Path) -> PathBuf {
    home.join(".hermes").join("prefs.yaml")
}

/// Boolean key/value store, optionally backed by a YAML file.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, bool>>,
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl PreferenceStore {
    /// A store that lives only in memory. Used by tests and one-shot runs.
    pub fn in_memory() -> Self {
        Self::with_values(None, BTreeMap::new())
    }

    /// Open the store at `<home>/.hermes/prefs.yaml`.
    ///
    /// A missing file is not an error: every key reads as its default until
    /// the first `set_bool`.
    pub fn open_at(home: &Path) -> Result<Self, PrefsError> {
        let path = prefs_path_at(home);
        let values = read_values(&path)?;
        Ok(Self::with_values(Some(path), values))
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, PrefsError> {
        Self::open_at(&home()?)
    }

    fn with_values(path: Option<PathBuf>, values: BTreeMap<String, bool>) -> Self {
        Self {
            path,
            values: RwLock::new(values),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(default)
    }

    /// Persist `value` under `key`, then store it and notify subscribers if
    /// the effective value changed. A failed write leaves the store as it was.
    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        let changed = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let previous = values.get(key).copied().or_else(|| default_for(key));
            if let Some(path) = &self.path {
                let mut next = values.clone();
                next.insert(key.to_string(), value);
                write_values(path, &next)?;
            }
            values.insert(key.to_string(), value);
            previous != Some(value)
        };

        if changed {
            tracing::debug!(key, value, "preference changed");
            self.notify(key, value);
        }
        Ok(())
    }

    /// Copy of every stored key.
    pub fn values(&self) -> BTreeMap<String, bool> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the backing file and notify subscribers for every key whose
    /// effective value changed. Returns the changed keys.
    ///
    /// A known key removed from the file reads as its default again and is
    /// reported with that value.
    pub fn reload(&self) -> Result<Vec<String>, PrefsError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let fresh = read_values(path)?;

        let changed: Vec<(String, bool)> = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let keys: BTreeSet<&String> = values.keys().chain(fresh.keys()).collect();
            let changed = keys
                .into_iter()
                .filter_map(|key| {
                    let before = values.get(key).copied().or_else(|| default_for(key));
                    let after = fresh.get(key).copied().or_else(|| default_for(key))?;
                    (before != Some(after)).then(|| (key.clone(), after))
                })
                .collect();
            *values = fresh;
            changed
        };

        for (key, value) in &changed {
            tracing::debug!(key = %key, value, "preference changed on disk");
            self.notify(key, *value);
        }
        Ok(changed.into_iter().map(|(key, _)| key).collect())
    }

    /// Register `callback` for changes to `key`.
    ///
    /// The callback receives the new value and runs on whichever thread made
    /// the change; keep it short (enqueue work, don't do it).
    pub fn on_change(
        self: &Arc<Self>,
        key: &str,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                key: key.to_string(),
                callback: Arc::new(callback),
            });
        Subscription {
            store: Arc::downgrade(self),
            id,
            key: key.to_string(),
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, key: &str, value: bool) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|listener| listener.key == key)
            .map(|listener| listener.callback.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| listener.id != id);
    }
}

/// Guard for one `on_change` registration. Dropping it unregisters.
pub struct Subscription {
    store: Weak<PreferenceStore>,
    id: u64,
    key: String,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Explicitly release the registration.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_values(path: &Path) -> Result<BTreeMap<String, bool>, PrefsError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| prefs_io(path, e))?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&contents).map_err(|source| PrefsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write flow: serialize → `prefs.yaml.tmp` sibling → `chmod 0600` → `rename`.
fn write_values(path: &Path, values: &BTreeMap<String, bool>) -> Result<(), PrefsError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| prefs_io(dir, e))?;
            set_permissions(dir, 0o700)?;
        }
    }
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(values)?;
    std::fs::write(&tmp, yaml).map_err(|e| prefs_io(&tmp, e))?;
    set_permissions(&tmp, 0o600)?;
    std::fs::rename(&tmp, path).map_err(|e| prefs_io(path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, PrefsError> {
    dirs::home_dir().ok_or(PrefsError::HomeNotFound)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), PrefsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| prefs_io(path, e))
}
#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), PrefsError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[test]
    fn missing_keys_read_as_default() {
        let store = PreferenceStore::in_memory();
        assert!(store.get_bool(PREF_ALARMS_ENABLED, true));
        assert!(!store.get_bool(PREF_ALARMS_ENABLED, false));
    }

    #[test]
    fn set_bool_persists_and_reopens() {
        let home = TempDir::new().expect("home");
        let store = PreferenceStore::open_at(home.path()).expect("open");
        store
            .set_bool(PREF_FREQUENT_SYNC_ENABLED, false)
            .expect("set");

        let reopened = PreferenceStore::open_at(home.path()).expect("reopen");
        assert!(!reopened.get_bool(PREF_FREQUENT_SYNC_ENABLED, true));
        assert!(
            !prefs_path_at(home.path())
                .with_extension("yaml.tmp")
                .exists(),
            ".tmp must be gone after save"
        );
    }

    #[test]
    fn callback_fires_only_on_change() {
        let store = Arc::new(PreferenceStore::in_memory());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let _sub = store.on_change(PREF_ALARMS_ENABLED, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.set_bool(PREF_ALARMS_ENABLED, false).expect("set");
        store.set_bool(PREF_ALARMS_ENABLED, false).expect("set again");
        store.set_bool(PREF_FREQUENT_SYNC_ENABLED, false).expect("other key");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let store = Arc::new(PreferenceStore::in_memory());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let sub = store.on_change(PREF_ALARMS_ENABLED, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(store.listener_count(), 0);
        store.set_bool(PREF_ALARMS_ENABLED, false).expect("set");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reload_notifies_for_keys_changed_by_another_writer() {
        let home = TempDir::new().expect("home");
        let store = Arc::new(PreferenceStore::open_at(home.path()).expect("open"));
        store.set_bool(PREF_FREQUENT_SYNC_ENABLED, true).expect("set");

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let _sub = store.on_change(PREF_FREQUENT_SYNC_ENABLED, move |value| {
            sink.lock().expect("lock").push(value);
        });

        // A second handle stands in for `hermes frequent off` in another process.
        let other = PreferenceStore::open_at(home.path()).expect("open other");
        other
            .set_bool(PREF_FREQUENT_SYNC_ENABLED, false)
            .expect("other set");

        let changed = store.reload().expect("reload");
        assert_eq!(changed, vec![PREF_FREQUENT_SYNC_ENABLED.to_string()]);
        assert_eq!(*observed.lock().expect("lock"), vec![false]);
        assert!(store.reload().expect("reload again").is_empty());
    }

    #[test]
    fn removing_a_key_on_disk_notifies_its_default() {
        let home = TempDir::new().expect("home");
        let store = Arc::new(PreferenceStore::open_at(home.path()).expect("open"));
        store.set_bool(PREF_ALARMS_ENABLED, false).expect("set");
        store
            .set_bool(PREF_FREQUENT_SYNC_ENABLED, false)
            .expect("set");

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let _sub = store.on_change(PREF_FREQUENT_SYNC_ENABLED, move |value| {
            sink.lock().expect("lock").push(value);
        });

        std::fs::write(prefs_path_at(home.path()), "alarms_enabled: false\n").expect("edit");
        let changed = store.reload().expect("reload");

        assert_eq!(changed, vec![PREF_FREQUENT_SYNC_ENABLED.to_string()]);
        assert_eq!(*observed.lock().expect("lock"), vec![true]);
        assert!(store.get_bool(PREF_FREQUENT_SYNC_ENABLED, true));
    }

    #[test]
    fn setting_a_default_on_an_empty_store_is_not_a_change() {
        let store = Arc::new(PreferenceStore::in_memory());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let _sub = store.on_change(PREF_FREQUENT_SYNC_ENABLED, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.set_bool(PREF_FREQUENT_SYNC_ENABLED, true).expect("set");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(store.values().get(PREF_FREQUENT_SYNC_ENABLED), Some(&true));
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let home = TempDir::new().expect("home");
        let store = Arc::new(PreferenceStore::open_at(home.path()).expect("open"));
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let _sub = store.on_change(PREF_ALARMS_ENABLED, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // A directory where the file should be makes the final rename fail.
        std::fs::create_dir_all(prefs_path_at(home.path())).expect("block path");
        assert!(store.set_bool(PREF_ALARMS_ENABLED, false).is_err());

        assert!(store.get_bool(PREF_ALARMS_ENABLED, true));
        assert!(store.values().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn known_keys_have_defaults() {
        assert_eq!(default_for(PREF_FREQUENT_SYNC_ENABLED), Some(true));
        assert_eq!(default_for(PREF_ALARMS_ENABLED), Some(true));
        assert_eq!(default_for("unknown"), None);
    }

    #[test]
    fn corrupt_file_reports_parse_error_with_path() {
        let home = TempDir::new().expect("home");
        let path = prefs_path_at(home.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "frequent_sync_enabled: [not, a, bool").expect("write");

        let err = match PreferenceStore::open_at(home.path()) {
            Err(err) => err,
            Ok(_) => panic!("corrupt prefs must not open"),
        };
        assert!(matches!(err, PrefsError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("prefs.yaml"));
    }
}
