use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::store::TaskStore;
use crate::task::{CategoryFilter, Task, ValidationError};

pub const TASKS_KEY: &str = "tasks";
pub const PREFERENCES_KEY: &str = "preferences";

/// Named string records, the shape of browser local storage.
pub trait KvStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per record inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    pub data_dir: PathBuf,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened file storage");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KvStorage for FileStorage {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(file = %path.display(), "record not found");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        save_atomic(&path, value).with_context(|| format!("failed to save {key}.json"))
    }
}

/// In-process storage. Writes can be made to fail to exercise the
/// non-fatal persistence path.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl KvStorage for MemoryStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            return Err(anyhow!("memory storage is read-only"));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: bool,
}

/// A `TaskStore` mirrored into key-value storage after every mutation.
///
/// Storage failures never surface as errors here: reads fall back to an
/// empty list and failed writes leave the in-memory state authoritative.
#[derive(Debug)]
pub struct DataStore<S: KvStorage> {
    storage: S,
    tasks: TaskStore,
    preferences: Preferences,
    last_save_ok: bool,
}

impl<S: KvStorage> DataStore<S> {
    #[tracing::instrument(skip(storage))]
    pub fn open(storage: S, default_dark_mode: bool) -> Self {
        let tasks = match storage.get(TASKS_KEY) {
            Ok(Some(blob)) => TaskStore::from_blob(&blob),
            Ok(None) => {
                debug!("no task blob yet; starting empty");
                TaskStore::new()
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading task blob; starting empty");
                TaskStore::new()
            }
        };

        let preferences = match storage.get(PREFERENCES_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "preferences blob is malformed; using defaults");
                Preferences {
                    dark_mode: default_dark_mode,
                }
            }),
            Ok(None) => Preferences {
                dark_mode: default_dark_mode,
            },
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading preferences; using defaults");
                Preferences {
                    dark_mode: default_dark_mode,
                }
            }
        };

        info!(
            tasks = tasks.len(),
            dark_mode = preferences.dark_mode,
            "opened datastore"
        );

        Self {
            storage,
            tasks,
            preferences,
            last_save_ok: true,
        }
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Whether the most recent write reached storage.
    pub fn last_save_ok(&self) -> bool {
        self.last_save_ok
    }

    pub fn add_task(
        &mut self,
        text: &str,
        category: CategoryFilter,
        due_date: Option<NaiveDate>,
    ) -> Result<Task, ValidationError> {
        let task = self.tasks.add_task(text, category, due_date)?;
        self.persist_tasks();
        Ok(task)
    }

    pub fn delete_task(&mut self, id: &str) -> bool {
        let removed = self.tasks.delete_task(id);
        if removed {
            self.persist_tasks();
        }
        removed
    }

    pub fn toggle_complete(&mut self, id: &str) -> Option<bool> {
        let toggled = self.tasks.toggle_complete(id);
        if toggled.is_some() {
            self.persist_tasks();
        }
        toggled
    }

    pub fn start_edit(&mut self, id: &str) -> bool {
        let started = self.tasks.start_edit(id);
        if started {
            self.persist_tasks();
        }
        started
    }

    pub fn save_edit(&mut self, id: &str, new_text: &str, new_due_date: Option<NaiveDate>) -> bool {
        let saved = self.tasks.save_edit(id, new_text, new_due_date);
        if self.tasks.get(id).is_some() {
            self.persist_tasks();
        }
        saved
    }

    pub fn set_active_category(&mut self, filter: CategoryFilter) {
        self.tasks.set_active_category(filter);
    }

    pub fn dark_mode(&self) -> bool {
        self.preferences.dark_mode
    }

    pub fn set_dark_mode(&mut self, enabled: bool) {
        self.preferences.dark_mode = enabled;
        self.persist_preferences();
    }

    pub fn toggle_dark_mode(&mut self) -> bool {
        let enabled = !self.preferences.dark_mode;
        self.set_dark_mode(enabled);
        enabled
    }

    pub fn export(&self) -> anyhow::Result<String> {
        self.tasks.serialize()
    }

    #[tracing::instrument(skip(self))]
    fn persist_tasks(&mut self) {
        let result = self
            .tasks
            .serialize()
            .and_then(|blob| self.storage.set(TASKS_KEY, &blob));
        self.record_save(TASKS_KEY, result);
    }

    #[tracing::instrument(skip(self))]
    fn persist_preferences(&mut self) {
        let result = serde_json::to_string(&self.preferences)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.storage.set(PREFERENCES_KEY, &raw));
        self.record_save(PREFERENCES_KEY, result);
    }

    fn record_save(&mut self, key: &str, result: anyhow::Result<()>) {
        match result {
            Ok(()) => {
                debug!(key, "persisted record");
                self.last_save_ok = true;
            }
            Err(err) => {
                warn!(key, error = %format!("{err:#}"), "failed to persist; keeping in-memory state");
                self.last_save_ok = false;
            }
        }
    }
}

#[tracing::instrument(skip(path, contents))]
fn save_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "saving atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
