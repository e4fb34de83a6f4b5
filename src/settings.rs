use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::RwLock};
use tokio::sync::Mutex;

/// Audio and haptic preferences for rest cues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CueSettings {
    pub sound_enabled: bool,
    pub haptics_enabled: bool,
}

impl Default for CueSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            haptics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    cues: CueSettings,
}

/// Flat-file settings. The in-memory copy is usable immediately with
/// defaults; `load` and `save` touch the disk.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    // held from serialization until the file write completes
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            data: RwLock::new(UserSettings::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn cues(&self) -> CueSettings {
        self.data.read().unwrap_or_else(|p| p.into_inner()).cues
    }

    /// Reads the file into memory. A missing file keeps the defaults, an
    /// unreadable one is replaced by defaults on the next save.
    pub async fn load(&self) -> Result<CueSettings> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring corrupt settings file {}: {}",
                    self.path.display(),
                    err
                );
                UserSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => UserSettings::default(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read settings from {}", self.path.display())
                })
            }
        };

        let cues = data.cues;
        *self.data.write().unwrap_or_else(|p| p.into_inner()) = data;
        Ok(cues)
    }

    /// Saves run one at a time, so the file always ends up holding the
    /// value of the last call to take the lock.
    pub async fn save(&self, cues: CueSettings) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let serialized = {
            let mut guard = self.data.write().unwrap_or_else(|p| p.into_inner());
            guard.cues = cues;
            serde_json::to_string_pretty(&*guard)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create settings dir {}", parent.display())
                })?;
            }
        }

        tokio::fs::write(&self.path, serialized)
            .await
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
