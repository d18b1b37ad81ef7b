//! FilterSettings persistence: JSON on disk, migrated on load, written
//! atomically through a uniquely named temp sibling that is renamed over the
//! target.
//!
//! Writers are serialized. Snapshots carry a sequence number so a write that
//! lost the race to a newer snapshot is skipped instead of clobbering it.

use linkwall_core::{FilterSettings, SettingsError};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    /// Sequence number of the snapshot currently on disk.
    last_saved: Mutex<u64>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means defaults. Any other read or parse failure is an error.
    pub fn load(&self, now_ms: i64) -> Result<FilterSettings, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", self.path.display());
                return Ok(FilterSettings::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let settings = FilterSettings::from_json(&raw, now_ms)?;
        debug!(
            terms = settings.terms.len(),
            muted = settings.muted_users.len(),
            "Loaded settings from {}",
            self.path.display()
        );
        Ok(settings)
    }

    pub fn save(&self, settings: &mut FilterSettings, now_ms: i64) -> Result<(), SettingsError> {
        let _order = self.last_saved.lock();
        self.write(settings, now_ms)
    }

    /// Write snapshot `seq` unless a snapshot at least as new is already on
    /// disk. Returns whether the file was written.
    pub fn save_snapshot(
        &self,
        seq: u64,
        settings: &mut FilterSettings,
        now_ms: i64,
    ) -> Result<bool, SettingsError> {
        let mut last = self.last_saved.lock();
        if seq <= *last {
            return Ok(false);
        }
        self.write(settings, now_ms)?;
        *last = seq;
        Ok(true)
    }

    fn write(&self, settings: &mut FilterSettings, now_ms: i64) -> Result<(), SettingsError> {
        let json = settings.to_json(now_ms)?;
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(io_err)?;
                parent
            }
            None => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}
