//! JSON file persistence for the device configuration

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::{DeviceConfig, DeviceConfigPatch};
use errors::{ServiceError, ServiceResult};

/// On-disk record: `{host, port, slaveId, timeout, lastUpdated}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfig<'a> {
    #[serde(flatten)]
    config: &'a DeviceConfig,
    last_updated: DateTime<Utc>,
}

/// Reads and atomically rewrites the persisted configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record
    ///
    /// Returns `Ok(None)` when no file exists yet. Fields are read leniently;
    /// range checks happen when the record is merged.
    pub fn load(&self) -> ServiceResult<Option<DeviceConfigPatch>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let patch = serde_json::from_str::<DeviceConfigPatch>(&content).map_err(|e| {
            ServiceError::ParseError {
                file: self.path.display().to_string(),
                error: e.to_string(),
            }
        })?;
        debug!("Loaded persisted config from {}", self.path.display());
        Ok(Some(patch))
    }

    /// Persist the config
    ///
    /// Writes a sibling temp file then renames it over the target, so readers
    /// never see a half-written record.
    pub fn save(&self, config: &DeviceConfig) -> ServiceResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let record = PersistedConfig {
            config,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!("Persisted config to {}", self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
