//! Schedule Persistence
//!
//! One JSON file per schedule in a well-known directory, written via
//! temp-file + rename so a crash mid-write never leaves a torn schedule on
//! disk. File names are `<concept_id>.json`; concept ids are lowercase hex
//! so names never need escaping.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{ReviewSchedule, ScheduleError};

/// File-per-schedule store
#[derive(Debug)]
pub struct ScheduleStore {
    dir: PathBuf,
}

impl ScheduleStore {
    /// Open (creating if needed) the store directory.
    pub fn open(dir: PathBuf) -> Result<Self, ScheduleError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, concept_id: &str) -> PathBuf {
        self.dir.join(format!("{concept_id}.json"))
    }

    /// Load every schedule file, keyed by concept id.
    ///
    /// Unreadable files are skipped with a warning rather than poisoning
    /// the whole scheduler.
    pub fn load_all(&self) -> Result<HashMap<String, ReviewSchedule>, ScheduleError> {
        let mut schedules = HashMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(ScheduleError::from).and_then(|bytes| {
                serde_json::from_slice::<ReviewSchedule>(&bytes).map_err(ScheduleError::from)
            }) {
                Ok(schedule) => {
                    schedules.insert(schedule.concept_id.clone(), schedule);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable schedule file");
                }
            }
        }
        Ok(schedules)
    }

    /// Write a schedule atomically: serialize to a temp file in the same
    /// directory, fsync, then rename over the target.
    pub fn save(&self, schedule: &ReviewSchedule) -> Result<(), ScheduleError> {
        let bytes = serde_json::to_vec_pretty(schedule)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(&schedule.concept_id))
            .map_err(|e| ScheduleError::Io(e.error))?;
        Ok(())
    }

    /// Remove a schedule file. Idempotent.
    pub fn delete(&self, concept_id: &str) -> Result<(), ScheduleError> {
        match fs::remove_file(self.path_for(concept_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Flush directory metadata; called once per bulk-scheduling group.
    pub fn sync_dir(&self) -> Result<(), ScheduleError> {
        #[cfg(unix)]
        {
            fs::File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }
}
