use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::ClientMonitorCounters;

const GROUP_STATUS_FILE: &str = "status.json";
const FRONTEND_STATUS_FILE: &str = "frontend_status.json";

/// Merges monitoring data written by the group workers.
pub trait MonitorAggregator {
    fn aggregate(&mut self, groups: &[String]) -> crate::Result<()>;
}

/// Periodic removal of stale files.
pub trait Cleaner {
    fn cleanup(&mut self) -> crate::Result<()>;
}

/// Counters of one group, keyed by factory entry.
pub type GroupStatus = BTreeMap<String, ClientMonitorCounters>;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendStatus {
    pub groups: BTreeMap<String, ClientMonitorCounters>,
    pub entries: BTreeMap<String, ClientMonitorCounters>,
    pub total: ClientMonitorCounters,
}

/// Reads `<monitor_dir>/group_<name>/status.json` of every group and writes the sums to
/// `<monitor_dir>/frontend_status.json`.
pub struct FileMonitorAggregator {
    monitor_dir: PathBuf,
}

impl FileMonitorAggregator {
    pub fn new(monitor_dir: PathBuf) -> Self {
        Self { monitor_dir }
    }

    pub fn group_status_path(&self, group: &str) -> PathBuf {
        self.monitor_dir
            .join(format!("group_{group}"))
            .join(GROUP_STATUS_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.monitor_dir.join(FRONTEND_STATUS_FILE)
    }

    fn load_group(&self, group: &str) -> Option<GroupStatus> {
        let path = self.group_status_path(group);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No monitoring data for group {group} yet");
                return None;
            }
            Err(error) => {
                log::warn!("Cannot read {}: {error}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(status) => Some(status),
            Err(error) => {
                log::warn!("Invalid monitoring data in {}: {error}", path.display());
                None
            }
        }
    }
}

impl MonitorAggregator for FileMonitorAggregator {
    fn aggregate(&mut self, groups: &[String]) -> crate::Result<()> {
        let mut status = FrontendStatus::default();
        for group in groups {
            let Some(group_status) = self.load_group(group) else {
                continue;
            };
            let group_total: ClientMonitorCounters = group_status.values().copied().sum();
            for (entry, counters) in group_status {
                *status.entries.entry(entry).or_default() += counters;
            }
            status.total += group_total;
            status.groups.insert(group.clone(), group_total);
        }

        std::fs::create_dir_all(&self.monitor_dir)?;
        write_atomically(&self.status_path(), &serde_json::to_vec_pretty(&status)?)
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> crate::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Deletes regular files older than `max_age` from the given directories.
pub struct DirectoryCleaner {
    dirs: Vec<PathBuf>,
    max_age: Duration,
}

impl DirectoryCleaner {
    pub fn new(dirs: Vec<PathBuf>, max_age: Duration) -> Self {
        Self { dirs, max_age }
    }

    fn clean_dir(&self, dir: &Path) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()?
                .elapsed()
                .unwrap_or(Duration::ZERO);
            if age < self.max_age {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(error) => log::warn!("Cannot remove {}: {error}", entry.path().display()),
            }
        }
        Ok(removed)
    }
}

impl Cleaner for DirectoryCleaner {
    fn cleanup(&mut self) -> crate::Result<()> {
        for dir in &self.dirs {
            match self.clean_dir(dir) {
                Ok(0) => {}
                Ok(count) => log::debug!("Removed {count} old file(s) from {}", dir.display()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    log::warn!("Cleanup of {} failed: {error}", dir.display());
                }
            }
        }
        Ok(())
    }
}
