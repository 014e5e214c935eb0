use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use spdb_store::FlushReport;
use spdb_types::{DocumentKind, RootDocument};

use crate::database::LocalDatabase;
use crate::error::DbResult;

/// Administrative operations on a database.
pub struct DbAdmin<'a, D: RootDocument> {
    db: &'a LocalDatabase<D>,
}

impl<'a, D: RootDocument> DbAdmin<'a, D> {
    pub fn new(db: &'a LocalDatabase<D>) -> Self {
        Self { db }
    }

    pub fn storage_interval(&self) -> Duration {
        self.db.manager().storage_interval()
    }

    /// Change the flush interval of both storage managers. Zero is rejected.
    pub fn set_storage_interval(&self, interval: Duration) -> DbResult<()> {
        self.db.manager().set_storage_interval(interval)?;
        info!(interval_ms = interval.as_millis() as u64, "storage interval changed");
        Ok(())
    }

    /// Store everything that is dirty now.
    pub fn checkpoint(&self) -> FlushReport {
        self.db.checkpoint_all()
    }

    /// Bytes used by stored records.
    pub fn total_storage(&self) -> u64 {
        self.db.manager().persister().total_storage_bytes()
    }

    /// Flush, stop background work, and empty the database. Records stay on
    /// disk. Returns `false` if it was already shut down.
    pub fn shutdown(&self) -> bool {
        self.db.manager().shutdown()
    }

    pub fn status(&self) -> DbStatus {
        let manager = self.db.manager();
        let threads = thread_groups(Path::new("/proc/self/task"));
        let memory = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|text| MemoryStatus::parse(&text));

        DbStatus {
            captured_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").into(),
            uuid: manager.uuid(),
            thread_count: threads.values().sum(),
            thread_groups: threads,
            memory,
            storage_interval_ms: manager.storage_interval().as_millis() as u64,
            programs: manager.programs().len(),
            nightly_records: manager.nightly_records().len(),
            dirty_programs: manager.storage(DocumentKind::Program).dirty_count(),
            dirty_nightly_records: manager.storage(DocumentKind::NightlyRecord).dirty_count(),
            trigger_jobs_in_flight: manager.triggers().pool_stats().in_flight,
            functor_timeouts: manager.executor().logger().timeouts_fired(),
            total_storage_bytes: manager.persister().total_storage_bytes(),
            shut_down: manager.is_shut_down(),
        }
    }
}

/// Point-in-time diagnostics for one database.
#[derive(Clone, Debug, Serialize)]
pub struct DbStatus {
    pub captured_at: DateTime<Utc>,
    pub version: String,
    pub uuid: Uuid,
    pub thread_count: usize,
    /// Process threads by name, with trailing worker numbers folded.
    pub thread_groups: BTreeMap<String, usize>,
    pub memory: Option<MemoryStatus>,
    pub storage_interval_ms: u64,
    pub programs: usize,
    pub nightly_records: usize,
    pub dirty_programs: usize,
    pub dirty_nightly_records: usize,
    pub trigger_jobs_in_flight: usize,
    pub functor_timeouts: u64,
    pub total_storage_bytes: u64,
    pub shut_down: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryStatus {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl MemoryStatus {
    /// Parse `/proc/meminfo` text. Free memory is `MemAvailable`, or
    /// `MemFree` on kernels without it.
    pub fn parse(text: &str) -> Option<Self> {
        let mut fields = BTreeMap::new();
        for line in text.lines() {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(kib) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) else {
                continue;
            };
            fields.insert(name.trim(), kib * 1024);
        }

        let total_bytes = *fields.get("MemTotal")?;
        let free_bytes = fields
            .get("MemAvailable")
            .or_else(|| fields.get("MemFree"))
            .copied()?;
        Some(Self { total_bytes, free_bytes })
    }
}

/// Count threads under a `/proc/<pid>/task` directory by group name.
fn thread_groups(task_dir: &Path) -> BTreeMap<String, usize> {
    let mut groups = BTreeMap::new();
    let Ok(entries) = fs::read_dir(task_dir) else {
        return groups;
    };
    for entry in entries.flatten() {
        let name = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
        *groups.entry(group_name(name.trim()).to_string()).or_insert(0) += 1;
    }
    groups
}

/// `tokio-runtime-w` stays as is; `spdb-trigger-12` becomes `spdb-trigger`.
fn group_name(thread: &str) -> &str {
    let trimmed = thread
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches(['-', '_', '#', ' ']);
    if trimmed.is_empty() {
        "unnamed"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use spdb_model::{JsonCodec, MemDocument};
    use spdb_store::StoreError;
    use spdb_types::ProgramId;

    use crate::config::DatabaseConfig;
    use crate::error::DbError;

    type Db = LocalDatabase<MemDocument>;

    #[test]
    fn storage_interval_roundtrip() {
        let db = Db::create_transient(DatabaseConfig::default()).unwrap();
        let admin = db.admin();
        assert_eq!(admin.storage_interval(), Duration::from_secs(10));

        admin.set_storage_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(admin.storage_interval(), Duration::from_millis(250));
        assert_eq!(
            db.manager().storage(DocumentKind::NightlyRecord).storage_interval(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let db = Db::create_transient(DatabaseConfig::default()).unwrap();
        let err = db.admin().set_storage_interval(Duration::ZERO).unwrap_err();
        assert!(matches!(err, DbError::Store(StoreError::InvalidInterval(0))));
        assert_eq!(db.admin().storage_interval(), Duration::from_secs(10));
    }

    #[test]
    fn status_reflects_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::create(tmp.path(), Arc::new(JsonCodec), DatabaseConfig::default()).unwrap();
        let doc = MemDocument::program(Some(ProgramId::new("P-1").unwrap()));
        db.put(doc.clone()).unwrap();
        doc.set_title("dirty now");

        let status = db.admin().status();
        assert_eq!(status.uuid, db.uuid());
        assert_eq!(status.programs, 1);
        assert_eq!(status.nightly_records, 0);
        assert_eq!(status.dirty_programs, 1);
        assert_eq!(status.storage_interval_ms, 10_000);
        assert!(status.total_storage_bytes > 0);
        assert!(!status.shut_down);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["programs"], 1);
        assert!(json["captured_at"].is_string());

        let report = db.admin().checkpoint();
        assert_eq!(report.stored, 1);
        assert_eq!(db.admin().status().dirty_programs, 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let db = Db::create_transient(DatabaseConfig::default()).unwrap();
        assert!(db.admin().shutdown());
        assert!(!db.admin().shutdown());
        assert!(db.admin().status().shut_down);
    }

    #[test]
    fn meminfo_parsing() {
        let text = "MemTotal:       16314628 kB\nMemFree:         1024 kB\nMemAvailable:    2048 kB\n";
        assert_eq!(
            MemoryStatus::parse(text),
            Some(MemoryStatus {
                total_bytes: 16_314_628 * 1024,
                free_bytes: 2048 * 1024,
            })
        );

        let old_kernel = "MemTotal: 100 kB\nMemFree: 40 kB\n";
        assert_eq!(MemoryStatus::parse(old_kernel).unwrap().free_bytes, 40 * 1024);
        assert_eq!(MemoryStatus::parse("garbage"), None);
    }

    #[test]
    fn thread_names_fold_worker_numbers() {
        assert_eq!(group_name("spdb-trigger-12"), "spdb-trigger");
        assert_eq!(group_name("tokio-runtime-w"), "tokio-runtime-w");
        assert_eq!(group_name("spdb-storage-program"), "spdb-storage-program");
        assert_eq!(group_name("42"), "unnamed");
    }

    #[test]
    fn thread_groups_from_task_dir() {
        let tmp = tempfile::tempdir().unwrap();
        for (tid, comm) in [("1", "main\n"), ("2", "worker-1\n"), ("3", "worker-2\n")] {
            let dir = tmp.path().join(tid);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), comm).unwrap();
        }

        let groups = thread_groups(tmp.path());
        assert_eq!(groups.get("main"), Some(&1));
        assert_eq!(groups.get("worker"), Some(&2));
        assert!(thread_groups(&tmp.path().join("missing")).is_empty());
    }
}
