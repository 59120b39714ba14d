use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzEncoder;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::db::Database;
use crate::metrics;
use crate::model::{AnalysisEvent, CoredumpFile, CoredumpState, StorageEvent};

/* ============================= BACKEND ============================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub path: String,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
    pub value_score: f64,
    pub instance_name: String,
}

/// The four operations the pipeline needs from any dump store. Remote
/// object-store and network-filesystem implementations live outside this
/// repository; configuring them is rejected at startup.
pub trait StorageBackend: Send + Sync {
    fn store(&self, relative_path: &str, reader: &mut dyn Read, meta: &StoredFile) -> Result<u64>;
    fn delete(&self, relative_path: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<StoredFile>>;
    fn storage_size(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|f| f.size).sum())
    }
}

pub fn make_backend(config: &StorageConfig) -> Result<Box<dyn StorageBackend>> {
    match config.backend.as_str() {
        "local" => Ok(Box::new(LocalBackend::new(PathBuf::from(&config.local_path)))),
        other => bail!("storage backend {other:?} is not available"),
    }
}

/* ============================= LOCAL BACKEND ============================= */

const META_SUFFIX: &str = ".meta.json";

/// Filesystem store rooted at `storage.localPath`. Each object carries a
/// JSON sidecar so `list` can report score and ownership without the
/// database.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> LocalBackend {
        LocalBackend { root }
    }

    fn object_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<StoredFile>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            let Some(name) = path.to_str() else { continue };
            if !name.ends_with(META_SUFFIX) {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<StoredFile>(&raw) {
                Ok(meta) => out.push(meta),
                Err(e) => warn!(path = %name, error = %e, "stored_file_meta_unreadable"),
            }
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn store(&self, relative_path: &str, reader: &mut dyn Read, meta: &StoredFile) -> Result<u64> {
        let dest = self.object_path(relative_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let mut out = File::create(&dest)
            .with_context(|| format!("cannot create {}", dest.display()))?;
        let written =
            std::io::copy(reader, &mut out).with_context(|| format!("cannot write {}", dest.display()))?;

        let meta = StoredFile {
            size: written,
            ..meta.clone()
        };
        let meta_path = format!("{}{META_SUFFIX}", dest.display());
        std::fs::write(&meta_path, serde_json::to_vec(&meta)?)
            .with_context(|| format!("cannot write {meta_path}"))?;
        Ok(written)
    }

    fn delete(&self, relative_path: &str) -> Result<()> {
        let dest = self.object_path(relative_path);
        std::fs::remove_file(&dest)
            .with_context(|| format!("cannot delete {}", dest.display()))?;
        let meta_path = format!("{}{META_SUFFIX}", dest.display());
        if Path::new(&meta_path).exists() {
            let _ = std::fs::remove_file(&meta_path);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredFile>> {
        let mut out = Vec::new();
        if self.root.exists() {
            self.walk(&self.root, &mut out)?;
        }
        Ok(out)
    }
}

/* ============================= NAMING ============================= */

/// Deterministic object name keyed on the dump's modification time.
pub fn storage_object_name(file: &CoredumpFile, compressed: bool) -> String {
    let timestamp = file.mod_time.format("%Y-%m-%d_%H-%M-%S");
    let suffix = if compressed { ".core.gz" } else { ".core" };
    match (&file.instance_name, &file.pod_name, &file.container_name) {
        (Some(instance), Some(pod), Some(container)) => {
            format!("{instance}/{timestamp}_{pod}_{container}{suffix}")
        }
        _ => format!("{timestamp}_{}{suffix}", file.filename),
    }
}

/* ============================= RETENTION ============================= */

/// Which stored files a retention pass removes: everything past the age
/// horizon, then lowest-value files until the size budget holds.
pub fn select_retention_deletions(
    mut files: Vec<StoredFile>,
    now: DateTime<Utc>,
    retention_days: u32,
    max_storage_size: u64,
) -> Vec<StoredFile> {
    let horizon = chrono::Duration::days(retention_days as i64);
    let mut deletions: Vec<StoredFile> = Vec::new();

    files.retain(|f| {
        if now.signed_duration_since(f.stored_at) > horizon {
            deletions.push(f.clone());
            false
        } else {
            true
        }
    });

    let mut total: u64 = files.iter().map(|f| f.size).sum();
    if total > max_storage_size {
        files.sort_by(|a, b| {
            a.value_score
                .partial_cmp(&b.value_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for file in files {
            if total <= max_storage_size {
                break;
            }
            total -= file.size;
            deletions.push(file);
        }
    }
    deletions
}

/* ============================= STORAGE STAGE ============================= */

pub struct Storage {
    config: StorageConfig,
    value_threshold: f64,
    backend: Box<dyn StorageBackend>,
    db: Arc<Database>,
    events_tx: mpsc::Sender<StorageEvent>,
}

impl Storage {
    pub fn new(
        config: StorageConfig,
        value_threshold: f64,
        backend: Box<dyn StorageBackend>,
        db: Arc<Database>,
        events_tx: mpsc::Sender<StorageEvent>,
    ) -> Storage {
        Storage {
            config,
            value_threshold,
            backend,
            db,
            events_tx,
        }
    }

    /// Ingest analyzed dumps above the threshold; run retention hourly.
    pub async fn run(
        self,
        mut analysis_rx: mpsc::Receiver<AnalysisEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut retention_ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("storage_stopped");
                    return;
                }
                _ = retention_ticker.tick() => {
                    self.run_retention();
                }
                event = analysis_rx.recv() => {
                    match event {
                        Some(AnalysisEvent::Complete(file)) => self.maybe_store(file),
                        Some(_) => {} // skips and errors were already recorded upstream
                        None => {
                            info!("storage_input_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn maybe_store(&self, mut file: CoredumpFile) {
        if !file.is_analyzed() {
            warn!(path = %file.path, "unanalyzed_file_reached_storage");
            return;
        }
        if file.value_score < self.value_threshold {
            info!(
                path = %file.path,
                score = file.value_score,
                threshold = self.value_threshold,
                "coredump_below_threshold_not_stored"
            );
            metrics::COREDUMPS_PROCESSED.inc();
            return;
        }

        match self.store_file(&file) {
            Ok((stored_path, stored_size)) => {
                file.state = CoredumpState::Stored;
                metrics::FILES_STORED.inc();
                metrics::COREDUMPS_PROCESSED.inc();
                if let Ok(size) = self.backend.storage_size() {
                    metrics::STORAGE_SIZE_BYTES.set(size as i64);
                }
                if let Err(e) =
                    self.db
                        .update_coredump_state(&file.path, CoredumpState::Stored, None)
                {
                    warn!(error = %e, "stored_state_persist_failed");
                }
                if let Err(e) = self.db.insert_storage_event(
                    Some(&file.path),
                    "stored",
                    &stored_path,
                    stored_size,
                    None,
                ) {
                    warn!(error = %e, "storage_event_persist_failed");
                }
                info!(path = %file.path, stored_path = %stored_path, size = stored_size, "coredump_stored");
                self.forward(StorageEvent::FileStored {
                    file,
                    stored_path,
                    stored_size,
                });
            }
            Err(e) => {
                metrics::STORAGE_ERRORS.inc();
                metrics::COREDUMPS_ERRORS.inc();
                warn!(path = %file.path, error = %e, "coredump_store_failed");
                if let Err(db_err) = self.db.update_coredump_state(
                    &file.path,
                    CoredumpState::Error,
                    Some(&e.to_string()),
                ) {
                    warn!(error = %db_err, "error_state_persist_failed");
                }
                self.forward(StorageEvent::Error {
                    stored_path: file.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn store_file(&self, file: &CoredumpFile) -> Result<(String, u64)> {
        let source = File::open(&file.path)
            .with_context(|| format!("cannot open source dump {}", file.path))?;
        let object_name = storage_object_name(file, self.config.compression_enabled);
        let meta = StoredFile {
            path: object_name.clone(),
            size: 0,
            stored_at: Utc::now(),
            value_score: file.value_score,
            instance_name: file.instance_name.clone().unwrap_or_default(),
        };

        let written = if self.config.compression_enabled {
            let mut reader = GzEncoder::new(source, Compression::default());
            self.backend.store(&object_name, &mut reader, &meta)?
        } else {
            let mut reader = source;
            self.backend.store(&object_name, &mut reader, &meta)?
        };
        Ok((object_name, written))
    }

    /// Age first, then evict lowest-value files until the budget holds.
    fn run_retention(&self) {
        let files = match self.backend.list() {
            Ok(files) => files,
            Err(e) => {
                metrics::STORAGE_ERRORS.inc();
                warn!(error = %e, "retention_list_failed");
                return;
            }
        };

        let deletions = select_retention_deletions(
            files,
            Utc::now(),
            self.config.retention_days,
            self.config.max_storage_size,
        );

        for victim in deletions {
            match self.backend.delete(&victim.path) {
                Ok(()) => {
                    metrics::FILES_DELETED.inc();
                    info!(path = %victim.path, score = victim.value_score, "stored_file_deleted");
                    if let Err(e) = self.db.insert_storage_event(
                        None,
                        "deleted",
                        &victim.path,
                        victim.size,
                        Some("retention"),
                    ) {
                        warn!(error = %e, "delete_event_persist_failed");
                    }
                    self.forward(StorageEvent::FileDeleted {
                        stored_path: victim.path,
                        reason: "retention".to_string(),
                    });
                }
                Err(e) => {
                    metrics::STORAGE_ERRORS.inc();
                    warn!(path = %victim.path, error = %e, "stored_file_delete_failed");
                    self.forward(StorageEvent::Error {
                        stored_path: victim.path,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Ok(size) = self.backend.storage_size() {
            metrics::STORAGE_SIZE_BYTES.set(size as i64);
        }
    }

    fn forward(&self, event: StorageEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            warn!(error = %e, "storage_event_dropped");
        }
    }
}
