//! Orchestration of transfer workers.
//!
//! [`DownloadManager`] is the only surface a front end needs: it starts
//! workers, folds their progress into [`StateRecord`]s, persists those records
//! so a later session can pick them up, and reconciles records whose worker
//! vanished.

mod init;
mod process;
mod state;
mod supervisor;

use dlm_core::{CANCELLED, StateRecord, StateStore, now_millis};
use std::path::PathBuf;
use std::sync::Arc;

use state::Shared;
pub use supervisor::WorkerCommand;

/// Explicitly owned handle to the transfer registry.
///
/// Cloning is cheap and every clone observes the same records. Construct one
/// per process and call [`DownloadManager::load_from_disk`] once at startup.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    /// `download_dir` is handed to every worker as its target directory.
    pub fn new(store: StateStore, download_dir: PathBuf, command: WorkerCommand) -> Self {
        Self {
            shared: Arc::new(Shared::new(store, download_dir, command)),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.shared.store
    }

    /// Restores records persisted by earlier sessions. Returns how many loaded.
    pub async fn load_from_disk(&self) -> usize {
        init::load_from_disk(self).await
    }

    /// Creates a `connecting` record, persists it and launches its worker.
    ///
    /// Always yields the new id. A worker that cannot be spawned leaves the
    /// record in `error`.
    pub async fn start(&self, content_ref: &str, title: &str, quality: &str) -> String {
        let id = self.shared.ids.next_id();
        let record = StateRecord::new(id.clone(), content_ref, title, quality, now_millis());
        self.shared.registry().records.insert(id.clone(), record);
        self.persist(&id).await;

        match supervisor::spawn_worker(self, &id, content_ref) {
            Ok(child) => {
                let pid = child.id();
                if let Some(record) = self.shared.registry().records.get_mut(&id) {
                    record.process_id = pid;
                }
                tracing::info!(id = %id, pid = ?pid, content_ref, "worker started");
                supervisor::attach(self, &id, child);
            }
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "failed to spawn worker");
                if let Some(record) = self.shared.registry().records.get_mut(&id) {
                    record.fail(&format!("Failed to start worker: {err}"));
                }
            }
        }
        self.persist(&id).await;
        id
    }

    /// Every record, ordered by start time.
    pub fn list(&self) -> Vec<StateRecord> {
        self.shared.registry().snapshot()
    }

    /// Records still connecting or downloading.
    pub fn list_active(&self) -> Vec<StateRecord> {
        self.list().into_iter().filter(|r| r.is_active()).collect()
    }

    pub fn get(&self, id: &str) -> Option<StateRecord> {
        self.shared.registry().records.get(id).cloned()
    }

    /// Pulls progress of workers from earlier sessions off disk and checks
    /// they are still running. Call before rendering a status view.
    pub async fn refresh(&self) {
        init::refresh_orphans(self).await;
    }

    /// Stops the worker and marks an active record `Cancelled`.
    ///
    /// Unknown ids and terminal records are left alone.
    pub async fn cancel(&self, id: &str) {
        let cancelled = {
            let mut registry = self.shared.registry();
            registry.terminate_worker(id);
            registry
                .records
                .get_mut(id)
                .is_some_and(|record| record.fail(CANCELLED))
        };
        if cancelled {
            tracing::info!(id, "transfer cancelled");
            self.persist(id).await;
        }
    }

    /// Forgets every terminal record, in memory and on disk.
    pub async fn clear_completed(&self) -> usize {
        let _guard = self.shared.persist_lock.lock().await;
        let ids = {
            let mut registry = self.shared.registry();
            let ids = registry.terminal_ids();
            for id in &ids {
                registry.records.remove(id);
            }
            ids
        };
        for id in &ids {
            self.shared.store.delete(id).await;
        }
        tracing::debug!(cleared = ids.len(), "cleared finished transfers");
        ids.len()
    }

    /// Stops any worker and removes the record whatever its status.
    pub async fn delete(&self, id: &str) {
        let _guard = self.shared.persist_lock.lock().await;
        let existed = {
            let mut registry = self.shared.registry();
            registry.terminate_worker(id);
            registry.records.remove(id).is_some()
        };
        if existed {
            self.shared.store.delete(id).await;
            tracing::info!(id, "transfer deleted");
        }
    }

    /// Writes the current snapshot of `id` to its slot.
    ///
    /// The snapshot is taken after the write lock is held, so concurrent
    /// writers always leave the newest state on disk. Deleted ids are skipped.
    async fn persist(&self, id: &str) {
        let _guard = self.shared.persist_lock.lock().await;
        let Some(record) = self.get(id) else {
            return;
        };
        if let Err(err) = self.shared.store.write(&record).await {
            tracing::warn!(id, error = %err, "failed to persist transfer state");
        }
    }
}
