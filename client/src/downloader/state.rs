use dlm_core::{StateRecord, StateStore};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::process::Child;

use super::process;
use super::supervisor::WorkerCommand;

/// A worker started by this session, with its stdout still wired up.
#[derive(Debug)]
pub struct WorkerHandle {
    pub child: Child,
    pub pid: Option<u32>,
}

impl WorkerHandle {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }

    /// Asks the worker to stop. Failures mean it is already gone.
    pub fn terminate(&mut self) {
        match self.pid {
            Some(pid) if process::terminate(pid) => {}
            _ => {
                let _ = self.child.start_kill();
            }
        }
    }
}

/// In-memory view of every known transfer.
///
/// `records` holds every record loaded or started; `workers` only holds
/// workers spawned in the current session.
#[derive(Debug, Default)]
pub struct Registry {
    pub records: HashMap<String, StateRecord>,
    pub workers: HashMap<String, WorkerHandle>,
}

impl Registry {
    /// All records ordered by start time, then id.
    pub fn snapshot(&self) -> Vec<StateRecord> {
        let mut out: Vec<StateRecord> = self.records.values().cloned().collect();
        out.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Active records with no live stdout connection in this session.
    pub fn orphan_ids(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.is_active() && !self.workers.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn terminal_ids(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.is_terminal())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Signals whatever process backs `id`.
    ///
    /// A live handle is always signalled. A stored pid is only signalled while
    /// the record is active, since a finished worker's pid may have been reused.
    pub fn terminate_worker(&mut self, id: &str) {
        if let Some(handle) = self.workers.get_mut(id) {
            handle.terminate();
            return;
        }
        if let Some(record) = self.records.get(id)
            && record.is_active()
            && let Some(pid) = record.process_id
        {
            process::terminate(pid);
        }
    }
}

/// State shared between the façade and the per-worker reader tasks.
#[derive(Debug)]
pub struct Shared {
    registry: Mutex<Registry>,
    pub store: StateStore,
    pub download_dir: std::path::PathBuf,
    pub command: WorkerCommand,
    pub ids: dlm_core::IdGenerator,
    /// Serializes slot writes so the newest snapshot always lands last.
    pub persist_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    pub fn new(store: StateStore, download_dir: std::path::PathBuf, command: WorkerCommand) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            store,
            download_dir,
            command,
            ids: dlm_core::IdGenerator::new(),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Locks the registry. Never held across an await point.
    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("registry lock poisoned; continuing with recovered state");
            PoisonError::into_inner(poisoned)
        })
    }
}
