use dlm_core::{RETENTION, UNEXPECTED_EXIT, now_millis};

use super::DownloadManager;
use super::process;

/// Populates the registry from the state store.
///
/// Expired terminal records are deleted from disk instead of loaded. Inherited
/// active records whose worker is gone (or never got a pid) become errors.
/// Returns the number of records loaded.
pub async fn load_from_disk(manager: &DownloadManager) -> usize {
    let shared = &manager.shared;
    let now = now_millis();
    let mut loaded = 0;
    let mut dead = Vec::new();

    for mut record in shared.store.load_all().await {
        if record.is_expired(now, RETENTION) {
            tracing::debug!(id = %record.id, "pruning expired record");
            shared.store.delete(&record.id).await;
            continue;
        }
        if record.is_active() {
            let alive = record.process_id.is_some_and(process::is_alive);
            if !alive && record.fail(UNEXPECTED_EXIT) {
                tracing::info!(id = %record.id, pid = ?record.process_id, "inherited worker is gone");
                dead.push(record.id.clone());
            }
        }

        let mut registry = shared.registry();
        if registry.records.contains_key(&record.id) {
            continue;
        }
        registry.records.insert(record.id.clone(), record);
        loaded += 1;
    }

    for id in dead {
        manager.persist(&id).await;
    }
    tracing::info!(loaded, "restored transfers from disk");
    loaded
}

/// Re-reads orphan records from disk and re-checks their workers.
pub async fn refresh_orphans(manager: &DownloadManager) {
    let shared = &manager.shared;
    let orphans = shared.registry().orphan_ids();

    for id in orphans {
        let disk = shared.store.load(&id).await;
        let failed = {
            let mut registry = shared.registry();
            // Ids adopted by a live worker in the meantime are handled by its reader.
            if registry.workers.contains_key(&id) {
                continue;
            }
            let Some(record) = registry.records.get_mut(&id) else {
                continue;
            };
            if let Some(disk) = &disk
                && record.merge_worker_fields(disk)
            {
                tracing::trace!(id = %id, status = %record.status, "orphan progress from disk");
            }
            match record.process_id {
                Some(pid) if record.is_active() && !process::is_alive(pid) => {
                    record.fail(UNEXPECTED_EXIT)
                }
                _ => false,
            }
        };
        if failed {
            tracing::info!(id = %id, "orphaned worker is gone");
            manager.persist(&id).await;
        }
    }
}
