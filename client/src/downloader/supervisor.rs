use bytes::BytesMut;
use dlm_core::{LineBuffer, UNEXPECTED_EXIT, WorkerMessage};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use super::DownloadManager;
use super::state::WorkerHandle;

const READ_CHUNK: usize = 8 * 1024;

/// How to launch a worker.
///
/// The worker receives `args` followed by three positional inputs: the
/// content reference, the target directory and the state slot path.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn build(&self, content_ref: &str, target_dir: &Path, slot: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(content_ref)
            .arg(target_dir)
            .arg(slot);
        cmd
    }
}

/// Spawns a detached worker for `id` with stdout piped back to us.
pub(super) fn spawn_worker(
    manager: &DownloadManager,
    id: &str,
    content_ref: &str,
) -> std::io::Result<Child> {
    let shared = &manager.shared;
    let slot = shared.store.slot_path(id);
    let mut cmd = shared
        .command
        .build(content_ref, &shared.download_dir, &slot);

    let stderr = match std::fs::File::create(shared.store.log_path(id)) {
        Ok(file) => Stdio::from(file),
        Err(err) => {
            tracing::debug!(id, error = %err, "worker log unavailable; discarding stderr");
            Stdio::null()
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .kill_on_drop(false);

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                // New session: the worker outlives our terminal and gets its own group.
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    cmd.spawn()
}

/// Registers a freshly spawned worker and starts folding its stdout.
pub(super) fn attach(manager: &DownloadManager, id: &str, mut child: Child) {
    let stdout = child.stdout.take();
    manager
        .shared
        .registry()
        .workers
        .insert(id.to_string(), WorkerHandle::new(child));

    let manager = manager.clone();
    let id = id.to_string();
    tokio::spawn(async move {
        if let Some(stdout) = stdout {
            read_worker_output(&manager, &id, stdout).await;
        }
        on_stream_closed(&manager, &id).await;
    });
}

async fn read_worker_output(manager: &DownloadManager, id: &str, mut stdout: ChildStdout) {
    let mut lines = LineBuffer::new();
    let mut chunk = BytesMut::with_capacity(READ_CHUNK);
    loop {
        chunk.clear();
        match stdout.read_buf(&mut chunk).await {
            Ok(0) => break,
            Ok(_) => {
                for line in lines.push(&chunk) {
                    handle_line(manager, id, &line).await;
                }
            }
            Err(err) => {
                tracing::debug!(id, error = %err, "worker stdout read failed");
                break;
            }
        }
    }
    if let Some(tail) = lines.finish() {
        handle_line(manager, id, &tail).await;
    }
}

/// Folds one protocol line into the record for `id` and persists it.
///
/// Malformed lines and lines for deleted records are dropped.
pub(super) async fn handle_line(manager: &DownloadManager, id: &str, line: &str) {
    let Some(message) = WorkerMessage::parse_line(line) else {
        return;
    };
    let changed = {
        let mut registry = manager.shared.registry();
        match registry.records.get_mut(id) {
            Some(record) => record.apply(&message),
            None => false,
        }
    };
    if changed {
        if message.is_terminal() {
            tracing::info!(id, ?message, "worker reported terminal state");
        } else {
            tracing::trace!(id, ?message, "worker update");
        }
        manager.persist(id).await;
    }
}

/// The worker's stdout closed: reap it and flag a missing terminal message.
async fn on_stream_closed(manager: &DownloadManager, id: &str) {
    let (handle, failed) = {
        let mut registry = manager.shared.registry();
        let handle = registry.workers.remove(id);
        let failed = registry
            .records
            .get_mut(id)
            .is_some_and(|record| record.fail(UNEXPECTED_EXIT));
        (handle, failed)
    };
    if let Some(mut handle) = handle {
        tokio::spawn(async move {
            match handle.child.wait().await {
                Ok(status) => tracing::debug!(pid = ?handle.pid, %status, "worker exited"),
                Err(err) => tracing::debug!(pid = ?handle.pid, error = %err, "worker wait failed"),
            }
        });
    }
    if failed {
        tracing::warn!(id, "worker output closed without a terminal message");
        manager.persist(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_appends_positional_inputs() {
        let command = WorkerCommand::new("dlm-worker").args(["--connect-timeout-secs", "5"]);
        let cmd = command.build(
            "magnet:?xt=abc",
            Path::new("/data"),
            Path::new("/data/.state/1.json"),
        );
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(std_cmd.get_program(), "dlm-worker");
        assert_eq!(
            args,
            vec![
                "--connect-timeout-secs",
                "5",
                "magnet:?xt=abc",
                "/data",
                "/data/.state/1.json"
            ]
        );
    }
}
