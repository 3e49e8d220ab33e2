//! OS-level signalling of worker processes by pid.
//!
//! Pids are recycled by the OS, so both operations are best-effort.

/// Sends `SIGTERM` to the worker's process group, falling back to the pid.
/// Returns whether any signal was delivered.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Workers lead their own session, so the group id equals the pid.
    let group = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if group == 0 {
        return true;
    }
    let single = unsafe { libc::kill(pid, libc::SIGTERM) };
    if single != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "terminate signal not delivered");
    }
    single == 0
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}

/// Probes `pid` with signal 0. `EPERM` means it exists under another user.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_is_gone() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!is_alive(pid));
    }

    #[test]
    fn zero_pid_is_rejected() {
        assert!(!is_alive(0));
        assert!(!terminate(0));
    }

    #[test]
    fn terminate_stops_a_sleeping_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        assert!(terminate(child.id()));
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }
}
