use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::JobId;

/// Tracks child worker processes (chunk recognizers, diarizers) per job so
/// cancellation and the orphan sweep can terminate them. Registration happens
/// in the infrastructure adapters that spawn the processes; the coordinator
/// is the only consumer.
#[derive(Default)]
pub struct WorkerRegistry {
    inner: Mutex<HashMap<JobId, Vec<u32>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: JobId, pid: u32) {
        let mut inner = self.inner.lock().expect("worker registry poisoned");
        inner.entry(job).or_default().push(pid);
    }

    pub fn deregister(&self, job: JobId, pid: u32) {
        let mut inner = self.inner.lock().expect("worker registry poisoned");
        if let Some(pids) = inner.get_mut(&job) {
            pids.retain(|p| *p != pid);
            if pids.is_empty() {
                inner.remove(&job);
            }
        }
    }

    /// Remove and return every pid registered for `job`.
    pub fn drain(&self, job: JobId) -> Vec<u32> {
        let mut inner = self.inner.lock().expect("worker registry poisoned");
        inner.remove(&job).unwrap_or_default()
    }

    /// Snapshot of all (job, pid) pairs currently registered.
    pub fn entries(&self) -> Vec<(JobId, u32)> {
        let inner = self.inner.lock().expect("worker registry poisoned");
        inner
            .iter()
            .flat_map(|(job, pids)| pids.iter().map(|pid| (*job, *pid)))
            .collect()
    }
}

/// SIGTERM, then SIGKILL once `grace` has elapsed without the process going
/// away. Recognition calls are not internally interruptible, so the hard
/// kill is the backstop.
pub async fn terminate_worker(pid: u32, grace: Duration) {
    #[cfg(unix)]
    {
        if signal_worker(pid, libc::SIGTERM) {
            return;
        }
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !worker_alive(pid) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }
        tracing::warn!(pid, "Worker ignored SIGTERM, sending SIGKILL");
        signal_worker(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, grace);
    }
}

/// Immediate SIGKILL, for fail-fast and cancellation paths where waiting for
/// a cooperative exit is not acceptable.
pub fn kill_worker(pid: u32) {
    #[cfg(unix)]
    signal_worker(pid, libc::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

/// Returns true when the process is already gone.
#[cfg(unix)]
fn signal_worker(pid: u32, signal: libc::c_int) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    rc != 0
}

#[cfg(unix)]
fn worker_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
