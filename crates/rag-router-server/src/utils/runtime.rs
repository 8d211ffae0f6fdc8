use serde::Serialize;
use sysinfo::System;

const MB: u64 = 1024 * 1024;

/// Memory and CPU figures of the host and of this process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub free_memory_mb: u64,
    pub process_memory_mb: u64,
    pub processors: usize,
    pub uptime_seconds: u64,
}

impl RuntimeStatus {
    /// Take a fresh sample. Scans the process table, so call it off the
    /// async workers.
    pub fn capture() -> Self {
        let sys = System::new_all();
        let process = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid));
        let (process_bytes, uptime_seconds) = process
            .map(|p| (p.memory(), p.run_time()))
            .unwrap_or((0, 0));

        Self {
            total_memory_mb: sys.total_memory() / MB,
            used_memory_mb: sys.used_memory() / MB,
            free_memory_mb: sys.free_memory() / MB,
            process_memory_mb: process_bytes / MB,
            processors: sys.cpus().len(),
            uptime_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_reports_this_host() {
        let status = RuntimeStatus::capture();
        assert!(status.total_memory_mb > 0);
        assert!(status.used_memory_mb <= status.total_memory_mb);
        assert!(status.processors > 0);
    }
}
