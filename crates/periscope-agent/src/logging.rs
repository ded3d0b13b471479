//! Per-agent log files with age-based rotation.
//!
//! Each agent process writes `<data_dir>/logs/agent-<pid>.log`. At
//! startup, files older than the configured retention are deleted; no
//! other on-disk state survives agent termination.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::LoggingConfig;

/// Delete log files older than `retention_days`. Returns how many were
/// removed.
pub fn cleanup_old_logs(dir: &Path, retention_days: u64) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let cutoff = SystemTime::now() - Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if expired && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Initialise tracing for an agent process: rotate old logs, then log to
/// both a per-pid file and the environment-filtered default output.
pub fn init(config: &LoggingConfig, pid: u32) -> anyhow::Result<PathBuf> {
    let dir = periscope_wire::handshake::logs_dir();
    std::fs::create_dir_all(&dir)?;
    let removed = cleanup_old_logs(&dir, config.retention_days);
    let path = dir.join(format!("agent-{pid}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.filter.parse()?),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    if removed > 0 {
        tracing::info!(removed, "rotated expired log files");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_ignores_fresh_and_foreign_files() {
        let dir = std::env::temp_dir().join(format!("periscope-logs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("agent-1.log"), "fresh").expect("write");
        std::fs::write(dir.join("keep.txt"), "not a log").expect("write");

        let removed = cleanup_old_logs(&dir, 3);
        assert_eq!(removed, 0);
        assert!(dir.join("agent-1.log").exists());
        assert!(dir.join("keep.txt").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        let dir = std::env::temp_dir().join("periscope-logs-definitely-missing");
        assert_eq!(cleanup_old_logs(&dir, 3), 0);
    }
}
