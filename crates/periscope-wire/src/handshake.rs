//! The bootstrap handshake: how clients discover live agents.
//!
//! An agent advertises itself by writing `<data_dir>/agents/<pid>.port`
//! containing the TCP port it listens on. Clients scan that directory,
//! read candidate files, and validate each with a ping before use. Stale
//! files left by dead agents are ignored and may be cleaned
//! opportunistically.
//!
//! The data directory defaults to a per-user location and can be
//! overridden with the `PERISCOPE_DATA_DIR` environment variable.

use std::path::{Path, PathBuf};

use crate::{Result, WireError};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PERISCOPE_DATA_DIR";

/// Resolve the per-user data directory.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "macos")]
    {
        home_fallback("Library/Application Support/Periscope")
    }
    #[cfg(target_os = "windows")]
    {
        home_fallback("Periscope")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        home_fallback(".periscope")
    }
}

/// Fallback home directory resolution.
fn home_fallback(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join(suffix)
}

/// Directory holding one port file per live agent.
pub fn agents_dir() -> PathBuf {
    data_dir().join("agents")
}

/// Directory holding rotated agent logs.
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// The port file for the agent in process `pid`.
pub fn port_file(pid: u32) -> PathBuf {
    agents_dir().join(format!("{pid}.port"))
}

/// Advertise a listening agent by writing its port file.
pub fn advertise(pid: u32, port: u16) -> Result<PathBuf> {
    let path = port_file(pid);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, port.to_string())?;
    tracing::debug!(pid, port, "agent advertised");
    Ok(path)
}

/// Remove the advertisement on shutdown. Missing files are fine.
pub fn withdraw(pid: u32) {
    let _ = std::fs::remove_file(port_file(pid));
}

/// Parse one port file into `(pid, port)`.
pub fn parse_port_file(path: &Path) -> Result<(u32, u16)> {
    let pid = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok())
        .ok_or_else(|| {
            WireError::MalformedFrame(format!("port file has no pid stem: {}", path.display()))
        })?;
    let contents = std::fs::read_to_string(path)?;
    let port = contents.trim().parse().map_err(|_| {
        WireError::MalformedFrame(format!("port file holds no port: {}", path.display()))
    })?;
    Ok((pid, port))
}

/// Every advertised `(pid, port)` pair, liveness unverified.
pub fn discover() -> Vec<(u32, u16)> {
    let Ok(entries) = std::fs::read_dir(agents_dir()) else {
        return Vec::new();
    };
    let mut agents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("port") {
            if let Ok(pair) = parse_port_file(&path) {
                agents.push(pair);
            }
        }
    }
    agents.sort_unstable();
    agents
}

/// Derive the default listening port from a process id.
///
/// Small pids are used directly, mirroring the "port defaults to the
/// process id" convention; larger ones fold into the dynamic range.
pub fn default_port(pid: u32) -> u16 {
    if (1024..=u32::from(u16::MAX)).contains(&pid) {
        pid as u16
    } else {
        1024 + (pid % 64_000) as u16
    }
}
