//! Local filesystem surface: the server directory, master/ack socket
//! naming, and shutdown cleanup (spec.md §6).

use std::fs;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use crate::error::{IpcError, Result};

/// Highest socket index tried before giving up, per spec.md §6
/// (`i ∈ [0,999)`).
pub const MAX_SERVER_SLOTS: u32 = 999;

pub fn master_socket_path(dir: &Path, i: u32) -> PathBuf {
    dir.join(format!("jack_{}", i))
}

pub fn ack_socket_path(dir: &Path, i: u32) -> PathBuf {
    dir.join(format!("jack_ack_{}", i))
}

/// The bound master/ack listener pair for one server instance, plus the
/// slot index they occupy (used to derive the FIFO prefix).
pub struct ServerSockets {
    pub index: u32,
    pub master: UnixListener,
    pub ack: UnixListener,
}

/// Bind the first free `(jack_<i>, jack_ack_<i>)` pair in `dir`.
pub fn bind_first_free(dir: &Path) -> Result<ServerSockets> {
    fs::create_dir_all(dir)?;

    for i in 0..MAX_SERVER_SLOTS {
        let master_path = master_socket_path(dir, i);
        let ack_path = ack_socket_path(dir, i);

        if master_path.exists() || ack_path.exists() {
            continue;
        }

        let master = match UnixListener::bind(&master_path) {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e.into()),
        };
        let ack = match UnixListener::bind(&ack_path) {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                let _ = fs::remove_file(&master_path);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        return Ok(ServerSockets { index: i, master, ack });
    }

    Err(IpcError::NoFreeSocketSlot(MAX_SERVER_SLOTS))
}

/// Remove every `jack-*`/`jack_*` file in `dir`, as spec.md §6 requires on
/// shutdown.
pub fn cleanup_server_dir(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("jack-") || name.starts_with("jack_") {
            let _ = fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_first_free_slot_and_skips_taken_ones() {
        let dir = std::env::temp_dir().join(format!("patchbay-sock-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let first = bind_first_free(&dir).unwrap();
        assert_eq!(first.index, 0);

        let second = bind_first_free(&dir).unwrap();
        assert_eq!(second.index, 1);

        drop(first);
        drop(second);
        cleanup_server_dir(&dir);
        assert!(fs::read_dir(&dir).unwrap().next().is_none());
        fs::remove_dir(&dir).ok();
    }
}
