//! Named FIFOs used as the subgraph start/wait semaphores (spec.md §4.3, §6).
//!
//! A FIFO here is a binary semaphore with queue-of-one semantics: the
//! engine writes exactly one byte to start an external subgraph and reads
//! exactly one byte back when the last member of that subgraph finishes.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{IpcError, Result};

/// Path of the nth subgraph FIFO under `server_dir`, matching the naming
/// scheme in spec.md §6: `jack-ack-fifo-<server_pid>-<n>`.
pub fn fifo_path(server_dir: &Path, server_pid: u32, n: u32) -> PathBuf {
    server_dir.join(format!("jack-ack-fifo-{}-{}", server_pid, n))
}

/// Create the FIFO at `path` if it doesn't already exist, mode 0666.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| IpcError::Fifo(path.display().to_string(), nul_err()))?;

    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o666) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            return Err(IpcError::Fifo(path.display().to_string(), err));
        }
    }
    Ok(())
}

/// One endpoint of a subgraph FIFO, opened for either writing (the start
/// side, held by the engine) or reading (the wait side).
pub struct Fifo {
    file: File,
    path: PathBuf,
}

impl Fifo {
    /// Open (creating if necessary) the FIFO at `path` for writing. Opened
    /// with both read and write access so the open itself never blocks
    /// waiting for a reader (standard FIFO-without-a-peer workaround).
    pub fn open_writer(path: &Path) -> Result<Self> {
        ensure_fifo(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| IpcError::Fifo(path.display().to_string(), e))?;
        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Open (creating if necessary) the FIFO at `path` for reading.
    pub fn open_reader(path: &Path) -> Result<Self> {
        ensure_fifo(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| IpcError::Fifo(path.display().to_string(), e))?;
        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Write exactly one byte — starts a subgraph.
    pub fn signal(&mut self) -> Result<()> {
        self.file
            .write_all(&[1u8])
            .map_err(|e| IpcError::Fifo(self.path.display().to_string(), e))
    }

    /// Block (bounded by `timeout`) for exactly one byte — the wait side of
    /// a subgraph. Returns `Ok(true)` if the byte arrived, `Ok(false)` on
    /// timeout.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        if !poll_readable(self.file.as_raw_fd(), timeout)? {
            return Ok(false);
        }
        let mut buf = [0u8; 1];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| IpcError::Fifo(self.path.display().to_string(), e))?;
        Ok(true)
    }

    pub fn raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }
}

/// `poll()` a single fd for readability, with a bounded timeout.
pub fn poll_readable(fd: i32, timeout: Duration) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(&mut pfd as *mut _, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(IpcError::Socket(err));
        }
        return Ok(rc > 0 && (pfd.revents & libc::POLLIN) != 0);
    }
}

fn nul_err() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "fifo path contains NUL byte")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn signal_then_wait_delivers_one_byte() {
        let dir = std::env::temp_dir();
        let path = fifo_path(&dir, std::process::id(), 4242);
        let mut writer = Fifo::open_writer(&path).unwrap();
        let mut reader = Fifo::open_reader(&path).unwrap();

        writer.signal().unwrap();
        assert!(reader.wait(Duration::from_millis(200)).unwrap());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn wait_times_out_with_no_signal() {
        let dir = std::env::temp_dir();
        let path = fifo_path(&dir, std::process::id(), 4243);
        let mut reader = Fifo::open_reader(&path).unwrap();
        assert!(!reader.wait(Duration::from_millis(20)).unwrap());
        std::fs::remove_file(&path).ok();
    }
}
