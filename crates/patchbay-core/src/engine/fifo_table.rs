//! Owns the subgraph FIFOs named under the server directory
//! (spec.md §4.3 step 5, §6), lazily creating FIFO `n` the first time the
//! sorter asks for it.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use patchbay_ipc::fifo::{fifo_path, Fifo};

use crate::graph::subgraph::FifoProvider;

pub struct FifoTable {
    server_dir: PathBuf,
    server_pid: u32,
    fifos: Vec<Option<Fifo>>,
}

impl FifoTable {
    pub fn new(server_dir: PathBuf, server_pid: u32) -> Self {
        Self {
            server_dir,
            server_pid,
            fifos: Vec::new(),
        }
    }

    /// Signal (write one byte to) FIFO `n` — starts a subgraph.
    pub fn signal(&mut self, n: u32) -> patchbay_ipc::error::Result<()> {
        if let Some(Some(f)) = self.fifos.get_mut(n as usize) {
            f.signal()?;
        }
        Ok(())
    }

    /// Wait (bounded) on FIFO `n` — the subgraph tail's wakeup.
    pub fn wait(
        &mut self,
        n: u32,
        timeout: std::time::Duration,
    ) -> patchbay_ipc::error::Result<bool> {
        match self.fifos.get_mut(n as usize) {
            Some(Some(f)) => f.wait(timeout),
            _ => Ok(false),
        }
    }

    fn open(&mut self, n: u32) -> RawFd {
        let idx = n as usize;
        if idx >= self.fifos.len() {
            self.fifos.resize_with(idx + 1, || None);
        }
        if self.fifos[idx].is_none() {
            let path = fifo_path(&self.server_dir, self.server_pid, n);
            let fifo = Fifo::open_writer(&path).expect("fifo create/open");
            self.fifos[idx] = Some(fifo);
        }
        self.fifos[idx].as_ref().unwrap().raw_fd()
    }
}

impl FifoProvider for FifoTable {
    fn ensure(&mut self, index: u32) -> (RawFd, RawFd) {
        let fd = self.open(index);
        (fd, fd)
    }
}
