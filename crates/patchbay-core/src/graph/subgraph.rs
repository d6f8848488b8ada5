//! FIFO-delimited subgraph rechaining (spec.md §4.3 step 5, grounded on
//! the original `jack_rechain_graph`).
//!
//! A subgraph is a maximal run of External clients in sort order. The
//! engine writes one byte to start it and waits for one byte on its tail
//! to resume — internal/driver clients need no such handoff since they
//! run synchronously on the audio thread.

use std::os::unix::io::RawFd;

use crate::client::{Client, ClientKind};

/// Supplies the two fds (write end, read end) for FIFO index `n`,
/// creating the FIFO on demand. `crate::engine` implements this over
/// real named FIFOs; tests use a synthetic counter.
pub trait FifoProvider {
    fn ensure(&mut self, index: u32) -> (RawFd, RawFd);
}

/// Rechain `clients` (already in sorted order) against `fifos`, binding
/// `subgraph_start_fd`/`subgraph_wait_fd` on every External client and
/// returning the number of FIFO slots consumed.
pub fn rechain(clients: &mut [Client], fifos: &mut dyn FifoProvider) -> u32 {
    let mut n = 0u32;
    let mut open_subgraph = false;
    let mut last_external: Option<usize> = None;

    // FIFO n+1 is pre-created before each non-starting client (spec.md
    // §4.3 step 5), so the first FIFO always exists before we start.
    let (mut start_fd, mut wait_fd) = fifos.ensure(n);

    for idx in 0..clients.len() {
        match clients[idx].kind {
            ClientKind::External => {
                if !open_subgraph {
                    clients[idx].set_subgraph_fds(Some(start_fd), None);
                    open_subgraph = true;
                } else {
                    clients[idx].set_subgraph_fds(None, None);
                }
                last_external = Some(idx);
            }
            ClientKind::Internal | ClientKind::Driver => {
                if open_subgraph {
                    if let Some(last_idx) = last_external {
                        clients[last_idx].set_subgraph_fds(
                            clients[last_idx].subgraph_fds().and_then(|(s, _)| s),
                            Some(wait_fd),
                        );
                    }
                    n += 1;
                    let next = fifos.ensure(n);
                    start_fd = next.0;
                    wait_fd = next.1;
                    open_subgraph = false;
                    last_external = None;
                }
            }
        }
    }

    if open_subgraph {
        if let Some(last_idx) = last_external {
            clients[last_idx].set_subgraph_fds(
                clients[last_idx].subgraph_fds().and_then(|(s, _)| s),
                Some(wait_fd),
            );
        }
        n += 1;
    }

    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Dispatch;
    use crate::ids::ClientId;

    struct CountingFifos {
        calls: Vec<u32>,
    }
    impl FifoProvider for CountingFifos {
        fn ensure(&mut self, index: u32) -> (RawFd, RawFd) {
            self.calls.push(index);
            (1000 + index as RawFd, 2000 + index as RawFd)
        }
    }

    fn external(id: u64) -> Client {
        Client::new(
            ClientId(id),
            format!("e{id}"),
            ClientKind::External,
            Dispatch::External {
                request_fd: -1,
                event_fd: None,
                subgraph_start_fd: None,
                subgraph_wait_fd: None,
            },
        )
    }

    fn internal(id: u64) -> Client {
        Client::new(
            ClientId(id),
            format!("i{id}"),
            ClientKind::Internal,
            Dispatch::Internal {
                process: dummy_process,
                arg: std::ptr::null_mut(),
                event_callback: None,
            },
        )
    }

    extern "C" fn dummy_process(_nframes: u32, _arg: *mut std::ffi::c_void) -> i32 {
        0
    }

    #[test]
    fn single_external_subgraph_gets_start_and_wait_fd() {
        let mut clients = vec![external(0), internal(1)];
        let mut fifos = CountingFifos { calls: Vec::new() };
        let n = rechain(&mut clients, &mut fifos);

        assert_eq!(n, 1);
        let (start, wait) = clients[0].subgraph_fds().unwrap();
        assert_eq!(start, Some(1000));
        assert_eq!(wait, Some(2000));
    }

    #[test]
    fn run_of_externals_only_tail_gets_wait_fd() {
        let mut clients = vec![external(0), external(1), external(2), internal(3)];
        let mut fifos = CountingFifos { calls: Vec::new() };
        rechain(&mut clients, &mut fifos);

        assert_eq!(clients[0].subgraph_fds().unwrap().0, Some(1000));
        assert_eq!(clients[0].subgraph_fds().unwrap().1, None);
        assert_eq!(clients[1].subgraph_fds().unwrap().1, None);
        assert_eq!(clients[2].subgraph_fds().unwrap().1, Some(2000));
    }

    #[test]
    fn trailing_subgraph_closes_at_list_end() {
        let mut clients = vec![internal(0), external(1)];
        let mut fifos = CountingFifos { calls: Vec::new() };
        let n = rechain(&mut clients, &mut fifos);

        assert_eq!(n, 1);
        assert_eq!(clients[1].subgraph_fds().unwrap().1, Some(2000));
    }
}
