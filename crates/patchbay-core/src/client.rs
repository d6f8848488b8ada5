//! Client records (spec.md §3, §9 "Dynamic dispatch of client callbacks").

use std::os::unix::io::RawFd;
use std::time::Instant;

use ahash::AHashSet;

use crate::ids::{ClientId, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Internal,
    Driver,
    External,
}

/// Per-cycle control-block state (spec.md §4.4). The client-visible shared
/// block carries only these state bytes, never function pointers
/// (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    NotTriggered,
    Triggered,
    Running,
    Finished,
}

/// `event`-equivalent callback for an internal client: delivered as a
/// direct call under the graph lock (spec.md §4.7), never over a socket.
pub type EventCallbackFn = extern "C" fn(kind: u16, a: u32, b: u32, arg: *mut std::ffi::c_void);

/// Tagged dispatch strategy held server-side (spec.md §9: replaces raw
/// function pointers in shared memory with a server-private variant).
pub enum Dispatch {
    Internal {
        process: patchbay_plugin_abi::ClientProcessFn,
        arg: *mut std::ffi::c_void,
        event_callback: Option<EventCallbackFn>,
    },
    Driver {
        process: patchbay_plugin_abi::ClientProcessFn,
        arg: *mut std::ffi::c_void,
        event_callback: Option<EventCallbackFn>,
    },
    External {
        request_fd: RawFd,
        event_fd: Option<RawFd>,
        subgraph_start_fd: Option<RawFd>,
        subgraph_wait_fd: Option<RawFd>,
    },
}

// Safety: the internal/driver `arg` pointer is only ever touched from the
// single audio thread while the graph mutex excludes concurrent mutation
// of the client table; it never aliases a `Send`-unsafe type on the
// Rust side.
unsafe impl Send for Dispatch {}

pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub kind: ClientKind,
    pub active: bool,
    pub dead: bool,
    pub dispatch: Dispatch,
    pub ports: Vec<PortId>,
    /// Transitive closure, recomputed by the sorter each re-sort
    /// (spec.md §4.3 step 2).
    pub fed_by: AHashSet<ClientId>,
    /// Meaningful only while the graph mutex is held just after a sort
    /// (spec.md §3 invariant); stale otherwise.
    pub execution_order: u32,
    pub error: u32,
    pub timed_out: u32,
    pub cycle_state: CycleState,
    pub nframes: u32,
    pub signalled_at: Option<Instant>,
    pub awake_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    /// Supplemental (SPEC_FULL.md §2): per-client override of
    /// `client_timeout_msecs`; `None` defers to the engine default.
    pub timeout_override_msecs: Option<u32>,
    dlopen_handle: Option<libloading::Library>,
    finish: Option<patchbay_plugin_abi::ClientFinishFn>,
    finish_arg: *mut std::ffi::c_void,
}

// Safety: `finish_arg` follows the same single-audio-thread-under-graph-
// mutex discipline as `Dispatch`'s `arg` fields.
unsafe impl Send for Client {}

impl Client {
    pub fn new(id: ClientId, name: impl Into<String>, kind: ClientKind, dispatch: Dispatch) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            active: false,
            dead: false,
            dispatch,
            ports: Vec::new(),
            fed_by: AHashSet::new(),
            execution_order: 0,
            error: 0,
            timed_out: 0,
            cycle_state: CycleState::NotTriggered,
            nframes: 0,
            signalled_at: None,
            awake_at: None,
            finished_at: None,
            timeout_override_msecs: None,
            dlopen_handle: None,
            finish: None,
            finish_arg: std::ptr::null_mut(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, ClientKind::External)
    }

    /// Bind this client's subgraph FIFO ends during rechaining
    /// (spec.md §4.3 step 5). No-op for internal/driver clients, which
    /// have no subgraph fds.
    pub fn set_subgraph_fds(&mut self, start: Option<RawFd>, wait: Option<RawFd>) {
        if let Dispatch::External {
            subgraph_start_fd,
            subgraph_wait_fd,
            ..
        } = &mut self.dispatch
        {
            *subgraph_start_fd = start;
            *subgraph_wait_fd = wait;
        }
    }

    pub fn subgraph_fds(&self) -> Option<(Option<RawFd>, Option<RawFd>)> {
        match &self.dispatch {
            Dispatch::External {
                subgraph_start_fd,
                subgraph_wait_fd,
                ..
            } => Some((*subgraph_start_fd, *subgraph_wait_fd)),
            _ => None,
        }
    }

    /// Attach a dlopen handle so it outlives the loaded symbols and is
    /// dropped (dlclose'd) on full removal (spec.md §4.6: "dlclose if
    /// applicable").
    pub fn attach_plugin(
        &mut self,
        handle: libloading::Library,
        finish: patchbay_plugin_abi::ClientFinishFn,
        finish_arg: *mut std::ffi::c_void,
    ) {
        self.dlopen_handle = Some(handle);
        self.finish = Some(finish);
        self.finish_arg = finish_arg;
    }

    /// Invoke `jack_finish`-equivalent once, before the library is
    /// unloaded (spec.md §4.6).
    pub fn run_finish(&mut self) {
        if let Some(finish) = self.finish.take() {
            finish(self.finish_arg);
        }
    }

    pub fn dlclose(&mut self) {
        self.dlopen_handle = None;
    }

    /// The direct-call event path for internal/driver clients
    /// (spec.md §4.7). `None` for external clients (and for internal
    /// clients that registered no event callback).
    pub fn event_callback(&self) -> Option<(EventCallbackFn, *mut std::ffi::c_void)> {
        match &self.dispatch {
            Dispatch::Internal {
                event_callback: Some(cb),
                arg,
                ..
            }
            | Dispatch::Driver {
                event_callback: Some(cb),
                arg,
                ..
            } => Some((*cb, *arg)),
            _ => None,
        }
    }

    pub fn request_fd(&self) -> Option<RawFd> {
        match &self.dispatch {
            Dispatch::External { request_fd, .. } => Some(*request_fd),
            _ => None,
        }
    }

    pub fn event_fd(&self) -> Option<RawFd> {
        match &self.dispatch {
            Dispatch::External { event_fd, .. } => *event_fd,
            _ => None,
        }
    }

    pub fn set_event_fd(&mut self, fd: RawFd) {
        if let Dispatch::External { event_fd, .. } = &mut self.dispatch {
            *event_fd = Some(fd);
        }
    }
}
