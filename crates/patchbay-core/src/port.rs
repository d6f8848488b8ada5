//! Port descriptors, shared and server-private halves (spec.md §3).

use crate::ids::{ClientId, PortId, PortTypeId};
use crate::port_type::BufferInfo;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u32 {
        const IS_INPUT    = 0b0001;
        const IS_OUTPUT   = 0b0010;
        const IS_TERMINAL = 0b0100;
        const IS_PHYSICAL = 0b1000;
    }
}

/// The shared descriptor half (spec.md §3: "Port (shared descriptor)").
/// Conceptually mapped into client address spaces; here it is the
/// server's authoritative copy.
#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub owning_client: ClientId,
    pub type_id: PortTypeId,
    pub flags: PortFlags,
    pub in_use: bool,
    pub locked: bool,
    pub latency: u32,
    pub total_latency: u32,
    pub buffer: Option<BufferInfo>,
    pub monitor_requests: u32,
    /// Supplemental (SPEC_FULL.md §2): up to two display aliases,
    /// settable via `SetPortAlias`.
    pub aliases: [Option<String>; 2],
}

impl Port {
    pub fn is_input(&self) -> bool {
        self.flags.contains(PortFlags::IS_INPUT)
    }

    pub fn is_output(&self) -> bool {
        self.flags.contains(PortFlags::IS_OUTPUT)
    }

    pub fn is_terminal(&self) -> bool {
        self.flags.contains(PortFlags::IS_TERMINAL)
    }
}

/// The server-private half (spec.md §3: "Port (server-private)").
#[derive(Debug, Clone, Default)]
pub struct PortPrivate {
    /// Both endpoints carry the same `(source, destination)` pair
    /// (spec.md invariant: "Connection lists are symmetric").
    pub connections: Vec<(PortId, PortId)>,
}

impl PortPrivate {
    pub fn has_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
