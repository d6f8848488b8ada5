//! Dense newtype identifiers. Port ids are indices in `[0, port_max)`
//! (spec.md §3); client ids are monotonic and never reused within a
//! server lifetime.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortTypeId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Monotonic id allocator. Never reused, matching the original engine's
/// client ids (spec.md §3: "id (monotonic)").
#[derive(Debug, Default)]
pub struct ClientIdGen(u64);

impl ClientIdGen {
    pub fn next(&mut self) -> ClientId {
        let id = self.0;
        self.0 += 1;
        ClientId(id)
    }
}
