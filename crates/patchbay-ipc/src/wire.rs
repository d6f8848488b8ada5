//! Fixed-size wire records for the connect/ack/request/event protocol
//! (spec.md §6). spec.md treats the wire format as opaque at the boundary;
//! this module is the concrete choice of record layout other crates build
//! on. Every record is `#[repr(C)]` plain-old-data so it can be read and
//! written as raw bytes over a socket, mirroring the original engine's
//! fixed-size struct-over-socket protocol without needing a serialization
//! crate for what is, at this boundary, just POD memcpy.

use std::io::{Read, Write};
use std::mem::size_of;

use crate::error::{IpcError, Result};

pub const NAME_LEN: usize = 256;
pub const TYPE_NAME_LEN: usize = 64;
pub const SHM_NAME_LEN: usize = 128;

pub const PROTOCOL_VERSION: u32 = 1;

/// Marker for POD structs that may be read/written as raw bytes.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no padding-sensitive
/// invariants, and be valid for any bit pattern (integers and byte
/// arrays only).
pub unsafe trait WireRecord: Copy {}

pub fn read_record<T: WireRecord>(r: &mut impl Read) -> Result<T> {
    let mut buf = vec![0u8; size_of::<T>()];
    r.read_exact(&mut buf).map_err(IpcError::Socket)?;
    // Safety: T: WireRecord guarantees any byte pattern of the right size
    // is a valid T, and buf is exactly that size.
    Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const T) })
}

pub fn write_record<T: WireRecord>(w: &mut impl Write, record: &T) -> Result<()> {
    let bytes =
        unsafe { std::slice::from_raw_parts(record as *const T as *const u8, size_of::<T>()) };
    w.write_all(bytes).map_err(IpcError::Socket)
}

pub fn encode_name<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N.saturating_sub(1));
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

pub fn decode_name<const N: usize>(buf: &[u8; N]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(N);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Kind of the initial request on the master socket.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRequestKind {
    Load = 0,
    Unload = 1,
}

impl ConnectRequestKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ConnectRequestKind::Load),
            1 => Some(ConnectRequestKind::Unload),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConnectRequest {
    pub kind: u8,
    pub is_internal: u8,
    pub _pad: [u8; 6],
    pub name: [u8; NAME_LEN],
    /// dlopen path for an internal client load; empty for a plain external
    /// client.
    pub object_path: [u8; NAME_LEN],
    /// opaque init string forwarded to `jack_initialize`.
    pub object_data: [u8; NAME_LEN],
}
unsafe impl WireRecord for ConnectRequest {}

impl ConnectRequest {
    pub fn load(name: &str) -> Self {
        Self {
            kind: ConnectRequestKind::Load as u8,
            is_internal: 0,
            _pad: [0; 6],
            name: encode_name(name),
            object_path: [0; NAME_LEN],
            object_data: [0; NAME_LEN],
        }
    }

    pub fn unload(name: &str) -> Self {
        Self {
            kind: ConnectRequestKind::Unload as u8,
            is_internal: 0,
            _pad: [0; 6],
            name: encode_name(name),
            object_path: [0; NAME_LEN],
            object_data: [0; NAME_LEN],
        }
    }

    pub fn name(&self) -> String {
        decode_name(&self.name)
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConnectResult {
    pub protocol_version: u32,
    pub status: i32,
    pub client_id: u64,
    pub control_shm_name: [u8; SHM_NAME_LEN],
    pub control_size: u64,
    pub realtime: u8,
    pub _pad: [u8; 3],
    pub rt_priority: i32,
    pub n_port_types: u32,
    pub fifo_prefix: [u8; SHM_NAME_LEN],
}
unsafe impl WireRecord for ConnectResult {}

impl Default for ConnectResult {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            status: 0,
            client_id: 0,
            control_shm_name: [0; SHM_NAME_LEN],
            control_size: 0,
            realtime: 0,
            _pad: [0; 3],
            rt_priority: 0,
            n_port_types: 0,
            fifo_prefix: [0; SHM_NAME_LEN],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PortTypeDescriptor {
    pub type_id: u32,
    pub name: [u8; TYPE_NAME_LEN],
    pub shm_name: [u8; SHM_NAME_LEN],
    pub buffer_size: u32,
}
unsafe impl WireRecord for PortTypeDescriptor {}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AckRequest {
    pub client_id: u64,
}
unsafe impl WireRecord for AckRequest {}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AckResult {
    pub status: i32,
}
unsafe impl WireRecord for AckResult {}

/// Kind of a post-handshake control request (spec.md §4.5).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    RegisterPort = 0,
    UnRegisterPort = 1,
    ConnectPorts = 2,
    DisconnectPort = 3,
    DisconnectPorts = 4,
    ActivateClient = 5,
    DeactivateClient = 6,
    SetTimeBaseClient = 7,
    GetPortConnections = 8,
    GetPortNConnections = 9,
    GrantPrivilege = 10,
    /// Supplemental: overrides `client_timeout_msecs` for one client.
    SetClientTimeout = 11,
    /// Supplemental: sets/clears one of a port's two display aliases.
    SetPortAlias = 12,
}

impl RequestKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        use RequestKind::*;
        Some(match v {
            0 => RegisterPort,
            1 => UnRegisterPort,
            2 => ConnectPorts,
            3 => DisconnectPort,
            4 => DisconnectPorts,
            5 => ActivateClient,
            6 => DeactivateClient,
            7 => SetTimeBaseClient,
            8 => GetPortConnections,
            9 => GetPortNConnections,
            10 => GrantPrivilege,
            11 => SetClientTimeout,
            12 => SetPortAlias,
            _ => return None,
        })
    }
}

/// A post-handshake control request/reply. Field reuse mirrors the
/// original engine's single fixed-size request union: which fields are
/// meaningful depends on `kind` (documented per field below).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Request {
    pub kind: u16,
    pub _pad: u16,
    /// Reply status: 0 on success, -1 on failure. Ignored on the way in.
    pub status: i32,
    pub client_id: u64,
    /// RegisterPort: newly allocated port id (reply). UnRegisterPort /
    /// DisconnectPort / SetPortAlias: target port id.
    pub port_id: u32,
    /// GetPortNConnections: connection count (reply).
    pub other_port_id: u32,
    /// RegisterPort: port name. ConnectPorts/DisconnectPorts: source port
    /// name. GetPort*Connections: port name.
    pub name_a: [u8; NAME_LEN],
    /// RegisterPort: port type name. ConnectPorts/DisconnectPorts:
    /// destination port name. SetPortAlias: alias text.
    pub name_b: [u8; NAME_LEN],
    /// RegisterPort: port flags bitmask.
    pub flags: u32,
    /// SetClientTimeout: override in milliseconds. SetTimeBaseClient:
    /// conditional flag (nonzero = don't steal an existing timebase
    /// client).
    pub value: i64,
}
unsafe impl WireRecord for Request {}

impl Request {
    pub fn new(kind: RequestKind, client_id: u64) -> Self {
        Self {
            kind: kind as u16,
            _pad: 0,
            status: 0,
            client_id,
            port_id: 0,
            other_port_id: 0,
            name_a: [0; NAME_LEN],
            name_b: [0; NAME_LEN],
            flags: 0,
            value: 0,
        }
    }

    pub fn name_a(&self) -> String {
        decode_name(&self.name_a)
    }

    pub fn name_b(&self) -> String {
        decode_name(&self.name_b)
    }
}

/// Kind of an asynchronous event pushed to a client (spec.md §4.7).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PortRegistered = 0,
    PortUnregistered = 1,
    PortConnected = 2,
    PortDisconnected = 3,
    BufferSizeChange = 4,
    SampleRateChange = 5,
    GraphReordered = 6,
    XRun = 7,
    NewPortType = 8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: u16,
    pub _pad: u16,
    /// PortRegistered/Unregistered: port id. PortConnected/Disconnected:
    /// this owner's port id. GraphReordered: new execution_order.
    /// BufferSizeChange: new buffer size in frames.
    pub a: u32,
    /// PortConnected/Disconnected: the other endpoint's port id.
    pub b: u32,
    /// NewPortType/BufferSizeChange: region name that changed.
    pub name: [u8; SHM_NAME_LEN],
}
unsafe impl WireRecord for Event {}

impl Event {
    pub fn simple(kind: EventKind, a: u32, b: u32) -> Self {
        Self {
            kind: kind as u16,
            _pad: 0,
            a,
            b,
            name: [0; SHM_NAME_LEN],
        }
    }

    pub fn with_name(kind: EventKind, a: u32, name: &str) -> Self {
        Self {
            kind: kind as u16,
            _pad: 0,
            a,
            b: 0,
            name: encode_name(name),
        }
    }
}
