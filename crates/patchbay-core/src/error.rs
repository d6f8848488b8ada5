use thiserror::Error;

use crate::ids::{ClientId, PortId};

/// Error kinds surfaced by request validation (spec.md §7). These never
/// mutate client state beyond the request itself; the caller sees
/// `status = -1` on the wire.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("unknown port type {0:?}")]
    UnknownPortType(String),
    #[error("no free port slot")]
    PortTableFull,
    #[error("port type {0:?} free list is empty")]
    BufferExhausted(String),
    #[error("unknown port {0:?}")]
    UnknownPort(String),
    #[error("port {0} is not an output")]
    NotAnOutput(PortId),
    #[error("port {0} is not an input")]
    NotAnInput(PortId),
    #[error("port {0} is locked")]
    PortLocked(PortId),
    #[error("type mismatch: source type {0:?} != destination type {1:?}")]
    TypeMismatch(u32, u32),
    #[error("destination {0} already connected and has no mixdown")]
    NoMixdown(PortId),
    #[error("client {0} is not the owner of port {1}")]
    NotOwner(ClientId, PortId),
    #[error("client {0} is unknown")]
    UnknownClient(ClientId),
    #[error("client {0} is inactive")]
    InactiveClient(ClientId),
    #[error("client name {0:?} already in use")]
    DuplicateName(String),
    #[error("connection {0} -> {1} does not exist")]
    NoSuchConnection(PortId, PortId),
    #[error("client {0} is already the timebase client")]
    TimebaseHeld(ClientId),
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ipc error: {0}")]
    Ipc(#[from] patchbay_ipc::error::IpcError),
    #[error("driver error: {0}")]
    Driver(#[from] patchbay_driver::DriverError),
    #[error("failed to load internal client {0:?}: {1}")]
    PluginLoad(String, #[source] libloading::Error),
    #[error("internal client {0:?} initialize() returned {1}")]
    PluginInit(String, i32),
    #[error("driver aborted after {0} consecutive failures")]
    DriverAborted(u32),
    #[error("watchdog timed out: audio thread unresponsive for {0:?}")]
    WatchdogTimeout(std::time::Duration),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
