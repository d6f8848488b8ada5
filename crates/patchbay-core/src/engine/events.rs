//! Event delivery (spec.md §4.7).
//!
//! Internal clients get a direct callback under the graph lock; external
//! clients get the fixed-size wire record written to their event socket
//! followed by a one-byte status read, with no socket-level timeout.
//! `dead` clients (zombified, spec.md §4.6) silently drop every event.

use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use patchbay_ipc::wire::{self, EventKind};

use crate::client::Client;

/// Deliver one event to one client. Returns `Err` only for a transport
/// failure against an external client — the caller is expected to add
/// `ERROR_WITH_SOCKETS` to that client's error counter (spec.md §4.6,
/// §4.7) on failure.
pub fn deliver(client: &mut Client, event: wire::Event) -> Result<(), ()> {
    if client.dead {
        return Ok(());
    }

    if let Some((callback, arg)) = client.event_callback() {
        callback(event.kind, event.a, event.b, arg);
        return Ok(());
    }

    let Some(fd) = client.event_fd() else {
        // External client with no event socket yet (still mid-handshake):
        // nothing to deliver to.
        return Ok(());
    };

    write_and_ack(fd, &event).map_err(|_| ())
}

fn write_and_ack(fd: RawFd, event: &wire::Event) -> patchbay_ipc::error::Result<()> {
    // Safety: `fd` is a socket owned by the client's lifetime; we borrow
    // it for the duration of this call only, via `ManuallyDrop` semantics
    // (UnixStream normally closes on drop, so we must not let it).
    let mut stream = std::mem::ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(fd) });
    wire::write_record(&mut *stream, event)?;
    let mut status = [0u8; 1];
    stream
        .read_exact(&mut status)
        .map_err(patchbay_ipc::error::IpcError::Socket)?;
    if status[0] != 0 {
        return Err(patchbay_ipc::error::IpcError::ShortRead { got: 0, want: 1 });
    }
    Ok(())
}

/// Broadcast one event to every active, non-dead client.
pub fn broadcast(clients: &mut [Client], event: wire::Event) {
    for client in clients.iter_mut() {
        if client.active && !client.dead {
            let _ = deliver(client, event);
        }
    }
}

pub fn port_registered(port_id: u32) -> wire::Event {
    wire::Event::simple(EventKind::PortRegistered, port_id, 0)
}

pub fn port_unregistered(port_id: u32) -> wire::Event {
    wire::Event::simple(EventKind::PortUnregistered, port_id, 0)
}

pub fn port_connected(own_port: u32, other_port: u32) -> wire::Event {
    wire::Event::simple(EventKind::PortConnected, own_port, other_port)
}

pub fn port_disconnected(own_port: u32, other_port: u32) -> wire::Event {
    wire::Event::simple(EventKind::PortDisconnected, own_port, other_port)
}

pub fn graph_reordered(execution_order: u32) -> wire::Event {
    wire::Event::simple(EventKind::GraphReordered, execution_order, 0)
}

pub fn xrun() -> wire::Event {
    wire::Event::simple(EventKind::XRun, 0, 0)
}

pub fn buffer_size_change(new_size: u32) -> wire::Event {
    wire::Event::simple(EventKind::BufferSizeChange, new_size, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKind, Dispatch};
    use crate::ids::ClientId;

    extern "C" fn recorder(
        kind: u16,
        _a: u32,
        _b: u32,
        arg: *mut std::ffi::c_void,
    ) {
        unsafe {
            let counter = &*(arg as *const std::sync::atomic::AtomicU32);
            counter.store(kind as u32, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn internal_client_gets_direct_callback() {
        let counter = std::sync::atomic::AtomicU32::new(0);
        let mut client = Client::new(
            ClientId(0),
            "internal",
            ClientKind::Internal,
            Dispatch::Internal {
                process: dummy_process,
                arg: &counter as *const _ as *mut std::ffi::c_void,
                event_callback: Some(recorder),
            },
        );
        client.active = true;

        deliver(&mut client, xrun()).unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), EventKind::XRun as u32);
    }

    #[test]
    fn dead_client_drops_events_silently() {
        let mut client = Client::new(
            ClientId(1),
            "internal",
            ClientKind::Internal,
            Dispatch::Internal {
                process: dummy_process,
                arg: std::ptr::null_mut(),
                event_callback: None,
            },
        );
        client.dead = true;
        assert!(deliver(&mut client, xrun()).is_ok());
    }

    extern "C" fn dummy_process(_nframes: u32, _arg: *mut std::ffi::c_void) -> i32 {
        0
    }
}
