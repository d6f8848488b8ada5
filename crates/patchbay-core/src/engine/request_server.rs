//! The request-server thread (spec.md §4.5): one cooperative loop
//! polling the master accept socket, the ack accept socket, and every
//! external client's request socket, with a 10 s timeout.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use patchbay_ipc::error::{IpcError, Result as IpcResult};
use patchbay_ipc::socket::ServerSockets;
use patchbay_ipc::wire::{
    read_record, write_record, AckRequest, AckResult, ConnectRequest, ConnectRequestKind,
    ConnectResult, Request, SHM_NAME_LEN,
};

use crate::client::{ClientKind, Dispatch};
use crate::engine::Engine;
use crate::ids::ClientId;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

struct Connection {
    stream: UnixStream,
}

pub struct RequestServer {
    master: UnixListener,
    ack: UnixListener,
    fifo_prefix: String,
    connections: HashMap<u64, Connection>,
}

impl RequestServer {
    pub fn new(sockets: ServerSockets, server_pid: u32) -> Self {
        Self {
            master: sockets.master,
            ack: sockets.ack,
            fifo_prefix: format!("jack-ack-fifo-{}-", server_pid),
            connections: HashMap::new(),
        }
    }

    /// One `poll()` iteration; processes whatever is ready, then returns.
    /// Intended to be called in a loop from its own thread.
    pub fn run_once(&mut self, engine: &Engine) -> IpcResult<()> {
        let ids: Vec<u64> = self.connections.keys().copied().collect();
        let mut pfds = Vec::with_capacity(ids.len() + 2);
        pfds.push(pollfd(self.master.as_raw_fd()));
        pfds.push(pollfd(self.ack.as_raw_fd()));
        for &id in &ids {
            pfds.push(pollfd(self.connections[&id].stream.as_raw_fd()));
        }

        let rc = unsafe {
            libc::poll(
                pfds.as_mut_ptr(),
                pfds.len() as libc::nfds_t,
                POLL_TIMEOUT.as_millis() as i32,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(IpcError::Socket(err));
        }
        if rc == 0 {
            return Ok(());
        }

        if pfds[0].revents & libc::POLLIN != 0 {
            self.accept_connect(engine)?;
        }
        if pfds[1].revents & libc::POLLIN != 0 {
            self.accept_ack(engine)?;
        }
        for (slot, &id) in ids.iter().enumerate() {
            if pfds[slot + 2].revents & libc::POLLIN != 0 {
                self.handle_request(engine, id);
            }
        }
        Ok(())
    }

    fn accept_connect(&mut self, engine: &Engine) -> IpcResult<()> {
        let (mut stream, _) = self.master.accept()?;
        let connect: ConnectRequest = read_record(&mut stream)?;
        let name = connect.name();

        let result = match ConnectRequestKind::from_u8(connect.kind) {
            Some(ConnectRequestKind::Load) => self.handle_load(engine, &connect, &name, &mut stream),
            Some(ConnectRequestKind::Unload) => {
                self.handle_unload(engine, &name);
                Ok(())
            }
            None => Err(IpcError::ShortRead { got: 0, want: 1 }),
        };

        if let Err(e) = result {
            tracing::warn!(client = %name, error = %e, "connect-request failed");
        }
        Ok(())
    }

    fn handle_load(
        &mut self,
        engine: &Engine,
        connect: &ConnectRequest,
        name: &str,
        stream: &mut UnixStream,
    ) -> IpcResult<()> {
        let client_id = if connect.is_internal != 0 {
            let object_path = decode(&connect.object_path);
            let object_data = decode(&connect.object_data);
            engine
                .load_internal_client(name, &object_path, &object_data)
                .map_err(plugin_load_err(name))?
        } else {
            let conn_stream = stream.try_clone()?;
            let request_fd = conn_stream.as_raw_fd();
            let client_id = engine
                .create_client(
                    name,
                    ClientKind::External,
                    Dispatch::External {
                        request_fd,
                        event_fd: None,
                        subgraph_start_fd: None,
                        subgraph_wait_fd: None,
                    },
                )
                .map_err(|e| IpcError::Shm(name.to_string(), std::io::Error::other(e.to_string())))?;
            self.connections.insert(client_id.0, Connection { stream: conn_stream });
            client_id
        };

        let descriptors = engine.port_type_descriptors();
        let mut reply = ConnectResult {
            client_id: client_id.0,
            realtime: engine.config.realtime as u8,
            rt_priority: engine.config.rt_priority,
            n_port_types: descriptors.len() as u32,
            ..ConnectResult::default()
        };
        let prefix_bytes = self.fifo_prefix.as_bytes();
        let n = prefix_bytes.len().min(SHM_NAME_LEN - 1);
        reply.fifo_prefix[..n].copy_from_slice(&prefix_bytes[..n]);

        write_record(stream, &reply)?;
        for descriptor in &descriptors {
            write_record(stream, descriptor)?;
        }
        Ok(())
    }

    fn handle_unload(&mut self, engine: &Engine, name: &str) {
        if let Some(id) = engine.find_client_id_by_name(name) {
            self.connections.remove(&id.0);
            let _ = engine.remove_client(id);
        }
    }

    fn accept_ack(&mut self, engine: &Engine) -> IpcResult<()> {
        let (mut stream, _) = self.ack.accept()?;
        let ack: AckRequest = read_record(&mut stream)?;
        // `into_raw_fd` hands ownership of the socket to the client
        // record; `engine::events` reads it back out via `ManuallyDrop`
        // on every delivery rather than taking an owned `UnixStream`.
        let event_fd: RawFd = stream.try_clone()?.into_raw_fd();
        engine.bind_event_fd(ClientId(ack.client_id), event_fd);
        write_record(&mut stream, &AckResult { status: 0 })?;
        Ok(())
    }

    fn handle_request(&mut self, engine: &Engine, client_id: u64) {
        let Some(conn) = self.connections.get_mut(&client_id) else {
            return;
        };
        let mut request: Request = match read_record(&mut conn.stream) {
            Ok(r) => r,
            Err(_) => {
                self.connections.remove(&client_id);
                return;
            }
        };
        engine.submit_request(&mut request);
        if write_record(&mut conn.stream, &request).is_err() {
            self.connections.remove(&client_id);
        }
    }
}

fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

fn decode(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn plugin_load_err(name: &str) -> impl FnOnce(crate::error::EngineError) -> IpcError + '_ {
    move |e| IpcError::Shm(name.to_string(), std::io::Error::other(e.to_string()))
}
