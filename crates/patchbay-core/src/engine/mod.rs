//! The engine: the orchestrator tying together the port table, client
//! registry, graph sorter, cycle runner, request dispatch, and watchdog
//! (spec.md §3 "Engine", §2).

pub mod cycle;
pub mod events;
pub mod fifo_table;
pub mod lifecycle;
pub mod plugin_loader;
pub mod ports_api;
pub mod request;
pub mod request_server;
pub mod transport;
pub mod watchdog;

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32};

use ahash::AHashMap;
use parking_lot::Mutex;

use patchbay_driver::AudioDriver;
use patchbay_ipc::wire::Request;

use crate::client::{Client, ClientKind, Dispatch};
use crate::config::EngineConfig;
use crate::cpu_load::CpuLoad;
use crate::error::{EngineError, EngineResult, RequestResult};
use crate::frame_timer::FrameTimer;
use crate::ids::{ClientId, ClientIdGen, PortId, PortTypeId};
use crate::port::{Port, PortFlags, PortPrivate};
use crate::port_type::{MixdownFn, PortType};

use fifo_table::FifoTable;
use transport::TransportState;
use watchdog::Watchdog;

/// Everything the graph mutex protects (spec.md §5: "the client list,
/// each client's ports and fed_by, each port's connection list").
pub struct GraphState {
    pub ports: Vec<Option<Port>>,
    pub port_private: Vec<PortPrivate>,
    pub clients: Vec<Client>,
    pub timebase_client: Option<ClientId>,
    pub current_time: TransportState,
    pub pending_time: TransportState,
}

pub struct Engine {
    pub config: EngineConfig,
    port_types: Vec<PortType>,
    type_index: AHashMap<String, PortTypeId>,
    graph: Mutex<GraphState>,
    request_mutex: Mutex<()>,
    driver: Mutex<Box<dyn AudioDriver>>,
    client_ids: Mutex<ClientIdGen>,
    frame_timer: FrameTimer,
    cpu_load: Mutex<CpuLoad>,
    watchdog: Watchdog,
    fifos: Mutex<FifoTable>,
    excessive_delays: AtomicU32,
    /// Supplemental (SPEC_FULL.md §2): while set, `maybe_resort` is a
    /// no-op; the caller is responsible for one explicit `force_resort`
    /// after the batch, via `end_batch`.
    sort_barrier: AtomicBool,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        driver: Box<dyn AudioDriver>,
        server_dir: PathBuf,
        server_pid: u32,
    ) -> Self {
        let period_usecs = driver.period_usecs();
        let frame_rate = config.sample_rate;
        Self {
            graph: Mutex::new(GraphState {
                ports: Vec::new(),
                port_private: Vec::new(),
                clients: Vec::new(),
                timebase_client: None,
                current_time: TransportState::stopped_at_zero(frame_rate),
                pending_time: TransportState::stopped_at_zero(frame_rate),
            }),
            request_mutex: Mutex::new(()),
            driver: Mutex::new(driver),
            client_ids: Mutex::new(ClientIdGen::default()),
            frame_timer: FrameTimer::default(),
            cpu_load: Mutex::new(CpuLoad::new(period_usecs)),
            watchdog: Watchdog::new(config.watchdog_timeout),
            fifos: Mutex::new(FifoTable::new(server_dir, server_pid)),
            excessive_delays: AtomicU32::new(0),
            sort_barrier: AtomicBool::new(false),
            port_types: Vec::new(),
            type_index: AHashMap::new(),
            config,
        }
    }

    pub fn period_usecs(&self) -> u64 {
        self.driver.lock().period_usecs()
    }

    /// Start the driver. Called once by the owning process before
    /// entering the audio loop.
    pub fn start_driver(&self) -> EngineResult<()> {
        self.driver.lock().start().map_err(EngineError::from)
    }

    /// Block for the next cycle's frames, as the sole caller on the audio
    /// thread (spec.md §5: the engine owns exactly one driver instance
    /// and drives it from exactly one thread).
    pub fn wait_for_driver(&self) -> EngineResult<patchbay_driver::CycleSignal> {
        self.driver.lock().wait().map_err(EngineError::from)
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Register a port type and materialize its shared-memory arena
    /// (spec.md §4.1). The first type registered produces the
    /// process-wide silent buffer.
    pub fn add_port_type(
        &mut self,
        name: impl Into<String>,
        buffer_size_bytes: usize,
        mixdown: Option<MixdownFn>,
    ) -> EngineResult<PortTypeId> {
        let type_id = PortTypeId(self.port_types.len() as u32);
        let name = name.into();
        let is_first = self.port_types.is_empty();
        let pt = PortType::new(type_id, name.clone(), mixdown);
        pt.grow_for(self.config.port_max as usize, buffer_size_bytes, is_first)?;
        self.port_types.push(pt);
        self.type_index.insert(name, type_id);
        Ok(type_id)
    }

    /// Change one port type's buffer size, resizing its arena and
    /// broadcasting `BufferSizeChange` (spec.md §4.1, §8 scenario 5).
    pub fn change_buffer_size(&self, type_id: PortTypeId, new_size_bytes: usize) -> EngineResult<()> {
        let pt = &self.port_types[type_id.0 as usize];
        pt.grow_for(self.config.port_max as usize, new_size_bytes, false)?;
        let mut graph = self.graph.lock();
        let graph = &mut *graph;
        let event = events::buffer_size_change(new_size_bytes as u32);
        events::broadcast(&mut graph.clients, event);
        Ok(())
    }

    fn next_client_id(&self) -> ClientId {
        self.client_ids.lock().next()
    }

    /// Port-type descriptors sent in the connect-request reply (spec.md
    /// §6: "reads `n_port_types` port-type descriptors").
    pub fn port_type_descriptors(&self) -> Vec<patchbay_ipc::wire::PortTypeDescriptor> {
        self.port_types
            .iter()
            .map(|pt| patchbay_ipc::wire::PortTypeDescriptor {
                type_id: pt.type_id.0,
                name: patchbay_ipc::wire::encode_name(&pt.name),
                shm_name: patchbay_ipc::wire::encode_name(&pt.region_name()),
                buffer_size: pt.buffer_size() as u32,
            })
            .collect()
    }

    /// Look up a registered port type by id, for reading buffer contents
    /// or free-list depth (spec.md §8's scenarios exercise both).
    pub fn port_type(&self, id: PortTypeId) -> Option<&PortType> {
        self.port_types.get(id.0 as usize)
    }

    pub fn find_client_id_by_name(&self, name: &str) -> Option<ClientId> {
        self.graph.lock().clients.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Bind the event socket fd the ack handshake produced (spec.md
    /// §4.5: "bind the new fd as the event socket").
    pub fn bind_event_fd(&self, id: ClientId, fd: RawFd) {
        if let Some(client) = self.graph.lock().clients.iter_mut().find(|c| c.id == id) {
            client.set_event_fd(fd);
        }
    }

    /// Load an internal client from a shared object and register it
    /// (spec.md §4.6: "optionally dlopen and bind
    /// `jack_initialize`/`jack_finish`").
    pub fn load_internal_client(
        &self,
        name: &str,
        object_path: &str,
        init_string: &str,
    ) -> EngineResult<ClientId> {
        let (dispatch, library, finish) = plugin_loader::load(object_path, init_string)?;
        let id = self.next_client_id();
        let mut graph = self.graph.lock();
        let graph = &mut *graph;
        let client_id = lifecycle::create(&mut graph.clients, name, ClientKind::Internal, dispatch, id)
            .map_err(|_| EngineError::PluginInit(object_path.to_string(), -1))?;
        if let Some(client) = graph.clients.iter_mut().find(|c| c.id == client_id) {
            plugin_loader::attach(client, library, finish);
        }
        Ok(client_id)
    }

    pub fn create_client(
        &self,
        name: &str,
        kind: ClientKind,
        dispatch: Dispatch,
    ) -> RequestResult<ClientId> {
        let id = self.next_client_id();
        let mut graph = self.graph.lock();
        let graph = &mut *graph;
        lifecycle::create(&mut graph.clients, name, kind, dispatch, id)
    }

    pub fn activate_client(&self, id: ClientId) -> RequestResult<()> {
        {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            lifecycle::activate(&mut graph.clients, id)?;
        }
        self.maybe_resort();
        Ok(())
    }

    pub fn deactivate_client(&self, id: ClientId) -> RequestResult<()> {
        let notes = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            lifecycle::deactivate(
                &mut graph.clients,
                &graph.ports,
                &mut graph.port_private,
                &mut graph.timebase_client,
                &mut graph.current_time,
                &mut graph.pending_time,
                id,
            )?
        };
        self.deliver_all(notes);
        self.maybe_resort();
        Ok(())
    }

    pub fn remove_client(&self, id: ClientId) -> RequestResult<()> {
        let notes = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            lifecycle::remove(
                &mut graph.clients,
                &mut graph.ports,
                &mut graph.port_private,
                &self.port_types,
                &mut graph.timebase_client,
                &mut graph.current_time,
                &mut graph.pending_time,
                id,
            )?
        };
        self.deliver_all(notes);
        self.maybe_resort();
        Ok(())
    }

    pub fn register_port(
        &self,
        client_id: ClientId,
        name: &str,
        type_name: &str,
        flags: PortFlags,
    ) -> RequestResult<PortId> {
        let (port_id, notes) = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            ports_api::register(
                &mut graph.clients,
                &mut graph.ports,
                &mut graph.port_private,
                &self.port_types,
                &self.type_index,
                self.config.port_max,
                client_id,
                name,
                type_name,
                flags,
            )?
        };
        self.deliver_all(notes);
        Ok(port_id)
    }

    pub fn unregister_port(&self, client_id: ClientId, port_id: PortId) -> RequestResult<()> {
        let notes = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            ports_api::unregister(
                &mut graph.clients,
                &mut graph.ports,
                &mut graph.port_private,
                &self.port_types,
                client_id,
                port_id,
            )?
        };
        self.deliver_all(notes);
        Ok(())
    }

    pub fn connect(&self, source: PortId, dest: PortId) -> RequestResult<()> {
        let notes = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            ports_api::connect(
                &graph.clients,
                &mut graph.ports,
                &mut graph.port_private,
                &self.port_types,
                source,
                dest,
            )?
        };
        self.deliver_all(notes);
        self.maybe_resort();
        Ok(())
    }

    pub fn disconnect(&self, source: PortId, dest: PortId) -> RequestResult<()> {
        let notes = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            ports_api::disconnect(&mut graph.ports, &mut graph.port_private, source, dest)?
        };
        self.deliver_all(notes);
        self.maybe_resort();
        Ok(())
    }

    /// Submit a request record through the uniform dispatch path
    /// (spec.md §4.5: in-process and out-of-process calls take the same
    /// request mutex).
    pub fn submit_request(&self, request: &mut Request) {
        let _guard = self.request_mutex.lock();
        let outcome = {
            let mut graph = self.graph.lock();
            let graph = &mut *graph;
            request::dispatch(
                request,
                &mut graph.clients,
                &mut graph.ports,
                &mut graph.port_private,
                &self.port_types,
                &self.type_index,
                self.config.port_max,
                &mut graph.timebase_client,
                &mut graph.current_time,
                &mut graph.pending_time,
            )
        };
        self.deliver_all(outcome.notifications);
        if outcome.resort {
            self.maybe_resort();
        }
    }

    fn deliver_all(&self, notes: ports_api::Notifications) {
        if notes.is_empty() {
            return;
        }
        let mut graph = self.graph.lock();
        let graph = &mut *graph;
        for (client_id, event) in notes {
            if let Some(client) = graph.clients.iter_mut().find(|c| c.id == client_id) {
                if events::deliver(client, event).is_err() {
                    lifecycle::account_transport_error(client);
                }
            }
        }
    }

    /// Re-derive execution order and subgraph FIFOs unless a batch is in
    /// progress (`sort_barrier`, SPEC_FULL.md §2).
    pub fn maybe_resort(&self) {
        if self.sort_barrier.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        self.force_resort();
    }

    pub fn force_resort(&self) {
        let mut graph_guard = self.graph.lock();
        let graph = &mut *graph_guard;
        let mut fifos = self.fifos.lock();
        crate::graph::resort(
            &mut graph.clients,
            &mut graph.ports,
            &graph.port_private,
            &mut *fifos,
        );
        drop(fifos);
        let reordered: Vec<_> = graph
            .clients
            .iter()
            .map(|c| (c.id, events::graph_reordered(c.execution_order)))
            .collect();
        drop(graph_guard);
        self.deliver_all(reordered);
    }

    /// Suppress `maybe_resort` until `end_batch` (SPEC_FULL.md §2:
    /// graph-reorder suppression for bulk mutation, e.g. session reload).
    pub fn begin_batch(&self) {
        self.sort_barrier.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn end_batch(&self) {
        self.sort_barrier.store(false, std::sync::atomic::Ordering::Release);
        self.force_resort();
    }

    /// Read-only access to the locked graph state, for callers (tests,
    /// diagnostics) that need to observe client/port fields the request
    /// protocol doesn't expose directly.
    pub fn inspect_graph<R>(&self, f: impl FnOnce(&GraphState) -> R) -> R {
        f(&self.graph.lock())
    }

    pub fn set_freewheel(&self, enabled: bool) {
        // The null/cpal drivers both expose this via their own
        // freewheel-aware `wait()`; here we only need to reach through
        // the trait object's concrete configuration hook when present.
        let mut driver = self.driver.lock();
        driver.set_freewheel(enabled);
    }
}
