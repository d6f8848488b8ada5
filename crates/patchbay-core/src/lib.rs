//! The graph engine: port types, clients, the graph sorter, the request
//! dispatcher, the cycle runner, and the watchdog (spec.md §2, §3).

pub mod client;
pub mod config;
pub mod cpu_load;
pub mod engine;
pub mod error;
pub mod frame_timer;
pub mod graph;
pub mod ids;
pub mod port;
pub mod port_type;

pub use client::{Client, ClientKind, Dispatch, EventCallbackFn};
pub use config::EngineConfig;
pub use engine::{Engine, GraphState};
pub use error::{EngineError, EngineResult, RequestError, RequestResult};
pub use ids::{ClientId, PortId, PortTypeId};
pub use port::{Port, PortFlags, PortPrivate};
pub use port_type::{MixdownFn, PortType};
