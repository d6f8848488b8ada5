//! Request dispatch (spec.md §4.5): demultiplexes one control request
//! onto the port/connection/lifecycle operations, under the request
//! mutex. In-process and out-of-process callers go through the same
//! `dispatch` call, matching the "uniform policy" spec.md calls for.

use ahash::AHashMap;

use patchbay_ipc::wire::{Request, RequestKind};

use crate::client::Client;
use crate::engine::ports_api::{self, Notifications};
use crate::engine::transport::TransportState;
use crate::error::RequestError;
use crate::ids::{ClientId, PortId, PortTypeId};
use crate::port::{Port, PortFlags, PortPrivate};
use crate::port_type::PortType;

pub struct DispatchOutcome {
    pub notifications: Notifications,
    /// Whether the graph needs a re-sort after this request (spec.md
    /// §4.2: connect/disconnect/activate/deactivate all re-sort).
    pub resort: bool,
    /// For `GetPortConnections`: the connected ports' names, written by
    /// the caller directly onto the requester's socket after the fixed
    /// reply (spec.md §4.5).
    pub port_names_reply: Option<Vec<String>>,
}

impl DispatchOutcome {
    fn plain(notifications: Notifications, resort: bool) -> Self {
        Self {
            notifications,
            resort,
            port_names_reply: None,
        }
    }
}

fn find_port_by_name(ports: &[Option<Port>], name: &str) -> Option<PortId> {
    ports
        .iter()
        .flatten()
        .find(|p| p.name == name)
        .map(|p| p.id)
}

#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    request: &mut Request,
    clients: &mut Vec<Client>,
    ports: &mut Vec<Option<Port>>,
    port_private: &mut Vec<PortPrivate>,
    port_types: &[PortType],
    type_index: &AHashMap<String, PortTypeId>,
    port_max: u32,
    timebase_client: &mut Option<ClientId>,
    current_time: &mut TransportState,
    pending_time: &mut TransportState,
) -> DispatchOutcome {
    let client_id = ClientId(request.client_id);
    let kind = RequestKind::from_u16(request.kind);

    let result = match kind {
        Some(RequestKind::RegisterPort) => {
            let name = request.name_a();
            let type_name = request.name_b();
            let flags = PortFlags::from_bits_truncate(request.flags);
            ports_api::register(
                clients, ports, port_private, port_types, type_index, port_max,
                client_id, &name, &type_name, flags,
            )
            .map(|(port_id, notes)| {
                request.port_id = port_id.0;
                DispatchOutcome::plain(notes, false)
            })
        }
        Some(RequestKind::UnRegisterPort) => ports_api::unregister(
            clients,
            ports,
            port_private,
            port_types,
            client_id,
            PortId(request.port_id),
        )
        .map(|notes| DispatchOutcome::plain(notes, false)),

        Some(RequestKind::ConnectPorts) => {
            let src_name = request.name_a();
            let dst_name = request.name_b();
            connect_by_name(clients, ports, port_private, port_types, &src_name, &dst_name)
        }

        Some(RequestKind::DisconnectPorts) => {
            let src_name = request.name_a();
            let dst_name = request.name_b();
            disconnect_by_name(ports, port_private, &src_name, &dst_name)
        }

        Some(RequestKind::DisconnectPort) => {
            let port_id = PortId(request.port_id);
            Ok(DispatchOutcome::plain(
                ports_api::disconnect_all(clients, ports, port_private, port_id),
                true,
            ))
        }

        Some(RequestKind::ActivateClient) => {
            crate::engine::lifecycle::activate(clients, client_id)
                .map(|_| DispatchOutcome::plain(Vec::new(), true))
        }

        Some(RequestKind::DeactivateClient) => crate::engine::lifecycle::deactivate(
            clients, ports, port_private, timebase_client, current_time, pending_time, client_id,
        )
        .map(|notes| DispatchOutcome::plain(notes, true)),

        Some(RequestKind::SetTimeBaseClient) => {
            let conditional = request.value != 0;
            if conditional && timebase_client.is_some() && *timebase_client != Some(client_id) {
                Err(RequestError::TimebaseHeld(timebase_client.unwrap()))
            } else {
                *timebase_client = Some(client_id);
                Ok(DispatchOutcome::plain(Vec::new(), false))
            }
        }

        Some(RequestKind::GetPortConnections) => {
            let name = request.name_a();
            match find_port_by_name(ports, &name) {
                Some(port_id) => {
                    let names = connection_names(ports, port_private, port_id);
                    request.other_port_id = names.len() as u32;
                    Ok(DispatchOutcome {
                        notifications: Vec::new(),
                        resort: false,
                        port_names_reply: Some(names),
                    })
                }
                None => Err(RequestError::UnknownPort(name)),
            }
        }

        Some(RequestKind::GetPortNConnections) => {
            let name = request.name_a();
            match find_port_by_name(ports, &name) {
                Some(port_id) => {
                    request.other_port_id =
                        port_private[port_id.0 as usize].connection_count() as u32;
                    Ok(DispatchOutcome::plain(Vec::new(), false))
                }
                None => Err(RequestError::UnknownPort(name)),
            }
        }

        Some(RequestKind::GrantPrivilege) => {
            // Extension slot (spec.md §4.5): no privilege model is
            // implemented, so every grant trivially succeeds.
            Ok(DispatchOutcome::plain(Vec::new(), false))
        }

        Some(RequestKind::SetClientTimeout) => {
            match clients.iter_mut().find(|c| c.id == client_id) {
                Some(client) => {
                    client.timeout_override_msecs = Some(request.value as u32);
                    Ok(DispatchOutcome::plain(Vec::new(), false))
                }
                None => Err(RequestError::UnknownClient(client_id)),
            }
        }

        Some(RequestKind::SetPortAlias) => {
            let alias = request.name_b();
            match ports.get_mut(request.port_id as usize).and_then(|p| p.as_mut()) {
                Some(port) => {
                    let slot = if port.aliases[0].is_none() { 0 } else { 1 };
                    port.aliases[slot] = if alias.is_empty() { None } else { Some(alias) };
                    Ok(DispatchOutcome::plain(Vec::new(), false))
                }
                None => Err(RequestError::UnknownPort(request.port_id.to_string())),
            }
        }

        None => Err(RequestError::UnknownPort(format!(
            "unrecognized request kind {}",
            request.kind
        ))),
    };

    match result {
        Ok(outcome) => {
            request.status = 0;
            outcome
        }
        Err(_) => {
            request.status = -1;
            DispatchOutcome::plain(Vec::new(), false)
        }
    }
}

fn connect_by_name(
    clients: &[Client],
    ports: &mut Vec<Option<Port>>,
    port_private: &mut Vec<PortPrivate>,
    port_types: &[PortType],
    src_name: &str,
    dst_name: &str,
) -> Result<DispatchOutcome, RequestError> {
    let src = find_port_by_name(ports, src_name)
        .ok_or_else(|| RequestError::UnknownPort(src_name.to_string()))?;
    let dst = find_port_by_name(ports, dst_name)
        .ok_or_else(|| RequestError::UnknownPort(dst_name.to_string()))?;
    ports_api::connect(clients, ports, port_private, port_types, src, dst)
        .map(|notes| DispatchOutcome::plain(notes, true))
}

fn disconnect_by_name(
    ports: &mut Vec<Option<Port>>,
    port_private: &mut Vec<PortPrivate>,
    src_name: &str,
    dst_name: &str,
) -> Result<DispatchOutcome, RequestError> {
    let src = find_port_by_name(ports, src_name)
        .ok_or_else(|| RequestError::UnknownPort(src_name.to_string()))?;
    let dst = find_port_by_name(ports, dst_name)
        .ok_or_else(|| RequestError::UnknownPort(dst_name.to_string()))?;
    ports_api::disconnect(ports, port_private, src, dst).map(|notes| DispatchOutcome::plain(notes, true))
}

fn connection_names(ports: &[Option<Port>], port_private: &[PortPrivate], port_id: PortId) -> Vec<String> {
    port_private[port_id.0 as usize]
        .connections
        .iter()
        .filter_map(|&(s, d)| {
            let other = if s == port_id { d } else { s };
            ports.get(other.0 as usize).and_then(|p| p.as_ref()).map(|p| p.name.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKind, Dispatch};
    use patchbay_ipc::wire::encode_name;

    fn ext(id: u64) -> Client {
        Client::new(
            ClientId(id),
            format!("c{id}"),
            ClientKind::External,
            Dispatch::External {
                request_fd: -1,
                event_fd: None,
                subgraph_start_fd: None,
                subgraph_wait_fd: None,
            },
        )
    }

    #[test]
    fn register_then_connect_via_wire_request() {
        let pt = PortType::new(PortTypeId(0), "audio", None);
        pt.grow_for(4, 16, true).unwrap();
        let types = vec![pt];
        let mut type_index = AHashMap::new();
        type_index.insert("audio".to_string(), PortTypeId(0));

        let mut clients = vec![ext(0), ext(1)];
        clients[0].active = true;
        clients[1].active = true;
        let mut ports = Vec::new();
        let mut private = Vec::new();
        let mut timebase = None;
        let mut current = TransportState::stopped_at_zero(48_000);
        let mut pending = current;

        let mut reg_out = Request::new(RequestKind::RegisterPort, 0);
        reg_out.name_a = encode_name("out");
        reg_out.name_b = encode_name("audio");
        reg_out.flags = PortFlags::IS_OUTPUT.bits();
        dispatch(
            &mut reg_out, &mut clients, &mut ports, &mut private, &types, &type_index,
            16, &mut timebase, &mut current, &mut pending,
        );
        assert_eq!(reg_out.status, 0);

        let mut reg_in = Request::new(RequestKind::RegisterPort, 1);
        reg_in.name_a = encode_name("in");
        reg_in.name_b = encode_name("audio");
        reg_in.flags = PortFlags::IS_INPUT.bits();
        dispatch(
            &mut reg_in, &mut clients, &mut ports, &mut private, &types, &type_index,
            16, &mut timebase, &mut current, &mut pending,
        );
        assert_eq!(reg_in.status, 0);

        let mut conn = Request::new(RequestKind::ConnectPorts, 0);
        conn.name_a = encode_name("out");
        conn.name_b = encode_name("in");
        let outcome = dispatch(
            &mut conn, &mut clients, &mut ports, &mut private, &types, &type_index,
            16, &mut timebase, &mut current, &mut pending,
        );
        assert_eq!(conn.status, 0);
        assert!(outcome.resort);
        assert_eq!(outcome.notifications.len(), 2);
    }

    #[test]
    fn unknown_port_type_yields_status_minus_one() {
        let types: Vec<PortType> = Vec::new();
        let type_index = AHashMap::new();
        let mut clients = vec![ext(0)];
        let mut ports = Vec::new();
        let mut private = Vec::new();
        let mut timebase = None;
        let mut current = TransportState::stopped_at_zero(48_000);
        let mut pending = current;

        let mut req = Request::new(RequestKind::RegisterPort, 0);
        req.name_a = encode_name("out");
        req.name_b = encode_name("audio");
        dispatch(
            &mut req, &mut clients, &mut ports, &mut private, &types, &type_index,
            16, &mut timebase, &mut current, &mut pending,
        );
        assert_eq!(req.status, -1);
    }
}
