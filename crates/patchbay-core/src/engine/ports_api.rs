//! Port registration and connection (spec.md §4.2).
//!
//! These are pure graph-model mutations: callers (see `Engine`) hold the
//! graph mutex around them and are responsible for triggering a re-sort
//! and delivering the returned notifications.

use ahash::AHashMap;

use crate::client::Client;
use crate::error::{RequestError, RequestResult};
use crate::ids::{ClientId, PortId, PortTypeId};
use crate::port::{Port, PortFlags, PortPrivate};
use crate::port_type::PortType;

/// `(client to notify, event)` pairs the caller must deliver.
pub type Notifications = Vec<(ClientId, patchbay_ipc::wire::Event)>;

fn find_client_mut<'a>(clients: &'a mut [Client], id: ClientId) -> Option<&'a mut Client> {
    clients.iter_mut().find(|c| c.id == id)
}

fn find_client<'a>(clients: &'a [Client], id: ClientId) -> Option<&'a Client> {
    clients.iter().find(|c| c.id == id)
}

#[allow(clippy::too_many_arguments)]
pub fn register(
    clients: &mut [Client],
    ports: &mut Vec<Option<Port>>,
    port_private: &mut Vec<PortPrivate>,
    port_types: &[PortType],
    type_index: &AHashMap<String, PortTypeId>,
    port_max: u32,
    client_id: ClientId,
    name: &str,
    type_name: &str,
    flags: PortFlags,
) -> RequestResult<(PortId, Notifications)> {
    let type_id = *type_index
        .get(type_name)
        .ok_or_else(|| RequestError::UnknownPortType(type_name.to_string()))?;
    let port_type = &port_types[type_id.0 as usize];

    let slot = ports.iter().position(|p| p.is_none());
    let port_id = match slot {
        Some(idx) => idx as u32,
        None => {
            if (ports.len() as u32) >= port_max {
                return Err(RequestError::PortTableFull);
            }
            ports.len() as u32
        }
    };
    if port_id >= port_max {
        return Err(RequestError::PortTableFull);
    }

    let buffer = if flags.contains(PortFlags::IS_OUTPUT) {
        Some(
            port_type
                .take_buffer()
                .ok_or_else(|| RequestError::BufferExhausted(type_name.to_string()))?,
        )
    } else {
        port_type.silent_buffer()
    };

    let port = Port {
        id: PortId(port_id),
        name: name.to_string(),
        owning_client: client_id,
        type_id,
        flags,
        in_use: true,
        locked: false,
        latency: 0,
        total_latency: 0,
        buffer,
        monitor_requests: 0,
        aliases: [None, None],
    };

    if port_id as usize >= ports.len() {
        ports.push(Some(port));
        port_private.push(PortPrivate::default());
    } else {
        ports[port_id as usize] = Some(port);
        port_private[port_id as usize] = PortPrivate::default();
    }

    if let Some(client) = find_client_mut(clients, client_id) {
        client.ports.push(PortId(port_id));
    }

    let event = crate::engine::events::port_registered(port_id);
    let notes = clients
        .iter()
        .filter(|c| c.active)
        .map(|c| (c.id, event))
        .collect();

    Ok((PortId(port_id), notes))
}

pub fn unregister(
    clients: &mut [Client],
    ports: &mut [Option<Port>],
    port_private: &mut [PortPrivate],
    port_types: &[PortType],
    caller: ClientId,
    port_id: PortId,
) -> RequestResult<Notifications> {
    let idx = port_id.0 as usize;
    let owner = ports
        .get(idx)
        .and_then(|p| p.as_ref())
        .map(|p| p.owning_client)
        .ok_or_else(|| RequestError::UnknownPort(port_id.to_string()))?;
    if owner != caller {
        return Err(RequestError::NotOwner(caller, port_id));
    }

    let mut notes = disconnect_all(clients, ports, port_private, port_id);

    let port = ports[idx].take().unwrap();
    if let Some(buffer) = port.buffer {
        if port.flags.contains(PortFlags::IS_OUTPUT) {
            port_types[port.type_id.0 as usize].return_buffer(buffer);
        }
    }
    if let Some(client) = find_client_mut(clients, caller) {
        client.ports.retain(|&p| p != port_id);
    }

    let event = crate::engine::events::port_unregistered(port_id.0);
    notes.extend(clients.iter().filter(|c| c.active).map(|c| (c.id, event)));
    Ok(notes)
}

#[allow(clippy::too_many_arguments)]
pub fn connect(
    clients: &[Client],
    ports: &mut [Option<Port>],
    port_private: &mut [PortPrivate],
    port_types: &[PortType],
    source: PortId,
    dest: PortId,
) -> RequestResult<Notifications> {
    {
        let src = ports
            .get(source.0 as usize)
            .and_then(|p| p.as_ref())
            .ok_or_else(|| RequestError::UnknownPort(source.to_string()))?;
        let dst = ports
            .get(dest.0 as usize)
            .and_then(|p| p.as_ref())
            .ok_or_else(|| RequestError::UnknownPort(dest.to_string()))?;

        if !src.is_output() {
            return Err(RequestError::NotAnOutput(source));
        }
        if !dst.is_input() {
            return Err(RequestError::NotAnInput(dest));
        }
        if src.locked {
            return Err(RequestError::PortLocked(source));
        }
        if dst.locked {
            return Err(RequestError::PortLocked(dest));
        }
        if src.type_id != dst.type_id {
            return Err(RequestError::TypeMismatch(src.type_id.0, dst.type_id.0));
        }

        let src_owner = find_client(clients, src.owning_client)
            .ok_or(RequestError::UnknownClient(src.owning_client))?;
        let dst_owner = find_client(clients, dst.owning_client)
            .ok_or(RequestError::UnknownClient(dst.owning_client))?;
        if !src_owner.active {
            return Err(RequestError::InactiveClient(src_owner.id));
        }
        if !dst_owner.active {
            return Err(RequestError::InactiveClient(dst_owner.id));
        }

        let dst_private = &port_private[dest.0 as usize];
        if dst_private.has_connections() && port_types[dst.type_id.0 as usize].mixdown.is_none() {
            return Err(RequestError::NoMixdown(dest));
        }
    }

    port_private[source.0 as usize].connections.push((source, dest));
    port_private[dest.0 as usize].connections.push((source, dest));

    let src_owner = ports[source.0 as usize].as_ref().unwrap().owning_client;
    let dst_owner = ports[dest.0 as usize].as_ref().unwrap().owning_client;

    Ok(vec![
        (src_owner, crate::engine::events::port_connected(source.0, dest.0)),
        (dst_owner, crate::engine::events::port_connected(dest.0, source.0)),
    ])
}

pub fn disconnect(
    ports: &mut [Option<Port>],
    port_private: &mut [PortPrivate],
    source: PortId,
    dest: PortId,
) -> RequestResult<Notifications> {
    let existed = port_private[source.0 as usize]
        .connections
        .iter()
        .any(|&(s, d)| s == source && d == dest);
    if !existed {
        return Err(RequestError::NoSuchConnection(source, dest));
    }

    port_private[source.0 as usize]
        .connections
        .retain(|&(s, d)| !(s == source && d == dest));
    port_private[dest.0 as usize]
        .connections
        .retain(|&(s, d)| !(s == source && d == dest));

    if !port_private[source.0 as usize].has_connections() {
        if let Some(Some(p)) = ports.get_mut(source.0 as usize) {
            p.monitor_requests = 0;
        }
    }

    let src_owner = ports[source.0 as usize].as_ref().unwrap().owning_client;
    let dst_owner = ports[dest.0 as usize].as_ref().unwrap().owning_client;

    Ok(vec![
        (src_owner, crate::engine::events::port_disconnected(source.0, dest.0)),
        (dst_owner, crate::engine::events::port_disconnected(dest.0, source.0)),
    ])
}

/// Remove every connection touching `port_id` (spec.md §4.2
/// `disconnect_all`), used directly by `unregister` and by client removal.
pub fn disconnect_all(
    clients: &[Client],
    ports: &[Option<Port>],
    port_private: &mut [PortPrivate],
    port_id: PortId,
) -> Notifications {
    let touching: Vec<(PortId, PortId)> = port_private[port_id.0 as usize].connections.clone();
    let mut notes = Vec::new();

    for (src, dst) in touching {
        port_private[src.0 as usize].connections.retain(|&(s, d)| !(s == src && d == dst));
        port_private[dst.0 as usize].connections.retain(|&(s, d)| !(s == src && d == dst));

        if let Some(Some(src_port)) = ports.get(src.0 as usize) {
            if find_client(clients, src_port.owning_client).is_some() {
                notes.push((
                    src_port.owning_client,
                    crate::engine::events::port_disconnected(src.0, dst.0),
                ));
            }
        }
        if let Some(Some(dst_port)) = ports.get(dst.0 as usize) {
            if find_client(clients, dst_port.owning_client).is_some() {
                notes.push((
                    dst_port.owning_client,
                    crate::engine::events::port_disconnected(dst.0, src.0),
                ));
            }
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKind, Dispatch};

    fn port_types() -> (Vec<PortType>, AHashMap<String, PortTypeId>) {
        let pt = PortType::new(PortTypeId(0), "audio", None);
        pt.grow_for(4, 16, true).unwrap();
        let mut idx = AHashMap::new();
        idx.insert("audio".to_string(), PortTypeId(0));
        (vec![pt], idx)
    }

    fn ext_client(id: u64) -> Client {
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
    fn register_fails_when_type_unknown() {
        let (types, idx) = port_types();
        let mut clients = vec![ext_client(0)];
        let mut ports = Vec::new();
        let mut private = Vec::new();
        let err = register(
            &mut clients,
            &mut ports,
            &mut private,
            &types,
            &idx,
            16,
            ClientId(0),
            "out",
            "nope",
            PortFlags::IS_OUTPUT,
        )
        .unwrap_err();
        assert_eq!(err, RequestError::UnknownPortType("nope".into()));
    }

    #[test]
    fn register_fails_when_free_list_empty() {
        let (types, idx) = port_types();
        // drain the free list (3 buffers after silent extraction)
        for _ in 0..3 {
            types[0].take_buffer().unwrap();
        }
        let mut clients = vec![ext_client(0)];
        let mut ports = Vec::new();
        let mut private = Vec::new();
        let err = register(
            &mut clients,
            &mut ports,
            &mut private,
            &types,
            &idx,
            16,
            ClientId(0),
            "out",
            "audio",
            PortFlags::IS_OUTPUT,
        )
        .unwrap_err();
        assert_eq!(err, RequestError::BufferExhausted("audio".into()));
        assert!(ports.is_empty());
    }

    #[test]
    fn connect_then_disconnect_restores_prior_state() {
        let (types, idx) = port_types();
        let mut clients = vec![ext_client(0), ext_client(1)];
        let mut ports = Vec::new();
        let mut private = Vec::new();

        let (src, _) = register(
            &mut clients, &mut ports, &mut private, &types, &idx, 16,
            ClientId(0), "out", "audio", PortFlags::IS_OUTPUT,
        ).unwrap();
        let (dst, _) = register(
            &mut clients, &mut ports, &mut private, &types, &idx, 16,
            ClientId(1), "in", "audio", PortFlags::IS_INPUT,
        ).unwrap();
        clients[0].active = true;
        clients[1].active = true;

        connect(&clients, &mut ports, &mut private, &types, src, dst).unwrap();
        assert_eq!(private[src.0 as usize].connection_count(), 1);

        disconnect(&mut ports, &mut private, src, dst).unwrap();
        assert_eq!(private[src.0 as usize].connection_count(), 0);
        assert_eq!(private[dst.0 as usize].connection_count(), 0);
    }

    #[test]
    fn second_connection_without_mixdown_is_rejected() {
        let (types, idx) = port_types();
        let mut clients = vec![ext_client(0), ext_client(1), ext_client(2)];
        let mut ports = Vec::new();
        let mut private = Vec::new();

        let (src_a, _) = register(&mut clients, &mut ports, &mut private, &types, &idx, 16, ClientId(0), "a", "audio", PortFlags::IS_OUTPUT).unwrap();
        let (src_b, _) = register(&mut clients, &mut ports, &mut private, &types, &idx, 16, ClientId(1), "b", "audio", PortFlags::IS_OUTPUT).unwrap();
        let (dst, _) = register(&mut clients, &mut ports, &mut private, &types, &idx, 16, ClientId(2), "in", "audio", PortFlags::IS_INPUT).unwrap();
        for c in clients.iter_mut() {
            c.active = true;
        }

        connect(&clients, &mut ports, &mut private, &types, src_a, dst).unwrap();
        let err = connect(&clients, &mut ports, &mut private, &types, src_b, dst).unwrap_err();
        assert_eq!(err, RequestError::NoMixdown(dst));
    }
}
