//! Client lifecycle: create, activate, deactivate, zombify, remove
//! (spec.md §4.6), and the two-stage error-accounting policy.

use crate::client::{Client, ClientKind, Dispatch};
use crate::engine::ports_api::{disconnect_all, Notifications};
use crate::engine::transport::TransportState;
use crate::error::{RequestError, RequestResult};
use crate::ids::{ClientId, PortId};
use crate::port::{Port, PortPrivate};
use crate::port_type::PortType;

/// Large constant added for a socket-level transport failure; dwarfs the
/// "1" added for a process-level failure so the two-stage policy in
/// `account_error` can tell them apart in a single counter (spec.md §4.6).
pub const ERROR_WITH_SOCKETS: u32 = 10_000_000;

pub fn create(
    clients: &mut Vec<Client>,
    name: &str,
    kind: ClientKind,
    dispatch: Dispatch,
    id: ClientId,
) -> RequestResult<ClientId> {
    if clients.iter().any(|c| c.name == name) {
        return Err(RequestError::DuplicateName(name.to_string()));
    }
    let client = Client::new(id, name, kind, dispatch);
    clients.insert(0, client);
    Ok(id)
}

pub fn activate(clients: &mut [Client], id: ClientId) -> RequestResult<()> {
    let client = clients
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or(RequestError::UnknownClient(id))?;
    client.active = true;
    Ok(())
}

/// Clears every connection the client's ports hold, reverts transport
/// state if it was the timebase client, and deactivates. Re-sorting is
/// the caller's decision (spec.md §4.6: "re-sort if requested").
pub fn deactivate(
    clients: &mut Vec<Client>,
    ports: &[Option<Port>],
    port_private: &mut [PortPrivate],
    timebase_client: &mut Option<ClientId>,
    current_time: &mut TransportState,
    pending_time: &mut TransportState,
    id: ClientId,
) -> RequestResult<Notifications> {
    let port_ids: Vec<PortId> = clients
        .iter()
        .find(|c| c.id == id)
        .ok_or(RequestError::UnknownClient(id))?
        .ports
        .clone();

    let mut notes = Vec::new();
    for port_id in port_ids {
        notes.extend(disconnect_all(clients, ports, port_private, port_id));
    }

    if *timebase_client == Some(id) {
        *timebase_client = None;
        let reverted = TransportState::stopped_at_zero(current_time.frame_rate);
        *current_time = reverted;
        *pending_time = reverted;
    }

    if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
        client.active = false;
    }
    Ok(notes)
}

/// Mark dead (silences event delivery), disconnect ports releasing
/// buffers, deactivate without triggering a sort.
#[allow(clippy::too_many_arguments)]
pub fn zombify(
    clients: &mut Vec<Client>,
    ports: &mut [Option<Port>],
    port_private: &mut [PortPrivate],
    port_types: &[PortType],
    timebase_client: &mut Option<ClientId>,
    current_time: &mut TransportState,
    pending_time: &mut TransportState,
    id: ClientId,
) -> RequestResult<Notifications> {
    if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
        client.dead = true;
    } else {
        return Err(RequestError::UnknownClient(id));
    }

    let port_ids: Vec<PortId> = clients.iter().find(|c| c.id == id).unwrap().ports.clone();
    let mut notes = Vec::new();
    for port_id in port_ids {
        notes.extend(disconnect_all(clients, ports, port_private, port_id));
        if let Some(Some(port)) = ports.get(port_id.0 as usize).map(|p| p.as_ref()) {
            if let Some(buffer) = port.buffer {
                if port.flags.contains(crate::port::PortFlags::IS_OUTPUT) {
                    port_types[port.type_id.0 as usize].return_buffer(buffer);
                }
            }
        }
    }

    notes.extend(deactivate(
        clients,
        ports,
        port_private,
        timebase_client,
        current_time,
        pending_time,
        id,
    )?);
    Ok(notes)
}

/// Zombify if not already, then drop the client entirely: dlclose,
/// free its ports, remove from the client list (spec.md §4.6).
#[allow(clippy::too_many_arguments)]
pub fn remove(
    clients: &mut Vec<Client>,
    ports: &mut Vec<Option<Port>>,
    port_private: &mut Vec<PortPrivate>,
    port_types: &[PortType],
    timebase_client: &mut Option<ClientId>,
    current_time: &mut TransportState,
    pending_time: &mut TransportState,
    id: ClientId,
) -> RequestResult<Notifications> {
    let already_dead = clients
        .iter()
        .find(|c| c.id == id)
        .ok_or(RequestError::UnknownClient(id))?
        .dead;

    let mut notes = if already_dead {
        Vec::new()
    } else {
        zombify(
            clients,
            ports,
            port_private,
            port_types,
            timebase_client,
            current_time,
            pending_time,
            id,
        )?
    };

    let port_ids: Vec<PortId> = clients.iter().find(|c| c.id == id).unwrap().ports.clone();
    for port_id in &port_ids {
        if let Some(slot) = ports.get_mut(port_id.0 as usize) {
            *slot = None;
        }
    }

    if let Some(idx) = clients.iter().position(|c| c.id == id) {
        let mut client = clients.remove(idx);
        client.run_finish();
        client.dlclose();
    }

    let unreg_notes: Notifications = port_ids
        .iter()
        .flat_map(|&p| {
            clients
                .iter()
                .filter(|c| c.active)
                .map(move |c| (c.id, crate::engine::events::port_unregistered(p.0)))
        })
        .collect();
    notes.extend(unreg_notes);
    Ok(notes)
}

/// Socket-level failure adds `ERROR_WITH_SOCKETS`; process-level adds 1
/// (spec.md §4.6, §7).
pub fn account_transport_error(client: &mut Client) {
    client.error = client.error.saturating_add(ERROR_WITH_SOCKETS);
}

pub fn account_process_error(client: &mut Client) {
    client.error = client.error.saturating_add(1);
}

/// Outcome of post-process error accounting for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    None,
    Zombify,
    Remove,
}

/// `error >= ERROR_WITH_SOCKETS` removes outright; `error > 0` otherwise
/// zombifies and resets the counter, giving the client one more chance
/// before a repeat failure fully removes it (spec.md §4.6).
pub fn classify_error(client: &mut Client) -> ErrorOutcome {
    if client.error >= ERROR_WITH_SOCKETS {
        ErrorOutcome::Remove
    } else if client.error > 0 {
        client.error = 0;
        ErrorOutcome::Zombify
    } else {
        ErrorOutcome::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Dispatch;

    fn ext(id: u64, name: &str) -> Client {
        Client::new(
            ClientId(id),
            name,
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
    fn duplicate_name_is_rejected() {
        let mut clients = vec![ext(0, "a")];
        let err = create(
            &mut clients,
            "a",
            ClientKind::External,
            Dispatch::External {
                request_fd: -1,
                event_fd: None,
                subgraph_start_fd: None,
                subgraph_wait_fd: None,
            },
            ClientId(1),
        )
        .unwrap_err();
        assert_eq!(err, RequestError::DuplicateName("a".into()));
    }

    #[test]
    fn two_stage_removal_gives_one_chance_to_recover() {
        let mut client = ext(0, "a");
        account_transport_error(&mut client);
        account_transport_error(&mut client);
        // one socket error alone is already >= ERROR_WITH_SOCKETS
        assert_eq!(classify_error(&mut client), ErrorOutcome::Remove);

        let mut client2 = ext(1, "b");
        account_process_error(&mut client2);
        assert_eq!(classify_error(&mut client2), ErrorOutcome::Zombify);
        assert_eq!(client2.error, 0);
        assert_eq!(classify_error(&mut client2), ErrorOutcome::None);
    }
}
