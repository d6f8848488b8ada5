//! `fed_by` computation: direct edges, then transitive closure
//! (spec.md §4.3 steps 1-2, grounded on the original `jack_trace_terminal`
//! recursive walk).

use ahash::{AHashMap, AHashSet};

use crate::client::Client;
use crate::ids::ClientId;
use crate::port::Port;

/// Step 1: `fed_by(C) = {D | exists (src in D.outputs, dst in C.inputs) connected}`.
pub fn direct_fed_by(
    clients: &[Client],
    ports: &[Option<Port>],
    port_private: &[crate::port::PortPrivate],
) -> AHashMap<ClientId, AHashSet<ClientId>> {
    let mut direct: AHashMap<ClientId, AHashSet<ClientId>> = clients
        .iter()
        .map(|c| (c.id, AHashSet::new()))
        .collect();

    for client in clients {
        for &port_id in &client.ports {
            let Some(Some(port)) = ports.get(port_id.0 as usize) else {
                continue;
            };
            if !port.is_input() {
                continue;
            }
            let Some(private) = port_private.get(port_id.0 as usize) else {
                continue;
            };
            for &(src, dst) in &private.connections {
                if dst != port_id {
                    continue;
                }
                if let Some(Some(src_port)) = ports.get(src.0 as usize) {
                    if let Some(set) = direct.get_mut(&client.id) {
                        set.insert(src_port.owning_client);
                    }
                }
            }
        }
    }
    direct
}

/// Step 2: extend each client's direct `fed_by` to its transitive closure.
/// Recursion guards against cycles by checking set membership before
/// recursing into a candidate (the "trace terminal" step).
pub fn transitive_closure(
    direct: &AHashMap<ClientId, AHashSet<ClientId>>,
) -> AHashMap<ClientId, AHashSet<ClientId>> {
    let mut closure: AHashMap<ClientId, AHashSet<ClientId>> = AHashMap::new();
    for &client_id in direct.keys() {
        let mut acc = AHashSet::new();
        trace_terminal(client_id, direct, &mut acc);
        closure.insert(client_id, acc);
    }
    closure
}

fn trace_terminal(
    from: ClientId,
    direct: &AHashMap<ClientId, AHashSet<ClientId>>,
    acc: &mut AHashSet<ClientId>,
) {
    let Some(feeders) = direct.get(&from) else {
        return;
    };
    for &feeder in feeders {
        if acc.insert(feeder) {
            // Only recurse the first time we add `feeder`; membership
            // check above is the cycle guard.
            trace_terminal(feeder, direct, acc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKind, Dispatch};
    use crate::ids::{ClientId, PortId, PortTypeId};
    use crate::port::{PortFlags, PortPrivate};

    fn stub_client(id: u64) -> Client {
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

    fn stub_port(id: u32, owner: u64, input: bool) -> Port {
        Port {
            id: PortId(id),
            name: format!("p{id}"),
            owning_client: ClientId(owner),
            type_id: PortTypeId(0),
            flags: if input {
                PortFlags::IS_INPUT
            } else {
                PortFlags::IS_OUTPUT
            },
            in_use: true,
            locked: false,
            latency: 0,
            total_latency: 0,
            buffer: None,
            monitor_requests: 0,
            aliases: [None, None],
        }
    }

    #[test]
    fn transitive_closure_follows_chain() {
        // A -> B -> C, expect fed_by(C) = {A, B}
        let mut a = stub_client(0);
        a.ports.push(PortId(0));
        let mut b = stub_client(1);
        b.ports.extend([PortId(1), PortId(2)]);
        let mut c = stub_client(2);
        c.ports.push(PortId(3));
        let clients = vec![a, b, c];

        let mut ports: Vec<Option<Port>> = vec![None; 4];
        ports[0] = Some(stub_port(0, 0, false));
        ports[1] = Some(stub_port(1, 1, true));
        ports[2] = Some(stub_port(2, 1, false));
        ports[3] = Some(stub_port(3, 2, true));

        let mut private = vec![PortPrivate::default(); 4];
        private[0].connections.push((PortId(0), PortId(1)));
        private[1].connections.push((PortId(0), PortId(1)));
        private[2].connections.push((PortId(2), PortId(3)));
        private[3].connections.push((PortId(2), PortId(3)));

        let direct = direct_fed_by(&clients, &ports, &private);
        let closure = transitive_closure(&direct);

        assert!(closure[&ClientId(2)].contains(&ClientId(1)));
        assert!(closure[&ClientId(2)].contains(&ClientId(0)));
        assert!(!closure[&ClientId(0)].contains(&ClientId(2)));
    }

    #[test]
    fn feedback_cycle_terminates() {
        // A -> B -> A
        let mut a = stub_client(0);
        a.ports.extend([PortId(0), PortId(1)]);
        let mut b = stub_client(1);
        b.ports.extend([PortId(2), PortId(3)]);
        let clients = vec![a, b];

        let mut ports: Vec<Option<Port>> = vec![None; 4];
        ports[0] = Some(stub_port(0, 0, true));
        ports[1] = Some(stub_port(1, 0, false));
        ports[2] = Some(stub_port(2, 1, true));
        ports[3] = Some(stub_port(3, 1, false));

        let mut private = vec![PortPrivate::default(); 4];
        private[1].connections.push((PortId(1), PortId(2)));
        private[2].connections.push((PortId(1), PortId(2)));
        private[3].connections.push((PortId(3), PortId(0)));
        private[0].connections.push((PortId(3), PortId(0)));

        let direct = direct_fed_by(&clients, &ports, &private);
        let closure = transitive_closure(&direct);

        assert!(closure[&ClientId(0)].contains(&ClientId(1)));
        assert!(closure[&ClientId(1)].contains(&ClientId(0)));
    }
}
