//! The graph sorter (spec.md §4.3), orchestrating the four steps
//! grounded on the original `jack_sort_graph`: rebuild `fed_by`, sort
//! clients, recompute port latencies, rechain subgraph FIFOs.

pub mod fed_by;
pub mod latency;
pub mod sort;
pub mod subgraph;

use crate::client::Client;
use crate::port::{Port, PortPrivate};
use subgraph::FifoProvider;

/// Run the full sort: step 1+2 (fed_by), step 3 (stable sort + execution
/// order), step 4 (latency), step 5 (FIFO rechain). Returns the number of
/// FIFO slots the rechained subgraphs now use.
///
/// Must be called with the graph mutex held — it mutates `clients` and
/// `ports` in place.
pub fn resort(
    clients: &mut Vec<Client>,
    ports: &mut [Option<Port>],
    port_private: &[PortPrivate],
    fifos: &mut dyn FifoProvider,
) -> u32 {
    let direct = fed_by::direct_fed_by(clients, ports, port_private);
    let closure = fed_by::transitive_closure(&direct);

    for client in clients.iter_mut() {
        if let Some(set) = closure.get(&client.id) {
            client.fed_by = set.clone();
        }
    }

    sort::sort_clients(clients, &closure);
    latency::recompute_all(ports, port_private);
    subgraph::rechain(clients, fifos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKind, Dispatch};
    use crate::ids::{ClientId, PortId, PortTypeId};
    use crate::port::PortFlags;
    use std::os::unix::io::RawFd;

    struct CountingFifos(u32);
    impl FifoProvider for CountingFifos {
        fn ensure(&mut self, index: u32) -> (RawFd, RawFd) {
            self.0 += 1;
            (1000 + index as RawFd, 2000 + index as RawFd)
        }
    }

    fn client(id: u64, kind: ClientKind) -> Client {
        Client::new(
            ClientId(id),
            format!("c{id}"),
            kind,
            Dispatch::External {
                request_fd: -1,
                event_fd: None,
                subgraph_start_fd: None,
                subgraph_wait_fd: None,
            },
        )
    }

    #[test]
    fn resort_is_idempotent_without_intervening_mutation() {
        let mut clients = vec![client(0, ClientKind::Driver), client(1, ClientKind::External)];
        clients[1].ports.push(PortId(0));
        let mut ports: Vec<Option<Port>> = vec![Some(Port {
            id: PortId(0),
            name: "in".into(),
            owning_client: ClientId(1),
            type_id: PortTypeId(0),
            flags: PortFlags::IS_INPUT,
            in_use: true,
            locked: false,
            latency: 0,
            total_latency: 0,
            buffer: None,
            monitor_requests: 0,
            aliases: [None, None],
        })];
        let private = vec![PortPrivate::default()];

        let mut fifos = CountingFifos(0);
        resort(&mut clients, &mut ports, &private, &mut fifos);
        let order_first: Vec<_> = clients.iter().map(|c| c.execution_order).collect();

        let mut fifos2 = CountingFifos(0);
        resort(&mut clients, &mut ports, &private, &mut fifos2);
        let order_second: Vec<_> = clients.iter().map(|c| c.execution_order).collect();

        assert_eq!(order_first, order_second);
    }
}
