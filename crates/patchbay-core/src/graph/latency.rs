//! Total-latency recursion, bounded to 8 hops to bottom out on cycles
//! (spec.md §4.3 step 4, §9; grounded on the original
//! `jack_get_port_total_latency`/`jack_compute_all_port_total_latencies`).

use crate::ids::PortId;
use crate::port::{Port, PortPrivate};

const MAX_HOPS: u32 = 8;

/// Output ports walk forward along their connections (toward the ports
/// they feed); input ports walk backward (toward the ports that feed
/// them). Terminal-flagged ports are leaves: their own `latency` is
/// returned without recursing further.
fn total_latency(
    port_id: PortId,
    ports: &[Option<Port>],
    port_private: &[PortPrivate],
    hop_count: u32,
) -> u32 {
    let Some(Some(port)) = ports.get(port_id.0 as usize) else {
        return 0;
    };
    if port.is_terminal() || hop_count >= MAX_HOPS {
        return port.latency;
    }
    let Some(private) = port_private.get(port_id.0 as usize) else {
        return port.latency;
    };

    let mut max_downstream = 0u32;
    for &(src, dst) in &private.connections {
        let other = if port.is_output() {
            if src != port_id {
                continue;
            }
            dst
        } else {
            if dst != port_id {
                continue;
            }
            src
        };
        let downstream = total_latency(other, ports, port_private, hop_count + 1);
        max_downstream = max_downstream.max(downstream);
    }
    port.latency + max_downstream
}

/// Recompute `total_latency` for every in-use port (spec.md §4.3 step 4).
pub fn recompute_all(ports: &mut [Option<Port>], port_private: &[PortPrivate]) {
    let ids: Vec<PortId> = ports
        .iter()
        .filter_map(|p| p.as_ref())
        .filter(|p| p.in_use)
        .map(|p| p.id)
        .collect();

    for id in ids {
        let value = total_latency(id, ports, port_private, 0);
        if let Some(Some(port)) = ports.get_mut(id.0 as usize) {
            port.total_latency = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ClientId, PortId, PortTypeId};
    use crate::port::PortFlags;

    fn port(id: u32, flags: PortFlags, latency: u32, terminal: bool) -> Port {
        Port {
            id: PortId(id),
            name: format!("p{id}"),
            owning_client: ClientId(0),
            type_id: PortTypeId(0),
            flags: if terminal {
                flags | PortFlags::IS_TERMINAL
            } else {
                flags
            },
            in_use: true,
            locked: false,
            latency,
            total_latency: 0,
            buffer: None,
            monitor_requests: 0,
            aliases: [None, None],
        }
    }

    #[test]
    fn chain_sums_latency_forward() {
        // out(5) -> in -> out(3) -> in(terminal, 2)
        let mut ports = vec![
            Some(port(0, PortFlags::IS_OUTPUT, 5, false)),
            Some(port(1, PortFlags::IS_INPUT, 0, false)),
            Some(port(2, PortFlags::IS_OUTPUT, 3, false)),
            Some(port(3, PortFlags::IS_INPUT, 2, true)),
        ];
        let mut private = vec![PortPrivate::default(); 4];
        private[0].connections.push((PortId(0), PortId(1)));
        private[1].connections.push((PortId(0), PortId(1)));
        private[2].connections.push((PortId(2), PortId(3)));
        private[3].connections.push((PortId(2), PortId(3)));

        recompute_all(&mut ports, &private);
        assert_eq!(ports[0].as_ref().unwrap().total_latency, 5 + 3 + 2);
    }

    #[test]
    fn cycle_bottoms_out_at_eight_hops() {
        // A 2-port feedback cycle: out(1) -> in(1), with in also feeding
        // out again via a loopback connection, recursion must terminate.
        let mut ports = vec![
            Some(port(0, PortFlags::IS_OUTPUT, 1, false)),
            Some(port(1, PortFlags::IS_INPUT, 1, false)),
        ];
        let mut private = vec![PortPrivate::default(); 2];
        private[0].connections.push((PortId(0), PortId(1)));
        private[1].connections.push((PortId(0), PortId(1)));

        // Force a self-referential edge to exercise the hop cap: pretend
        // port 1 also drives port 0 (not normally possible for an input,
        // but this test only exists to prove MAX_HOPS bounds recursion).
        private[1].connections.push((PortId(1), PortId(0)));
        private[0].connections.push((PortId(1), PortId(0)));

        recompute_all(&mut ports, &private);
        // Must terminate at all (no stack overflow / infinite loop) and
        // produce a bounded value: at most MAX_HOPS+1 levels of latency-1
        // contributions before the hop cap bottoms out the recursion.
        assert!(ports[0].as_ref().unwrap().total_latency <= MAX_HOPS + 1);
    }
}
