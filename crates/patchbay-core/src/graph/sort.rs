//! Stable sort by `fed_by` membership, with the driver client winning
//! feedback-loop ties (spec.md §4.3 step 3, grounded on the original
//! `jack_client_sort` comparator).

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::client::{Client, ClientKind};
use crate::ids::ClientId;

/// `a` after `b` iff `b in fed_by(a)`. When both `a in fed_by(b)` and
/// `b in fed_by(a)` (a feedback cycle), the driver client takes the
/// earlier slot; otherwise the comparator reports equivalence and the
/// sort (being stable) preserves relative order.
fn compare(
    a: &Client,
    b: &Client,
    fed_by: &AHashMap<ClientId, ahash::AHashSet<ClientId>>,
) -> Ordering {
    let a_after_b = fed_by.get(&a.id).map(|s| s.contains(&b.id)).unwrap_or(false);
    let b_after_a = fed_by.get(&b.id).map(|s| s.contains(&a.id)).unwrap_or(false);

    match (a_after_b, b_after_a) {
        (true, true) => {
            // Feedback loop: driver goes first.
            if a.kind == ClientKind::Driver {
                Ordering::Less
            } else if b.kind == ClientKind::Driver {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => Ordering::Equal,
    }
}

/// Stable-sort `clients` in place and assign each one's `execution_order`
/// to its new position.
pub fn sort_clients(
    clients: &mut [Client],
    fed_by: &AHashMap<ClientId, ahash::AHashSet<ClientId>>,
) {
    clients.sort_by(|a, b| compare(a, b, fed_by));
    for (idx, client) in clients.iter_mut().enumerate() {
        client.execution_order = idx as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Dispatch;
    use crate::ids::ClientId;
    use ahash::AHashSet;

    fn stub(id: u64, kind: ClientKind) -> Client {
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
    fn a_fed_by_b_puts_b_first() {
        let mut clients = vec![stub(0, ClientKind::External), stub(1, ClientKind::External)];
        let mut fed_by = AHashMap::new();
        fed_by.insert(ClientId(0), AHashSet::from_iter([ClientId(1)]));
        fed_by.insert(ClientId(1), AHashSet::new());

        sort_clients(&mut clients, &fed_by);
        assert_eq!(clients[0].id, ClientId(1));
        assert_eq!(clients[1].id, ClientId(0));
        assert_eq!(clients[0].execution_order, 0);
        assert_eq!(clients[1].execution_order, 1);
    }

    #[test]
    fn feedback_loop_gives_driver_the_earlier_slot() {
        let mut clients = vec![
            stub(0, ClientKind::External),
            stub(1, ClientKind::External),
            stub(2, ClientKind::Driver),
        ];
        let mut fed_by = AHashMap::new();
        // A <-> B feedback; driver D is unrelated but must still land first
        // when it ties against either.
        fed_by.insert(ClientId(0), AHashSet::from_iter([ClientId(1), ClientId(2)]));
        fed_by.insert(ClientId(1), AHashSet::from_iter([ClientId(0), ClientId(2)]));
        fed_by.insert(ClientId(2), AHashSet::new());

        sort_clients(&mut clients, &fed_by);
        assert_eq!(clients[0].kind, ClientKind::Driver);
    }

    #[test]
    fn mutual_feedback_with_driver_breaks_tie_toward_driver() {
        let mut clients = vec![stub(0, ClientKind::External), stub(1, ClientKind::Driver)];
        let mut fed_by = AHashMap::new();
        fed_by.insert(ClientId(0), AHashSet::from_iter([ClientId(1)]));
        fed_by.insert(ClientId(1), AHashSet::from_iter([ClientId(0)]));

        sort_clients(&mut clients, &fed_by);
        assert_eq!(clients[0].id, ClientId(1));
    }
}
