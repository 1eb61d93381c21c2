//! The pending-request table: `(routing id, sequence slot)` → waiter.
//!
//! The unit can only juggle ten outstanding requests per routing id, one
//! per sequence digit. A request claims the lowest free digit before its
//! frame is written, and gives it back once the last row of its answer
//! has arrived (or it failed, timed out, or the connection went away).
//!
//! Each entry holds the sending half of an unbounded channel. Responses
//! are pushed into it as they arrive; a multiline answer simply pushes
//! several rows. Dropping the entry drops the sender, which wakes the
//! waiter with `None`: that is how a cleared table fails everyone who is
//! still waiting.

use std::collections::HashMap;

use cinelink_protocol::{MAX_SEQUENCE_SLOTS, Message, RoutingId};
use tokio::sync::mpsc;

/// A claimed slot. `ticket` distinguishes this claim from any later claim
/// of the same `(routing_id, slot)` pair, so a stale release is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Claim {
    pub(crate) routing_id: RoutingId,
    pub(crate) slot: u8,
    pub(crate) ticket: u64,
}

struct Entry {
    ticket: u64,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<(RoutingId, u8), Entry>,
    next_ticket: u64,
}

impl PendingTable {
    /// Claims the lowest free slot for `routing_id`.
    ///
    /// Returns `None` when all ten slots are busy.
    pub(crate) fn claim(
        &mut self,
        routing_id: &RoutingId,
    ) -> Option<(Claim, mpsc::UnboundedReceiver<Message>)> {
        let slot = (0..MAX_SEQUENCE_SLOTS)
            .find(|slot| !self.entries.contains_key(&(routing_id.clone(), *slot)))?;

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert((routing_id.clone(), slot), Entry { ticket, tx });

        let claim = Claim {
            routing_id: routing_id.clone(),
            slot,
            ticket,
        };
        Some((claim, rx))
    }

    /// Hands a response to the waiter registered for its
    /// `(routing_id, sequence)`. Returns `false` if nobody is waiting.
    pub(crate) fn deliver(&mut self, message: Message) -> bool {
        let Some(slot) = message.sequence.slot() else {
            return false;
        };
        let key = (message.routing_id.clone(), slot);
        match self.entries.get(&key) {
            Some(entry) => {
                if entry.tx.send(message).is_err() {
                    // Waiter gave up between claim and release.
                    self.entries.remove(&key);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Releases a claim. A claim that was already cleared, or whose slot has
    /// since been claimed again, is left alone. Returns whether an entry
    /// was removed.
    pub(crate) fn release(&mut self, claim: &Claim) -> bool {
        let key = (claim.routing_id.clone(), claim.slot);
        match self.entries.get(&key) {
            Some(entry) if entry.ticket == claim.ticket => {
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Drops every entry, failing all waiters. Returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Number of slots in use for `routing_id`.
    pub(crate) fn in_flight(&self, routing_id: &RoutingId) -> usize {
        self.entries.keys().filter(|(id, _)| id == routing_id).count()
    }
}

#[cfg(test)]
mod tests {
    use cinelink_protocol::decode;

    use super::*;

    #[test]
    fn test_claim_picks_lowest_free_slot() {
        let mut table = PendingTable::default();
        let id = RoutingId::local();
        let (a, _ra) = table.claim(&id).unwrap();
        let (b, _rb) = table.claim(&id).unwrap();
        let (c, _rc) = table.claim(&id).unwrap();
        assert_eq!((a.slot, b.slot, c.slot), (0, 1, 2));

        assert!(table.release(&b));
        let (d, _rd) = table.claim(&id).unwrap();
        assert_eq!(d.slot, 1);
    }

    #[test]
    fn test_claim_exhausts_after_ten() {
        let mut table = PendingTable::default();
        let id = RoutingId::local();
        let claims: Vec<_> = (0..10).map(|_| table.claim(&id).unwrap()).collect();
        assert!(table.claim(&id).is_none());
        assert_eq!(table.in_flight(&id), 10);

        // Other routing ids have their own ten slots.
        let other = RoutingId::serial("123B");
        assert_eq!(table.claim(&other).unwrap().0.slot, 0);
        drop(claims);
    }

    #[test]
    fn test_release_ignores_stale_ticket() {
        let mut table = PendingTable::default();
        let id = RoutingId::local();
        let (first, _r1) = table.claim(&id).unwrap();
        assert!(table.release(&first));
        let (second, _r2) = table.claim(&id).unwrap();
        assert_eq!(second.slot, first.slot);

        // Releasing the old claim must not free the new one.
        assert!(!table.release(&first));
        assert_eq!(table.in_flight(&id), 1);
    }

    #[tokio::test]
    async fn test_deliver_routes_by_id_and_slot() {
        let mut table = PendingTable::default();
        let id = RoutingId::local();
        let (_c0, mut r0) = table.claim(&id).unwrap();
        let (_c1, mut r1) = table.claim(&id).unwrap();

        assert!(table.deliver(decode("01/1/000:PLAY_STATUS:0:0:/1").unwrap()));
        assert!(table.deliver(decode("01/0/000:/1").unwrap()));
        assert!(!table.deliver(decode("01/5/000:/1").unwrap()));
        assert!(!table.deliver(decode("#00000000123B/0/000:/1").unwrap()));

        assert_eq!(r0.recv().await.unwrap().name, "");
        assert_eq!(r1.recv().await.unwrap().name, "PLAY_STATUS");
    }

    #[tokio::test]
    async fn test_clear_fails_waiters() {
        let mut table = PendingTable::default();
        let (_c, mut rx) = table.claim(&RoutingId::local()).unwrap();
        assert_eq!(table.clear(), 1);
        assert!(rx.recv().await.is_none());
    }
}
