use std::collections::HashMap;
use std::fmt;

use tokio::sync::watch;

use crate::endpoint::SubscriptionKey;
use crate::metrics;
use crate::state::ConnectionState;
use crate::view::SyncView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub slot: SlotId,
    pub key: SubscriptionKey,
    pub state: ConnectionState,
}

#[derive(Debug)]
struct Slot {
    key: Option<SubscriptionKey>,
    views: watch::Receiver<SyncView>,
}

/// Arena of subscriptions owned by one client. A slot carries a key while its
/// subscription is enabled with a resolved endpoint.
#[derive(Debug, Default)]
pub struct Registry {
    next: u64,
    slots: HashMap<SlotId, Slot>,
}

impl Registry {
    pub fn register(&mut self, views: watch::Receiver<SyncView>) -> SlotId {
        self.next += 1;
        let id = SlotId(self.next);
        self.slots.insert(id, Slot { key: None, views });
        id
    }

    pub fn activate(&mut self, id: SlotId, key: SubscriptionKey) {
        self.deactivate(id);
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.key = Some(key);
        metrics::ACTIVE_SUBSCRIPTIONS.inc();
    }

    pub fn deactivate(&mut self, id: SlotId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            if slot.key.take().is_some() {
                metrics::ACTIVE_SUBSCRIPTIONS.dec();
            }
        }
    }

    pub fn release(&mut self, id: SlotId) {
        self.deactivate(id);
        self.slots.remove(&id);
    }

    /// Enabled subscriptions, ordered by slot. A subscription that stopped on
    /// its own stays listed with its `Errored` or `Completed` state.
    pub fn active(&self) -> Vec<ActiveSubscription> {
        let mut active: Vec<_> = self
            .slots
            .iter()
            .filter_map(|(id, slot)| {
                Some(ActiveSubscription {
                    slot: *id,
                    key: slot.key.clone()?,
                    state: slot.views.borrow().state(),
                })
            })
            .collect();
        active.sort_by_key(|entry| entry.slot);
        active
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
