#![forbid(unsafe_code)]

//! Change notifications for [`PlanningStationStore`](crate::PlanningStationStore).
//!
//! # Design
//!
//! Listeners are stored as `Weak<dyn Fn(&StoreEvent)>`; the caller keeps the
//! strong side alive inside a [`Subscription`] guard. Dropping the guard
//! detaches the listener. Dead entries are pruned lazily on the next emit.
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: listeners receive only the event, never the
//!   store. A listener that needs the store must defer its work (for example
//!   by flagging a cell the owner inspects after the mutation returns).

use std::rc::{Rc, Weak};

use crate::field::StationField;
use crate::station::StationId;

/// A structural or field-level change to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added { id: StationId },
    Removed { id: StationId },
    Updated { id: StationId, field: StationField },
    Collapsed { id: StationId, collapsed: bool },
    Renumbered,
    Cleared,
    Replaced { count: usize },
}

impl StoreEvent {
    /// Whether the event changes anything the remote map shows.
    #[must_use]
    pub fn affects_map(&self) -> bool {
        !matches!(self, Self::Collapsed { .. })
    }
}

type ListenerRc = Rc<dyn Fn(&StoreEvent)>;
type ListenerWeak = Weak<dyn Fn(&StoreEvent)>;

#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<ListenerWeak>,
}

impl Listeners {
    pub(crate) fn subscribe(&mut self, callback: impl Fn(&StoreEvent) + 'static) -> Subscription {
        let strong: ListenerRc = Rc::new(callback);
        self.entries.push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    pub(crate) fn emit(&mut self, event: &StoreEvent) {
        self.entries.retain(|w| w.strong_count() > 0);
        let live: Vec<ListenerRc> = self.entries.iter().filter_map(Weak::upgrade).collect();
        if live.is_empty() {
            return;
        }
        tracing::trace!(?event, listeners = live.len(), "store event");
        for listener in &live {
            listener(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// RAII guard for a store listener. Drop it to unsubscribe.
#[must_use = "dropping the subscription detaches the listener immediately"]
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
