//! O(1) packet routing.
//!
//! A [`PacketDispatcher`] owns a flat array of handler slots indexed by
//! packet id. Dispatch is a single bounds check and an array load; there is
//! no hashing and no branching over id values. The table is sized to the
//! reserved id range rather than the full `u16` space.

use tracing::{error, warn};

/// One past the highest packet id the dispatch table accepts. Registration
/// of any id at or above this bound (including the reserved `u16::MAX`
/// sentinel) is rejected.
pub const MAX_HANDLER_ID: u16 = 512;

type Handler<S> = Box<dyn Fn(&mut S, &[u8]) -> anyhow::Result<()> + Send + Sync>;

/// An id-indexed handler table, parameterized by the session-handle type
/// `S` of the peer class it serves.
///
/// Each process holds one dispatcher per peer class, so a frame arriving on
/// the wrong link can never reach a handler for the other class.
pub struct PacketDispatcher<S> {
    handlers: Box<[Option<Handler<S>>]>,
}

impl<S> PacketDispatcher<S> {
    pub fn new() -> Self {
        Self {
            handlers: (0..MAX_HANDLER_ID).map(|_| None).collect(),
        }
    }

    /// Assigns the handler for `id`. Out-of-range ids are rejected;
    /// re-registration replaces the previous handler.
    pub fn register<F>(&mut self, id: u16, handler: F)
    where
        F: Fn(&mut S, &[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if id >= MAX_HANDLER_ID {
            error!("packet id {id} exceeds the dispatch table bound of {MAX_HANDLER_ID}");
            return;
        }

        let slot = &mut self.handlers[id as usize];

        if slot.is_some() {
            warn!("replacing existing handler for packet id {id}");
        }

        *slot = Some(Box::new(handler));
    }

    /// Routes one frame. Returns `true` if a handler ran. A handler error
    /// means the payload was dropped; the session survives.
    pub fn dispatch(&self, session: &mut S, id: u16, payload: &[u8]) -> bool {
        let Some(handler) = self.handlers.get(id as usize).and_then(Option::as_ref) else {
            warn!("no handler registered for packet id {id}");
            return false;
        };

        if let Err(e) = handler(session, payload) {
            warn!("handler for packet id {id} failed: {e:#}");
        }

        true
    }
}

impl<S> Default for PacketDispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_handler_runs() {
        let mut dispatcher = PacketDispatcher::<Vec<u8>>::new();

        dispatcher.register(7, |calls: &mut Vec<u8>, payload| {
            calls.extend_from_slice(payload);
            Ok(())
        });

        let mut calls = vec![];
        assert!(dispatcher.dispatch(&mut calls, 7, &[1, 2, 3]));
        assert_eq!(calls, [1, 2, 3]);
    }

    #[test]
    fn empty_slot_reports_unhandled() {
        let dispatcher = PacketDispatcher::<()>::new();

        assert!(!dispatcher.dispatch(&mut (), 8, &[]));
        assert!(!dispatcher.dispatch(&mut (), u16::MAX, &[]));
    }

    #[test]
    fn out_of_range_registration_is_rejected() {
        let mut dispatcher = PacketDispatcher::<u32>::new();

        dispatcher.register(MAX_HANDLER_ID, |count, _| {
            *count += 1;
            Ok(())
        });
        dispatcher.register(u16::MAX, |count, _| {
            *count += 1;
            Ok(())
        });

        let mut count = 0;
        assert!(!dispatcher.dispatch(&mut count, MAX_HANDLER_ID, &[]));
        assert!(!dispatcher.dispatch(&mut count, u16::MAX, &[]));
        assert_eq!(count, 0);
    }

    #[test]
    fn handler_error_drops_payload_but_counts_as_handled() {
        let mut dispatcher = PacketDispatcher::<u32>::new();

        dispatcher.register(1, |_, _| anyhow::bail!("parse failure"));

        let mut state = 0;
        assert!(dispatcher.dispatch(&mut state, 1, &[0xFF]));
    }
}
