//! Connection and session events

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

use crate::state::AppletState;

/// Default capacity of each subscriber queue
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Event emitted by a [`Keycard`](crate::Keycard) session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport connected to a card
    Connected,
    /// The card went away; the session was reset
    Disconnected,
    /// The host side state changed
    StateChanged {
        /// Previous state
        from: AppletState,
        /// New state
        to: AppletState,
    },
}

/// Sender for session events
pub type SessionEventSender = Sender<SessionEvent>;
/// Receiver for session events
pub type SessionEventReceiver = Receiver<SessionEvent>;

/// Create a bounded channel with the specified capacity for session events
pub fn session_event_channel(capacity: usize) -> (SessionEventSender, SessionEventReceiver) {
    bounded(capacity)
}

/// Fan-out of session events to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventSubscribers {
    senders: Vec<SessionEventSender>,
}

impl EventSubscribers {
    pub(crate) fn subscribe(&mut self, capacity: usize) -> SessionEventReceiver {
        let (sender, receiver) = session_event_channel(capacity);
        self.senders.push(sender);
        receiver
    }

    /// Deliver `event` to each subscriber; dropped receivers are forgotten
    pub(crate) fn publish(&mut self, event: SessionEvent) {
        self.senders.retain(|sender| match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(?event, "Subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let mut subscribers = EventSubscribers::default();
        let first = subscribers.subscribe(4);
        let second = subscribers.subscribe(4);

        subscribers.publish(SessionEvent::Connected);
        subscribers.publish(SessionEvent::Disconnected);

        for receiver in [first, second] {
            assert_eq!(
                receiver.try_iter().collect::<Vec<_>>(),
                vec![SessionEvent::Connected, SessionEvent::Disconnected]
            );
        }
    }

    #[test]
    fn test_no_listener_keeps_nothing() {
        let mut subscribers = EventSubscribers::default();
        subscribers.publish(SessionEvent::Connected);
        assert_eq!(subscribers.len(), 0);

        drop(subscribers.subscribe(4));
        subscribers.publish(SessionEvent::Connected);
        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let mut subscribers = EventSubscribers::default();
        let receiver = subscribers.subscribe(1);

        subscribers.publish(SessionEvent::Connected);
        subscribers.publish(SessionEvent::Disconnected);

        assert_eq!(receiver.len(), 1);
        assert_eq!(receiver.try_recv(), Ok(SessionEvent::Connected));
        assert_eq!(subscribers.len(), 1);
    }
}
