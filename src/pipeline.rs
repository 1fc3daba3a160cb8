//! Outbound message state: what is waiting to be sent and in which order.
//!
//! Three message classes feed the supervisor. Device state is a single
//! latest-value slot: writes replace whatever was pending, so only the newest
//! state is ever published. Telemetry and topic events are FIFO queues, each
//! paired with an "unsent" slot holding the one event currently in flight. An
//! event moves from its queue into the unsent slot, and leaves the slot only
//! after the transport accepted it, so a failed publish is retried after
//! reconnect instead of being lost.
//!
//! Everything here is synchronous and lock-based; no lock is held across an
//! await point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::TopicEvent;
use crate::queue::BoundedQueue;

/// One unit of outbound work, in publish priority order.
#[derive(Debug)]
pub(crate) enum OutboundWork {
    DeviceState(Arc<[u8]>),
    Telemetry(Arc<TopicEvent>),
    Event(Arc<TopicEvent>),
}

/// A bounded queue plus the slot for the event polled from it but not yet
/// acknowledged by the transport.
#[derive(Debug)]
struct Channel {
    queue: BoundedQueue<Arc<TopicEvent>>,
    unsent: Option<Arc<TopicEvent>>,
}

impl Channel {
    fn new(queue: BoundedQueue<Arc<TopicEvent>>) -> Self {
        Self {
            queue,
            unsent: None,
        }
    }

    /// Offer to the queue, reporting success only when the queue grew.
    ///
    /// A drop-oldest queue at capacity admits the event by evicting another,
    /// which leaves the length unchanged; that counts as a failed enqueue so
    /// the caller does not release a wake token for it.
    fn enqueue(&mut self, event: Arc<TopicEvent>) -> bool {
        let before = self.queue.len();
        self.queue.offer(event) && self.queue.len() > before
    }

    /// Fill the unsent slot from the queue if needed and return its content.
    fn next_unsent(&mut self) -> Option<Arc<TopicEvent>> {
        if self.unsent.is_none() {
            self.unsent = self.queue.poll();
        }
        self.unsent.clone()
    }
}

/// Shared outbound state between the facade and the supervisor.
pub(crate) struct OutboundPipeline {
    pending_state: Mutex<Option<Arc<[u8]>>>,
    telemetry: Mutex<Channel>,
    events: Mutex<Channel>,
}

impl OutboundPipeline {
    pub(crate) fn new(
        telemetry_queue: BoundedQueue<Arc<TopicEvent>>,
        event_queue: BoundedQueue<Arc<TopicEvent>>,
    ) -> Self {
        Self {
            pending_state: Mutex::new(None),
            telemetry: Mutex::new(Channel::new(telemetry_queue)),
            events: Mutex::new(Channel::new(event_queue)),
        }
    }

    /// Replace the pending device state. Returns true when the slot was
    /// previously empty, i.e. the caller should wake the supervisor.
    pub(crate) fn set_pending_state(&self, state: Arc<[u8]>) -> bool {
        lock(&self.pending_state).replace(state).is_none()
    }

    /// Clear the state slot only if it still holds exactly `sent`.
    ///
    /// A newer state written while `sent` was in flight stays pending and is
    /// published on the next wakeup.
    pub(crate) fn clear_state_if_equal(&self, sent: &Arc<[u8]>) {
        let mut slot = lock(&self.pending_state);
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, sent)) {
            *slot = None;
        }
    }

    pub(crate) fn enqueue_telemetry(&self, event: Arc<TopicEvent>) -> bool {
        lock(&self.telemetry).enqueue(event)
    }

    pub(crate) fn enqueue_event(&self, event: Arc<TopicEvent>) -> bool {
        lock(&self.events).enqueue(event)
    }

    /// Produce the next unit of work in strict priority order: device state,
    /// then telemetry, then topic events. Returns `None` when idle.
    pub(crate) fn take_next_work(&self) -> Option<OutboundWork> {
        if let Some(state) = lock(&self.pending_state).clone() {
            return Some(OutboundWork::DeviceState(state));
        }
        if let Some(event) = lock(&self.telemetry).next_unsent() {
            return Some(OutboundWork::Telemetry(event));
        }
        if let Some(event) = lock(&self.events).next_unsent() {
            return Some(OutboundWork::Event(event));
        }
        None
    }

    /// Called after the transport accepted the in-flight telemetry event.
    pub(crate) fn clear_unsent_telemetry(&self) {
        lock(&self.telemetry).unsent = None;
    }

    /// Called after the transport accepted the in-flight topic event.
    pub(crate) fn clear_unsent_event(&self) {
        lock(&self.events).unsent = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Qos;
    use crate::queue::OverflowPolicy;

    fn pipeline(capacity: usize, policy: OverflowPolicy) -> OutboundPipeline {
        OutboundPipeline::new(
            BoundedQueue::new(capacity, policy).unwrap(),
            BoundedQueue::new(capacity, policy).unwrap(),
        )
    }

    fn event(payload: &[u8]) -> Arc<TopicEvent> {
        Arc::new(TopicEvent::new(payload.to_vec(), None, Qos::AtMostOnce))
    }

    fn state(payload: &[u8]) -> Arc<[u8]> {
        Arc::from(payload.to_vec())
    }

    #[test]
    fn state_slot_reports_first_fill_only() {
        let pipeline = pipeline(4, OverflowPolicy::DropOldest);
        assert!(pipeline.set_pending_state(state(b"s1")));
        assert!(!pipeline.set_pending_state(state(b"s2")));
    }

    #[test]
    fn state_clear_preserves_newer_writes() {
        let pipeline = pipeline(4, OverflowPolicy::DropOldest);
        let first = state(b"s1");
        pipeline.set_pending_state(Arc::clone(&first));

        // A newer state lands while `first` is in flight.
        pipeline.set_pending_state(state(b"s2"));
        pipeline.clear_state_if_equal(&first);

        match pipeline.take_next_work() {
            Some(OutboundWork::DeviceState(current)) => assert_eq!(&current[..], b"s2"),
            other => panic!("expected pending state, got {other:?}"),
        }
    }

    #[test]
    fn state_clear_removes_the_sent_payload() {
        let pipeline = pipeline(4, OverflowPolicy::DropOldest);
        let sent = state(b"s1");
        pipeline.set_pending_state(Arc::clone(&sent));
        pipeline.clear_state_if_equal(&sent);
        assert!(pipeline.take_next_work().is_none());
    }

    #[test]
    fn work_is_produced_in_priority_order() {
        let pipeline = pipeline(4, OverflowPolicy::DropOldest);
        pipeline.enqueue_event(event(b"topic-event"));
        pipeline.enqueue_telemetry(event(b"telemetry"));
        pipeline.set_pending_state(state(b"state"));

        assert!(matches!(
            pipeline.take_next_work(),
            Some(OutboundWork::DeviceState(_))
        ));
        pipeline.clear_state_if_equal(&match pipeline.take_next_work() {
            Some(OutboundWork::DeviceState(s)) => s,
            other => panic!("expected state, got {other:?}"),
        });

        assert!(matches!(
            pipeline.take_next_work(),
            Some(OutboundWork::Telemetry(_))
        ));
        pipeline.clear_unsent_telemetry();

        assert!(matches!(pipeline.take_next_work(), Some(OutboundWork::Event(_))));
        pipeline.clear_unsent_event();

        assert!(pipeline.take_next_work().is_none());
    }

    #[test]
    fn unsent_event_is_returned_again_until_cleared() {
        let pipeline = pipeline(4, OverflowPolicy::DropOldest);
        pipeline.enqueue_telemetry(event(b"a"));
        pipeline.enqueue_telemetry(event(b"b"));

        let first = match pipeline.take_next_work() {
            Some(OutboundWork::Telemetry(e)) => e,
            other => panic!("expected telemetry, got {other:?}"),
        };
        // Publish failed; the same event must come back.
        let retry = match pipeline.take_next_work() {
            Some(OutboundWork::Telemetry(e)) => e,
            other => panic!("expected telemetry, got {other:?}"),
        };
        assert!(Arc::ptr_eq(&first, &retry));

        pipeline.clear_unsent_telemetry();
        match pipeline.take_next_work() {
            Some(OutboundWork::Telemetry(e)) => assert_eq!(e.data(), b"b"),
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_reports_growth_not_admission() {
        let pipeline = pipeline(2, OverflowPolicy::DropOldest);
        assert!(pipeline.enqueue_telemetry(event(b"1")));
        assert!(pipeline.enqueue_telemetry(event(b"2")));
        // Queue is full: the event is admitted by evicting the oldest, but
        // the length does not grow, so no wake token is owed.
        assert!(!pipeline.enqueue_telemetry(event(b"3")));

        pipeline.take_next_work();
        pipeline.clear_unsent_telemetry();
        match pipeline.take_next_work() {
            Some(OutboundWork::Telemetry(e)) => assert_eq!(e.data(), b"3"),
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn reject_new_queue_refuses_when_full() {
        let pipeline = pipeline(1, OverflowPolicy::RejectNew);
        assert!(pipeline.enqueue_event(event(b"1")));
        assert!(!pipeline.enqueue_event(event(b"2")));
    }
}
