//! Event notification for session observers.
//!
//! Four channels mirror the observable moments of a dialogue: Connected,
//! Disconnected, Requested (a request left the wire), and Received (a
//! response arrived for a request). Delivery is synchronous and in
//! registration order.
//!
//! A subscriber signals failure by returning `Err`; the error is logged and
//! the **remaining subscribers for that event are skipped**. The policy is
//! log-and-stop per event, not per-subscriber isolation. Subscribers must
//! not call back into the session that fired them.

use crate::protocol::RtspMessage;

/// What a subscriber returns; `Err` stops delivery for this event.
pub type EventResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type LifecycleSubscriber = Box<dyn Fn() -> EventResult + Send + Sync>;
type RequestSubscriber = Box<dyn Fn(&RtspMessage) -> EventResult + Send + Sync>;
type ExchangeSubscriber = Box<dyn Fn(Option<&RtspMessage>, &RtspMessage) -> EventResult + Send + Sync>;

/// Ordered subscriber lists for the four session event channels.
#[derive(Default)]
pub struct EventNotifier {
    connected: Vec<LifecycleSubscriber>,
    disconnected: Vec<LifecycleSubscriber>,
    requested: Vec<RequestSubscriber>,
    received: Vec<ExchangeSubscriber>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self, f: impl Fn() -> EventResult + Send + Sync + 'static) {
        self.connected.push(Box::new(f));
    }

    pub fn on_disconnected(&mut self, f: impl Fn() -> EventResult + Send + Sync + 'static) {
        self.disconnected.push(Box::new(f));
    }

    pub fn on_requested(
        &mut self,
        f: impl Fn(&RtspMessage) -> EventResult + Send + Sync + 'static,
    ) {
        self.requested.push(Box::new(f));
    }

    pub fn on_received(
        &mut self,
        f: impl Fn(Option<&RtspMessage>, &RtspMessage) -> EventResult + Send + Sync + 'static,
    ) {
        self.received.push(Box::new(f));
    }

    pub fn fire_connected(&self) {
        for (i, subscriber) in self.connected.iter().enumerate() {
            if let Err(e) = subscriber() {
                tracing::warn!(event = "connected", subscriber = i, error = %e, "subscriber failed; skipping rest");
                break;
            }
        }
    }

    pub fn fire_disconnected(&self) {
        for (i, subscriber) in self.disconnected.iter().enumerate() {
            if let Err(e) = subscriber() {
                tracing::warn!(event = "disconnected", subscriber = i, error = %e, "subscriber failed; skipping rest");
                break;
            }
        }
    }

    pub fn fire_requested(&self, request: &RtspMessage) {
        for (i, subscriber) in self.requested.iter().enumerate() {
            if let Err(e) = subscriber(request) {
                tracing::warn!(event = "requested", subscriber = i, error = %e, "subscriber failed; skipping rest");
                break;
            }
        }
    }

    pub fn fire_received(&self, request: Option<&RtspMessage>, response: &RtspMessage) {
        for (i, subscriber) in self.received.iter().enumerate() {
            if let Err(e) = subscriber(request, response) {
                tracing::warn!(event = "received", subscriber = i, error = %e, "subscriber failed; skipping rest");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivery_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut notifier = EventNotifier::new();
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            notifier.on_connected(move || {
                order.lock().push(tag);
                Ok(())
            });
        }
        notifier.fire_connected();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_subscriber_stops_later_ones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut notifier = EventNotifier::new();

        let c = calls.clone();
        notifier.on_disconnected(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        notifier.on_disconnected(move || Err("boom".into()));
        let c = calls.clone();
        notifier.on_disconnected(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        notifier.fire_disconnected();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn received_carries_both_messages() {
        let saw = Arc::new(AtomicUsize::new(0));
        let mut notifier = EventNotifier::new();
        let s = saw.clone();
        notifier.on_received(move |request, response| {
            assert!(request.is_some());
            assert_eq!(response.status_code, 200);
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let req = RtspMessage::options("rtsp://h/s");
        let resp = RtspMessage::response(200, "OK");
        notifier.fire_received(Some(&req), &resp);
        assert_eq!(saw.load(Ordering::SeqCst), 1);
    }
}
