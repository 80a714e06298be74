//! Registered subscriptions and message dispatch.
//!
//! The table keeps registration order. That order is used both for
//! dispatch and for re-subscribing after a reconnect.

use std::panic::{self, AssertUnwindSafe};

use dhtlink_core::packet::QoS;
use dhtlink_core::topic_matches_filter;

use crate::events::InboundMessage;

/// Result returned by message handlers. Errors are logged, never propagated.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives messages for a subscription.
///
/// Closures of the form `FnMut(&InboundMessage) -> HandlerResult` implement
/// this trait.
pub trait MessageHandler: Send {
    fn on_message(&mut self, message: &InboundMessage) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: FnMut(&InboundMessage) -> HandlerResult + Send,
{
    fn on_message(&mut self, message: &InboundMessage) -> HandlerResult {
        self(message)
    }
}

/// A registered topic filter and its handler.
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
    handler: Box<dyn MessageHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Ordered subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `filter`. An existing registration for the same filter is
    /// replaced in place (keeping its position) and returned.
    pub fn insert(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Box<dyn MessageHandler>,
    ) -> Option<Subscription> {
        let new = Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        };
        match self.entries.iter_mut().find(|s| s.filter == filter) {
            Some(existing) => Some(std::mem::replace(existing, new)),
            None => {
                self.entries.push(new);
                None
            }
        }
    }

    /// Undo an `insert`: put `previous` back, or remove the filter if there
    /// was nothing before.
    pub fn restore(&mut self, filter: &str, previous: Option<Subscription>) {
        match previous {
            Some(previous) => {
                if let Some(slot) = self.entries.iter_mut().find(|s| s.filter == filter) {
                    *slot = previous;
                } else {
                    self.entries.push(previous);
                }
            }
            None => {
                self.remove(filter);
            }
        }
    }

    /// Remove `filter`. Returns whether it was registered.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.filter != filter);
        self.entries.len() != before
    }

    /// Filters and requested QoS, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, QoS)> {
        self.entries.iter().map(|s| (s.filter.as_str(), s.qos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Hand `message` to every handler whose filter matches its topic.
    ///
    /// A handler that fails or panics is logged and does not stop the
    /// others. Returns the number of handlers invoked.
    pub fn dispatch(&mut self, message: &InboundMessage) -> usize {
        let mut invoked = 0;
        for sub in self
            .entries
            .iter_mut()
            .filter(|s| topic_matches_filter(&message.topic, &s.filter))
        {
            invoked += 1;
            let handler = &mut sub.handler;
            match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!(
                        "Handler for '{}' failed on message from '{}': {}",
                        sub.filter,
                        message.topic,
                        e
                    );
                }
                Err(_) => {
                    log::error!(
                        "Handler for '{}' panicked on message from '{}'",
                        sub.filter,
                        message.topic
                    );
                }
            }
        }
        if invoked == 0 {
            log::debug!("No subscription matches '{}'", message.topic);
        }
        invoked
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;

    fn message(topic: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"{}"),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Box<dyn MessageHandler> {
        let log = Arc::clone(log);
        Box::new(move |msg: &InboundMessage| -> HandlerResult {
            log.lock().push(format!("{}:{}", tag, msg.topic));
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_to_matching_filters_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();
        table.insert("node1/dht11", QoS::AtMostOnce, recorder(&log, "exact"));
        table.insert("+/dht11", QoS::AtMostOnce, recorder(&log, "wild"));
        table.insert("node2/#", QoS::AtMostOnce, recorder(&log, "other"));

        assert_eq!(table.dispatch(&message("node1/dht11")), 2);
        assert_eq!(
            *log.lock(),
            vec!["exact:node1/dht11".to_string(), "wild:node1/dht11".to_string()]
        );
        assert_eq!(table.dispatch(&message("node3/bmp280")), 0);
    }

    #[test]
    fn test_replace_keeps_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();
        table.insert("a", QoS::AtMostOnce, recorder(&log, "a1"));
        table.insert("b", QoS::AtMostOnce, recorder(&log, "b"));
        let previous = table.insert("a", QoS::AtLeastOnce, recorder(&log, "a2"));

        assert!(previous.is_some());
        let order: Vec<_> = table.iter().collect();
        assert_eq!(order, vec![("a", QoS::AtLeastOnce), ("b", QoS::AtMostOnce)]);

        table.dispatch(&message("a"));
        assert_eq!(*log.lock(), vec!["a2:a".to_string()]);
    }

    #[test]
    fn test_restore_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();

        let previous = table.insert("a", QoS::AtMostOnce, recorder(&log, "new"));
        table.restore("a", previous);
        assert!(table.is_empty());

        table.insert("b", QoS::AtMostOnce, recorder(&log, "old"));
        let previous = table.insert("b", QoS::AtLeastOnce, recorder(&log, "new"));
        table.restore("b", previous);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("b", QoS::AtMostOnce)]);
        table.dispatch(&message("b"));
        assert_eq!(*log.lock(), vec!["old:b".to_string()]);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();
        table.insert(
            "node1/#",
            QoS::AtMostOnce,
            Box::new(|_: &InboundMessage| -> HandlerResult { Err("bad payload".into()) }),
        );
        table.insert(
            "+/dht11",
            QoS::AtMostOnce,
            Box::new(|_: &InboundMessage| -> HandlerResult { panic!("handler bug") }),
        );
        table.insert("node1/dht11", QoS::AtMostOnce, recorder(&log, "ok"));

        assert_eq!(table.dispatch(&message("node1/dht11")), 3);
        assert_eq!(*log.lock(), vec!["ok:node1/dht11".to_string()]);
    }

    #[test]
    fn test_remove_and_clear() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();
        table.insert("a", QoS::AtMostOnce, recorder(&log, "a"));
        table.insert("b", QoS::AtMostOnce, recorder(&log, "b"));

        assert!(table.remove("a"));
        assert!(!table.remove("a"));
        assert_eq!(table.iter().map(|(f, _)| f).collect::<Vec<_>>(), vec!["b"]);
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
