//! Topic-based dispatch of graph notifications.
//!
//! Handlers run on the loop thread, one after another, in subscription order.
//! The bus only delivers; deciding what a message means is left to the
//! caller.

use std::fmt;

use branchflow_comms::{BusMessage, MessageTopic};

/// Handler invoked for each matching message
pub type MessageHandler = Box<dyn FnMut(&BusMessage)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    topic: MessageTopic,
    handler: MessageHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    closed: bool,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every message on `topic`
    pub fn subscribe(&mut self, topic: MessageTopic, handler: impl FnMut(&BusMessage) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            topic,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|subscription| subscription.id != id);
        before != self.subscriptions.len()
    }

    /// Deliver `message` to every handler subscribed to its topic.
    ///
    /// Returns the number of handlers invoked; always zero once closed.
    pub fn dispatch(&mut self, message: &BusMessage) -> usize {
        if self.closed {
            tracing::debug!("Dropping {:?} after close", message.topic());
            return 0;
        }

        let topic = message.topic();
        let mut delivered = 0;
        for subscription in &mut self.subscriptions {
            if subscription.topic == topic {
                (subscription.handler)(message);
                delivered += 1;
            }
        }
        delivered
    }

    /// Stop delivering and drop every handler
    pub fn close(&mut self) {
        self.closed = true;
        self.subscriptions.clear();
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn error(diagnostic: &str) -> BusMessage {
        BusMessage::Error {
            source: "src".into(),
            diagnostic: diagnostic.into(),
        }
    }

    #[test]
    fn test_dispatch_by_topic_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();

        let first = Rc::clone(&seen);
        bus.subscribe(MessageTopic::Error, move |_| first.borrow_mut().push("first"));
        let second = Rc::clone(&seen);
        bus.subscribe(MessageTopic::Error, move |_| second.borrow_mut().push("second"));
        let eos = Rc::clone(&seen);
        bus.subscribe(MessageTopic::Eos, move |_| eos.borrow_mut().push("eos"));

        assert_eq!(bus.dispatch(&error("boom")), 2);
        assert_eq!(*seen.borrow(), vec!["first", "second"]);

        assert_eq!(bus.dispatch(&BusMessage::Eos), 1);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_handler_sees_diagnostic() {
        let diagnostic = Rc::new(RefCell::new(String::new()));
        let mut bus = EventBus::new();
        let sink = Rc::clone(&diagnostic);
        bus.subscribe(MessageTopic::Error, move |message| {
            if let BusMessage::Error { diagnostic, .. } = message {
                sink.borrow_mut().clone_from(diagnostic);
            }
        });

        bus.dispatch(&error("not negotiated"));
        assert_eq!(*diagnostic.borrow(), "not negotiated");
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let id = bus.subscribe(MessageTopic::Eos, |_| {});
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.dispatch(&BusMessage::Eos), 0);
    }

    #[test]
    fn test_no_delivery_after_close() {
        let mut bus = EventBus::new();
        bus.subscribe(MessageTopic::Eos, |_| panic!("delivered after close"));
        bus.close();
        assert!(bus.is_closed());
        assert_eq!(bus.dispatch(&BusMessage::Eos), 0);
    }
}
