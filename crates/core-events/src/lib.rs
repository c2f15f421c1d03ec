//! Fine-grained change notifications (component C9, §4.9).
//!
//! A single synchronous bus replaces the per-field listener callbacks the
//! editor model would otherwise need: consumers subscribe once and receive
//! every event kind, filtering on the variant they care about. Emission
//! happens on the caller's thread inside the call that produced the change —
//! a listener must not call back into the document model except to read
//! state, since the bus holds no queue to re-enter.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A document mutation landed; `dirty_range` is the code-unit range
    /// touched in the new text. This is the single event a batch of
    /// `replace_range`-derived operations emits once it completes.
    TextChanged { dirty_range: Range<usize> },
    SelectionChanged,
    FoldsChanged,
    DecorationsChanged,
    DiagnosticsChanged,
    SemanticTokensChanged { version: u64 },
    SearchHighlightsChanged,
    InlayHintsChanged,
    DocumentColorsChanged,
    HighlightsChanged,
    GhostTextChanged,
    /// Server-initiated `window/showMessage`, passed through verbatim.
    ServerMessage { message: String },
}

pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    listener: Box<dyn FnMut(&Event)>,
}

/// Synchronous publish/subscribe hub. Not `Send`/`Sync`: it is owned by the
/// single document thread and never crosses threads (§5).
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: SubscriptionId,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { subscribers: Vec::new(), next_id: 0 }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, listener: Box::new(listener) });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|s| s.id != id);
    }

    pub fn emit(&mut self, event: Event) {
        tracing::trace!(?event, "emitting event");
        for sub in &mut self.subscribers {
            (sub.listener)(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn subscribers_receive_emitted_events() {
        let mut bus = EventBus::new();
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        bus.subscribe(move |e| received_clone.borrow_mut().push(e.clone()));
        bus.emit(Event::SelectionChanged);
        bus.emit(Event::TextChanged { dirty_range: 0..5 });
        assert_eq!(received.borrow().len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();
        let id = bus.subscribe(move |_| *count_clone.borrow_mut() += 1);
        bus.emit(Event::FoldsChanged);
        bus.unsubscribe(id);
        bus.emit(Event::FoldsChanged);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn multiple_subscribers_all_fire() {
        let mut bus = EventBus::new();
        let a = Rc::new(RefCell::new(0));
        let b = Rc::new(RefCell::new(0));
        let (a2, b2) = (a.clone(), b.clone());
        bus.subscribe(move |_| *a2.borrow_mut() += 1);
        bus.subscribe(move |_| *b2.borrow_mut() += 1);
        bus.emit(Event::DiagnosticsChanged);
        assert_eq!(*a.borrow(), 1);
        assert_eq!(*b.borrow(), 1);
    }
}
