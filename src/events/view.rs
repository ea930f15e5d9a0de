use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use super::buffer::{BufferableEvent, EventBuffer};
use super::Delivery;

/// Identifies a handler registered on an [`EventView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<P> = Rc<dyn Fn(&[P])>;

/// A list of handlers. Every handler receives the payloads of one
/// invocation as a slice: a single element when raised immediately, the
/// merged list when flushed from a buffer.
pub struct EventView<P> {
    handlers: RefCell<Vec<(ListenerId, Handler<P>)>>,
    next_id: Cell<u64>,
}

impl<P> EventView<P> {
    fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&[P]) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not subscribed here.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(listener, _)| *listener != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    fn dispatch(&self, payloads: &[P]) {
        let handlers: Vec<Handler<P>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(payloads);
        }
    }
}

impl<P> BufferableEvent<P> for EventView<P> {
    fn invoke(&self, payload: P) {
        self.dispatch(std::slice::from_ref(&payload));
    }

    fn invoke_merged(&self, payloads: Vec<P>) {
        self.dispatch(&payloads);
    }
}

/// One event source exposed through an immediate and a buffered view.
///
/// [`BufferingEventViewProvider::raise`] delivers to the immediate view at
/// once and routes the buffered view through the shared [`EventBuffer`], so
/// buffered subscribers see one merged invocation per suspension.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use modcalc::events::{BufferingEventViewProvider, Delivery, EventBuffer};
///
/// let buffer = Rc::new(EventBuffer::new());
/// let provider = BufferingEventViewProvider::new("life", buffer.clone());
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = seen.clone();
/// provider.view(Delivery::Buffered).subscribe(move |changes: &[u32]| {
///     sink.borrow_mut().push(changes.to_vec());
/// });
///
/// buffer.start_buffering();
/// provider.raise(1);
/// provider.raise(2);
/// buffer.stop_buffering();
/// buffer.flush();
/// assert_eq!(*seen.borrow(), vec![vec![1, 2]]);
/// ```
pub struct BufferingEventViewProvider<K, P> {
    sender: K,
    buffer: Rc<EventBuffer<K, P>>,
    immediate: Rc<EventView<P>>,
    buffered: Rc<EventView<P>>,
}

impl<K, P> BufferingEventViewProvider<K, P>
where
    K: Eq + Hash + Clone,
    P: Clone + 'static,
{
    pub fn new(sender: K, buffer: Rc<EventBuffer<K, P>>) -> Self {
        Self {
            sender,
            buffer,
            immediate: Rc::new(EventView::new()),
            buffered: Rc::new(EventView::new()),
        }
    }

    /// The view that delivers without buffering.
    pub fn default_view(&self) -> &EventView<P> {
        &self.immediate
    }

    /// The view that delivers through the shared buffer.
    pub fn buffering_view(&self) -> &EventView<P> {
        &self.buffered
    }

    pub fn view(&self, delivery: Delivery) -> &EventView<P> {
        match delivery {
            Delivery::Immediate => self.default_view(),
            Delivery::Buffered => self.buffering_view(),
        }
    }

    /// Subscribers of both views.
    pub fn subscriber_count(&self) -> usize {
        self.immediate.subscriber_count() + self.buffered.subscriber_count()
    }

    pub fn raise(&self, payload: P) {
        if self.buffered.subscriber_count() > 0 {
            let event: Rc<dyn BufferableEvent<P>> = self.buffered.clone();
            self.buffer.buffer(self.sender.clone(), event, payload.clone());
        }
        if self.immediate.subscriber_count() > 0 {
            self.immediate.invoke(payload);
        }
    }
}
