use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::rc::Rc;

use super::suspendable::SuspendableEvents;

/// An event that can be raised with a single payload or with the merged
/// payloads buffered for its sender.
pub trait BufferableEvent<P> {
    fn invoke(&self, payload: P);

    fn invoke_merged(&self, payloads: Vec<P>);
}

struct PendingEvent<P> {
    event: Rc<dyn BufferableEvent<P>>,
    payloads: Vec<P>,
}

struct BufferState<K, P> {
    buffering: bool,
    /// Senders in the order their first payload was buffered.
    order: VecDeque<K>,
    pending: HashMap<K, PendingEvent<P>>,
}

/// Per-sender payload buffer.
///
/// While buffering, [`EventBuffer::buffer`] appends payloads to the sender's
/// pending list instead of invoking the event. [`EventBuffer::flush`] then
/// invokes every pending event once with its merged payloads.
///
/// Stopping buffering does not flush; use [`SuspendableEvents::resume_events`]
/// to stop and flush in one step.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use modcalc::events::{BufferableEvent, EventBuffer};
///
/// #[derive(Default)]
/// struct Recorder(RefCell<Vec<Vec<u32>>>);
///
/// impl BufferableEvent<u32> for Recorder {
///     fn invoke(&self, payload: u32) {
///         self.0.borrow_mut().push(vec![payload]);
///     }
///     fn invoke_merged(&self, payloads: Vec<u32>) {
///         self.0.borrow_mut().push(payloads);
///     }
/// }
///
/// let recorder = Rc::new(Recorder::default());
/// let buffer = EventBuffer::new();
/// buffer.start_buffering();
/// buffer.buffer("life", recorder.clone(), 1);
/// buffer.buffer("life", recorder.clone(), 2);
/// assert!(recorder.0.borrow().is_empty());
///
/// buffer.flush();
/// assert_eq!(*recorder.0.borrow(), vec![vec![1, 2]]);
/// ```
pub struct EventBuffer<K, P> {
    state: RefCell<BufferState<K, P>>,
}

impl<K, P> EventBuffer<K, P>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            state: RefCell::new(BufferState {
                buffering: false,
                order: VecDeque::new(),
                pending: HashMap::new(),
            }),
        }
    }

    /// Invoke `event` now, or hold `payload` for `sender` while buffering.
    ///
    /// The first event buffered for a sender is the one invoked on flush.
    pub fn buffer(&self, sender: K, event: Rc<dyn BufferableEvent<P>>, payload: P) {
        let mut state = self.state.borrow_mut();
        if !state.buffering {
            drop(state);
            event.invoke(payload);
            return;
        }
        if let Some(pending) = state.pending.get_mut(&sender) {
            pending.payloads.push(payload);
            return;
        }
        state.order.push_back(sender.clone());
        state.pending.insert(
            sender,
            PendingEvent {
                event,
                payloads: vec![payload],
            },
        );
    }

    pub fn start_buffering(&self) {
        self.state.borrow_mut().buffering = true;
    }

    pub fn stop_buffering(&self) {
        self.state.borrow_mut().buffering = false;
    }

    pub fn is_buffering(&self) -> bool {
        self.state.borrow().buffering
    }

    /// Number of senders with buffered payloads.
    pub fn pending_senders(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Invoke every pending event once with its merged payloads.
    ///
    /// Events buffered by the invoked handlers are delivered before this
    /// returns.
    pub fn flush(&self) {
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                match state.order.pop_front() {
                    Some(sender) => state.pending.remove(&sender),
                    None => break,
                }
            };
            if let Some(pending) = next {
                pending.event.invoke_merged(pending.payloads);
            }
        }
    }
}

impl<K, P> Default for EventBuffer<K, P>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> SuspendableEvents for EventBuffer<K, P>
where
    K: Eq + Hash + Clone,
{
    fn suspend_events(&self) {
        self.start_buffering();
    }

    fn resume_events(&self) {
        self.stop_buffering();
        self.flush();
    }
}
