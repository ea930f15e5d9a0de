use std::cell::RefCell;
use std::rc::Rc;

/// A component whose notifications can be held back and released.
pub trait SuspendableEvents {
    fn suspend_events(&self);

    fn resume_events(&self);
}

/// Fans suspend and resume out to its children in registration order.
#[derive(Default)]
pub struct SuspendableEventsComposite {
    children: RefCell<Vec<Rc<dyn SuspendableEvents>>>,
}

impl SuspendableEventsComposite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, child: Rc<dyn SuspendableEvents>) {
        self.children.borrow_mut().push(child);
    }

    /// Detach `child`. Returns `false` if it was not registered.
    pub fn remove(&self, child: &Rc<dyn SuspendableEvents>) -> bool {
        let mut children = self.children.borrow_mut();
        let target = Rc::as_ptr(child) as *const ();
        match children
            .iter()
            .position(|c| Rc::as_ptr(c) as *const () == target)
        {
            Some(index) => {
                children.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.borrow().is_empty()
    }

    /// Suspend every child until the returned guard is dropped.
    pub fn suspend(&self) -> SuspensionGuard<'_> {
        SuspensionGuard::new(self)
    }

    fn snapshot(&self) -> Vec<Rc<dyn SuspendableEvents>> {
        self.children.borrow().clone()
    }
}

impl SuspendableEvents for SuspendableEventsComposite {
    fn suspend_events(&self) {
        for child in self.snapshot() {
            child.suspend_events();
        }
    }

    fn resume_events(&self) {
        for child in self.snapshot() {
            child.resume_events();
        }
    }
}

/// Resumes the suspended events when dropped, on every exit path.
///
/// ```rust
/// use std::rc::Rc;
/// use modcalc::events::{EventBuffer, SuspendableEventsComposite};
///
/// let buffer: Rc<EventBuffer<u32, u32>> = Rc::new(EventBuffer::new());
/// let composite = SuspendableEventsComposite::new();
/// composite.add(buffer.clone());
/// {
///     let _guard = composite.suspend();
///     assert!(buffer.is_buffering());
/// }
/// assert!(!buffer.is_buffering());
/// ```
#[must_use = "events resume as soon as the guard is dropped"]
pub struct SuspensionGuard<'a> {
    events: &'a dyn SuspendableEvents,
}

impl<'a> SuspensionGuard<'a> {
    pub fn new(events: &'a dyn SuspendableEvents) -> Self {
        events.suspend_events();
        Self { events }
    }
}

impl Drop for SuspensionGuard<'_> {
    fn drop(&mut self) {
        self.events.resume_events();
    }
}
