//! Event buffering and suspension.
//!
//! Change notifications go through [`EventBuffer`]s so that a batch of
//! modifier additions and removals produces one merged notification per
//! sender instead of one per modifier:
//!
//! - [`BufferableEvent`]: something that can be invoked with one payload or
//!   with every payload buffered for its sender.
//! - [`EventBuffer`]: holds payloads per sender while buffering is active.
//! - [`SuspendableEventsComposite`]: fans suspend/resume out to its children;
//!   [`SuspensionGuard`] resumes on drop.
//! - [`BufferingEventViewProvider`]: one subscriber set exposed as an
//!   immediate view and a buffered view.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`) and lives on the
//! calculation thread.

mod buffer;
mod suspendable;
mod view;

pub use buffer::{BufferableEvent, EventBuffer};
pub use suspendable::{SuspendableEvents, SuspendableEventsComposite, SuspensionGuard};
pub use view::{BufferingEventViewProvider, EventView, ListenerId};

use serde::{Deserialize, Serialize};

/// How a subscriber wants change notifications delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Delivery {
    /// As soon as the change happens, even in the middle of a batch.
    Immediate,
    /// Merged, once the surrounding batch has completed.
    #[default]
    Buffered,
}
