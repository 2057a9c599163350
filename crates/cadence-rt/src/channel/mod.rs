// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channels.
//!
//! Callback-driven data structures: a taker hands over a callback and gets
//! it invoked exactly once, either with a message or with END. Callbacks are
//! always invoked after the channel's lock is released, so a callback may
//! touch the same channel again.
//!
//! - `buffered` — non-blocking put, eviction delegated to a [`Buffer`](crate::buffer::Buffer)
//! - `sync`     — rendezvous put/take
//! - `event`    — adapter over an external push source
//! - `request`  — request/response correlation + source adapter

mod buffered;
mod event;
mod request;
mod sync;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

pub use buffered::BufferedChannel;
pub use event::{Emitter, EventChannel};
pub use request::{RequestEmitter, RequestId, RequestResponseChannel, RequestResponseSource};
pub use sync::SyncChannel;

pub use crate::value::is_end_of_channel;

use crate::value::Value;

/// Callback receiving one message (or END).
pub type Taker = Box<dyn FnOnce(Value) + Send>;

/// Unsubscribe function returned by an external source's subscribe.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Any channel, as carried inside a [`Value`].
#[derive(Clone)]
pub enum Chan {
    Buffered(BufferedChannel),
    Sync(SyncChannel),
    Event(EventChannel),
    RequestResponse(RequestResponseChannel),
    Source(RequestResponseSource),
}

impl Chan {
    pub fn id(&self) -> Uuid {
        match self {
            Chan::Buffered(c) => c.id(),
            Chan::Sync(c) => c.id(),
            Chan::Event(c) => c.id(),
            Chan::RequestResponse(c) => c.id(),
            Chan::Source(c) => c.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Chan::Buffered(_) => "buffered",
            Chan::Sync(_) => "sync",
            Chan::Event(_) => "event",
            Chan::RequestResponse(_) => "request-response",
            Chan::Source(_) => "request-response-source",
        }
    }

    pub fn close(&self) {
        match self {
            Chan::Buffered(c) => c.close(),
            Chan::Sync(c) => c.close(),
            Chan::Event(c) => c.close(),
            Chan::RequestResponse(c) => c.close(),
            Chan::Source(c) => c.close(),
        }
    }
}

macro_rules! chan_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Chan {
            fn from(c: $ty) -> Self {
                Chan::$variant(c)
            }
        })*
    };
}

chan_from! {
    BufferedChannel => Buffered,
    SyncChannel => Sync,
    EventChannel => Event,
    RequestResponseChannel => RequestResponse,
    RequestResponseSource => Source,
}

/// Subscription bookkeeping shared by the source adapters.
///
/// The unsubscribe function runs at most once, whether the source emits END
/// (possibly before subscribe has even returned) or the channel is closed.
#[derive(Default)]
pub(crate) struct Subscription {
    unsubscribe: Mutex<Option<Unsubscribe>>,
    closed: AtomicBool,
}

impl Subscription {
    /// Store the unsubscribe function. Runs it right away if END already arrived.
    pub(crate) fn attach(&self, unsubscribe: Unsubscribe) {
        *self.unsubscribe.lock() = Some(unsubscribe);
        if self.closed.load(Ordering::Acquire) {
            self.release();
        }
    }

    /// Mark closed and unsubscribe. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.release();
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn release(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Chan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chan({} {})", self.kind(), self.id())
    }
}
