// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Event channel: a buffered channel fed by an external push source.

use std::sync::Arc;

use uuid::Uuid;

use super::{BufferedChannel, Subscription, Unsubscribe};
use crate::buffer::Buffer;
use crate::error::ChannelError;
use crate::value::Value;

/// Handle given to the source. Emitting END closes the channel.
#[derive(Clone)]
pub struct Emitter {
    chan: BufferedChannel,
    subscription: Arc<Subscription>,
}

impl Emitter {
    pub fn emit(&self, value: impl Into<Value>) {
        let value = value.into();
        if value.is_end() {
            close(&self.chan, &self.subscription);
        } else {
            self.chan.put(value);
        }
    }
}

#[derive(Clone)]
pub struct EventChannel {
    chan: BufferedChannel,
    subscription: Arc<Subscription>,
}

impl EventChannel {
    /// Subscribe to `source`. The source must hand back an unsubscribe
    /// function, otherwise the channel is rejected.
    pub fn new<F>(source: F, buffer: Box<dyn Buffer>) -> Result<Self, ChannelError>
    where
        F: FnOnce(Emitter) -> Option<Unsubscribe>,
    {
        let chan = BufferedChannel::with_buffer(buffer);
        let subscription = Arc::new(Subscription::default());
        let emitter = Emitter {
            chan: chan.clone(),
            subscription: subscription.clone(),
        };
        let unsubscribe = source(emitter).ok_or(ChannelError::MissingUnsubscribe)?;
        subscription.attach(unsubscribe);
        Ok(Self { chan, subscription })
    }

    pub fn id(&self) -> Uuid {
        self.chan.id()
    }

    /// Put directly, as if the source had emitted `value`.
    pub fn put(&self, value: impl Into<Value>) {
        self.chan.put(value.into());
    }

    pub fn take(&self, cb: impl FnOnce(Value) + Send + 'static) {
        self.chan.take(cb);
    }

    pub fn flush(&self, cb: impl FnOnce(Value)) {
        self.chan.flush(cb);
    }

    /// Unsubscribe from the source and close the underlying channel.
    pub fn close(&self) {
        close(&self.chan, &self.subscription);
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chan.is_empty()
    }
}

fn close(chan: &BufferedChannel, subscription: &Subscription) {
    if subscription.close() {
        chan.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::buffer;

    #[test]
    fn emitted_values_are_buffered() {
        let slot: Arc<Mutex<Option<Emitter>>> = Default::default();
        let s = slot.clone();
        let ch = EventChannel::new(
            move |emit| {
                *s.lock() = Some(emit);
                Some(Box::new(|| {}))
            },
            buffer::unbounded(),
        )
        .unwrap();

        let emit = slot.lock().clone().unwrap();
        emit.emit(1);
        emit.emit(2);
        let got = Arc::new(Mutex::new(Value::Unit));
        let g = got.clone();
        ch.flush(move |v| *g.lock() = v);
        assert_eq!(*got.lock(), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn missing_unsubscribe_is_rejected() {
        let res = EventChannel::new(|_| None, buffer::none());
        assert!(matches!(res, Err(ChannelError::MissingUnsubscribe)));
    }

    #[test]
    fn end_closes_and_unsubscribes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let slot: Arc<Mutex<Option<Emitter>>> = Default::default();
        let s = slot.clone();
        let ch = EventChannel::new(
            move |emit| {
                *s.lock() = Some(emit);
                Some(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
            },
            buffer::sliding(4),
        )
        .unwrap();

        let emit = slot.lock().clone().unwrap();
        emit.emit(Value::End);
        emit.emit(Value::End);
        ch.close();
        assert!(ch.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_during_subscribe_still_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let ch = EventChannel::new(
            move |emit| {
                emit.emit(Value::End);
                Some(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
            },
            buffer::sliding(4),
        )
        .unwrap();
        assert!(ch.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let got = Arc::new(Mutex::new(Value::Unit));
        let g = got.clone();
        ch.take(move |v| *g.lock() = v);
        assert!(got.lock().is_end());
    }
}
