// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types.
//!
//! `Error` is what a process sees at a yield point: it is cloned into every
//! joiner of a failed task, so it carries owned strings only.

use std::any::Any;

/// Errors delivered into a process (and out of a failed task).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unrecognized effect kind `{0}`")]
    UnknownEffect(String),

    #[error("malformed `{kind}` effect: {reason}")]
    MalformedEffect { kind: String, reason: String },

    /// Injected at the pending yield point of a cancelled task.
    #[error("task was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("panic: {0}")]
    Panicked(String),

    /// A value did not have the shape a typed reader expected.
    #[error("cannot decode value: {0}")]
    Deserialize(String),
}

impl Error {
    /// Ad-hoc failure with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Failed(message.into())
    }

    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Error::MalformedEffect {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Structural channel errors, raised at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("subscribe must return an unsubscribe function")]
    MissingUnsubscribe,
}

/// Executor-level failures (not visible to processes).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(
        "no task can make progress: {pending} task(s) suspended with no ready work, \
         pending timers, or remote handles"
    )]
    Stalled { pending: usize },
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_names_kind() {
        let e = Error::malformed("delay", "expected a duration");
        assert_eq!(e.to_string(), "malformed `delay` effect: expected a duration");
    }

    #[test]
    fn panic_payloads() {
        let r = std::panic::catch_unwind(|| panic!("boom"));
        assert_eq!(panic_message(r.unwrap_err()), "boom");
        let r = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1));
        assert_eq!(panic_message(r.unwrap_err()), "formatted 1");
    }
}
