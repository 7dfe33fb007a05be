// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Domain failure raised by thread functions.

use std::backtrace::Backtrace;

use thiserror::Error;

/// A failure with a message and the stack trace of where it was created.
///
/// Raised with [`Exception::raise`]. A managed thread whose function raises
/// one reports the message and trace, then aborts the process.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Exception {
    message: String,
    stack_trace: String,
}

impl Exception {
    /// Create an exception, capturing the current stack trace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: Backtrace::force_capture().to_string(),
        }
    }

    pub fn what(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> &str {
        &self.stack_trace
    }

    /// Unwind with this exception as payload.
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}
