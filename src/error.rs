// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025-2026 Sendstate Contributors
// https://github.com/sendstate-rs/sendstate

//! Error types for executor operations.

use thiserror::Error;

/// Failures recorded and surfaced by the executor.
///
/// The executor keeps the most recent unrecovered failure as its observable
/// "last error"; values are cheap to clone so they can be replayed to late
/// subscribers of the error stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// An action handler returned a failure (or panicked).
    #[error("Handler error: {0}")]
    Handler(String),

    /// A recovery handler failed while resolving another failure; this
    /// replaces the error it was invoked with.
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// A failure injected from outside through the designated error action.
    #[error("Injected error: {0}")]
    Injected(String),
}

impl ExecError {
    /// Wrap any displayable failure as a handler error.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        ExecError::Handler(err.to_string())
    }

    /// Wrap any displayable failure as an injected error.
    pub fn injected(err: impl std::fmt::Display) -> Self {
        ExecError::Injected(err.to_string())
    }
}
