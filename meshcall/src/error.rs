// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Errors raised while building, dispatching and observing calls.

use faststr::FastStr;

/// An opaque error produced by a collaborator, such as the transport behind an invoker.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type of meshcall.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required argument is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(FastStr),
    /// The call type is not one of the recognized values.
    #[error("unsupported call type: {0}")]
    UnsupportedCallType(FastStr),
    /// A call was dispatched before the client was initialized.
    #[error("client is not initialized")]
    NotInitialized,
    /// The client was already bound to an invoker.
    #[error("client is already initialized")]
    AlreadyInitialized,
    /// The caller's context was cancelled.
    #[error("call canceled")]
    Canceled,
    /// The caller's deadline or the call timeout elapsed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,
    /// The invoker failed; the source is passed through unchanged.
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),
    /// The invoker succeeded but its reply does not carry the expected value.
    #[error("invalid response: {0}")]
    InvalidResponse(FastStr),
    /// An event listener returned an error while an event was published.
    #[error("listener {listener} failed: {source}")]
    ListenerFailure {
        /// Name of the failing listener.
        listener: FastStr,
        /// The error returned by the listener.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<FastStr>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wraps a collaborator error as [`Error::Transport`].
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Returns true for errors caused by the caller's context rather than by the call itself.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}
