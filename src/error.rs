//! Error model shared by every policy in the crate.
//!
//! Failures are plain values: an [`Outcome`] is either `Ok(value)` or `Err(Error)`, and each
//! [`Error`] carries an [`ErrorKind`] that drives control flow. The classification methods on
//! `ErrorKind` are the single place deciding what is retried and what trips a circuit breaker;
//! the retry engine and the breaker both consult them instead of keeping their own lists.
//!
//! Taxonomy:
//! - transient: `Timeout`, `Unavailable`, `TooManyRequests`, `CircuitBreakerOpen` (retry-eligible)
//! - business: `Validation`, `Business`, `NotFound`, `Unauthorized`, `Permission`, `Conflict`,
//!   `Cancelled` (never retried, never counted by a breaker)
//! - infrastructure: `Database`, `Unexpected` (not retried by default, counted by a breaker)
//!
//! `CircuitBreakerOpen` is transient but never counts toward a breaker threshold: it is a
//! protection signal, not a new failure of the dependency.
//!
//! Example
//! ```rust
//! use tripwire::{Error, ErrorKind, Outcome};
//!
//! fn load(id: u32) -> Outcome<String> {
//!     if id == 0 {
//!         return Err(Error::validation("user.id", "id must be non-zero"));
//!     }
//!     Ok(format!("user-{id}"))
//! }
//!
//! let err = load(0).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Validation);
//! assert!(err.kind().is_business_error());
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Outcome of a fallible operation. `Outcome<()>` is the valueless form.
pub type Outcome<T = ()> = std::result::Result<T, Error>;

/// Closed classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The "no error" sentinel; never a real failure.
    None,
    /// Input failed validation.
    Validation,
    /// Caller is authenticated but not allowed.
    Permission,
    /// Caller is not authenticated.
    Unauthorized,
    /// Storage layer failure.
    Database,
    /// A business rule rejected the request.
    Business,
    /// The requested entity does not exist.
    NotFound,
    /// Conflicting concurrent modification or duplicate.
    Conflict,
    /// Dependency temporarily unavailable.
    Unavailable,
    /// Operation exceeded its deadline.
    Timeout,
    /// Operation was cancelled by the caller.
    Cancelled,
    /// Anything not otherwise classified.
    Unexpected,
    /// A circuit breaker refused to run the operation.
    CircuitBreakerOpen,
    /// Rate limit hit.
    TooManyRequests,
}

impl ErrorKind {
    /// Errors expected to resolve on their own given time.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Unavailable
                | ErrorKind::TooManyRequests
                | ErrorKind::CircuitBreakerOpen
        )
    }

    /// Expected business-flow failures: never retried, never trip a breaker.
    pub fn is_business_error(self) -> bool {
        matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::Business
                | ErrorKind::NotFound
                | ErrorKind::Unauthorized
                | ErrorKind::Permission
                | ErrorKind::Conflict
                | ErrorKind::Cancelled
        )
    }

    /// Infrastructure failures: not retried by the default policy but counted by breakers.
    pub fn is_infrastructure(self) -> bool {
        matches!(self, ErrorKind::Database | ErrorKind::Unexpected)
    }

    /// Whether a failure of this kind moves a circuit breaker toward opening.
    pub fn should_count_for_circuit_breaker(self) -> bool {
        (self.is_transient() && self != ErrorKind::CircuitBreakerOpen) || self.is_infrastructure()
    }

    /// HTTP-style status code this kind maps to at a service boundary.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Permission => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Business => 422,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::Cancelled => 499,
            ErrorKind::None | ErrorKind::Database | ErrorKind::Unexpected => 500,
            ErrorKind::Unavailable | ErrorKind::CircuitBreakerOpen => 503,
            ErrorKind::Timeout => 504,
        }
    }

    /// Stable snake_case name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Database => "database",
            ErrorKind::Business => "business",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unexpected => "unexpected",
            ErrorKind::CircuitBreakerOpen => "circuit_breaker_open",
            ErrorKind::TooManyRequests => "too_many_requests",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code used for errors produced by a circuit breaker.
pub const CIRCUIT_BREAKER_OPEN_CODE: &str = "circuit_breaker.open";

/// Immutable failure value with an optional causal chain.
///
/// Cloning is cheap: the cause chain is shared through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    code: Cow<'static, str>,
    message: Cow<'static, str>,
    inner: Option<Arc<Error>>,
}

macro_rules! kind_constructors {
    ($($(#[$doc:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(
                code: impl Into<Cow<'static, str>>,
                message: impl Into<Cow<'static, str>>,
            ) -> Self {
                Self::new(ErrorKind::$kind, code, message)
            }
        )*
    };
}

impl Error {
    /// Build an error of any kind.
    pub fn new(
        kind: ErrorKind,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self { kind, code: code.into(), message: message.into(), inner: None }
    }

    kind_constructors! {
        /// Validation failure.
        validation => Validation,
        /// Permission denied.
        permission => Permission,
        /// Missing or invalid credentials.
        unauthorized => Unauthorized,
        /// Storage failure.
        database => Database,
        /// Business rule violation.
        business => Business,
        /// Entity not found.
        not_found => NotFound,
        /// Conflict.
        conflict => Conflict,
        /// Dependency unavailable.
        unavailable => Unavailable,
        /// Deadline exceeded.
        timeout => Timeout,
        /// Cancelled by the caller.
        cancelled => Cancelled,
        /// Unclassified failure.
        unexpected => Unexpected,
        /// Rate limited.
        too_many_requests => TooManyRequests,
    }

    /// Constant form of [`Error::none`].
    pub const NONE: Error = Error::none();

    /// The "no error" sentinel. Building a failure from it is always a defect.
    pub const fn none() -> Self {
        Self {
            kind: ErrorKind::None,
            code: Cow::Borrowed(""),
            message: Cow::Borrowed(""),
            inner: None,
        }
    }

    /// Error returned when a circuit breaker refuses a call.
    ///
    /// The error that opened the circuit becomes the inner cause; without one a generic message is
    /// used.
    pub fn circuit_breaker_open(previous: Option<Error>) -> Self {
        let base = Self::new(
            ErrorKind::CircuitBreakerOpen,
            CIRCUIT_BREAKER_OPEN_CODE,
            "circuit breaker is open; the dependency is failing",
        );
        match previous {
            Some(prev) => {
                let message =
                    format!("circuit breaker is open after {} failure: {}", prev.kind, prev.message);
                Self { message: message.into(), ..base }.with_inner(prev)
            }
            None => base,
        }
    }

    /// Copy of this error with `cause` as its inner error.
    pub fn with_inner(mut self, cause: Error) -> Self {
        self.inner = Some(Arc::new(cause));
        self
    }

    /// Wrap this error with added context; the new error's inner is `self`.
    pub fn wrap(
        self,
        kind: ErrorKind,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(kind, code, message).with_inner(self)
    }

    /// Classification tag.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Machine-readable code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Direct cause, if any.
    pub fn inner(&self) -> Option<&Error> {
        self.inner.as_deref()
    }

    /// Whether this is the "no error" sentinel.
    pub fn is_none(&self) -> bool {
        self.kind == ErrorKind::None
    }

    /// Iterate from this error down to the root cause.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Deepest error in the causal chain (`self` when there is no inner error).
    pub fn root_cause(&self) -> &Error {
        self.chain().last().unwrap_or(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.kind, self.code, self.message)?;
        let mut cause = self.inner();
        while let Some(err) = cause {
            write!(f, "; caused by: {} [{}]: {}", err.kind, err.code, err.message)?;
            cause = err.inner();
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Iterator over an error and its causes, outermost first.
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a Error>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Error;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.inner();
        Some(current)
    }
}
