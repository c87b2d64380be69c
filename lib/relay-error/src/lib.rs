//! Shared error primitives.
//!
//! Typed errors live next to the code that produces them (and are built with `snafu`). This crate covers the other
//! half: a catch-all error type for propagating failures across crate boundaries where callers only need to log or
//! bubble them up.
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error.
///
/// Any type implementing `std::error::Error + Send + Sync + 'static` converts into it via `?`.
pub type GenericError = anyhow::Error;

#[doc(hidden)]
pub use anyhow::anyhow as __generic_error;

/// Builds a [`GenericError`] from a message, a format string and arguments, or an existing error value.
///
/// When given an existing error, its source chain is kept intact.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::__generic_error!($msg) };
    ($err:expr $(,)?) => { $crate::__generic_error!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::__generic_error!($fmt, $($arg)*) };
}

mod sealed {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension methods for attaching context to a failed `Result`.
///
/// Named distinctly from `anyhow::Context` so it can be imported alongside `snafu::ResultExt` without the two sets of
/// methods colliding.
pub trait ErrorContext<T, E>: sealed::Sealed {
    /// Wraps the error with the given context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error with context produced by `f`, which is only called on failure.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}
