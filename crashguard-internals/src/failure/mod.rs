//! The failure record and its chain.
//!
//! A [`Failure`] describes one failure occurrence: a message, a
//! [`FailureKind`], the [`Origin`] it was raised at, an optional captured
//! trace, and an optional link to the failure that happened before it.
//! Following the `previous` links from any failure yields its *chain*,
//! newest first.
//!
//! Failures are reference counted. Cloning a failure is cheap and the clone
//! shares the identity of the original, which [`Failure::ptr_eq`] can
//! observe. Mutating methods use copy-on-write, so a failure that is shared
//! is never changed behind the back of its other owners.
//!
//! Chains can only be built from already existing nodes, which means they
//! are acyclic by construction. The walkers in [`chain`] still track the
//! nodes they have visited and stop on a repeat.

pub mod chain;

use alloc::{borrow::Cow, vec::Vec};
use core::{fmt, panic::Location};

use triomphe::Arc;
use unsize::CoerceUnsize;

pub use self::chain::Chain;
use crate::severity::Severity;

/// The kind of a [`Failure`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// An ordinary runtime diagnostic.
    Error {
        /// The severity it was raised with.
        severity: Severity,
    },
    /// A fatal condition detected when the process shut down.
    Fatal {
        /// The severity of the last raw error.
        severity: Severity,
    },
    /// A fatal condition classified as memory exhaustion.
    OutOfMemory {
        /// The severity of the last raw error.
        severity: Severity,
    },
    /// A failure that happened while another failure was being handled.
    Chained,
    /// A panic.
    Panic,
    /// Any other failure, named by its source type.
    Generic {
        /// Display name, usually the name of the converted error type.
        name: Cow<'static, str>,
    },
}

impl FailureKind {
    /// Returns `true` for [`Fatal`](Self::Fatal) and
    /// [`OutOfMemory`](Self::OutOfMemory).
    pub fn is_fatal_kind(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::OutOfMemory { .. })
    }

    /// Returns the severity carried by this kind, if any.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Error { severity } | Self::Fatal { severity } | Self::OutOfMemory { severity } => {
                Some(*severity)
            }
            Self::Chained | Self::Panic | Self::Generic { .. } => None,
        }
    }

    /// Returns the display label of this kind.
    pub fn label(&self) -> Cow<'static, str> {
        match self {
            Self::Error { severity } | Self::Fatal { severity } => severity.name(),
            Self::OutOfMemory { .. } => Cow::Borrowed("Out of memory"),
            Self::Chained => Cow::Borrowed("Chained failure"),
            Self::Panic => Cow::Borrowed("Panic"),
            Self::Generic { name } => name.clone(),
        }
    }
}

/// The source location a failure was raised at.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    file: Cow<'static, str>,
    line: u32,
}

impl Origin {
    /// Creates an origin from a file and a line.
    pub fn new(file: impl Into<Cow<'static, str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Returns the origin of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }

    /// The file name.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The line number.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl From<&'static Location<'static>> for Origin {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl From<(&'static str, u32)> for Origin {
    fn from((file, line): (&'static str, u32)) -> Self {
        Self::new(file, line)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Captured trace data that can be attached to a failure.
///
/// Blanket implemented for every thread safe type that can be displayed.
pub trait TraceData: fmt::Display + fmt::Debug + Send + Sync + 'static {}

impl<T: fmt::Display + fmt::Debug + Send + Sync + 'static> TraceData for T {}

#[derive(Clone)]
struct FailureData {
    kind: FailureKind,
    message: Cow<'static, str>,
    origin: Origin,
    previous: Option<Failure>,
    suppressed: bool,
    trace: Option<Arc<dyn TraceData>>,
}

/// A single failure occurrence, linked to the failures that preceded it.
///
/// # Examples
///
/// ```
/// use crashguard_internals::{failure::Failure, severity::Severity};
///
/// let first = Failure::msg("could not open the cache");
/// let second = Failure::error(Severity::Warning, "falling back to defaults", ("app.rs", 7).into())
///     .with_previous(Some(first.clone()));
///
/// assert_eq!(second.chain().count(), 2);
/// assert!(second.previous().is_some_and(|p| p.ptr_eq(&first)));
/// ```
#[derive(Clone)]
pub struct Failure {
    inner: Arc<FailureData>,
}

impl Failure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<Cow<'static, str>>, origin: Origin) -> Self {
        Self {
            inner: Arc::new(FailureData {
                kind,
                message: message.into(),
                origin,
                previous: None,
                suppressed: false,
                trace: None,
            }),
        }
    }

    /// Creates an ordinary runtime error failure.
    pub fn error(severity: Severity, message: impl Into<Cow<'static, str>>, origin: Origin) -> Self {
        Self::new(FailureKind::Error { severity }, message, origin)
    }

    /// Creates a fatal failure.
    pub fn fatal(severity: Severity, message: impl Into<Cow<'static, str>>, origin: Origin) -> Self {
        Self::new(FailureKind::Fatal { severity }, message, origin)
    }

    /// Creates an out-of-memory failure.
    pub fn out_of_memory(
        severity: Severity,
        message: impl Into<Cow<'static, str>>,
        origin: Origin,
    ) -> Self {
        Self::new(FailureKind::OutOfMemory { severity }, message, origin)
    }

    /// Creates a chained failure wrapping `previous`.
    #[track_caller]
    pub fn chained(message: impl Into<Cow<'static, str>>, previous: Failure) -> Self {
        Self::new(FailureKind::Chained, message, Origin::caller()).with_previous(Some(previous))
    }

    /// Creates a panic failure.
    pub fn panic(message: impl Into<Cow<'static, str>>, origin: Origin) -> Self {
        Self::new(FailureKind::Panic, message, origin)
    }

    /// Creates a generic failure at the caller's location.
    #[track_caller]
    pub fn msg(message: impl Into<Cow<'static, str>>) -> Self {
        Self::generic("Failure", message, Origin::caller())
    }

    /// Creates a generic failure with a display name.
    pub fn generic(
        name: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
        origin: Origin,
    ) -> Self {
        Self::new(FailureKind::Generic { name: name.into() }, message, origin)
    }

    /// Replaces the previous link.
    #[must_use]
    pub fn with_previous(mut self, previous: Option<Failure>) -> Self {
        Arc::make_mut(&mut self.inner).previous = previous;
        self
    }

    /// Sets the suppression flag.
    #[must_use]
    pub fn with_suppressed(mut self, suppressed: bool) -> Self {
        self.set_suppressed(suppressed);
        self
    }

    /// Attaches trace data, replacing any earlier trace.
    #[must_use]
    pub fn with_trace<T: TraceData>(mut self, trace: T) -> Self {
        let trace = Arc::new(trace).unsize(unsize::Coercion!(to dyn TraceData));
        Arc::make_mut(&mut self.inner).trace = Some(trace);
        self
    }

    /// Sets the suppression flag in place.
    pub fn set_suppressed(&mut self, suppressed: bool) {
        if self.inner.suppressed != suppressed {
            Arc::make_mut(&mut self.inner).suppressed = suppressed;
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// The failure kind.
    pub fn kind(&self) -> &FailureKind {
        &self.inner.kind
    }

    /// Where the failure was raised.
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// The failure that happened before this one, if any.
    pub fn previous(&self) -> Option<&Failure> {
        self.inner.previous.as_ref()
    }

    /// Whether this failure was suppressed by the reporting mask or a
    /// listener.
    pub fn is_suppressed(&self) -> bool {
        self.inner.suppressed
    }

    /// The attached trace, if any.
    pub fn trace(&self) -> Option<&dyn TraceData> {
        self.inner.trace.as_deref()
    }

    /// The severity carried by the kind, if any.
    pub fn severity(&self) -> Option<Severity> {
        self.inner.kind.severity()
    }

    /// Shorthand for [`FailureKind::is_fatal_kind`].
    pub fn is_fatal_kind(&self) -> bool {
        self.inner.kind.is_fatal_kind()
    }

    /// Shorthand for [`FailureKind::label`].
    pub fn label(&self) -> Cow<'static, str> {
        self.inner.kind.label()
    }

    /// Returns `true` if both failures are the same node.
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Iterates over this failure and its predecessors, newest first.
    pub fn chain(&self) -> Chain<'_> {
        Chain::new(self)
    }

    pub(crate) fn node_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast()
    }

    pub(crate) fn relinked(&self, previous: Option<Failure>) -> Self {
        let mut data = FailureData::clone(&self.inner);
        data.previous = previous;
        Self {
            inner: Arc::new(data),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("origin", &self.inner.origin)
            .field("suppressed", &self.inner.suppressed)
            .field("previous", &self.inner.previous)
            .finish_non_exhaustive()
    }
}

impl<E: core::error::Error> From<E> for Failure {
    #[track_caller]
    fn from(error: E) -> Self {
        let origin = Origin::caller();
        let mut messages = Vec::new();
        let mut source = error.source();
        while let Some(err) = source {
            messages.push(alloc::format!("{err}"));
            source = err.source();
        }

        let mut previous = None;
        for message in messages.into_iter().rev() {
            previous = Some(
                Failure::generic("Caused by", message, origin.clone()).with_previous(previous),
            );
        }

        Failure::generic(short_type_name::<E>(), alloc::format!("{error}"), origin)
            .with_previous(previous)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = core::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn test_failure_send_sync() {
        static_assertions::assert_impl_all!(Failure: Send, Sync, Clone);
        static_assertions::assert_impl_all!(Origin: Send, Sync);
        static_assertions::assert_not_impl_any!(Failure: core::error::Error);
    }

    #[derive(Debug)]
    struct Outer(Inner);
    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("outer")
        }
    }
    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("inner")
        }
    }
    impl core::error::Error for Outer {
        fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
            Some(&self.0)
        }
    }
    impl core::error::Error for Inner {}

    #[test]
    fn from_error_walks_sources() {
        let failure = Failure::from(Outer(Inner));
        assert_eq!(failure.label(), "Outer");
        let messages: alloc::vec::Vec<_> = failure.chain().map(|f| f.to_string()).collect();
        assert_eq!(messages, ["outer", "inner"]);
    }

    #[test]
    fn suppression_is_copy_on_write() {
        let original = Failure::error(Severity::Notice, "n", Origin::new("a", 1));
        let mut shared = original.clone();
        shared.set_suppressed(true);
        assert!(!original.is_suppressed());
        assert!(shared.is_suppressed());
        assert!(!shared.ptr_eq(&original));
    }

    #[test]
    fn labels() {
        let origin = Origin::new("f", 1);
        assert_eq!(Failure::fatal(Severity::Error, "x", origin.clone()).label(), "Error");
        assert_eq!(Failure::out_of_memory(Severity::Error, "x", origin.clone()).label(), "Out of memory");
        assert!(Failure::out_of_memory(Severity::Error, "x", origin).is_fatal_kind());
        assert_eq!(Failure::msg("x").label(), "Failure");
    }
}
