//! The runtime's closed error domain (spec §7).
//!
//! Every fallible operation in the workspace returns [`Result<T>`], whose
//! error type carries a [`Kind`] from the closed set named by the
//! specification, an operator-facing message, and an optional upstream
//! cause. Leaf modules are free to define their own local error types
//! for purely local conditions (an unparsable endpoint string, a
//! malformed frame) and convert them into [`Error`] at the module boundary
//! — the same two-tier shape used throughout the crate: a precise local
//! error internally, a stable domain error at the public surface.

use std::borrow::Cow;
use std::fmt;
use std::io;

/// The closed set of error kinds from spec §7.
///
/// This enum is exhaustive by design: a new failure mode must be mapped
/// onto one of these before it can cross a public API boundary. Adding a
/// variant is a breaking change to every `match` the runtime contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    BadArg,
    BadProtocol,
    BadState,
    NoExist,
    NoAccess,
    NoServers,
    NotTrusted,
    Aborted,
    Canceled,
    Timeout,
    ResolutionDepthExceeded,
    ErrorSecurity,
    InternalError,
    UnknownSuffix,
    UnknownMethod,
}

impl Kind {
    /// Whether a caller may reasonably retry an operation that failed with
    /// this kind. Used by the resolver (§7 "NoServers with last underlying
    /// error as sub-detail") and by client call sites in general.
    pub fn retryable(self) -> bool {
        matches!(self, Kind::Timeout | Kind::Aborted | Kind::NoServers)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::BadArg => "bad_arg",
            Kind::BadProtocol => "bad_protocol",
            Kind::BadState => "bad_state",
            Kind::NoExist => "no_exist",
            Kind::NoAccess => "no_access",
            Kind::NoServers => "no_servers",
            Kind::NotTrusted => "not_trusted",
            Kind::Aborted => "aborted",
            Kind::Canceled => "canceled",
            Kind::Timeout => "timeout",
            Kind::ResolutionDepthExceeded => "resolution_depth_exceeded",
            Kind::ErrorSecurity => "error_security",
            Kind::InternalError => "internal_error",
            Kind::UnknownSuffix => "unknown_suffix",
            Kind::UnknownMethod => "unknown_method",
        };
        f.write_str(s)
    }
}

/// The runtime's error type: a [`Kind`], an operator-facing message, and
/// an optional source chain.
pub struct Error {
    kind: Kind,
    message: Cow<'static, str>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: Kind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Shorthand constructors, one per spec §7 kind. These read better at
    /// call sites than `Error::new(Kind::BadProtocol, ...)` everywhere.
    pub fn bad_arg(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::BadArg, message)
    }
    pub fn bad_protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::BadProtocol, message)
    }
    pub fn bad_state(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::BadState, message)
    }
    pub fn no_exist(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::NoExist, message)
    }
    pub fn no_access(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::NoAccess, message)
    }
    pub fn no_servers(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::NoServers, message)
    }
    pub fn not_trusted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::NotTrusted, message)
    }
    pub fn aborted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::Aborted, message)
    }
    pub fn canceled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::Canceled, message)
    }
    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::Timeout, message)
    }
    pub fn resolution_depth_exceeded(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::ResolutionDepthExceeded, message)
    }
    pub fn security(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::ErrorSecurity, message)
    }
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::InternalError, message)
    }
    pub fn unknown_suffix(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::UnknownSuffix, message)
    }
    pub fn unknown_method(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Kind::UnknownMethod, message)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as _)
    }
}

impl From<io::Error> for Error {
    /// Maps OS-level failures onto the closed kind set. Timed-out and
    /// connection-reset conditions surface as `Timeout`/`Aborted` per
    /// spec §7 "user visibility"; anything else becomes `InternalError`
    /// with the original error chained as the cause.
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => Kind::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Kind::Aborted,
            io::ErrorKind::InvalidData => Kind::BadProtocol,
            _ => Kind::InternalError,
        };
        Error::new(kind, err.to_string()).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::timeout("deadline elapsed").with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
