//! Error types and result definitions for transfer operations.
//!
//! Provides a classified error system with aggregation and captured
//! diagnostic metadata. The [`FlowError`] type supports single errors,
//! errors with additional detail, and multiple aggregated errors collected
//! from concurrent workers.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for transfer operations using [`FlowError`] as the
/// error type.
pub type FlowResult<T> = Result<T, FlowError>;

/// Detailed payload stored for single [`FlowError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl ErrorPayload {
    fn new(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
        location: &'static Location<'static>,
        backtrace: Arc<Backtrace>,
    ) -> Self {
        Self {
            kind,
            description,
            detail,
            source,
            location,
            backtrace,
        }
    }
}

/// Main error type for transfer operations.
///
/// [`FlowError`] can represent a single classified error or multiple
/// aggregated errors. The latter is mainly useful to capture several worker
/// failures at pool shutdown.
#[derive(Debug, Clone)]
pub struct FlowError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    Many {
        errors: Vec<FlowError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during a transfer.
///
/// The kinds drive the failure policy: item-level kinds are skipped and
/// counted, resource kinds retire the owning worker, everything else aborts
/// the run through the interrupt latch.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection errors
    StoreConnectionFailed,
    AuthenticationFailed,

    // Discovery errors
    DiscoveryQueryFailed,

    // Item errors
    ItemConversionFailed,
    ItemWriteFailed,
    InvalidData,

    // Cross-reference cache errors
    CacheStoreFailed,
    DuplicateIdentifier,

    // Worker & pool errors
    ResourceUnavailable,
    PoolStartFailed,
    WorkerPanic,
    QueueClosed,

    // Configuration errors
    ConfigError,

    // IO & serialization errors
    IoError,
    StoreIoError,
    SerializationError,
    DeserializationError,

    // State errors
    InvalidState,

    // Unknown / uncategorized
    Unknown,

    // Special error kinds used by fault-injection tests to trigger specific
    // failure policies.
    #[cfg(feature = "failpoints")]
    WithSkipItem,
    #[cfg(feature = "failpoints")]
    WithRetireWorker,
    #[cfg(feature = "failpoints")]
    WithAbort,
}

impl FlowError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has
    /// one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns
    /// the modified instance.
    ///
    /// Has no effect when called on aggregated errors because aggregates
    /// forward the first contained error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.set_source(Some(Arc::new(source)));
        self
    }

    /// Creates a [`FlowError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        FlowError {
            repr: ErrorRepr::Single(ErrorPayload::new(
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            )),
        }
    }

    fn set_source(&mut self, source: Option<Arc<dyn error::Error + Send + Sync>>) {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = source;
        }
    }
}

impl PartialEq for FlowError {
    fn eq(&self, other: &FlowError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl Hash for FlowError {
    /// Hashes the error using only its stable identifying components.
    ///
    /// Only the error kind and static description are hashed, intentionally
    /// excluding location, detail, source, and backtrace, so that errors of
    /// the same category produce the same hash across occurrences.
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                std::mem::discriminant(&self.repr).hash(state);
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                std::mem::discriminant(&self.repr).hash(state);
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)?;
                write_backtrace(payload.backtrace.as_ref(), f, 1)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                } else {
                    for (index, error) in errors.iter().enumerate() {
                        let rendered = format!("{error}");
                        let mut lines = rendered.lines();
                        if let Some(first_line) = lines.next() {
                            write!(f, "\n  {}. {}", index + 1, first_line)?;
                        } else {
                            write!(f, "\n  {}.", index + 1)?;
                        }

                        for line in lines {
                            if line.is_empty() {
                                write!(f, "\n     ")?;
                            } else {
                                write!(f, "\n     {line}")?;
                            }
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for FlowError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as
            // the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the captured backtrace with indentation.
fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                if line.trim().is_empty() {
                    write!(f, "\n{indent_str}  ")?;
                } else {
                    write!(f, "\n{indent_str}  {line}")?;
                }
            }
        }
    }

    Ok(())
}

/// Creates a [`FlowError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for FlowError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> FlowError {
        FlowError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`FlowError`] from an error kind, static description, and
/// dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for FlowError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> FlowError {
        FlowError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`FlowError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly
/// without wrapping it in an aggregate.
impl<E> From<Vec<E>> for FlowError
where
    E: Into<FlowError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> FlowError {
        let location = Location::caller();

        let mut errors: Vec<FlowError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        FlowError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`FlowError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for FlowError {
    #[track_caller]
    fn from(err: std::io::Error) -> FlowError {
        let detail = err.to_string();
        let source = Arc::new(err);
        FlowError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`FlowError`] with the appropriate
/// error kind.
impl From<serde_json::Error> for FlowError {
    #[track_caller]
    fn from(err: serde_json::Error) -> FlowError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        FlowError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`sqlx::Error`] to [`FlowError`] with the appropriate error kind.
///
/// Database errors are classified by their SQLSTATE class so that connection
/// losses retire workers while data problems stay item-local.
impl From<sqlx::Error> for FlowError {
    #[track_caller]
    fn from(err: sqlx::Error) -> FlowError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // Connection exceptions (08xxx)
                Some(code) if code.starts_with("08") => {
                    (ErrorKind::StoreConnectionFailed, "store connection failed")
                }
                // Authorization failures (28xxx)
                Some(code) if code.starts_with("28") => {
                    (ErrorKind::AuthenticationFailed, "store authentication failed")
                }
                // Unique violations surface duplicate identifiers
                Some("23505") => (
                    ErrorKind::DuplicateIdentifier,
                    "store uniqueness violation",
                ),
                // Other integrity violations (23xxx)
                Some(code) if code.starts_with("23") => {
                    (ErrorKind::InvalidData, "store constraint violation")
                }
                // Data exceptions (22xxx)
                Some(code) if code.starts_with("22") => {
                    (ErrorKind::ItemConversionFailed, "store data conversion failed")
                }
                // Insufficient resources (53xxx)
                Some(code) if code.starts_with("53") => {
                    (ErrorKind::ResourceUnavailable, "store resources exhausted")
                }
                // Operator intervention (57xxx)
                Some(code) if code.starts_with("57") => {
                    (ErrorKind::StoreConnectionFailed, "store operation canceled")
                }
                // Transaction rollback, including deadlocks (40xxx)
                Some(code) if code.starts_with("40") => {
                    (ErrorKind::InvalidState, "store transaction failed")
                }
                _ => (ErrorKind::ItemWriteFailed, "store statement failed"),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                (ErrorKind::ResourceUnavailable, "store connection pool unavailable")
            }
            sqlx::Error::Io(_) => (ErrorKind::StoreIoError, "store I/O failed"),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "store connection misconfigured")
            }
            sqlx::Error::RowNotFound => (ErrorKind::InvalidData, "store row not found"),
            _ => (ErrorKind::ItemWriteFailed, "store operation failed"),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        FlowError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
