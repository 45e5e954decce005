//! The error taxonomy returned across the façade, handles, and upload engine.
//!
//! Every variant corresponds to a row of the error table in the design
//! document: the out-of-scope kernel-protocol adapter is expected to map
//! each one to a POSIX errno via [`Error::to_errno_name`].

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the virtual filesystem core.
///
/// Leaves never retry: they wrap the underlying cause and surface it.
/// Retrying, if desired, is a decision for the embedder.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backend or the metadata index has no record of the requested
    /// object or inode.
    #[error("not found")]
    NotFound,

    /// An operation addressed a non-directory as though it were one.
    #[error("not a directory")]
    NotDirectory,

    /// The backend refused the operation.
    #[error("permission denied")]
    PermissionDenied,

    /// The operation is not implemented by the core (xattrs, links, locks,
    /// rename, ...).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A write arrived at an offset other than the handle's current
    /// logical size.
    #[error("write at offset {offset} does not match current size {expected}")]
    RandomWrite {
        /// The offset the client attempted to write at.
        offset: u64,
        /// The offset the handle actually expects next.
        expected: u64,
    },

    /// Anything else: network failures, (de)serialization errors, engine
    /// bookkeeping errors. Treated as retryable by the adapter.
    #[error("transient error: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap an arbitrary error as [`Error::Transient`].
    pub fn transient<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transient(Box::new(err))
    }

    /// The symbolic POSIX errno name the out-of-scope adapter should map
    /// this error to. Kept here, rather than in the adapter, so there is a
    /// single obvious conversion and the core need not depend on `libc`.
    pub fn to_errno_name(&self) -> &'static str {
        match self {
            Error::NotFound => "ENOENT",
            Error::NotDirectory => "EINVAL",
            Error::PermissionDenied => "EACCES",
            Error::Unsupported(_) => "ENOSYS",
            Error::RandomWrite { .. } => "EIO",
            Error::Transient(_) => "EAGAIN",
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::transient(err)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::transient(err)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::transient(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound,
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied,
            _ => Error::transient(err),
        }
    }
}
