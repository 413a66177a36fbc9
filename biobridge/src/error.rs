use thiserror::Error;

/// The `Result::Ok` of a synchronous operation which may be unable to
/// make progress right now.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// The operation completed.
    Ready(T),
    /// No progress is currently possible. This is not an error: the
    /// caller should drive the underlying I/O and try again.
    WouldBlock,
    /// The stream has ended cleanly and no further data will arrive.
    Eof,
}

impl<T> Poll<T> {
    /// Returns `true` if this is [`Poll::WouldBlock`].
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

#[derive(Error, Debug)]
/// The failure result of an operation.
pub enum Error {
    /// The foreign caller passed a negative length, or a null buffer
    /// with a non-zero length.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The BIO has no adapter attached (never attached, or already
    /// disconnected).
    #[error("No adapter attached to BIO")]
    NoAdapter,
    /// The foreign side accepted fewer bytes than requested.
    #[error("Short write: {written} of {expected} bytes accepted")]
    ShortWrite {
        /// Bytes the foreign side reported as accepted
        written: usize,
        /// Bytes handed to the foreign side
        expected: usize,
    },
    /// Allocating a BIO or its method table failed, or no registry token
    /// was left to attach it with.
    #[error("Failed to create BIO")]
    CreateFailed,
    /// An error from the underlying connection.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::InvalidArgument(_) => Self::new(std::io::ErrorKind::InvalidInput, err),
            Error::ShortWrite { .. } => Self::new(std::io::ErrorKind::WriteZero, err),
            Error::NoAdapter | Error::CreateFailed => Self::other(err),
        }
    }
}

/// Describes an outcome that is synchronous.
pub type Result<T> = std::result::Result<T, Error>;
