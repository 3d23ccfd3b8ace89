//! Standard error type for `kernelcall`.

/// `kernelcall` result type.
pub type Result<T> = std::result::Result<T, Error>;

/// An enum containing either a malformed-input error, a GPU driver failure,
/// or an assembly-compiler failure.
///
/// Implements the usual error traits via [`thiserror`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed opaque blob, unknown parameter tag, unknown outer wire
    /// variant, pointer misalignment, or a shared-memory request exceeding
    /// what the device supports.
    #[error("{0}")]
    InvalidArgument(String),
    /// A GPU driver-API call failed; the message is the driver's own.
    #[error("{0}")]
    DeviceError(String),
    /// The external assembly compiler failed to produce a loadable image.
    #[error("{0}")]
    CompileError(String),
}

impl Error {
    /// Returns a new [`Error::InvalidArgument`] built from `desc`.
    pub fn invalid_argument<S: Into<String>>(desc: S) -> Error {
        Error::InvalidArgument(desc.into())
    }

    /// Returns a new [`Error::DeviceError`] built from `desc`.
    pub fn device<S: Into<String>>(desc: S) -> Error {
        Error::DeviceError(desc.into())
    }

    /// Returns a new [`Error::CompileError`] built from `desc`.
    pub fn compile<S: Into<String>>(desc: S) -> Error {
        Error::CompileError(desc.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::InvalidArgument(format!("decompression failed: {}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Error {
        Error::InvalidArgument(format!("malformed opaque blob: {}", err))
    }
}

/// `Error` is latched into `AutotunedKernelCall`'s once-guard and replayed to
/// every subsequent launch, so it must be cheaply cloneable.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::DeviceError(s) => Error::DeviceError(s.clone()),
            Error::CompileError(s) => Error::CompileError(s.clone()),
        }
    }
}

