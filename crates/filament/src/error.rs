//! Error types for file operations.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use filament_core::ThreadPoolError;

/// Error type for file operations.
///
/// Every fallible operation in this crate returns a [`FileResult`]. The
/// error carries a portable [`FileErrorKind`], the path involved (when the
/// operation had one), and the underlying OS error when there was one.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{}", PathSuffix(.path.as_deref()))]
pub struct FileError {
    /// The kind of error that occurred.
    kind: FileErrorKind,
    /// The path involved in the error, if any.
    path: Option<PathBuf>,
    /// The underlying OS error, if any.
    #[source]
    source: Option<io::Error>,
}

/// The kind of file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileErrorKind {
    /// File or directory not found.
    NotFound,
    /// Permission denied.
    PermissionDenied,
    /// File already exists (when creating exclusively).
    AlreadyExists,
    /// Invalid argument, including unsupported open flags or attributes.
    InvalidArgument,
    /// The object already holds an open handle.
    AlreadyOpen,
    /// The handle is not open or not valid.
    BadDescriptor,
    /// End of file was reached before any byte was transferred.
    Eof,
    /// The operation was cancelled before it started.
    OperationAborted,
    /// The data does not fit in memory on this platform.
    MessageSize,
    /// The operation is not supported on this platform or handle.
    Unsupported,
    /// The path is a directory, not a file.
    IsDirectory,
    /// No space left on device.
    NoSpace,
    /// Read-only filesystem.
    ReadOnly,
    /// The operation was interrupted.
    Interrupted,
    /// An unknown or unclassified error occurred.
    Other,
}

impl FileError {
    /// Creates a new file error.
    pub fn new(kind: FileErrorKind, path: Option<PathBuf>, source: Option<io::Error>) -> Self {
        Self { kind, path, source }
    }

    /// Creates an error of the given kind with no path and no OS error.
    pub fn from_kind(kind: FileErrorKind) -> Self {
        Self::new(kind, None, None)
    }

    /// Creates a file error from an I/O error and path.
    pub fn from_io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::from(err)
        }
    }

    /// Creates a file error from a raw OS error code.
    pub fn from_raw_os_error(code: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(code))
    }

    /// Creates a file error from the calling thread's last OS error.
    pub fn last_os_error() -> Self {
        Self::from(io::Error::last_os_error())
    }

    /// Creates an "invalid argument" error with a custom message.
    pub fn invalid_argument(message: &str) -> Self {
        Self::new(
            FileErrorKind::InvalidArgument,
            None,
            Some(io::Error::new(io::ErrorKind::InvalidInput, message)),
        )
    }

    /// Creates an "operation aborted" error.
    pub fn aborted() -> Self {
        Self::from_kind(FileErrorKind::OperationAborted)
    }

    /// Creates an "end of file" error.
    pub fn eof() -> Self {
        Self::from_kind(FileErrorKind::Eof)
    }

    /// Creates a "bad descriptor" error.
    pub fn bad_descriptor() -> Self {
        Self::from_kind(FileErrorKind::BadDescriptor)
    }

    /// Attaches a path to an error that does not have one yet.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> FileErrorKind {
        self.kind
    }

    /// Returns the path involved in the error, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }

    /// Returns the raw OS error code, if the error came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(io::Error::raw_os_error)
    }

    /// Returns true if this error indicates the file was not found.
    pub fn is_not_found(&self) -> bool {
        self.kind == FileErrorKind::NotFound
    }

    /// Returns true if this error marks the end of the file.
    pub fn is_eof(&self) -> bool {
        self.kind == FileErrorKind::Eof
    }

    /// Returns true if the operation was cancelled before it ran.
    pub fn is_aborted(&self) -> bool {
        self.kind == FileErrorKind::OperationAborted
    }
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileErrorKind::NotFound => write!(f, "file not found"),
            FileErrorKind::PermissionDenied => write!(f, "permission denied"),
            FileErrorKind::AlreadyExists => write!(f, "file already exists"),
            FileErrorKind::InvalidArgument => write!(f, "invalid argument"),
            FileErrorKind::AlreadyOpen => write!(f, "already open"),
            FileErrorKind::BadDescriptor => write!(f, "bad file descriptor"),
            FileErrorKind::Eof => write!(f, "end of file"),
            FileErrorKind::OperationAborted => write!(f, "operation aborted"),
            FileErrorKind::MessageSize => write!(f, "message too long"),
            FileErrorKind::Unsupported => write!(f, "operation not supported"),
            FileErrorKind::IsDirectory => write!(f, "is a directory"),
            FileErrorKind::NoSpace => write!(f, "no space left on device"),
            FileErrorKind::ReadOnly => write!(f, "read-only filesystem"),
            FileErrorKind::Interrupted => write!(f, "operation interrupted"),
            FileErrorKind::Other => write!(f, "file error"),
        }
    }
}

/// Formats `": <path>"` when a path is present.
struct PathSuffix<'a>(Option<&'a Path>);

impl fmt::Display for PathSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(path) => write!(f, ": {}", path.display()),
            None => Ok(()),
        }
    }
}

fn kind_from_raw(code: i32) -> Option<FileErrorKind> {
    #[cfg(unix)]
    {
        match code {
            libc::EBADF => Some(FileErrorKind::BadDescriptor),
            libc::EINVAL => Some(FileErrorKind::InvalidArgument),
            libc::ECANCELED => Some(FileErrorKind::OperationAborted),
            libc::EMSGSIZE | libc::EFBIG => Some(FileErrorKind::MessageSize),
            libc::EISDIR => Some(FileErrorKind::IsDirectory),
            _ => None,
        }
    }
    #[cfg(windows)]
    {
        use windows::Win32::Foundation::{
            ERROR_HANDLE_EOF, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER,
            ERROR_OPERATION_ABORTED,
        };

        match code as u32 {
            c if c == ERROR_INVALID_HANDLE.0 => Some(FileErrorKind::BadDescriptor),
            c if c == ERROR_INVALID_PARAMETER.0 => Some(FileErrorKind::InvalidArgument),
            c if c == ERROR_OPERATION_ABORTED.0 => Some(FileErrorKind::OperationAborted),
            c if c == ERROR_HANDLE_EOF.0 => Some(FileErrorKind::Eof),
            _ => None,
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        None
    }
}

impl From<io::Error> for FileError {
    fn from(err: io::Error) -> Self {
        let kind = err.raw_os_error().and_then(kind_from_raw).unwrap_or(match err.kind() {
            io::ErrorKind::NotFound => FileErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => FileErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => FileErrorKind::AlreadyExists,
            io::ErrorKind::InvalidInput => FileErrorKind::InvalidArgument,
            io::ErrorKind::UnexpectedEof => FileErrorKind::Eof,
            io::ErrorKind::Unsupported => FileErrorKind::Unsupported,
            io::ErrorKind::IsADirectory => FileErrorKind::IsDirectory,
            io::ErrorKind::StorageFull => FileErrorKind::NoSpace,
            io::ErrorKind::ReadOnlyFilesystem => FileErrorKind::ReadOnly,
            io::ErrorKind::Interrupted => FileErrorKind::Interrupted,
            io::ErrorKind::FileTooLarge => FileErrorKind::MessageSize,
            _ => FileErrorKind::Other,
        });
        Self {
            kind,
            path: None,
            source: Some(err),
        }
    }
}

impl From<ThreadPoolError> for FileError {
    fn from(err: ThreadPoolError) -> Self {
        match err {
            ThreadPoolError::Spawn(io) => Self::from(io),
            ThreadPoolError::NoThreads => {
                Self::invalid_argument("the file service needs at least one worker thread")
            }
            ThreadPoolError::ShutDown => Self::aborted(),
            ThreadPoolError::QueueFull => Self::new(
                FileErrorKind::Other,
                None,
                Some(io::Error::new(io::ErrorKind::WouldBlock, "worker queue is full")),
            ),
        }
    }
}

impl From<FileErrorKind> for FileError {
    fn from(kind: FileErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

/// A specialized Result type for file operations.
pub type FileResult<T> = Result<T, FileError>;
