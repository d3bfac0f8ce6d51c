//! Filament - portable file handles and asynchronous file I/O.
//!
//! This crate wraps the operating system's native file API behind one
//! interface that behaves the same on POSIX and Windows:
//!
//! - **Handles**: [`FileHandle`] (copyable, non-owning) and
//!   [`UniqueFileHandle`] (owning, closes on drop)
//! - **Open arguments**: [`OpenFlags`], [`FilePerms`] and [`FileAttrs`],
//!   validated and translated by [`OpenArgs`]
//! - **Metadata**: size, position, permissions, attributes and [`FileTimes`]
//! - **Async service**: [`ThreadPoolFileService`] runs blocking calls on a
//!   worker pool and delivers completions to a
//!   [`filament_core::IoContext`]; [`BasicFile`] is the file object on top
//! - **Helpers**: [`read_file`], [`write_file`], [`duplicate`] and the
//!   standard streams
//!
//! Every fallible operation returns a [`FileResult`]. End of file is
//! reported as an error of kind [`FileErrorKind::Eof`].
//!
//! # Example
//!
//! ```no_run
//! use filament::{FileAttrs, FilePerms, OpenFlags, SeekOrigin, UniqueFileHandle};
//!
//! let file = UniqueFileHandle::open(
//!     "hello.txt",
//!     OpenFlags::ACCESS_READ_WRITE | OpenFlags::CREATE_ALWAYS,
//!     FilePerms::CREATE_DEFAULT,
//!     FileAttrs::NONE,
//! )?;
//! file.write_all(b"hello world!")?;
//! file.seek(SeekOrigin::FromBegin, 0)?;
//!
//! let mut buf = [0u8; 12];
//! file.read_exact(&mut buf)?;
//! assert_eq!(&buf, b"hello world!");
//! # Ok::<(), filament::FileError>(())
//! ```

mod basic_file;
pub mod clock;
pub mod debug;
mod error;
pub mod flags;
mod handle;
pub mod native;
pub mod open_args;
mod operations;
pub mod service;
mod unique;

pub use basic_file::BasicFile;
pub use clock::{FileClock, FileTime, FileTimes};
pub use debug::{RegistryDebug, RegistryStyle};
pub use error::{FileError, FileErrorKind, FileResult};
pub use flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms, OpenFlags};
pub use handle::{FileHandle, stderr, stdin, stdout};
pub use native::{RawHandle, SeekOrigin};
pub use open_args::OpenArgs;
pub use operations::{read_file, read_file_to_string, read_handle, write_file, write_handle};
pub use service::{
    FileImpl, FileServiceBuilder, FileServiceConfig, ImplId, ThreadPoolFileService,
};
pub use unique::{UniqueFileHandle, duplicate};

pub use filament_core::IoContext;
