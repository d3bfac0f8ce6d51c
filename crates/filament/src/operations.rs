//! Convenience functions for whole-file reads and writes.
//!
//! These functions provide a simple API for one-shot file operations on top
//! of [`FileHandle`]. For anything longer-lived, use
//! [`UniqueFileHandle`] or [`BasicFile`](crate::BasicFile) directly.

use std::io::{self, IoSliceMut};
use std::path::Path;

use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::{FileAttrs, FilePerms, OpenFlags};
use crate::handle::FileHandle;
use crate::unique::UniqueFileHandle;

// ============================================================================
// Reading Functions
// ============================================================================

/// Reads the rest of an open file, from its current position.
///
/// The file size is queried once to size the buffer; a file that shrinks
/// meanwhile yields fewer bytes.
///
/// # Errors
///
/// Returns `MessageSize` if the file is larger than this platform can hold
/// in memory, or the error of the first failing read.
pub fn read_handle(handle: FileHandle) -> FileResult<Vec<u8>> {
    let size = handle.size()?;
    let size =
        usize::try_from(size).map_err(|_| FileError::from_kind(FileErrorKind::MessageSize))?;

    let mut data = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match handle.read_some(&mut [IoSliceMut::new(&mut data[filled..])]) {
            Ok(n) => filled += n,
            Err(err) if err.is_eof() => break,
            Err(err) => return Err(err),
        }
    }
    data.truncate(filled);
    Ok(data)
}

/// Reads the entire contents of a file as bytes.
///
/// # Example
///
/// ```no_run
/// let bytes = filament::read_file("data.bin")?;
/// println!("{} bytes", bytes.len());
/// # Ok::<(), filament::FileError>(())
/// ```
///
/// # Errors
///
/// Returns an error if the file does not exist or cannot be read.
pub fn read_file(path: impl AsRef<Path>) -> FileResult<Vec<u8>> {
    let path = path.as_ref();
    let file = UniqueFileHandle::open(
        path,
        OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING,
        FilePerms::CREATE_DEFAULT,
        FileAttrs::NONE,
    )?;
    read_handle(file.get()).map_err(|e| e.with_path(path))
}

/// Reads the entire contents of a file as a string.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist
/// - The file cannot be read
/// - The file is not valid UTF-8
pub fn read_file_to_string(path: impl AsRef<Path>) -> FileResult<String> {
    let path = path.as_ref();
    let bytes = read_file(path)?;
    String::from_utf8(bytes).map_err(|e| {
        FileError::from_io(io::Error::new(io::ErrorKind::InvalidData, e), path)
    })
}

// ============================================================================
// Writing Functions
// ============================================================================

/// Writes all of `data` to an open file at its current position.
pub fn write_handle(handle: FileHandle, data: impl AsRef<[u8]>) -> FileResult<()> {
    handle.write_all(data.as_ref())
}

/// Writes bytes to a file, creating it if it doesn't exist.
///
/// If the file already exists, its contents are replaced.
///
/// # Example
///
/// ```no_run
/// filament::write_file("output.txt", "Hello, World!")?;
/// # Ok::<(), filament::FileError>(())
/// ```
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_file(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> FileResult<()> {
    let path = path.as_ref();
    let file = UniqueFileHandle::open(
        path,
        OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS,
        FilePerms::CREATE_DEFAULT,
        FileAttrs::NONE,
    )?;
    write_handle(file.get(), data).map_err(|e| e.with_path(path))
}
