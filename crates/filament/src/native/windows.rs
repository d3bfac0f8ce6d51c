//! Win32 implementation of the native file primitives.
//!
//! Reads and writes move a single buffer per call: the first non-empty one.
//! Callers that need every buffer filled loop until done.

use std::ffi::c_void;
use std::io::{IoSlice, IoSliceMut};
use std::mem::size_of;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows::Win32::Foundation::{
    CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, ERROR_BROKEN_PIPE, ERROR_HANDLE_EOF,
    FALSE, FILETIME, GetLastError, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    BY_HANDLE_FILE_INFORMATION, CreateFileW, FILE_ATTRIBUTE_ARCHIVE, FILE_ATTRIBUTE_HIDDEN,
    FILE_ATTRIBUTE_NORMAL, FILE_ATTRIBUTE_NOT_CONTENT_INDEXED, FILE_ATTRIBUTE_READONLY,
    FILE_ATTRIBUTE_SYSTEM, FILE_BASIC_INFO, FILE_BEGIN, FILE_CREATION_DISPOSITION, FILE_CURRENT,
    FILE_END, FILE_END_OF_FILE_INFO, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE,
    FileBasicInfo, FileEndOfFileInfo, GetFileInformationByHandle, GetFileSizeEx, GetFileTime,
    ReadFile, SetFileInformationByHandle, SetFilePointerEx, SetFileTime, WriteFile,
};
use windows::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::IO::OVERLAPPED;
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::PCWSTR;

use super::{MAX_BUFFERS, SeekOrigin, has_data};
use crate::clock::{FileTime, FileTimes};
use crate::error::{FileError, FileResult};
use crate::flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms};
use crate::open_args::OpenArgs;

/// A native file handle value.
pub type RawHandle = isize;

/// `INVALID_HANDLE_VALUE`.
pub const INVALID_HANDLE: RawHandle = -1;

const ATTR_MAP: [(FileAttrs, u32); 4] = [
    (FileAttrs::HIDDEN, FILE_ATTRIBUTE_HIDDEN.0),
    (FileAttrs::SYSTEM, FILE_ATTRIBUTE_SYSTEM.0),
    (FileAttrs::ARCHIVE, FILE_ATTRIBUTE_ARCHIVE.0),
    (FileAttrs::NOT_INDEXED, FILE_ATTRIBUTE_NOT_CONTENT_INDEXED.0),
];

/// Translate portable attributes to `FILE_ATTRIBUTE_*` bits.
pub fn attrs_to_native(attrs: FileAttrs) -> u32 {
    ATTR_MAP
        .iter()
        .filter(|(attr, _)| attrs.contains(*attr))
        .fold(0, |acc, (_, bit)| acc | bit)
}

fn attrs_from_native(bits: u32) -> FileAttrs {
    ATTR_MAP
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(FileAttrs::NONE, |acc, (attr, _)| acc | *attr)
}

fn handle(raw: RawHandle) -> HANDLE {
    HANDLE(raw as *mut c_void)
}

fn raw(handle: HANDLE) -> RawHandle {
    handle.0 as RawHandle
}

/// Win32 error code carried by `err`. HRESULTs outside the Win32 facility
/// are kept whole.
fn os_error(err: &windows::core::Error) -> FileError {
    let hresult = err.code().0 as u32;
    let code = if hresult & 0xFFFF_0000 == 0x8007_0000 {
        hresult & 0xFFFF
    } else {
        hresult
    };
    FileError::from_raw_os_error(code as i32)
}

fn last_error<T>(err: windows::core::Error) -> FileResult<T> {
    Err(os_error(&err))
}

fn file_info(h: RawHandle) -> FileResult<BY_HANDLE_FILE_INFORMATION> {
    let mut info = BY_HANDLE_FILE_INFORMATION::default();
    unsafe { GetFileInformationByHandle(handle(h), &mut info) }.or_else(last_error)?;
    Ok(info)
}

fn set_basic_attributes(h: RawHandle, attributes: u32) -> FileResult<()> {
    // Zero timestamps mean "leave unchanged".
    let info = FILE_BASIC_INFO {
        FileAttributes: if attributes == 0 {
            FILE_ATTRIBUTE_NORMAL.0
        } else {
            attributes
        },
        ..Default::default()
    };
    unsafe {
        SetFileInformationByHandle(
            handle(h),
            FileBasicInfo,
            &info as *const FILE_BASIC_INFO as *const c_void,
            size_of::<FILE_BASIC_INFO>() as u32,
        )
    }
    .or_else(last_error)
}

// ============================================================================
// Lifetime
// ============================================================================

/// Open `path` with pre-translated arguments.
pub fn open(path: &Path, args: &OpenArgs) -> FileResult<RawHandle> {
    if !args.is_valid() {
        return Err(FileError::invalid_argument("unsupported open arguments").with_path(path));
    }

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let result = unsafe {
        CreateFileW(
            PCWSTR(wide.as_ptr()),
            args.desired_access(),
            FILE_SHARE_MODE(args.share_mode()),
            None,
            FILE_CREATION_DISPOSITION(args.creation_disposition()),
            FILE_FLAGS_AND_ATTRIBUTES(args.flags_and_attributes()),
            HANDLE::default(),
        )
    };

    match result {
        Ok(h) => {
            tracing::trace!(
                target: "filament::native",
                handle = raw(h),
                path = %path.display(),
                "opened"
            );
            Ok(raw(h))
        }
        Err(err) => Err(os_error(&err).with_path(path)),
    }
}

/// Close a handle.
pub fn close(h: RawHandle) -> FileResult<()> {
    unsafe { CloseHandle(handle(h)) }.or_else(last_error)
}

/// Create a new handle for the same open file.
pub fn duplicate(h: RawHandle) -> FileResult<RawHandle> {
    let mut target = HANDLE::default();
    unsafe {
        let process = GetCurrentProcess();
        DuplicateHandle(
            process,
            handle(h),
            process,
            &mut target,
            0,
            FALSE,
            DUPLICATE_SAME_ACCESS,
        )
    }
    .or_else(last_error)?;
    Ok(raw(target))
}

fn std_handle(which: STD_HANDLE) -> FileResult<RawHandle> {
    let h = unsafe { GetStdHandle(which) }.or_else(last_error)?;
    if h.is_invalid() || h.0.is_null() {
        return Err(FileError::bad_descriptor());
    }
    Ok(raw(h))
}

/// The process's standard input.
pub fn stdin() -> FileResult<RawHandle> {
    std_handle(STD_INPUT_HANDLE)
}

/// The process's standard output.
pub fn stdout() -> FileResult<RawHandle> {
    std_handle(STD_OUTPUT_HANDLE)
}

/// The process's standard error.
pub fn stderr() -> FileResult<RawHandle> {
    std_handle(STD_ERROR_HANDLE)
}

// ============================================================================
// Size and position
// ============================================================================

/// Current size of the file in bytes.
pub fn size(h: RawHandle) -> FileResult<u64> {
    let mut size = 0i64;
    unsafe { GetFileSizeEx(handle(h), &mut size) }.or_else(last_error)?;
    Ok(size as u64)
}

/// Truncate or extend the file.
pub fn set_size(h: RawHandle, new_size: u64) -> FileResult<()> {
    let end = i64::try_from(new_size)
        .map_err(|_| FileError::invalid_argument("size out of range"))?;
    let info = FILE_END_OF_FILE_INFO { EndOfFile: end };
    unsafe {
        SetFileInformationByHandle(
            handle(h),
            FileEndOfFileInfo,
            &info as *const FILE_END_OF_FILE_INFO as *const c_void,
            size_of::<FILE_END_OF_FILE_INFO>() as u32,
        )
    }
    .or_else(last_error)
}

/// Move the file position. Returns the new position from the start.
pub fn seek(h: RawHandle, origin: SeekOrigin, offset: i64) -> FileResult<u64> {
    let method = match origin {
        SeekOrigin::FromBegin => FILE_BEGIN,
        SeekOrigin::FromCurrent => FILE_CURRENT,
        SeekOrigin::FromEnd => FILE_END,
    };
    let mut pos = 0i64;
    unsafe { SetFilePointerEx(handle(h), offset, Some(&mut pos), method) }.or_else(last_error)?;
    Ok(pos as u64)
}

// ============================================================================
// Metadata
// ============================================================================

/// Permission bits derived from the read-only attribute.
pub fn permissions(h: RawHandle) -> FileResult<FilePerms> {
    let info = file_info(h)?;
    let read = FilePerms::OWNER_READ | FilePerms::GROUP_READ | FilePerms::OTHERS_READ;
    if info.dwFileAttributes & FILE_ATTRIBUTE_READONLY.0 != 0 {
        Ok(read)
    } else {
        Ok(read | FilePerms::WRITE_BITS)
    }
}

/// Change permissions. Only the write bits have an effect: clearing all of
/// them makes the file read-only.
pub fn set_permissions(h: RawHandle, perms: FilePerms, opts: FilePermOptions) -> FileResult<()> {
    if perms.intersects(FilePerms::EXEC_BITS | FilePerms::SPECIAL_BITS) {
        return Err(FileError::invalid_argument("execute and special bits are not supported"));
    }

    let info = file_info(h)?;
    let current = if info.dwFileAttributes & FILE_ATTRIBUTE_READONLY.0 != 0 {
        FilePerms::NONE
    } else {
        FilePerms::WRITE_BITS
    };
    let target = opts.apply(current, perms);

    let mut attributes = info.dwFileAttributes & !FILE_ATTRIBUTE_READONLY.0;
    if !target.intersects(FilePerms::WRITE_BITS) {
        attributes |= FILE_ATTRIBUTE_READONLY.0;
    }
    if attributes == info.dwFileAttributes {
        return Ok(());
    }
    set_basic_attributes(h, attributes)
}

/// Attributes of the file.
pub fn attributes(h: RawHandle) -> FileResult<FileAttrs> {
    Ok(attrs_from_native(file_info(h)?.dwFileAttributes))
}

/// Change attributes. Attributes outside the Win32 set fail with
/// `InvalidArgument`. `Add` and `Remove` are a non-atomic read-modify-write.
pub fn set_attributes(h: RawHandle, attrs: FileAttrs, opts: FileAttrOptions) -> FileResult<()> {
    if attrs.intersects(FileAttrs::host_rejected()) {
        return Err(FileError::invalid_argument("attributes not supported on this platform"));
    }

    let current = file_info(h)?.dwFileAttributes;
    let requested = attrs_to_native(attrs);
    let managed = attrs_to_native(FileAttrs::ALL);
    let target = match opts {
        FileAttrOptions::Replace => (current & !managed) | requested,
        FileAttrOptions::Add => current | requested,
        FileAttrOptions::Remove => current & !requested,
    };
    if target == current {
        return Ok(());
    }
    set_basic_attributes(h, target & !FILE_ATTRIBUTE_NORMAL.0)
}

fn from_filetime(ft: FILETIME) -> Option<FileTime> {
    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    i64::try_from(ticks).ok().map(FileTime::from_ticks)
}

fn to_filetime(time: FileTime) -> FileResult<FILETIME> {
    let ticks = u64::try_from(time.ticks())
        .map_err(|_| FileError::invalid_argument("time before the filesystem epoch"))?;
    Ok(FILETIME {
        dwLowDateTime: ticks as u32,
        dwHighDateTime: (ticks >> 32) as u32,
    })
}

/// Creation, access and write times.
pub fn times(h: RawHandle) -> FileResult<FileTimes> {
    let mut creation = FILETIME::default();
    let mut access = FILETIME::default();
    let mut write = FILETIME::default();
    unsafe {
        GetFileTime(
            handle(h),
            Some(&mut creation),
            Some(&mut access),
            Some(&mut write),
        )
    }
    .or_else(last_error)?;

    Ok(FileTimes {
        creation: from_filetime(creation),
        last_access: from_filetime(access),
        last_write: from_filetime(write),
    })
}

/// Change the times that are `Some`.
pub fn set_times(h: RawHandle, times: &FileTimes) -> FileResult<()> {
    if times.is_empty() {
        return Ok(());
    }
    let creation = times.creation.map(to_filetime).transpose()?;
    let access = times.last_access.map(to_filetime).transpose()?;
    let write = times.last_write.map(to_filetime).transpose()?;
    unsafe {
        SetFileTime(
            handle(h),
            creation.as_ref().map(|t| t as *const FILETIME),
            access.as_ref().map(|t| t as *const FILETIME),
            write.as_ref().map(|t| t as *const FILETIME),
        )
    }
    .or_else(last_error)
}

// ============================================================================
// Data transfer
// ============================================================================

fn overlapped_at(offset: u64) -> OVERLAPPED {
    let mut overlapped = OVERLAPPED::default();
    overlapped.Anonymous.Anonymous.Offset = offset as u32;
    overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
    overlapped
}

fn clamp_len(len: usize) -> usize {
    len.min(u32::MAX as usize)
}

fn read_one(h: RawHandle, bufs: &mut [IoSliceMut<'_>], offset: Option<u64>) -> FileResult<usize> {
    if !has_data(bufs) {
        return Ok(0);
    }
    let Some(buf) = bufs.iter_mut().take(MAX_BUFFERS).find(|buf| !buf.is_empty()) else {
        return Ok(0);
    };
    let len = clamp_len(buf.len());
    let mut overlapped = offset.map(overlapped_at);
    let mut read = 0u32;

    let result = unsafe {
        ReadFile(
            handle(h),
            Some(&mut buf[..len]),
            Some(&mut read),
            overlapped.as_mut().map(|o| o as *mut OVERLAPPED),
        )
    };
    if result.is_err() {
        let code = unsafe { GetLastError() };
        // Reading past the end of a file or a closed pipe.
        if code == ERROR_HANDLE_EOF || code == ERROR_BROKEN_PIPE {
            return Err(FileError::eof());
        }
        return Err(FileError::from_raw_os_error(code.0 as i32));
    }
    if read == 0 {
        return Err(FileError::eof());
    }
    Ok(read as usize)
}

fn write_one(h: RawHandle, bufs: &[IoSlice<'_>], offset: Option<u64>) -> FileResult<usize> {
    let Some(buf) = bufs.iter().take(MAX_BUFFERS).find(|buf| !buf.is_empty()) else {
        return Ok(0);
    };
    let len = clamp_len(buf.len());
    let mut overlapped = offset.map(overlapped_at);
    let mut written = 0u32;

    unsafe {
        WriteFile(
            handle(h),
            Some(&buf[..len]),
            Some(&mut written),
            overlapped.as_mut().map(|o| o as *mut OVERLAPPED),
        )
    }
    .or_else(last_error)?;
    Ok(written as usize)
}

/// Read into the first non-empty buffer at the current position.
pub fn readv(h: RawHandle, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
    read_one(h, bufs, None)
}

/// Write the first non-empty buffer at the current position.
pub fn writev(h: RawHandle, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
    write_one(h, bufs, None)
}

/// Read into the first non-empty buffer at `offset`.
///
/// Synchronous handles update the file position as a side effect.
pub fn preadv(h: RawHandle, bufs: &mut [IoSliceMut<'_>], offset: u64) -> FileResult<usize> {
    read_one(h, bufs, Some(offset))
}

/// Write the first non-empty buffer at `offset`.
pub fn pwritev(h: RawHandle, bufs: &[IoSlice<'_>], offset: u64) -> FileResult<usize> {
    write_one(h, bufs, Some(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OpenFlags;

    #[test]
    fn test_os_error_from_hresult() {
        use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND};

        let err = windows::core::Error::from(ERROR_FILE_NOT_FOUND.to_hresult());
        assert_eq!(os_error(&err).raw_os_error(), Some(ERROR_FILE_NOT_FOUND.0 as i32));
        assert!(os_error(&err).is_not_found());

        // A later failure does not leak into an earlier error.
        let denied = windows::core::Error::from(ERROR_ACCESS_DENIED.to_hresult());
        let dir = tempfile::tempdir().unwrap();
        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NONE,
        );
        let missing = open(&dir.path().join("missing"), &args).unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(os_error(&denied).raw_os_error(), Some(ERROR_ACCESS_DENIED.0 as i32));
    }

    #[test]
    fn test_attr_translation() {
        let native = attrs_to_native(FileAttrs::HIDDEN | FileAttrs::ARCHIVE);
        assert_eq!(native, FILE_ATTRIBUTE_HIDDEN.0 | FILE_ATTRIBUTE_ARCHIVE.0);
        assert_eq!(attrs_from_native(native), FileAttrs::HIDDEN | FileAttrs::ARCHIVE);
        assert_eq!(attrs_to_native(FileAttrs::NO_DUMP), 0);
    }

    #[test]
    fn test_readonly_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ_WRITE | OpenFlags::CREATE_ALWAYS,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NONE,
        );
        let h = open(&dir.path().join("ro"), &args).unwrap();

        assert!(permissions(h).unwrap().intersects(FilePerms::WRITE_BITS));
        set_permissions(h, FilePerms::WRITE_BITS, FilePermOptions::Remove).unwrap();
        assert!(!permissions(h).unwrap().intersects(FilePerms::WRITE_BITS));
        set_permissions(h, FilePerms::OWNER_WRITE, FilePermOptions::Add).unwrap();
        assert!(permissions(h).unwrap().intersects(FilePerms::WRITE_BITS));

        close(h).unwrap();
    }
}
