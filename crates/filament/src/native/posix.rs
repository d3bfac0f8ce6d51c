//! POSIX implementation of the native file primitives.

use std::ffi::CString;
use std::io::{IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::{MAX_BUFFERS, SeekOrigin, has_data};
use crate::clock::{FileTime, FileTimes};
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms};
use crate::open_args::OpenArgs;

/// A native file descriptor.
pub type RawHandle = libc::c_int;

/// The descriptor value meaning "no file".
pub const INVALID_HANDLE: RawHandle = -1;

trait IsMinusOne: Copy {
    fn is_minus_one(self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($t:ty),*) => {
        $(impl IsMinusOne for $t {
            fn is_minus_one(self) -> bool {
                self == -1
            }
        })*
    };
}

impl_is_minus_one!(i32, i64, isize);

fn cvt<T: IsMinusOne>(result: T) -> FileResult<T> {
    if result.is_minus_one() {
        Err(FileError::last_os_error())
    } else {
        Ok(result)
    }
}

/// Run a system call, retrying while it fails with `EINTR`.
fn cvt_r<T: IsMinusOne>(mut call: impl FnMut() -> T) -> FileResult<T> {
    loop {
        match cvt(call()) {
            Err(err) if err.kind() == FileErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn to_off_t(value: i64) -> FileResult<libc::off_t> {
    libc::off_t::try_from(value).map_err(|_| FileError::invalid_argument("offset out of range"))
}

fn offset_to_off_t(offset: u64) -> FileResult<libc::off_t> {
    i64::try_from(offset)
        .map_err(|_| FileError::invalid_argument("offset out of range"))
        .and_then(to_off_t)
}

fn fstat(fd: RawHandle) -> FileResult<libc::stat> {
    let mut st = MaybeUninit::<libc::stat>::uninit();
    cvt_r(|| unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    // SAFETY: fstat succeeded and filled the buffer.
    Ok(unsafe { st.assume_init() })
}

// ============================================================================
// Lifetime
// ============================================================================

/// Open `path` with pre-translated arguments.
///
/// The descriptor is always created close-on-exec. On hosts with file flags
/// the requested attributes are applied right after opening; if that fails
/// the descriptor is closed and the error returned.
pub fn open(path: &Path, args: &OpenArgs) -> FileResult<RawHandle> {
    if !args.is_valid() {
        return Err(FileError::invalid_argument("unsupported open arguments").with_path(path));
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FileError::invalid_argument("path contains a NUL byte").with_path(path))?;
    let flags = args.native_flags() | libc::O_CLOEXEC;
    let mode = args.mode() as libc::c_uint;

    let fd = cvt_r(|| unsafe { libc::open(c_path.as_ptr(), flags, mode) })
        .map_err(|err| err.with_path(path))?;

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    if !args.attrs().is_empty() {
        if let Err(err) = set_attributes(fd, args.attrs(), FileAttrOptions::Add) {
            let _ = close(fd);
            return Err(err.with_path(path));
        }
    }

    tracing::trace!(target: "filament::native", fd, path = %path.display(), "opened");
    Ok(fd)
}

/// Close a descriptor.
///
/// Never retried: after `EINTR` the descriptor is already gone.
pub fn close(fd: RawHandle) -> FileResult<()> {
    cvt(unsafe { libc::close(fd) }).map(|_| ())
}

/// Create a new close-on-exec descriptor for the same open file.
pub fn duplicate(fd: RawHandle) -> FileResult<RawHandle> {
    cvt_r(|| unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })
}

/// The process's standard input.
pub fn stdin() -> FileResult<RawHandle> {
    Ok(libc::STDIN_FILENO)
}

/// The process's standard output.
pub fn stdout() -> FileResult<RawHandle> {
    Ok(libc::STDOUT_FILENO)
}

/// The process's standard error.
pub fn stderr() -> FileResult<RawHandle> {
    Ok(libc::STDERR_FILENO)
}

// ============================================================================
// Size and position
// ============================================================================

/// Current size of the file in bytes.
pub fn size(fd: RawHandle) -> FileResult<u64> {
    let st = fstat(fd)?;
    Ok(st.st_size as u64)
}

/// Truncate or extend the file.
pub fn set_size(fd: RawHandle, new_size: u64) -> FileResult<()> {
    let len = offset_to_off_t(new_size)?;
    cvt_r(|| unsafe { libc::ftruncate(fd, len) }).map(|_| ())
}

/// Move the file position. Returns the new position from the start.
pub fn seek(fd: RawHandle, origin: SeekOrigin, offset: i64) -> FileResult<u64> {
    let whence = match origin {
        SeekOrigin::FromBegin => libc::SEEK_SET,
        SeekOrigin::FromCurrent => libc::SEEK_CUR,
        SeekOrigin::FromEnd => libc::SEEK_END,
    };
    let offset = to_off_t(offset)?;
    let pos = cvt(unsafe { libc::lseek(fd, offset, whence) })?;
    Ok(pos as u64)
}

// ============================================================================
// Metadata
// ============================================================================

/// Permission bits of the file.
pub fn permissions(fd: RawHandle) -> FileResult<FilePerms> {
    let st = fstat(fd)?;
    Ok(FilePerms::from_bits_truncate(st.st_mode as u32))
}

/// Change permission bits.
///
/// `Add` and `Remove` read the current bits first; a concurrent change
/// between the read and the write is lost.
pub fn set_permissions(fd: RawHandle, perms: FilePerms, opts: FilePermOptions) -> FileResult<()> {
    let target = match opts {
        FilePermOptions::Replace => perms,
        _ => opts.apply(permissions(fd)?, perms),
    };
    cvt_r(|| unsafe { libc::fchmod(fd, target.bits() as libc::mode_t) }).map(|_| ())
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod file_flags {
    use crate::flags::FileAttrs;

    // Values from <sys/stat.h>.
    const UF_NODUMP: u32 = 0x0000_0001;
    const UF_IMMUTABLE: u32 = 0x0000_0002;
    const UF_HIDDEN: u32 = 0x0000_8000;
    const SF_ARCHIVED: u32 = 0x0001_0000;
    const SF_IMMUTABLE: u32 = 0x0002_0000;

    #[cfg(target_os = "freebsd")]
    const UF_NOUNLINK: u32 = 0x0000_0010;
    #[cfg(target_os = "freebsd")]
    const SF_NOUNLINK: u32 = 0x0010_0000;

    #[cfg(not(target_os = "freebsd"))]
    const MAP: &[(FileAttrs, u32)] = &[
        (FileAttrs::HIDDEN, UF_HIDDEN),
        (FileAttrs::ARCHIVE, SF_ARCHIVED),
        (FileAttrs::NO_DUMP, UF_NODUMP),
        (FileAttrs::USER_IMMUTABLE, UF_IMMUTABLE),
        (FileAttrs::SYSTEM_IMMUTABLE, SF_IMMUTABLE),
    ];

    #[cfg(target_os = "freebsd")]
    const MAP: &[(FileAttrs, u32)] = &[
        (FileAttrs::HIDDEN, UF_HIDDEN),
        (FileAttrs::ARCHIVE, SF_ARCHIVED),
        (FileAttrs::NO_DUMP, UF_NODUMP),
        (FileAttrs::USER_IMMUTABLE, UF_IMMUTABLE),
        (FileAttrs::SYSTEM_IMMUTABLE, SF_IMMUTABLE),
        (FileAttrs::USER_NO_UNLINK, UF_NOUNLINK),
        (FileAttrs::SYSTEM_NO_UNLINK, SF_NOUNLINK),
    ];

    pub fn to_native(attrs: FileAttrs) -> u32 {
        MAP.iter()
            .filter(|(attr, _)| attrs.contains(*attr))
            .fold(0, |acc, (_, bit)| acc | bit)
    }

    pub fn from_native(flags: u32) -> FileAttrs {
        MAP.iter()
            .filter(|(_, bit)| flags & bit != 0)
            .fold(FileAttrs::NONE, |acc, (attr, _)| acc | *attr)
    }

    pub fn managed() -> u32 {
        to_native(FileAttrs::ALL)
    }
}

/// Attributes of the file. Always empty on hosts without file flags.
pub fn attributes(fd: RawHandle) -> FileResult<FileAttrs> {
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        let st = fstat(fd)?;
        Ok(file_flags::from_native(st.st_flags as u32))
    }
    #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
    {
        fstat(fd)?;
        Ok(FileAttrs::NONE)
    }
}

/// Change attributes.
///
/// Attributes the host rejects fail with `InvalidArgument`; attributes the
/// host has no storage for are ignored. Like permissions, `Add` and `Remove`
/// are a non-atomic read-modify-write.
pub fn set_attributes(fd: RawHandle, attrs: FileAttrs, opts: FileAttrOptions) -> FileResult<()> {
    if attrs.intersects(FileAttrs::host_rejected()) {
        return Err(FileError::invalid_argument("attributes not supported on this platform"));
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        let current = fstat(fd)?.st_flags as u32;
        let requested = file_flags::to_native(attrs);
        let target = match opts {
            FileAttrOptions::Replace => (current & !file_flags::managed()) | requested,
            FileAttrOptions::Add => current | requested,
            FileAttrOptions::Remove => current & !requested,
        };
        if target != current {
            cvt_r(|| unsafe { libc::fchflags(fd, target as _) })?;
        }
        Ok(())
    }
    #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
    {
        let _ = opts;
        fstat(fd).map(|_| ())
    }
}

fn file_time(secs: libc::time_t, nanos: i64) -> Option<FileTime> {
    FileTime::from_unix_timestamp(secs as i64, nanos.clamp(0, 999_999_999) as u32)
}

/// Timestamps of the file. Creation time is `None` where the host has no
/// birth time in `fstat`.
pub fn times(fd: RawHandle) -> FileResult<FileTimes> {
    let st = fstat(fd)?;

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    let creation = file_time(st.st_birthtime, st.st_birthtime_nsec as i64);
    #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
    let creation = None;

    Ok(FileTimes {
        creation,
        last_access: file_time(st.st_atime, st.st_atime_nsec as i64),
        last_write: file_time(st.st_mtime, st.st_mtime_nsec as i64),
    })
}

fn to_timespec(time: Option<FileTime>) -> FileResult<libc::timespec> {
    // SAFETY: timespec is plain data; zero is a valid bit pattern.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    match time {
        Some(time) => {
            let (secs, nanos) = time.to_unix_timestamp();
            ts.tv_sec = libc::time_t::try_from(secs)
                .map_err(|_| FileError::invalid_argument("time out of range"))?;
            ts.tv_nsec = nanos as _;
        }
        None => ts.tv_nsec = libc::UTIME_OMIT,
    }
    Ok(ts)
}

/// Change access and modification times. The creation time is ignored.
pub fn set_times(fd: RawHandle, times: &FileTimes) -> FileResult<()> {
    if times.last_access.is_none() && times.last_write.is_none() {
        return Ok(());
    }
    let stamps = [to_timespec(times.last_access)?, to_timespec(times.last_write)?];
    cvt_r(|| unsafe { libc::futimens(fd, stamps.as_ptr()) }).map(|_| ())
}

// ============================================================================
// Data transfer
// ============================================================================

fn iov_count(len: usize) -> libc::c_int {
    len.min(MAX_BUFFERS) as libc::c_int
}

/// Read into `bufs` at the current position.
///
/// Returns `Eof` when nothing could be read although a buffer had room.
pub fn readv(fd: RawHandle, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
    let count = iov_count(bufs.len());
    // IoSliceMut is ABI compatible with iovec.
    let iov = bufs.as_ptr() as *const libc::iovec;
    let n = cvt_r(|| unsafe { libc::readv(fd, iov, count) })?;
    if n == 0 && has_data(bufs) {
        return Err(FileError::eof());
    }
    Ok(n as usize)
}

/// Write `bufs` at the current position.
pub fn writev(fd: RawHandle, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
    let count = iov_count(bufs.len());
    let iov = bufs.as_ptr() as *const libc::iovec;
    let n = cvt_r(|| unsafe { libc::writev(fd, iov, count) })?;
    Ok(n as usize)
}

/// Read into `bufs` at `offset` without moving the file position.
pub fn preadv(fd: RawHandle, bufs: &mut [IoSliceMut<'_>], offset: u64) -> FileResult<usize> {
    let offset = offset_to_off_t(offset)?;

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    let n = {
        let count = iov_count(bufs.len());
        let iov = bufs.as_ptr() as *const libc::iovec;
        cvt_r(|| unsafe { libc::preadv(fd, iov, count, offset) })?
    };
    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
    let n = match bufs.iter_mut().take(MAX_BUFFERS).find(|buf| !buf.is_empty()) {
        Some(buf) => cvt_r(|| unsafe {
            libc::pread(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), offset)
        })?,
        None => 0,
    };

    if n == 0 && has_data(bufs) {
        return Err(FileError::eof());
    }
    Ok(n as usize)
}

/// Write `bufs` at `offset` without moving the file position.
pub fn pwritev(fd: RawHandle, bufs: &[IoSlice<'_>], offset: u64) -> FileResult<usize> {
    let offset = offset_to_off_t(offset)?;

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    let n = {
        let count = iov_count(bufs.len());
        let iov = bufs.as_ptr() as *const libc::iovec;
        cvt_r(|| unsafe { libc::pwritev(fd, iov, count, offset) })?
    };
    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
    let n = match bufs.iter().take(MAX_BUFFERS).find(|buf| !buf.is_empty()) {
        Some(buf) => cvt_r(|| unsafe {
            libc::pwrite(fd, buf.as_ptr() as *const libc::c_void, buf.len(), offset)
        })?,
        None => 0,
    };

    Ok(n as usize)
}
