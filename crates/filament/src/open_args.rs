//! Translation of portable open parameters into native ones.
//!
//! [`OpenArgs::new`] validates a combination of [`OpenFlags`],
//! [`FilePerms`] and [`FileAttrs`] against what the host can honour and,
//! when valid, computes the native values handed to `open(2)` or
//! `CreateFileW`. Validation happens before any system call, so an invalid
//! combination never creates or touches a file.

use crate::flags::{FileAttrs, FilePerms, OpenFlags};

/// Native open parameters for this platform.
///
/// The default value is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenArgs {
    #[cfg(unix)]
    native_flags: i32,
    #[cfg(unix)]
    mode: u32,
    #[cfg(unix)]
    attrs: FileAttrs,

    #[cfg(windows)]
    desired_access: u32,
    #[cfg(windows)]
    share_mode: u32,
    #[cfg(windows)]
    creation_disposition: u32,
    #[cfg(windows)]
    flags_and_attributes: u32,
}

#[cfg(unix)]
const INVALID_FLAGS: i32 = -1;

#[cfg(windows)]
const INVALID_DISPOSITION: u32 = 0xffff_ffff;

impl Default for OpenArgs {
    fn default() -> Self {
        Self::invalid()
    }
}

impl OpenArgs {
    /// An invalid argument set. Opening with it fails with `InvalidArgument`.
    pub const fn invalid() -> Self {
        #[cfg(unix)]
        {
            Self {
                native_flags: INVALID_FLAGS,
                mode: 0,
                attrs: FileAttrs::NONE,
            }
        }
        #[cfg(windows)]
        {
            Self {
                desired_access: 0,
                share_mode: 0,
                creation_disposition: INVALID_DISPOSITION,
                flags_and_attributes: 0,
            }
        }
    }

    /// Validate and translate portable open parameters.
    ///
    /// Returns an invalid value (see [`is_valid`](Self::is_valid)) when more
    /// than one creation disposition is set or when `perms`/`attrs` carry
    /// bits the host rejects.
    pub fn new(flags: OpenFlags, perms: FilePerms, attrs: FileAttrs) -> Self {
        match validate(flags, perms, attrs) {
            Ok(()) => Self::translate(flags, perms, attrs),
            Err(reason) => {
                tracing::debug!(
                    target: "filament::native",
                    ?flags,
                    ?perms,
                    ?attrs,
                    reason,
                    "rejected open arguments"
                );
                Self::invalid()
            }
        }
    }

    /// Whether translation succeeded.
    pub const fn is_valid(&self) -> bool {
        #[cfg(unix)]
        {
            self.native_flags != INVALID_FLAGS
        }
        #[cfg(windows)]
        {
            self.creation_disposition != INVALID_DISPOSITION
        }
    }

    #[cfg(unix)]
    fn translate(flags: OpenFlags, perms: FilePerms, attrs: FileAttrs) -> Self {
        let access = if flags.contains(OpenFlags::ACCESS_READ_WRITE) {
            libc::O_RDWR
        } else if flags.contains(OpenFlags::ACCESS_WRITE) {
            libc::O_WRONLY
        } else {
            libc::O_RDONLY
        };

        let disposition = match flags.disposition() {
            d if d == OpenFlags::CREATE_NEW => libc::O_CREAT | libc::O_EXCL,
            d if d == OpenFlags::CREATE_ALWAYS => libc::O_CREAT | libc::O_TRUNC,
            d if d == OpenFlags::OPEN_ALWAYS => libc::O_CREAT,
            d if d == OpenFlags::TRUNCATE_EXISTING => libc::O_TRUNC,
            _ => 0,
        };

        Self {
            native_flags: access | disposition,
            mode: (perms & FilePerms::MASK).bits(),
            // Attributes the host has no flag for are dropped here.
            attrs: attrs & FileAttrs::host_supported(),
        }
    }

    #[cfg(windows)]
    fn translate(flags: OpenFlags, perms: FilePerms, attrs: FileAttrs) -> Self {
        use windows::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE};
        use windows::Win32::Storage::FileSystem::{
            CREATE_ALWAYS, CREATE_NEW, FILE_ATTRIBUTE_NORMAL, FILE_ATTRIBUTE_READONLY,
            FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_ALWAYS, OPEN_EXISTING,
            TRUNCATE_EXISTING,
        };

        let mut desired_access = 0;
        if flags.contains(OpenFlags::ACCESS_READ) {
            desired_access |= GENERIC_READ.0;
        }
        if flags.contains(OpenFlags::ACCESS_WRITE) {
            desired_access |= GENERIC_WRITE.0;
        }

        let creation_disposition = match flags.disposition() {
            d if d == OpenFlags::CREATE_NEW => CREATE_NEW.0,
            d if d == OpenFlags::CREATE_ALWAYS => CREATE_ALWAYS.0,
            d if d == OpenFlags::OPEN_ALWAYS => OPEN_ALWAYS.0,
            d if d == OpenFlags::TRUNCATE_EXISTING => TRUNCATE_EXISTING.0,
            _ => OPEN_EXISTING.0,
        };

        let mut flags_and_attributes = crate::native::attrs_to_native(attrs);
        if !perms.intersects(FilePerms::WRITE_BITS) {
            flags_and_attributes |= FILE_ATTRIBUTE_READONLY.0;
        }
        if flags_and_attributes == 0 {
            flags_and_attributes = FILE_ATTRIBUTE_NORMAL.0;
        }

        Self {
            desired_access,
            share_mode: FILE_SHARE_READ.0 | FILE_SHARE_WRITE.0 | FILE_SHARE_DELETE.0,
            creation_disposition,
            flags_and_attributes,
        }
    }

    /// Flags for `open(2)`, without `O_CLOEXEC`.
    #[cfg(unix)]
    pub const fn native_flags(&self) -> i32 {
        self.native_flags
    }

    /// Creation mode for `open(2)`.
    #[cfg(unix)]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// Attributes to apply with `fchflags` after a successful open.
    #[cfg(unix)]
    pub const fn attrs(&self) -> FileAttrs {
        self.attrs
    }

    /// `dwDesiredAccess` for `CreateFileW`.
    #[cfg(windows)]
    pub const fn desired_access(&self) -> u32 {
        self.desired_access
    }

    /// `dwShareMode` for `CreateFileW`.
    #[cfg(windows)]
    pub const fn share_mode(&self) -> u32 {
        self.share_mode
    }

    /// `dwCreationDisposition` for `CreateFileW`.
    #[cfg(windows)]
    pub const fn creation_disposition(&self) -> u32 {
        self.creation_disposition
    }

    /// `dwFlagsAndAttributes` for `CreateFileW`.
    #[cfg(windows)]
    pub const fn flags_and_attributes(&self) -> u32 {
        self.flags_and_attributes
    }
}

fn validate(flags: OpenFlags, perms: FilePerms, attrs: FileAttrs) -> Result<(), &'static str> {
    if !flags.is_valid() {
        return Err("more than one creation disposition");
    }
    if attrs.intersects(FileAttrs::host_rejected()) {
        return Err("attributes not supported on this platform");
    }
    #[cfg(windows)]
    {
        if perms.intersects(FilePerms::EXEC_BITS | FilePerms::SPECIAL_BITS) {
            return Err("execute and special permission bits are not supported on this platform");
        }
    }
    #[cfg(not(windows))]
    let _ = perms;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        assert!(!OpenArgs::default().is_valid());
        assert!(!OpenArgs::invalid().is_valid());
    }

    #[test]
    fn test_conflicting_dispositions_invalid() {
        let args = OpenArgs::new(
            OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_NEW | OpenFlags::TRUNCATE_EXISTING,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NONE,
        );
        assert!(!args.is_valid());
    }

    #[test]
    fn test_rejected_attrs_invalid() {
        let args = OpenArgs::new(
            OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NOT_INDEXED,
        );
        #[cfg(windows)]
        assert!(args.is_valid());
        #[cfg(not(windows))]
        assert!(!args.is_valid());
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_translation() {
        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NONE,
        );
        assert!(args.is_valid());
        assert_eq!(args.native_flags(), libc::O_RDONLY);
        assert_eq!(args.mode(), 0o666);

        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ_WRITE | OpenFlags::CREATE_NEW,
            FilePerms::OWNER_ALL | FilePerms::STICKY_BIT,
            FileAttrs::NONE,
        );
        assert_eq!(args.native_flags(), libc::O_RDWR | libc::O_CREAT | libc::O_EXCL);
        assert_eq!(args.mode(), 0o1700);

        let cases = [
            (OpenFlags::CREATE_ALWAYS, libc::O_CREAT | libc::O_TRUNC),
            (OpenFlags::OPEN_ALWAYS, libc::O_CREAT),
            (OpenFlags::TRUNCATE_EXISTING, libc::O_TRUNC),
            (OpenFlags::NONE, 0),
        ];
        for (disposition, expected) in cases {
            let args = OpenArgs::new(
                OpenFlags::ACCESS_WRITE | disposition,
                FilePerms::CREATE_DEFAULT,
                FileAttrs::NONE,
            );
            assert_eq!(args.native_flags(), libc::O_WRONLY | expected, "{disposition:?}");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_bsd_attrs_dropped_on_linux() {
        let args = OpenArgs::new(
            OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NO_DUMP | FileAttrs::USER_IMMUTABLE,
        );
        assert!(args.is_valid());
        assert_eq!(args.attrs(), FileAttrs::NONE);
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_translation() {
        use windows::Win32::Storage::FileSystem::{
            FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_READONLY, OPEN_EXISTING,
        };

        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ,
            FilePerms::OWNER_READ,
            FileAttrs::HIDDEN,
        );
        assert!(args.is_valid());
        assert_eq!(args.creation_disposition(), OPEN_EXISTING.0);
        assert_ne!(args.flags_and_attributes() & FILE_ATTRIBUTE_READONLY.0, 0);
        assert_ne!(args.flags_and_attributes() & FILE_ATTRIBUTE_HIDDEN.0, 0);

        let exec = OpenArgs::new(
            OpenFlags::ACCESS_READ,
            FilePerms::OWNER_ALL,
            FileAttrs::NONE,
        );
        assert!(!exec.is_valid());
    }
}
