//! Portable open flags, permissions and attributes.
//!
//! These are plain bitmask newtypes. They describe *what* the caller wants;
//! [`OpenArgs`](crate::open_args::OpenArgs) decides whether the host can do
//! it and translates to native values.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

macro_rules! bitmask_ops {
    ($name:ident, $repr:ty, $all:expr) => {
        impl $name {
            /// The raw bits.
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Build from raw bits, dropping unknown ones.
            pub const fn from_bits_truncate(bits: $repr) -> Self {
                Self(bits & $all)
            }

            /// Check if no bit is set.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Check if every bit of `other` is set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            /// Check if any bit of `other` is set in `self`.
            pub const fn intersects(self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self::Output {
                Self(self.0 & rhs.0)
            }
        }

        impl BitAndAssign for $name {
            fn bitand_assign(&mut self, rhs: Self) {
                self.0 &= rhs.0;
            }
        }

        impl Not for $name {
            type Output = Self;

            fn not(self) -> Self::Output {
                Self(!self.0 & $all)
            }
        }
    };
}

// ============================================================================
// OpenFlags
// ============================================================================

/// Access mode and creation disposition for opening a file.
///
/// Combine one or both access bits with at most one creation disposition:
///
/// ```
/// use filament::OpenFlags;
///
/// let flags = OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING;
/// assert!(flags.is_valid());
///
/// let conflicting = OpenFlags::CREATE_NEW | OpenFlags::OPEN_ALWAYS;
/// assert!(!conflicting.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// No flags.
    pub const NONE: OpenFlags = OpenFlags(0);
    /// Open for reading.
    pub const ACCESS_READ: OpenFlags = OpenFlags(1 << 0);
    /// Open for writing.
    pub const ACCESS_WRITE: OpenFlags = OpenFlags(1 << 1);
    /// Open for reading and writing.
    pub const ACCESS_READ_WRITE: OpenFlags = OpenFlags(0b11);
    /// Create a new file; fail if it exists.
    pub const CREATE_NEW: OpenFlags = OpenFlags(1 << 2);
    /// Create a new file or truncate an existing one.
    pub const CREATE_ALWAYS: OpenFlags = OpenFlags(1 << 3);
    /// Open an existing file; fail if it does not exist.
    pub const OPEN_EXISTING: OpenFlags = OpenFlags(1 << 4);
    /// Open the file, creating it if needed.
    pub const OPEN_ALWAYS: OpenFlags = OpenFlags(1 << 5);
    /// Open and truncate an existing file; fail if it does not exist.
    pub const TRUNCATE_EXISTING: OpenFlags = OpenFlags(1 << 6);

    /// Every access bit.
    pub const ACCESS_MASK: OpenFlags = OpenFlags(0b11);
    /// Every creation-disposition bit.
    pub const DISPOSITION_MASK: OpenFlags = OpenFlags(0b111_1100);
    const ALL_BITS: u32 = 0b111_1111;

    /// The creation disposition bits that are set.
    pub const fn disposition(self) -> OpenFlags {
        OpenFlags(self.0 & Self::DISPOSITION_MASK.0)
    }

    /// Whether at most one creation disposition is set.
    pub const fn is_valid(self) -> bool {
        self.disposition().0.count_ones() <= 1
    }
}

bitmask_ops!(OpenFlags, u32, OpenFlags::ALL_BITS);

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(OpenFlags, &str); 7] = [
            (OpenFlags::ACCESS_READ, "ACCESS_READ"),
            (OpenFlags::ACCESS_WRITE, "ACCESS_WRITE"),
            (OpenFlags::CREATE_NEW, "CREATE_NEW"),
            (OpenFlags::CREATE_ALWAYS, "CREATE_ALWAYS"),
            (OpenFlags::OPEN_EXISTING, "OPEN_EXISTING"),
            (OpenFlags::OPEN_ALWAYS, "OPEN_ALWAYS"),
            (OpenFlags::TRUNCATE_EXISTING, "TRUNCATE_EXISTING"),
        ];
        let names = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name);
        write_flag_names(f, "OpenFlags", self.is_empty(), names)
    }
}

// ============================================================================
// FilePerms
// ============================================================================

/// POSIX-style permission bits.
///
/// On Windows only the write bits carry meaning (no write bit means the
/// file is read-only); execute and special bits are rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FilePerms(u32);

impl FilePerms {
    /// No permissions.
    pub const NONE: FilePerms = FilePerms(0);
    /// Read permission, owner.
    pub const OWNER_READ: FilePerms = FilePerms(0o400);
    /// Write permission, owner.
    pub const OWNER_WRITE: FilePerms = FilePerms(0o200);
    /// Execute/search permission, owner.
    pub const OWNER_EXEC: FilePerms = FilePerms(0o100);
    /// Read, write, execute/search by owner.
    pub const OWNER_ALL: FilePerms = FilePerms(0o700);
    /// Read permission, group.
    pub const GROUP_READ: FilePerms = FilePerms(0o040);
    /// Write permission, group.
    pub const GROUP_WRITE: FilePerms = FilePerms(0o020);
    /// Execute/search permission, group.
    pub const GROUP_EXEC: FilePerms = FilePerms(0o010);
    /// Read, write, execute/search by group.
    pub const GROUP_ALL: FilePerms = FilePerms(0o070);
    /// Read permission, others.
    pub const OTHERS_READ: FilePerms = FilePerms(0o004);
    /// Write permission, others.
    pub const OTHERS_WRITE: FilePerms = FilePerms(0o002);
    /// Execute/search permission, others.
    pub const OTHERS_EXEC: FilePerms = FilePerms(0o001);
    /// Read, write, execute/search by others.
    pub const OTHERS_ALL: FilePerms = FilePerms(0o007);
    /// Every read, write and execute bit.
    pub const ALL: FilePerms = FilePerms(0o777);
    /// Set-user-ID on execution.
    pub const SET_UID: FilePerms = FilePerms(0o4000);
    /// Set-group-ID on execution.
    pub const SET_GID: FilePerms = FilePerms(0o2000);
    /// Sticky bit.
    pub const STICKY_BIT: FilePerms = FilePerms(0o1000);
    /// Every permission bit including the special ones.
    pub const MASK: FilePerms = FilePerms(0o7777);
    /// Default permissions for newly created files (subject to the umask).
    pub const CREATE_DEFAULT: FilePerms = FilePerms(0o666);

    /// Every write bit.
    pub const WRITE_BITS: FilePerms = FilePerms(0o222);
    /// Every execute bit.
    pub const EXEC_BITS: FilePerms = FilePerms(0o111);
    /// The set-uid, set-gid and sticky bits.
    pub const SPECIAL_BITS: FilePerms = FilePerms(0o7000);
}

bitmask_ops!(FilePerms, u32, 0o7777);

impl fmt::Debug for FilePerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePerms({:#o})", self.0)
    }
}

// ============================================================================
// FileAttrs
// ============================================================================

/// Platform file attributes and flags.
///
/// Which attributes a host understands varies; see
/// [`FileAttrs::host_supported`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileAttrs(u32);

impl FileAttrs {
    /// No attributes.
    pub const NONE: FileAttrs = FileAttrs(0);
    /// Hidden from ordinary directory listings.
    pub const HIDDEN: FileAttrs = FileAttrs(1 << 0);
    /// Used by the operating system.
    pub const SYSTEM: FileAttrs = FileAttrs(1 << 1);
    /// Marked for backup.
    pub const ARCHIVE: FileAttrs = FileAttrs(1 << 2);
    /// Excluded from dumps.
    pub const NO_DUMP: FileAttrs = FileAttrs(1 << 3);
    /// Excluded from content indexing.
    pub const NOT_INDEXED: FileAttrs = FileAttrs(1 << 4);
    /// May not be changed (owner settable).
    pub const USER_IMMUTABLE: FileAttrs = FileAttrs(1 << 5);
    /// May not be changed (superuser settable).
    pub const SYSTEM_IMMUTABLE: FileAttrs = FileAttrs(1 << 6);
    /// May not be unlinked (owner settable).
    pub const USER_NO_UNLINK: FileAttrs = FileAttrs(1 << 7);
    /// May not be unlinked (superuser settable).
    pub const SYSTEM_NO_UNLINK: FileAttrs = FileAttrs(1 << 8);

    /// Every known attribute.
    pub const ALL: FileAttrs = FileAttrs(0x1ff);

    /// Attributes this host can store.
    pub const fn host_supported() -> FileAttrs {
        #[cfg(windows)]
        {
            FileAttrs(Self::HIDDEN.0 | Self::SYSTEM.0 | Self::ARCHIVE.0 | Self::NOT_INDEXED.0)
        }
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            FileAttrs(
                Self::HIDDEN.0
                    | Self::ARCHIVE.0
                    | Self::NO_DUMP.0
                    | Self::USER_IMMUTABLE.0
                    | Self::SYSTEM_IMMUTABLE.0,
            )
        }
        #[cfg(target_os = "freebsd")]
        {
            FileAttrs(
                Self::HIDDEN.0
                    | Self::ARCHIVE.0
                    | Self::NO_DUMP.0
                    | Self::USER_IMMUTABLE.0
                    | Self::SYSTEM_IMMUTABLE.0
                    | Self::USER_NO_UNLINK.0
                    | Self::SYSTEM_NO_UNLINK.0,
            )
        }
        #[cfg(not(any(windows, target_os = "macos", target_os = "ios", target_os = "freebsd")))]
        {
            FileAttrs(0)
        }
    }

    /// Attributes that are rejected outright on this host.
    ///
    /// On hosts without file flags the BSD-only attributes are dropped
    /// silently instead; only the attributes that have a direct meaning
    /// elsewhere are rejected.
    pub const fn host_rejected() -> FileAttrs {
        #[cfg(windows)]
        {
            FileAttrs(Self::ALL.0 & !Self::host_supported().0)
        }
        #[cfg(not(windows))]
        {
            let portable = Self::HIDDEN.0 | Self::SYSTEM.0 | Self::NOT_INDEXED.0;
            FileAttrs(portable & !Self::host_supported().0)
        }
    }
}

bitmask_ops!(FileAttrs, u32, 0x1ff);

impl fmt::Debug for FileAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FileAttrs, &str); 9] = [
            (FileAttrs::HIDDEN, "HIDDEN"),
            (FileAttrs::SYSTEM, "SYSTEM"),
            (FileAttrs::ARCHIVE, "ARCHIVE"),
            (FileAttrs::NO_DUMP, "NO_DUMP"),
            (FileAttrs::NOT_INDEXED, "NOT_INDEXED"),
            (FileAttrs::USER_IMMUTABLE, "USER_IMMUTABLE"),
            (FileAttrs::SYSTEM_IMMUTABLE, "SYSTEM_IMMUTABLE"),
            (FileAttrs::USER_NO_UNLINK, "USER_NO_UNLINK"),
            (FileAttrs::SYSTEM_NO_UNLINK, "SYSTEM_NO_UNLINK"),
        ];
        let names = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name);
        write_flag_names(f, "FileAttrs", self.is_empty(), names)
    }
}

fn write_flag_names<'a>(
    f: &mut fmt::Formatter<'_>,
    type_name: &str,
    empty: bool,
    names: impl Iterator<Item = &'a str>,
) -> fmt::Result {
    write!(f, "{type_name}(")?;
    if empty {
        write!(f, "NONE")?;
    }
    for (i, name) in names.enumerate() {
        if i > 0 {
            write!(f, " | ")?;
        }
        write!(f, "{name}")?;
    }
    write!(f, ")")
}

// ============================================================================
// Modification modes
// ============================================================================

/// How [`set_permissions`](crate::FileHandle::set_permissions) combines the
/// given bits with the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilePermOptions {
    /// Replace the current permissions.
    #[default]
    Replace,
    /// Set the given bits in addition to the current ones.
    Add,
    /// Clear the given bits.
    Remove,
}

impl FilePermOptions {
    /// Combine `current` with `requested` according to this mode.
    pub fn apply(self, current: FilePerms, requested: FilePerms) -> FilePerms {
        match self {
            Self::Replace => requested,
            Self::Add => current | requested,
            Self::Remove => current & !requested,
        }
    }
}

/// How [`set_attributes`](crate::FileHandle::set_attributes) combines the
/// given attributes with the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileAttrOptions {
    /// Replace the current attributes.
    #[default]
    Replace,
    /// Set the given attributes in addition to the current ones.
    Add,
    /// Clear the given attributes.
    Remove,
}

impl FileAttrOptions {
    /// Combine `current` with `requested` according to this mode.
    pub fn apply(self, current: FileAttrs, requested: FileAttrs) -> FileAttrs {
        match self {
            Self::Replace => requested,
            Self::Add => current | requested,
            Self::Remove => current & !requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_validity() {
        let dispositions = [
            OpenFlags::CREATE_NEW,
            OpenFlags::CREATE_ALWAYS,
            OpenFlags::OPEN_EXISTING,
            OpenFlags::OPEN_ALWAYS,
            OpenFlags::TRUNCATE_EXISTING,
        ];

        assert!(OpenFlags::ACCESS_READ.is_valid());
        for a in dispositions {
            assert!((OpenFlags::ACCESS_READ_WRITE | a).is_valid());
            for b in dispositions {
                if a != b {
                    assert!(!(OpenFlags::ACCESS_READ | a | b).is_valid(), "{a:?} + {b:?}");
                }
            }
        }
    }

    #[test]
    fn test_open_flags_disposition() {
        let flags = OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS;
        assert_eq!(flags.disposition(), OpenFlags::CREATE_ALWAYS);
        assert!(flags.contains(OpenFlags::ACCESS_WRITE));
        assert!(!flags.contains(OpenFlags::ACCESS_READ_WRITE));
        assert!(flags.intersects(OpenFlags::ACCESS_READ_WRITE));
    }

    #[test]
    fn test_perm_values() {
        assert_eq!(FilePerms::OWNER_ALL.bits(), 0o700);
        assert_eq!(
            FilePerms::OWNER_READ | FilePerms::GROUP_READ | FilePerms::OTHERS_READ,
            FilePerms::from_bits_truncate(0o444)
        );
        assert_eq!(FilePerms::from_bits_truncate(0o17777), FilePerms::MASK);
        assert_eq!(!FilePerms::NONE, FilePerms::MASK);
    }

    #[test]
    fn test_perm_options() {
        let current = FilePerms::from_bits_truncate(0o644);
        assert_eq!(
            FilePermOptions::Add.apply(current, FilePerms::OWNER_EXEC).bits(),
            0o744
        );
        assert_eq!(
            FilePermOptions::Remove.apply(current, FilePerms::GROUP_READ).bits(),
            0o604
        );
        assert_eq!(
            FilePermOptions::Replace.apply(current, FilePerms::OWNER_READ).bits(),
            0o400
        );
        let added = FilePermOptions::Add.apply(current, FilePerms::OTHERS_WRITE);
        assert_eq!(FilePermOptions::Remove.apply(added, FilePerms::OTHERS_WRITE), current);
    }

    #[test]
    fn test_attr_options() {
        let current = FileAttrs::ARCHIVE;
        let added = FileAttrOptions::Add.apply(current, FileAttrs::HIDDEN);
        assert_eq!(added, FileAttrs::ARCHIVE | FileAttrs::HIDDEN);
        assert_eq!(FileAttrOptions::Remove.apply(added, FileAttrs::HIDDEN), current);
        assert_eq!(FileAttrOptions::default(), FileAttrOptions::Replace);
    }

    #[test]
    fn test_host_sets_are_disjoint() {
        assert!(!FileAttrs::host_supported().intersects(FileAttrs::host_rejected()));
        assert!(FileAttrs::ALL.contains(FileAttrs::host_supported()));
    }

    #[test]
    fn test_debug_names() {
        let flags = OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING;
        assert_eq!(format!("{flags:?}"), "OpenFlags(ACCESS_READ | OPEN_EXISTING)");
        assert_eq!(format!("{:?}", FileAttrs::NONE), "FileAttrs(NONE)");
        assert_eq!(format!("{:?}", FilePerms::CREATE_DEFAULT), "FilePerms(0o666)");
    }
}
