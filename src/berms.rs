//! POSIX permissions as `rwx` strings
//!
//! ```rust
//! use gap_bolts::berms::FilePerms;
//!
//! let perms = FilePerms::new("rw", "r", "").unwrap();
//! assert_eq!(perms.mode(), 0o640);
//! assert_eq!(FilePerms::from_mode(0o755).to_string(), "FilePerms(user='rwx', group='rx', other='rx')");
//! ```

use std::{fmt, fs, path::Path, str::FromStr};

use cfg_if::cfg_if;

use crate::misc::{IoResultExt, PathError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PermsError {
    #[error("Invalid {field} permission {found:?}: expected only characters from 'rwx'")]
    InvalidChar { field: &'static str, found: char },
}

/// One of user/group/other.
/// Stored as the 3-bit value, displayed in canonical `rwx` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PermSet(u8);

impl PermSet {
    pub const READ: u8 = 0b100;
    pub const WRITE: u8 = 0b010;
    pub const EXEC: u8 = 0b001;

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self((bits & 0b111) as u8)
    }

    fn parse(field: &'static str, s: &str) -> Result<Self, PermsError> {
        s.chars().try_fold(Self(0), |acc, c| {
            let bit = match c {
                'r' => Self::READ,
                'w' => Self::WRITE,
                'x' => Self::EXEC,
                found => return Err(PermsError::InvalidChar { field, found }),
            };
            Ok(Self(acc.0 | bit))
        })
    }
}

impl FromStr for PermSet {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse("permission", s)
    }
}

impl fmt::Display for PermSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, c) in [(Self::READ, 'r'), (Self::WRITE, 'w'), (Self::EXEC, 'x')] {
            if self.0 & bit != 0 {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// Permission bits for user, group and other.
///
/// Strings are validated once on the way in; repeated or out-of-order characters are
/// accepted and normalized, so `"xrr"` reads back as `"rx"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FilePerms {
    user: PermSet,
    group: PermSet,
    other: PermSet,
}

impl FilePerms {
    pub fn new(user: &str, group: &str, other: &str) -> Result<Self, PermsError> {
        Ok(Self {
            user: PermSet::parse("user", user)?,
            group: PermSet::parse("group", group)?,
            other: PermSet::parse("other", other)?,
        })
    }

    /// Only the low 9 bits are considered; setuid/setgid/sticky are dropped.
    pub fn from_mode(mode: u32) -> Self {
        Self {
            user: PermSet::from_bits(mode >> 6),
            group: PermSet::from_bits(mode >> 3),
            other: PermSet::from_bits(mode),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PathError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).at("read permissions of", path)?;
        Ok(Self::from_mode(mode_of(&metadata.permissions())))
    }

    pub fn mode(&self) -> u32 {
        (u32::from(self.user.0) << 6) | (u32::from(self.group.0) << 3) | u32::from(self.other.0)
    }

    /// chmod
    pub fn apply(&self, path: impl AsRef<Path>) -> Result<(), PathError> {
        set_mode(path.as_ref(), self.mode())
    }

    pub fn user(&self) -> PermSet {
        self.user
    }

    pub fn group(&self) -> PermSet {
        self.group
    }

    pub fn other(&self) -> PermSet {
        self.other
    }

    pub fn set_user(&mut self, perms: &str) -> Result<(), PermsError> {
        self.user = PermSet::parse("user", perms)?;
        Ok(())
    }

    pub fn set_group(&mut self, perms: &str) -> Result<(), PermsError> {
        self.group = PermSet::parse("group", perms)?;
        Ok(())
    }

    pub fn set_other(&mut self, perms: &str) -> Result<(), PermsError> {
        self.other = PermSet::parse("other", perms)?;
        Ok(())
    }
}

impl From<FilePerms> for u32 {
    fn from(perms: FilePerms) -> Self {
        perms.mode()
    }
}

impl fmt::Display for FilePerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FilePerms(user='{}', group='{}', other='{}')",
            self.user, self.group, self.other
        )
    }
}

// ------------ MODE BITS -------------

cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::fs::PermissionsExt;

        /// Permission bits of `perms` (S_IMODE)
        pub fn mode_of(perms: &fs::Permissions) -> u32 {
            perms.mode() & 0o7777
        }

        /// Set the permission bits of `path`, ignoring the umask
        pub fn set_mode(path: &Path, mode: u32) -> Result<(), PathError> {
            fs::set_permissions(path, fs::Permissions::from_mode(mode)).at("chmod", path)
        }
    } else {
        /// Without POSIX modes, a read-only file reads as 0o444 and anything else as 0o666
        pub fn mode_of(perms: &fs::Permissions) -> u32 {
            if perms.readonly() { 0o444 } else { 0o666 }
        }

        /// Without POSIX modes only the write bits are honored, as the read-only flag
        pub fn set_mode(path: &Path, mode: u32) -> Result<(), PathError> {
            let mut perms = fs::metadata(path).at("read permissions of", path)?.permissions();
            perms.set_readonly(mode & 0o222 == 0);
            fs::set_permissions(path, perms).at("chmod", path)
        }
    }
}
