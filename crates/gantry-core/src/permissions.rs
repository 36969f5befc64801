//! Per-server capability bits granted to sub-users.
//!
//! Owners implicitly hold every bit; sub-users hold what the directory lists
//! for them; everyone else holds nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of server permissions stored as a bit mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    /// No permissions.
    pub const NONE: Self = Self(0);
    /// Read the live console and its history.
    pub const VIEW_CONSOLE: Self = Self(1 << 0);
    /// Execute console commands.
    pub const USE_CONSOLE: Self = Self(1 << 1);
    /// Start, stop and restart the server.
    pub const CONTROL_SERVER: Self = Self(1 << 2);
    /// List and download files.
    pub const READ_FILES: Self = Self(1 << 3);
    /// Upload and replace files.
    pub const WRITE_FILES: Self = Self(1 << 4);
    /// See and manage connected players.
    pub const MANAGE_PLAYERS: Self = Self(1 << 5);
    /// View performance data.
    pub const VIEW_PERFORMANCE: Self = Self(1 << 6);
    /// View installed plugins.
    pub const VIEW_PLUGINS: Self = Self(1 << 7);
    /// Install and remove plugins.
    pub const MANAGE_PLUGINS: Self = Self(1 << 8);
    /// Manage sub-users.
    pub const MANAGE_SUBUSERS: Self = Self(1 << 9);
    /// Manage third-party integrations.
    pub const MANAGE_INTEGRATIONS: Self = Self(1 << 10);
    /// Full server management, including filesystem root access.
    pub const MANAGE_SERVER: Self = Self(1 << 11);
    /// Every permission.
    pub const ALL: Self = Self((1 << 12) - 1);

    /// Build from raw bits. Unknown bits are kept.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit mask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_every_named_bit() {
        for p in [
            Permissions::VIEW_CONSOLE,
            Permissions::USE_CONSOLE,
            Permissions::READ_FILES,
            Permissions::WRITE_FILES,
            Permissions::MANAGE_SERVER,
        ] {
            assert!(Permissions::ALL.contains(p));
        }
    }

    #[test]
    fn combined_bits() {
        let p = Permissions::VIEW_CONSOLE | Permissions::READ_FILES;
        assert!(p.contains(Permissions::VIEW_CONSOLE));
        assert!(p.contains(Permissions::READ_FILES));
        assert!(!p.contains(Permissions::WRITE_FILES));
        assert!(!p.contains(Permissions::VIEW_CONSOLE | Permissions::USE_CONSOLE));
    }

    #[test]
    fn none_is_empty() {
        assert!(Permissions::NONE.is_empty());
        assert!(Permissions::NONE.contains(Permissions::NONE));
    }

    #[test]
    fn serde_is_raw_bits() {
        let p: Permissions = serde_json::from_str("9").unwrap();
        assert!(p.contains(Permissions::VIEW_CONSOLE));
        assert!(p.contains(Permissions::READ_FILES));
        assert_eq!(serde_json::to_string(&p).unwrap(), "9");
    }
}
