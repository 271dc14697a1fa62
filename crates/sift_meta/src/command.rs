//! Command metadata shared by hosts that register `FT.INTERNAL_UPDATE`.

use std::fmt;
use std::str::FromStr;

/// ACL category a command belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandCategory {
    Admin,
    Read,
    Write,
    Fast,
    Search,
    Connection,
}

impl CommandCategory {
    pub const ALL: [CommandCategory; 6] = [
        CommandCategory::Admin,
        CommandCategory::Read,
        CommandCategory::Write,
        CommandCategory::Fast,
        CommandCategory::Search,
        CommandCategory::Connection,
    ];

    pub fn acl_name(self) -> &'static str {
        match self {
            CommandCategory::Admin => "admin",
            CommandCategory::Read => "read",
            CommandCategory::Write => "write",
            CommandCategory::Fast => "fast",
            CommandCategory::Search => "search",
            CommandCategory::Connection => "connection",
        }
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.acl_name())
    }
}

impl FromStr for CommandCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix('@').unwrap_or(s);
        CommandCategory::ALL
            .into_iter()
            .find(|category| category.acl_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("unknown command category '{s}'"))
    }
}

pub const INTERNAL_UPDATE_COMMAND: &str = "FT.INTERNAL_UPDATE";

/// Command name plus identifier, entry and header.
pub const INTERNAL_UPDATE_ARITY: usize = 4;

/// Replication-only: never part of a read, write, fast or search category.
pub const INTERNAL_UPDATE_CATEGORIES: &[CommandCategory] = &[CommandCategory::Admin];
