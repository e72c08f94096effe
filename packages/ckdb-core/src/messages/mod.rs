//! Command table and request parsing.

mod breakdown;

pub use breakdown::{breakdown, ParseError, Request};

/// Field separator byte inside message data and tabular replies.
pub const FLDSEP: u8 = 0x02;

/// Maximum bytes of the caller-supplied message id kept for the reply.
pub const ID_SIZE: usize = 31;

/// Nested `method` values carried inside `sharelog` messages.
pub mod methods {
    pub const WORKINFO: &str = "workinfo";
    pub const SHARES: &str = "shares";
    pub const SHAREERRORS: &str = "shareerror";
    pub const AUTH: &str = "authorise";
}

/// The verbs the listener understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Terminate the accept loop.
    Shutdown,
    /// Liveness probe.
    Ping,
    /// Workinfo / shares / shareerror ingest, multiplexed on `method`.
    Sharelog,
    /// Worker authorisation (`method=authorise`).
    Authorise,
    /// User registration.
    AddUser,
    /// Password-hash check.
    ChkPass,
    /// Periodic pool statistics.
    PoolStats,
    /// Manual idcontrol row creation.
    NewId,
    /// Payment listing for one user.
    Payments,
}

/// Caller classes a command is intended for.
///
/// Recorded on every command but advisory: the listener does not inspect
/// peer credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access(u8);

impl Access {
    /// The pool process.
    pub const POOL: Self = Self(0b001);
    /// Operator tooling.
    pub const SYSTEM: Self = Self(0b010);
    /// The web/admin console.
    pub const WEB: Self = Self(0b100);
    /// Operator tooling and the web console.
    pub const SYSTEM_WEB: Self = Self(0b110);

    /// Whether `other`'s class is included in this one.
    #[must_use]
    pub fn allows(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// One row of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    pub verb: &'static str,
    pub command: Command,
    pub access: Access,
}

/// The command table, in dispatch order.
pub const COMMANDS: &[CommandDef] = &[
    CommandDef {
        verb: "shutdown",
        command: Command::Shutdown,
        access: Access::SYSTEM,
    },
    CommandDef {
        verb: "ping",
        command: Command::Ping,
        access: Access::SYSTEM_WEB,
    },
    CommandDef {
        verb: "sharelog",
        command: Command::Sharelog,
        access: Access::POOL,
    },
    CommandDef {
        verb: "authorise",
        command: Command::Authorise,
        access: Access::POOL,
    },
    CommandDef {
        verb: "adduser",
        command: Command::AddUser,
        access: Access::WEB,
    },
    CommandDef {
        verb: "chkpass",
        command: Command::ChkPass,
        access: Access::WEB,
    },
    CommandDef {
        verb: "poolstats",
        command: Command::PoolStats,
        access: Access::WEB,
    },
    CommandDef {
        verb: "newid",
        command: Command::NewId,
        access: Access::SYSTEM,
    },
    CommandDef {
        verb: "payments",
        command: Command::Payments,
        access: Access::WEB,
    },
];

/// Case-insensitive verb lookup.
#[must_use]
pub fn lookup(verb: &str) -> Option<&'static CommandDef> {
    COMMANDS
        .iter()
        .find(|def| def.verb.eq_ignore_ascii_case(verb))
}
