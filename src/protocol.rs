//! Wire protocol: control lines and client command parsing.
//!
//! The protocol is line oriented, one UTF-8 line per message. A client opens
//! with a username line and a token line (possibly empty); afterwards any
//! `/`-prefixed line is a command and everything else is chat text for the
//! sender's current room.

/// Prefix of the control line carrying a freshly issued session token.
pub const TOKEN_PREFIX: &str = "TOKEN:";

/// Control line sent to a user right before a forced close.
pub const BANNED_LINE: &str = "BANNED:";

/// Prefix of the control line notifying a user of a role change.
pub const ROLE_UPDATE_PREFIX: &str = "ROLE_UPDATE:";

/// Notice sent when a presented session token fails validation.
pub const SESSION_EXPIRED_LINE: &str = "Your session has expired. Please login again.";

/// A parsed `/`-prefixed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    CreateRoom { name: String },
    CreateAiRoom { name: String, prompt: String },
    Join { name: String },
    Leave,
    Rooms,
    Users,
    Help,
    Status,
    Disconnect,
    // admin-only
    Ban { target: String },
    Mute { target: String },
    Unmute { target: String },
    Promote { target: String },
    Demote { target: String },
    Announce { text: String },
    Kick { target: String },
    Stats,
    /// Unrecognized or malformed command; the handler answers with a hint
    Unknown { word: String },
}

impl ClientCommand {
    /// Whether this command is gated on the admin role.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            ClientCommand::Ban { .. }
                | ClientCommand::Mute { .. }
                | ClientCommand::Unmute { .. }
                | ClientCommand::Promote { .. }
                | ClientCommand::Demote { .. }
                | ClientCommand::Announce { .. }
                | ClientCommand::Kick { .. }
                | ClientCommand::Stats
        )
    }
}

/// Parse one input line into a command.
///
/// # Returns
///
/// `None` when the line is not `/`-prefixed, i.e. plain chat text.
pub fn parse_command(line: &str) -> Option<ClientCommand> {
    let rest = line.strip_prefix('/')?;
    let (word, arg) = match rest.split_once(' ') {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };

    let unknown = || ClientCommand::Unknown {
        word: word.to_string(),
    };

    let command = match word {
        "create" => match arg {
            "" => unknown(),
            arg => parse_create(arg).unwrap_or_else(unknown),
        },
        "join" if !arg.is_empty() => ClientCommand::Join {
            name: arg.to_string(),
        },
        "leave" => ClientCommand::Leave,
        "rooms" => ClientCommand::Rooms,
        "users" => ClientCommand::Users,
        "help" => ClientCommand::Help,
        "status" => ClientCommand::Status,
        "disconnect" | "exit" | "quit" => ClientCommand::Disconnect,
        "ban" if !arg.is_empty() => ClientCommand::Ban {
            target: arg.to_string(),
        },
        "mute" if !arg.is_empty() => ClientCommand::Mute {
            target: arg.to_string(),
        },
        "unmute" if !arg.is_empty() => ClientCommand::Unmute {
            target: arg.to_string(),
        },
        "promote" if !arg.is_empty() => ClientCommand::Promote {
            target: arg.to_string(),
        },
        "demote" if !arg.is_empty() => ClientCommand::Demote {
            target: arg.to_string(),
        },
        "announce" if !arg.is_empty() => ClientCommand::Announce {
            text: arg.to_string(),
        },
        "kick" if !arg.is_empty() => ClientCommand::Kick {
            target: arg.to_string(),
        },
        "stats" => ClientCommand::Stats,
        _ => unknown(),
    };
    Some(command)
}

/// Parse the argument of `/create`: either a plain room name or
/// `ai:<name>:<prompt>`.
fn parse_create(arg: &str) -> Option<ClientCommand> {
    match arg.strip_prefix("ai:") {
        Some(rest) => {
            let (name, prompt) = rest.split_once(':')?;
            if name.is_empty() || prompt.is_empty() {
                return None;
            }
            Some(ClientCommand::CreateAiRoom {
                name: name.to_string(),
                prompt: prompt.to_string(),
            })
        }
        None => Some(ClientCommand::CreateRoom {
            name: arg.to_string(),
        }),
    }
}
