//! Parsing of typed input lines.

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Say something to everyone.
    Group(String),
    /// Say something to one user.
    Private { recipient: String, body: String },
    /// Show who is online.
    Who,
    /// Leave the relay.
    Quit,
    /// Show the command list.
    Help,
    /// Nothing to do.
    Empty,
    /// An unrecognised or incomplete command.
    Invalid(String),
}

pub const HELP: &str = "\
/msg <user> <text>  private message
/who                list online users
/quit               leave
anything else       message everyone";

/// Parse one input line.
///
/// `own_name` is the name this client registered; a private message to
/// oneself goes to the group instead.
#[must_use]
pub fn parse(line: &str, own_name: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Group(line.to_string());
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/msg" | "/w" => {
            let Some((recipient, body)) = rest.trim_start().split_once(' ') else {
                return Command::Invalid("usage: /msg <user> <text>".into());
            };
            if body.trim().is_empty() {
                return Command::Invalid("usage: /msg <user> <text>".into());
            }
            if recipient == own_name {
                Command::Group(body.to_string())
            } else {
                Command::Private {
                    recipient: recipient.to_string(),
                    body: body.to_string(),
                }
            }
        }
        "/who" => Command::Who,
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        other => Command::Invalid(format!("unknown command {other}, try /help")),
    }
}
