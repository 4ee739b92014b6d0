//! Console input parsing for the chat client

/// What a line typed by the user asks the client to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    SendWithDetails(String),
    Quit,
    Empty,
}

/// Interprets one console line
///
/// `/quit` disconnects, `/details <text>` sends with sender metadata attached,
/// anything else is sent as a message. With `details_by_default` every plain
/// message carries metadata.
pub fn parse_command(line: &str, details_by_default: bool) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.trim().is_empty() {
        return Command::Empty;
    }

    if matches!(line.trim(), "/quit" | "/exit") {
        return Command::Quit;
    }

    if let Some(text) = line.strip_prefix("/details ") {
        return Command::SendWithDetails(text.to_string());
    }

    if details_by_default {
        Command::SendWithDetails(line.to_string())
    } else {
        Command::Send(line.to_string())
    }
}
