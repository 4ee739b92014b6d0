use crate::events::ClientEvent;

/// Formats an event as one line of terminal output
pub fn render_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Connected => "*** Connected to the chat server".to_string(),
        ClientEvent::Disconnected => "*** Disconnected from the chat server".to_string(),
        ClientEvent::MessageReceived(text) => format!("> {}", text),
        ClientEvent::ErrorOccurred(message) => format!("!!! {}", message),
    }
}

pub fn render_banner(client_id: &str, host: &str, port: u16) -> String {
    format!(
        "Chatting as {} via {}:{}. Type messages and press Enter, /details <text> to include sender details, /quit to leave.",
        client_id, host, port
    )
}
