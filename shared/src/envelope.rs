//! Client-to-server message payloads
//!
//! A payload is either opaque text or a comma-joined envelope
//! `verb,timestamp,senderIp,senderId,text`. The split is bounded to five parts
//! so the message text may itself contain commas.

use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

/// Wire format of envelope timestamps (`yyyy-MM-dd HH:mm:ss`, local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ENVELOPE_FIELDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    SendMessage,
    SendMessageWithDetails,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::SendMessage => "SendMessage",
            Verb::SendMessageWithDetails => "SendMessageWithDetails",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SendMessage" => Ok(Verb::SendMessage),
            "SendMessageWithDetails" => Ok(Verb::SendMessageWithDetails),
            other => Err(UnknownVerb(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub verb: Verb,
    /// Kept verbatim so a peer's clock format never breaks relaying
    pub timestamp: String,
    pub sender_ip: String,
    pub sender_id: String,
    pub text: String,
}

impl MessageEnvelope {
    /// Builds an envelope stamped with the current local time
    pub fn new(verb: Verb, sender_ip: &str, sender_id: &str, text: &str) -> Self {
        Self {
            verb,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            sender_ip: sender_ip.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
        }
    }

    /// Returns None unless the payload splits into five fields with a known verb
    pub fn parse(payload: &str) -> Option<Self> {
        let mut parts = payload.splitn(ENVELOPE_FIELDS, ',');
        let verb = parts.next()?.parse::<Verb>().ok()?;
        let timestamp = parts.next()?;
        let sender_ip = parts.next()?;
        let sender_id = parts.next()?;
        let text = parts.next()?;

        Some(Self {
            verb,
            timestamp: timestamp.to_string(),
            sender_ip: sender_ip.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
        })
    }

    pub fn to_payload(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.verb, self.timestamp, self.sender_ip, self.sender_id, self.text
        )
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }

    /// Text forwarded to other peers. Detailed sends carry their metadata along.
    pub fn relay_text(&self) -> String {
        match self.verb {
            Verb::SendMessage => self.text.clone(),
            Verb::SendMessageWithDetails => format!(
                "{}, {}, {}, {}",
                self.text, self.sender_ip, self.sender_id, self.timestamp
            ),
        }
    }
}

/// A decoded line as the relay sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Envelope(MessageEnvelope),
    Opaque(String),
}

impl Payload {
    pub fn parse(payload: &str) -> Self {
        match MessageEnvelope::parse(payload) {
            Some(envelope) => Payload::Envelope(envelope),
            None => Payload::Opaque(payload.to_string()),
        }
    }

    pub fn relay_text(&self) -> String {
        match self {
            Payload::Envelope(envelope) => envelope.relay_text(),
            Payload::Opaque(text) => text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detailed_envelope_keeps_commas_in_text() {
        let envelope = MessageEnvelope::parse(
            "SendMessageWithDetails,2023-10-15 10:00:00,10.0.0.5,abc-123,hello, world",
        )
        .unwrap();

        assert_eq!(envelope.verb, Verb::SendMessageWithDetails);
        assert_eq!(envelope.timestamp, "2023-10-15 10:00:00");
        assert_eq!(envelope.sender_ip, "10.0.0.5");
        assert_eq!(envelope.sender_id, "abc-123");
        assert_eq!(envelope.text, "hello, world");
    }

    #[test]
    fn test_parse_allows_empty_text() {
        let envelope = MessageEnvelope::parse("SendMessage,2023-10-15 10:00:00,1.2.3.4,id,").unwrap();
        assert_eq!(envelope.text, "");
    }

    #[test]
    fn test_parse_rejects_short_payload() {
        assert!(MessageEnvelope::parse("SendMessage,2023-10-15 10:00:00,1.2.3.4").is_none());
        assert!(MessageEnvelope::parse("just some text").is_none());
        assert!(MessageEnvelope::parse("").is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_verb() {
        assert!(MessageEnvelope::parse("Shout,2023-10-15 10:00:00,1.2.3.4,id,hey").is_none());
    }

    #[test]
    fn test_payload_falls_back_to_opaque() {
        let text = "Shout,2023-10-15 10:00:00,1.2.3.4,id,hey";
        assert_eq!(Payload::parse(text), Payload::Opaque(text.to_string()));
        assert_eq!(Payload::parse(text).relay_text(), text);
    }

    #[test]
    fn test_relay_text_per_verb() {
        let plain = Payload::parse("SendMessage,2023-10-15 10:00:00,10.0.0.5,abc-123,hi");
        assert_eq!(plain.relay_text(), "hi");

        let detailed =
            Payload::parse("SendMessageWithDetails,2023-10-15 10:00:00,10.0.0.5,abc-123,hi");
        assert_eq!(
            detailed.relay_text(),
            "hi, 10.0.0.5, abc-123, 2023-10-15 10:00:00"
        );
    }

    #[test]
    fn test_new_envelope_roundtrips_through_payload() {
        let envelope = MessageEnvelope::new(Verb::SendMessage, "127.0.0.1", "client-1", "a, b");
        let parsed = MessageEnvelope::parse(&envelope.to_payload()).unwrap();

        assert_eq!(parsed, envelope);
        assert!(parsed.parsed_timestamp().is_some());
    }

    #[test]
    fn test_parsed_timestamp_rejects_other_formats() {
        let envelope = MessageEnvelope::parse("SendMessage,15/10/2023,1.2.3.4,id,hi").unwrap();
        assert!(envelope.parsed_timestamp().is_none());
    }

    #[test]
    fn test_verb_from_str() {
        assert_eq!("SendMessage".parse::<Verb>(), Ok(Verb::SendMessage));
        assert_eq!(
            "SendMessageWithDetails".parse::<Verb>(),
            Ok(Verb::SendMessageWithDetails)
        );
        assert_eq!(
            "sendmessage".parse::<Verb>(),
            Err(UnknownVerb("sendmessage".to_string()))
        );
    }
}
