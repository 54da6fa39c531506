use std::collections::BTreeSet;

use serde::Deserialize;

/// One update as delivered by getUpdates.
/// https://core.telegram.org/bots/api#update
#[derive(Debug, Clone, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Membership change of the bot in a chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
}

/// Annotation over a span of message text. Offset and length are in UTF-16 code units.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

impl MessageEntity {
    pub fn is_bot_command(&self) -> bool {
        self.kind == "bot_command"
    }
}

/// A view of one of the sections an update can carry, in lookup priority order.
#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    Message(&'a Message),
    Edited(&'a Message),
    Membership(&'a ChatMemberUpdated),
}

impl<'a> Source<'a> {
    fn chat_id(self) -> Option<i64> {
        match self {
            Source::Message(m) | Source::Edited(m) => Some(m.chat.id),
            Source::Membership(c) => Some(c.chat.id),
        }
    }

    fn sender_id(self) -> Option<i64> {
        match self {
            Source::Message(m) | Source::Edited(m) => m.from.as_ref().map(|u| u.id),
            Source::Membership(c) => Some(c.from.id),
        }
    }

    fn message_id(self) -> Option<i64> {
        match self {
            Source::Message(m) | Source::Edited(m) => Some(m.message_id),
            Source::Membership(_) => None,
        }
    }

    fn text_message(self) -> Option<&'a Message> {
        match self {
            Source::Message(m) | Source::Edited(m) => {
                m.text.as_deref().filter(|t| !t.is_empty()).map(|_| m)
            }
            Source::Membership(_) => None,
        }
    }
}

impl RawUpdate {
    fn sources(&self) -> impl Iterator<Item = Source<'_>> {
        [
            self.message.as_ref().map(Source::Message),
            self.edited_message.as_ref().map(Source::Edited),
            self.my_chat_member.as_ref().map(Source::Membership),
        ]
        .into_iter()
        .flatten()
    }
}

/// An update reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpdate {
    pub update_id: i64,
    /// Message text with every command span removed.
    pub text: String,
    pub commands: BTreeSet<String>,
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub message_id: Option<i64>,
    pub is_edited: bool,
    /// Set when the update carries membership data; a hint, not a chat-type check.
    pub is_from_group: bool,
}

impl ParsedUpdate {
    pub fn parse(raw: &RawUpdate) -> Self {
        let (text, commands) = match raw.sources().find_map(|s| s.text_message()) {
            Some(message) => strip_commands(
                message.text.as_deref().unwrap_or_default(),
                &message.entities,
            ),
            None => (String::new(), BTreeSet::new()),
        };

        Self {
            update_id: raw.update_id,
            text,
            commands,
            chat_id: raw.sources().find_map(|s| s.chat_id()),
            sender_id: raw.sources().find_map(|s| s.sender_id()),
            message_id: raw.sources().find_map(|s| s.message_id()),
            is_edited: raw.edited_message.is_some(),
            is_from_group: raw.my_chat_member.is_some(),
        }
    }
}

impl From<&RawUpdate> for ParsedUpdate {
    fn from(raw: &RawUpdate) -> Self {
        Self::parse(raw)
    }
}

/// Cut every `bot_command` span out of `text`, highest offset first so the
/// lower offsets stay valid. The character right after each span is dropped
/// together with it (normally the separating space).
fn strip_commands(text: &str, entities: &[MessageEntity]) -> (String, BTreeSet<String>) {
    let mut spans: Vec<(usize, usize)> = entities
        .iter()
        .filter(|e| e.is_bot_command())
        .map(|e| (e.offset, e.offset + e.length))
        .collect();
    spans.sort_by(|a, b| b.0.cmp(&a.0));

    let mut remaining = text.to_string();
    let mut commands = BTreeSet::new();

    for (start, end) in spans {
        let start = byte_index(&remaining, start);
        let end = byte_index(&remaining, end).max(start);

        let token = &remaining[start..end];
        if !token.is_empty() {
            commands.insert(token.to_string());
        }

        let resume = remaining[end..]
            .chars()
            .next()
            .map_or(end, |c| end + c.len_utf8());
        remaining = format!("{}{}", &remaining[..start], &remaining[resume..]);
    }

    (remaining, commands)
}

/// Map a UTF-16 offset onto a char boundary of `text`, clamping past the end.
fn byte_index(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        if units >= utf16_offset {
            return idx;
        }
        units += ch.len_utf16();
    }
    text.len()
}
