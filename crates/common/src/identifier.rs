//! Framework-wide chat identifiers and their canonical string form.
//!
//! A chat is addressed by the channel that owns it plus the channel-local
//! chat uid, optionally narrowed to a group. The canonical form is
//! `channel_id#chat_uid[#group_id]` and is what the binding store and the
//! message log use as keys.
//!
//! Components may contain any character. `%` and `#` are percent-escaped
//! (`%25`, `%23`) so that [`decode`] always inverts [`encode`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Channel id of the Telegram master channel.
pub const MASTER_CHANNEL_ID: &str = "blueset.telegram";

const SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("malformed chat identifier {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

impl IdentifierError {
    fn malformed(input: &str, reason: &'static str) -> Self {
        Self::Malformed {
            input: input.to_string(),
            reason,
        }
    }
}

/// Composite, immutable chat identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatIdentifier {
    channel_id: String,
    chat_uid: String,
    group_id: Option<String>,
}

impl ChatIdentifier {
    /// Build an identifier, rejecting empty components.
    pub fn new(
        channel_id: impl Into<String>,
        chat_uid: impl Into<String>,
    ) -> Result<Self, IdentifierError> {
        let channel_id = channel_id.into();
        let chat_uid = chat_uid.into();
        if channel_id.is_empty() {
            return Err(IdentifierError::malformed(&channel_id, "empty channel id"));
        }
        if chat_uid.is_empty() {
            return Err(IdentifierError::malformed(&channel_id, "empty chat uid"));
        }
        Ok(Self {
            channel_id,
            chat_uid,
            group_id: None,
        })
    }

    /// Narrow this identifier to a group.
    pub fn with_group(mut self, group_id: impl Into<String>) -> Result<Self, IdentifierError> {
        let group_id = group_id.into();
        if group_id.is_empty() {
            return Err(IdentifierError::malformed(&self.chat_uid, "empty group id"));
        }
        self.group_id = Some(group_id);
        Ok(self)
    }

    /// Identifier of a Telegram chat on the master channel.
    #[must_use]
    pub fn telegram(chat_id: i64) -> Self {
        Self {
            channel_id: MASTER_CHANNEL_ID.to_string(),
            chat_uid: chat_id.to_string(),
            group_id: None,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn chat_uid(&self) -> &str {
        &self.chat_uid
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn is_master(&self) -> bool {
        self.channel_id == MASTER_CHANNEL_ID
    }

    /// Numeric Telegram chat id, for identifiers owned by the master channel.
    pub fn telegram_chat_id(&self) -> Result<i64, IdentifierError> {
        if !self.is_master() {
            return Err(IdentifierError::malformed(
                &self.encode(),
                "not a telegram chat",
            ));
        }
        self.chat_uid
            .parse::<i64>()
            .map_err(|_| IdentifierError::malformed(&self.encode(), "non-numeric telegram chat id"))
    }

    /// Canonical string form.
    #[must_use]
    pub fn encode(&self) -> String {
        encode(&self.channel_id, &self.chat_uid, self.group_id.as_deref())
    }
}

/// Encode identifier components into the canonical `channel#uid[#group]` form.
#[must_use]
pub fn encode(channel_id: &str, chat_uid: &str, group_id: Option<&str>) -> String {
    let mut out = String::with_capacity(channel_id.len() + chat_uid.len() + 2);
    escape_into(&mut out, channel_id);
    out.push(SEPARATOR);
    escape_into(&mut out, chat_uid);
    if let Some(group) = group_id {
        out.push(SEPARATOR);
        escape_into(&mut out, group);
    }
    out
}

/// Parse the canonical string form.
pub fn decode(input: &str) -> Result<ChatIdentifier, IdentifierError> {
    let parts: Vec<&str> = input.split(SEPARATOR).collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(IdentifierError::malformed(
            input,
            "expected channel#uid or channel#uid#group",
        ));
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(IdentifierError::malformed(input, "empty component"));
    }

    let channel_id = unescape(input, parts[0])?;
    let chat_uid = unescape(input, parts[1])?;
    let group_id = parts.get(2).map(|g| unescape(input, g)).transpose()?;

    Ok(ChatIdentifier {
        channel_id,
        chat_uid,
        group_id,
    })
}

fn escape_into(out: &mut String, component: &str) {
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            c => out.push(c),
        }
    }
}

fn unescape(input: &str, component: &str) -> Result<String, IdentifierError> {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "23" => out.push('#'),
            _ => return Err(IdentifierError::malformed(input, "invalid escape sequence")),
        }
    }
    Ok(out)
}

impl fmt::Display for ChatIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ChatIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

impl TryFrom<String> for ChatIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode(&value)
    }
}

impl From<ChatIdentifier> for String {
    fn from(value: ChatIdentifier) -> Self {
        value.encode()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("blueset.telegram", "100", None)]
    #[case("irc.demo", "room1", None)]
    #[case("irc.demo", "#rust", None)]
    #[case("wechat.slave", "user 42", Some("grp%1"))]
    #[case("a", "b#c#d", Some("#"))]
    #[case("ünï.côde", "聊天", Some("группа"))]
    fn decode_inverts_encode(
        #[case] channel: &str,
        #[case] uid: &str,
        #[case] group: Option<&str>,
    ) {
        let mut id = ChatIdentifier::new(channel, uid).unwrap();
        if let Some(g) = group {
            id = id.with_group(g).unwrap();
        }
        assert_eq!(decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn plain_components_are_not_escaped() {
        assert_eq!(encode("irc.demo", "room1", None), "irc.demo#room1");
        assert_eq!(encode("irc.demo", "room1", Some("g")), "irc.demo#room1#g");
    }

    #[test]
    fn hash_in_uid_is_escaped() {
        assert_eq!(encode("irc.demo", "#rust", None), "irc.demo#%23rust");
    }

    #[rstest]
    #[case("")]
    #[case("no-separator")]
    #[case("#uid")]
    #[case("channel#")]
    #[case("a#b#c#d")]
    #[case("a#b#")]
    #[case("a#b%2")]
    #[case("a#b%41")]
    fn rejects_malformed(#[case] input: &str) {
        assert!(matches!(
            decode(input),
            Err(IdentifierError::Malformed { .. })
        ));
    }

    #[test]
    fn new_rejects_empty_components() {
        assert!(ChatIdentifier::new("", "x").is_err());
        assert!(ChatIdentifier::new("x", "").is_err());
        assert!(ChatIdentifier::new("x", "y").unwrap().with_group("").is_err());
    }

    #[test]
    fn telegram_chat_id_roundtrip() {
        let id = ChatIdentifier::telegram(-100123);
        assert_eq!(id.encode(), "blueset.telegram#-100123");
        assert_eq!(id.telegram_chat_id().unwrap(), -100123);
    }

    #[test]
    fn telegram_chat_id_rejects_slave_identifiers() {
        let id: ChatIdentifier = "irc.demo#room1".parse().unwrap();
        assert!(id.telegram_chat_id().is_err());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id: ChatIdentifier = "irc.demo#room1".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"irc.demo#room1\"");
        let back: ChatIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ChatIdentifier>("\"bad\"").is_err());
    }
}
