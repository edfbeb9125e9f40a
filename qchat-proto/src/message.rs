//! Message record and identifier types.
//!
//! A [`MessageRecord`] is produced once per send and never mutated. It keeps
//! the original plaintext next to the (possibly encrypted) payload and the
//! tree needed to decode it; readers fall back to the stored plaintext when
//! the payload cannot be recovered.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bits::BitString;
use crate::codec::PrefixTree;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user (message sender or requester).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an externally issued user identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a conversation (direct chat or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps an externally issued conversation identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key under which a negotiated secret is cached: one party in one conversation.
///
/// Pairings are directional. The other participant of a conversation has a
/// different `PairingId` and therefore a different (or no) cached key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingId {
    /// The party the session was negotiated for.
    pub party: UserId,
    /// The conversation the session belongs to.
    pub conversation: ConversationId,
}

impl PairingId {
    /// Pairs a party with a conversation.
    #[must_use]
    pub const fn new(party: UserId, conversation: ConversationId) -> Self {
        Self {
            party,
            conversation,
        }
    }
}

impl std::fmt::Display for PairingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.party, self.conversation)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// How the payload of a record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// The payload is oracle ciphertext of the compressed bits.
    Encrypted,
    /// The oracle was unavailable; the payload is the compressed bits as-is.
    PlaintextFallback,
}

impl std::fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypted => f.write_str("encrypted"),
            Self::PlaintextFallback => f.write_str("plaintext-fallback"),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique identifier for this record.
    pub id: MessageId,
    /// Conversation the message was posted to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub sender_id: UserId,
    /// The original text. Kept at rest; see the fetch fallback path.
    pub plaintext: String,
    /// Ciphertext bits, or the compressed bits when `mode` is a fallback.
    pub payload: BitString,
    /// Whether `payload` is encrypted.
    pub mode: PayloadMode,
    /// Prefix tree the payload was encoded with.
    pub tree: PrefixTree,
    /// When the record was created.
    pub created_at: Timestamp,
}

/// Why a fetched message shows its stored plaintext instead of recovered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The requester has no cached key for this conversation.
    NoSession,
    /// The oracle could not decrypt the payload.
    DecryptFailed,
    /// The recovered bits did not decode with the stored tree.
    DecodeFailed,
}

/// Where the text of a fetched message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "reason", rename_all = "snake_case")]
pub enum Recovery {
    /// Text was recovered from the payload.
    Decoded,
    /// Text is the record's stored plaintext.
    StoredPlaintext(FallbackReason),
}

/// A record as returned by fetch, with the text shown to the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// The stored record, unmodified.
    pub record: MessageRecord,
    /// Recovered text, or the stored plaintext on fallback.
    pub text: String,
    /// How `text` was obtained.
    pub recovery: Recovery,
}

impl FetchedMessage {
    /// A message whose payload was recovered into `text`.
    #[must_use]
    pub const fn decoded(record: MessageRecord, text: String) -> Self {
        Self {
            record,
            text,
            recovery: Recovery::Decoded,
        }
    }

    /// A message shown with its stored plaintext.
    #[must_use]
    pub fn stored(record: MessageRecord, reason: FallbackReason) -> Self {
        Self {
            text: record.plaintext.clone(),
            record,
            recovery: Recovery::StoredPlaintext(reason),
        }
    }
}
