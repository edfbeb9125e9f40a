//! Send and fetch orchestration.
//!
//! Send: validate -> encode -> look up or negotiate the pairing key ->
//! encrypt through the gateway -> persist. Fetch: load records -> look up
//! the requester's key -> decrypt and decode each record concurrently.
//!
//! Failures after validation never fail the operation. An unavailable oracle
//! on send degrades the payload according to [`FallbackPolicy`]; any decrypt
//! or decode failure on fetch falls back to the record's stored plaintext,
//! for that record only.

use futures_util::future::join_all;

use qchat_proto::codec::{self, CodecError, Encoded};
use qchat_proto::message::{
    ConversationId, FallbackReason, FetchedMessage, MessageId, MessageRecord, PairingId,
    PayloadMode, Timestamp, UserId,
};

use crate::gateway::{CipherOracle, EncryptionGateway, GatewayError};
use crate::keys::{KeyCache, SharedKey};
use crate::negotiate::KeyNegotiator;
use crate::store::{MessageStore, StoreError};

/// What send does when the oracle cannot encrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Persist the compressed bits unencrypted and flag the record.
    /// Delivery wins over confidentiality.
    #[default]
    PlaintextFallback,
    /// Fail the send; nothing is persisted.
    Reject,
}

/// Error returned when parsing an unknown [`FallbackPolicy`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fallback policy {0:?} (expected \"plaintext-fallback\" or \"reject\")")]
pub struct UnknownPolicy(String);

impl std::str::FromStr for FallbackPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext-fallback" => Ok(Self::PlaintextFallback),
            "reject" => Ok(Self::Reject),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl std::fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaintextFallback => f.write_str("plaintext-fallback"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Errors that can occur when sending a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message text was empty.
    #[error("message text cannot be empty")]
    EmptyMessage,

    /// Encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The oracle was unavailable and [`FallbackPolicy::Reject`] is in effect.
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(#[source] GatewayError),

    /// The record could not be persisted.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur when fetching messages.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The records could not be loaded.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// The message confidentiality pipeline.
///
/// Keys are cached per `(sender, conversation)` pairing. A requester other
/// than the sender has a different pairing and, unless it has sent to the
/// conversation itself, no key; its fetches show stored plaintext.
pub struct MessagePipeline<O: CipherOracle, S: MessageStore, N: KeyNegotiator> {
    gateway: EncryptionGateway<O>,
    keys: KeyCache<N>,
    store: S,
    fallback: FallbackPolicy,
}

impl<O: CipherOracle, S: MessageStore, N: KeyNegotiator> MessagePipeline<O, S, N> {
    /// Creates a pipeline with the default [`FallbackPolicy`].
    #[must_use]
    pub fn new(gateway: EncryptionGateway<O>, keys: KeyCache<N>, store: S) -> Self {
        Self {
            gateway,
            keys,
            store,
            fallback: FallbackPolicy::default(),
        }
    }

    /// Sets the policy applied when encryption is unavailable.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// The policy applied when encryption is unavailable.
    #[must_use]
    pub const fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    /// The encryption gateway.
    #[must_use]
    pub const fn gateway(&self) -> &EncryptionGateway<O> {
        &self.gateway
    }

    /// The key cache.
    #[must_use]
    pub const fn keys(&self) -> &KeyCache<N> {
        &self.keys
    }

    /// The message store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Sends `plaintext` from `sender` to `conversation` and returns the
    /// persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::EmptyMessage`] for empty text,
    /// [`SendError::EncryptionUnavailable`] when the oracle is down and the
    /// policy is [`FallbackPolicy::Reject`], and [`SendError::Store`] if the
    /// record cannot be saved.
    pub async fn send(
        &self,
        sender: &UserId,
        conversation: &ConversationId,
        plaintext: &str,
    ) -> Result<MessageRecord, SendError> {
        if plaintext.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let Encoded { bits, tree } = codec::encode(plaintext)?;
        tracing::debug!(
            conversation = %conversation,
            symbols = tree.leaf_count(),
            bits = bits.len(),
            "message encoded"
        );

        let pairing = PairingId::new(sender.clone(), conversation.clone());
        let key = self.keys.get_or_create(&pairing);

        let encrypted = self.gateway.encrypt(&bits, &key).await;
        let (payload, mode) = match encrypted {
            Ok(cipher) => (cipher, PayloadMode::Encrypted),
            Err(e) => match self.fallback {
                FallbackPolicy::PlaintextFallback => {
                    tracing::warn!(
                        pairing = %pairing,
                        error = %e,
                        "encryption unavailable, storing compressed bits unencrypted"
                    );
                    (bits, PayloadMode::PlaintextFallback)
                }
                FallbackPolicy::Reject => {
                    tracing::warn!(pairing = %pairing, error = %e, "encryption unavailable, rejecting send");
                    return Err(SendError::EncryptionUnavailable(e));
                }
            },
        };

        let record = MessageRecord {
            id: MessageId::new(),
            conversation_id: conversation.clone(),
            sender_id: sender.clone(),
            plaintext: plaintext.to_string(),
            payload,
            mode,
            tree,
            created_at: Timestamp::now(),
        };
        self.store.save(&record).await?;

        tracing::info!(
            message_id = %record.id,
            conversation = %conversation,
            mode = %record.mode,
            "message stored"
        );
        Ok(record)
    }

    /// Fetches every message of `conversation` as seen by `requester`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Store`] if the records cannot be loaded.
    /// Per-record recovery failures are never errors.
    pub async fn fetch(
        &self,
        conversation: &ConversationId,
        requester: &UserId,
    ) -> Result<Vec<FetchedMessage>, FetchError> {
        let records = self.store.conversation(conversation).await?;

        let pairing = PairingId::new(requester.clone(), conversation.clone());
        let Some(key) = self.keys.get(&pairing) else {
            tracing::warn!(
                pairing = %pairing,
                count = records.len(),
                "no session key, returning stored plaintext"
            );
            return Ok(records
                .into_iter()
                .map(|record| FetchedMessage::stored(record, FallbackReason::NoSession))
                .collect());
        };

        let fetched = join_all(records.into_iter().map(|record| self.recover(record, &key))).await;
        tracing::debug!(pairing = %pairing, count = fetched.len(), "messages fetched");
        Ok(fetched)
    }

    /// The most recent record of `conversation`, as stored.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Store`] if the store cannot be read.
    pub async fn latest(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, FetchError> {
        Ok(self.store.latest(conversation).await?)
    }

    async fn recover(&self, record: MessageRecord, key: &SharedKey) -> FetchedMessage {
        let bits = match record.mode {
            PayloadMode::PlaintextFallback => record.payload.clone(),
            PayloadMode::Encrypted => match self.gateway.decrypt(&record.payload, key).await {
                Ok(bits) => bits,
                Err(e) => {
                    tracing::warn!(message_id = %record.id, error = %e, "decrypt failed, using stored plaintext");
                    return FetchedMessage::stored(record, FallbackReason::DecryptFailed);
                }
            },
        };

        match codec::decode(&bits, &record.tree) {
            Ok(text) => FetchedMessage::decoded(record, text),
            Err(e) => {
                tracing::warn!(message_id = %record.id, error = %e, "decode failed, using stored plaintext");
                FetchedMessage::stored(record, FallbackReason::DecodeFailed)
            }
        }
    }
}
