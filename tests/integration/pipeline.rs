//! End-to-end tests of the send and fetch pipeline.
//!
//! Uses an in-process XOR oracle whose encrypt and decrypt sides can be
//! switched off independently, a fixed-key negotiator, and the in-memory
//! store. Clock is paused where retries would otherwise sleep.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use qchat::gateway::{CipherOracle, EncryptionGateway, OracleError, RetryPolicy};
use qchat::keys::{KeyCache, SharedKey};
use qchat::negotiate::KeyNegotiator;
use qchat::pipeline::{FallbackPolicy, FetchError, MessagePipeline, SendError};
use qchat::store::{InMemoryStore, MessageStore, StoreError};
use qchat_proto::bits::BitString;
use qchat_proto::codec;
use qchat_proto::message::{
    ConversationId, FallbackReason, MessageId, MessageRecord, PairingId, PayloadMode, Recovery,
    Timestamp, UserId,
};

// ============================================================================
// Test doubles
// ============================================================================

/// XOR-with-repeating-key oracle. Its own inverse.
struct XorOracle {
    encrypt_up: AtomicBool,
    decrypt_up: AtomicBool,
    encrypt_calls: AtomicU32,
    decrypt_calls: AtomicU32,
}

impl XorOracle {
    fn new(encrypt_up: bool, decrypt_up: bool) -> Self {
        Self {
            encrypt_up: AtomicBool::new(encrypt_up),
            decrypt_up: AtomicBool::new(decrypt_up),
            encrypt_calls: AtomicU32::new(0),
            decrypt_calls: AtomicU32::new(0),
        }
    }

    fn xor(bits: &BitString, key: &SharedKey) -> BitString {
        let key: Vec<bool> = key.as_bits().iter().collect();
        BitString::from_bits(
            bits.iter()
                .enumerate()
                .map(|(i, b)| if key.is_empty() { b } else { b ^ key[i % key.len()] }),
        )
    }
}

impl CipherOracle for XorOracle {
    async fn encrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, OracleError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.encrypt_up.load(Ordering::SeqCst) {
            Ok(Self::xor(bits, key))
        } else {
            Err(OracleError::Transport("connection refused".to_string()))
        }
    }

    async fn decrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, OracleError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.decrypt_up.load(Ordering::SeqCst) {
            Ok(Self::xor(bits, key))
        } else {
            Err(OracleError::Transport("connection refused".to_string()))
        }
    }
}

/// Always negotiates the same key.
struct FixedKey {
    key: &'static str,
    calls: AtomicUsize,
}

impl FixedKey {
    fn new(key: &'static str) -> Self {
        Self {
            key,
            calls: AtomicUsize::new(0),
        }
    }
}

impl KeyNegotiator for FixedKey {
    fn negotiate(&self) -> SharedKey {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SharedKey::new(BitString::parse(self.key).unwrap())
    }
}

/// Store whose every operation fails.
struct FailingStore;

impl MessageStore for FailingStore {
    async fn save(&self, _record: &MessageRecord) -> Result<(), StoreError> {
        Err(StoreError::WriteFailed("disk full".to_string()))
    }

    async fn conversation(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        Err(StoreError::ReadFailed("disk gone".to_string()))
    }

    async fn latest(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }
}

type TestPipeline = MessagePipeline<XorOracle, InMemoryStore, FixedKey>;

fn pipeline(oracle: XorOracle, key: &'static str) -> TestPipeline {
    MessagePipeline::new(
        EncryptionGateway::new(oracle, RetryPolicy::default()),
        KeyCache::new(FixedKey::new(key)),
        InMemoryStore::new(),
    )
}

fn alice() -> UserId {
    UserId::new("alice")
}

fn bob() -> UserId {
    UserId::new("bob")
}

fn chat() -> ConversationId {
    ConversationId::new("chat-1")
}

// ============================================================================
// Send
// ============================================================================

#[tokio::test(start_paused = true)]
async fn send_with_failing_gateway_persists_compressed_bits() {
    let p = pipeline(XorOracle::new(false, false), "1011");
    let text = "meet me at noon";

    let record = p.send(&alice(), &chat(), text).await.unwrap();

    assert_eq!(record.mode, PayloadMode::PlaintextFallback);
    assert_eq!(record.payload, codec::encode(text).unwrap().bits);
    assert_eq!(record.plaintext, text);
    assert_eq!(p.gateway().oracle().encrypt_calls.load(Ordering::SeqCst), 3);

    let stored = p.store().conversation(&chat()).await.unwrap();
    assert_eq!(stored, vec![record]);
}

#[tokio::test(start_paused = true)]
async fn reject_policy_fails_send_and_persists_nothing() {
    let p = pipeline(XorOracle::new(false, false), "1011").with_fallback(FallbackPolicy::Reject);

    let err = p.send(&alice(), &chat(), "secret").await.unwrap_err();

    assert!(matches!(err, SendError::EncryptionUnavailable(_)));
    assert!(p.store().is_empty().await);
}

#[tokio::test]
async fn empty_message_is_rejected_before_any_work() {
    let p = pipeline(XorOracle::new(true, true), "1011");

    let err = p.send(&alice(), &chat(), "").await.unwrap_err();

    assert!(matches!(err, SendError::EmptyMessage));
    assert!(p.keys().is_empty());
    assert_eq!(p.gateway().oracle().encrypt_calls.load(Ordering::SeqCst), 0);
    assert!(p.store().is_empty().await);
}

#[tokio::test]
async fn successful_send_stores_ciphertext_and_tree() {
    let p = pipeline(XorOracle::new(true, true), "1");
    let text = "abracadabra";

    let record = p.send(&alice(), &chat(), text).await.unwrap();
    let encoded = codec::encode(text).unwrap();

    assert_eq!(record.mode, PayloadMode::Encrypted);
    assert_ne!(record.payload, encoded.bits);
    assert_eq!(record.payload.len(), encoded.bits.len());
    assert_eq!(record.tree, encoded.tree);
    assert_eq!(record.sender_id, alice());
    assert_eq!(record.conversation_id, chat());
}

#[tokio::test]
async fn repeated_sends_reuse_the_pairing_key() {
    let p = pipeline(XorOracle::new(true, true), "0110");

    for text in ["one", "two", "three"] {
        p.send(&alice(), &chat(), text).await.unwrap();
    }

    assert_eq!(p.keys().negotiator().calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.keys().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_sends_negotiate_once() {
    let p = Arc::new(pipeline(XorOracle::new(true, true), "0110"));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.send(&alice(), &chat(), &format!("msg {i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(p.keys().negotiator().calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.store().len().await, 32);
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn sender_fetch_decrypts_and_decodes() {
    let p = pipeline(XorOracle::new(true, true), "1101");
    p.send(&alice(), &chat(), "hello bob").await.unwrap();
    p.send(&alice(), &chat(), "are you there?").await.unwrap();

    let fetched = p.fetch(&chat(), &alice()).await.unwrap();

    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].text, "hello bob");
    assert_eq!(fetched[1].text, "are you there?");
    assert!(fetched.iter().all(|m| m.recovery == Recovery::Decoded));
}

#[tokio::test]
async fn fetch_without_cached_key_leaves_payload_untouched() {
    let p = pipeline(XorOracle::new(true, true), "1101");
    let sent = p.send(&alice(), &chat(), "for bob").await.unwrap();

    // Bob never sent to this conversation, so he has no pairing key.
    let fetched = p.fetch(&chat(), &bob()).await.unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].record, sent);
    assert_eq!(fetched[0].record.payload, sent.payload);
    assert_eq!(fetched[0].text, "for bob");
    assert_eq!(
        fetched[0].recovery,
        Recovery::StoredPlaintext(FallbackReason::NoSession)
    );
    assert_eq!(p.gateway().oracle().decrypt_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn decrypt_failure_falls_back_to_stored_plaintext() {
    let p = pipeline(XorOracle::new(true, false), "1101");
    p.send(&alice(), &chat(), "can't read me").await.unwrap();

    let fetched = p.fetch(&chat(), &alice()).await.unwrap();

    assert_eq!(fetched[0].text, "can't read me");
    assert_eq!(
        fetched[0].recovery,
        Recovery::StoredPlaintext(FallbackReason::DecryptFailed)
    );
}

#[tokio::test]
async fn decode_failure_affects_only_that_record() {
    let p = pipeline(XorOracle::new(true, true), "1101");
    p.send(&alice(), &chat(), "good message").await.unwrap();

    // Seven bits against a tree of 3-bit codes leaves a partial code.
    let broken = MessageRecord {
        id: MessageId::new(),
        conversation_id: chat(),
        sender_id: alice(),
        plaintext: "stored copy".to_string(),
        payload: BitString::parse("1111111").unwrap(),
        mode: PayloadMode::PlaintextFallback,
        tree: codec::build_tree("abcdefgh").unwrap(),
        created_at: Timestamp::now(),
    };
    p.store().save(&broken).await.unwrap();
    p.send(&alice(), &chat(), "another good one").await.unwrap();

    let fetched = p.fetch(&chat(), &alice()).await.unwrap();

    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched[0].text, "good message");
    assert_eq!(fetched[0].recovery, Recovery::Decoded);
    assert_eq!(fetched[1].text, "stored copy");
    assert_eq!(
        fetched[1].recovery,
        Recovery::StoredPlaintext(FallbackReason::DecodeFailed)
    );
    assert_eq!(fetched[2].text, "another good one");
    assert_eq!(fetched[2].recovery, Recovery::Decoded);
}

#[tokio::test(start_paused = true)]
async fn fallback_records_decode_without_the_oracle() {
    let oracle = XorOracle::new(false, true);
    let p = pipeline(oracle, "1101");
    p.send(&alice(), &chat(), "sent while oracle was down")
        .await
        .unwrap();

    let fetched = p.fetch(&chat(), &alice()).await.unwrap();

    assert_eq!(fetched[0].record.mode, PayloadMode::PlaintextFallback);
    assert_eq!(fetched[0].text, "sent while oracle was down");
    assert_eq!(fetched[0].recovery, Recovery::Decoded);
    assert_eq!(p.gateway().oracle().decrypt_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_length_key_round_trips() {
    let p = pipeline(XorOracle::new(true, true), "");

    let record = p.send(&alice(), &chat(), "no key bits").await.unwrap();
    assert_eq!(record.mode, PayloadMode::Encrypted);
    let pairing = PairingId::new(alice(), chat());
    assert_eq!(p.keys().get(&pairing).map(|k| k.len()), Some(0));

    let fetched = p.fetch(&chat(), &alice()).await.unwrap();
    assert_eq!(fetched[0].text, "no key bits");
    assert_eq!(fetched[0].recovery, Recovery::Decoded);
}

#[tokio::test]
async fn each_participant_reads_with_its_own_pairing() {
    let p = pipeline(XorOracle::new(true, true), "1001");
    p.send(&alice(), &chat(), "from alice").await.unwrap();
    p.send(&bob(), &chat(), "from bob").await.unwrap();

    // Both now have a key for their own pairing. With a shared fixed key the
    // XOR oracle inverts either party's ciphertext.
    let for_bob = p.fetch(&chat(), &bob()).await.unwrap();
    assert_eq!(for_bob.len(), 2);
    assert!(for_bob.iter().all(|m| m.recovery == Recovery::Decoded));
    assert_eq!(p.keys().len(), 2);
}

#[tokio::test]
async fn fetch_of_empty_conversation_is_empty() {
    let p = pipeline(XorOracle::new(true, true), "1");
    assert!(p.fetch(&chat(), &alice()).await.unwrap().is_empty());
    assert!(p.latest(&chat()).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_returns_newest_record() {
    let p = pipeline(XorOracle::new(true, true), "1");
    p.send(&alice(), &chat(), "first").await.unwrap();
    let last = p.send(&bob(), &chat(), "second").await.unwrap();

    assert_eq!(p.latest(&chat()).await.unwrap(), Some(last));
}

// ============================================================================
// Store failures
// ============================================================================

fn failing_store_pipeline() -> MessagePipeline<XorOracle, FailingStore, FixedKey> {
    MessagePipeline::new(
        EncryptionGateway::new(XorOracle::new(true, true), RetryPolicy::default()),
        KeyCache::new(FixedKey::new("1011")),
        FailingStore,
    )
}

#[tokio::test]
async fn store_write_failure_fails_the_send() {
    let p = failing_store_pipeline();

    let err = p.send(&alice(), &chat(), "lost").await.unwrap_err();

    assert!(matches!(err, SendError::Store(StoreError::WriteFailed(_))));
    assert_eq!(err.to_string(), "store error: write failed: disk full");
    assert_eq!(p.gateway().oracle().encrypt_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_read_failure_fails_fetch_and_latest() {
    let p = failing_store_pipeline();

    let err = p.fetch(&chat(), &alice()).await.unwrap_err();
    assert!(matches!(err, FetchError::Store(StoreError::ReadFailed(_))));
    assert_eq!(p.gateway().oracle().decrypt_calls.load(Ordering::SeqCst), 0);

    let err = p.latest(&chat()).await.unwrap_err();
    assert!(matches!(err, FetchError::Store(StoreError::Unavailable(_))));
}
