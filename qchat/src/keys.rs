//! Negotiated key material and the per-pairing key cache.
//!
//! The [`KeyCache`] is owned by one service instance (never global). Each
//! [`PairingId`] maps to at most one [`SharedKey`], negotiated on first use
//! and kept for the lifetime of the cache. Entries are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use zeroize::ZeroizeOnDrop;

use qchat_proto::bits::BitString;
use qchat_proto::message::PairingId;

use crate::negotiate::KeyNegotiator;

/// Negotiated key bits, wiped from memory on drop.
///
/// `Debug` shows only the length. A zero-length key is a valid key.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SharedKey(BitString);

impl SharedKey {
    /// Wraps negotiated bits.
    #[must_use]
    pub const fn new(bits: BitString) -> Self {
        Self(bits)
    }

    /// The key bits.
    #[must_use]
    pub const fn as_bits(&self) -> &BitString {
        &self.0
    }

    /// Number of key bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if sifting kept no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey(len={})", self.0.len())
    }
}

/// Process-lifetime map from pairing to negotiated key.
///
/// First use of a pairing is single-flight: concurrent callers for the same
/// pairing wait on one negotiation and all observe the same key. Callers for
/// different pairings never wait on each other's negotiation; the map lock is
/// only held to find or insert the per-pairing slot.
pub struct KeyCache<N: KeyNegotiator> {
    negotiator: N,
    sessions: parking_lot::Mutex<HashMap<PairingId, Arc<OnceLock<SharedKey>>>>,
}

impl<N: KeyNegotiator> KeyCache<N> {
    /// Creates an empty cache that negotiates with `negotiator` on a miss.
    #[must_use]
    pub fn new(negotiator: N) -> Self {
        Self {
            negotiator,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Returns the key for `pairing`, negotiating it once on first use.
    ///
    /// Concurrent first callers for the same pairing block until the one
    /// negotiation finishes. The map lock is released before negotiating.
    pub fn get_or_create(&self, pairing: &PairingId) -> SharedKey {
        let slot = {
            let mut sessions = self.sessions.lock();
            Arc::clone(sessions.entry(pairing.clone()).or_default())
        };

        let mut negotiated = false;
        let key = slot
            .get_or_init(|| {
                negotiated = true;
                self.negotiator.negotiate()
            })
            .clone();

        if negotiated {
            tracing::info!(pairing = %pairing, key_len = key.len(), "negotiated session key");
            if key.is_empty() {
                tracing::warn!(pairing = %pairing, "sifting kept no positions; session key is empty");
            }
        }
        key
    }

    /// Returns the key for `pairing` if one has been negotiated.
    #[must_use]
    pub fn get(&self, pairing: &PairingId) -> Option<SharedKey> {
        let sessions = self.sessions.lock();
        sessions.get(pairing).and_then(|slot| slot.get().cloned())
    }

    /// Number of pairings with a negotiated key.
    #[must_use]
    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock();
        sessions.values().filter(|slot| slot.get().is_some()).count()
    }

    /// Returns `true` if no key has been negotiated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The negotiator used on a miss.
    #[must_use]
    pub const fn negotiator(&self) -> &N {
        &self.negotiator
    }
}
