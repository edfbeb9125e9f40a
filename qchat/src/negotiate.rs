//! Simulated sifting-based key agreement (BB84).
//!
//! One party draws `n` candidate bits and `n` measurement bases, the other
//! draws `n` bases of its own. Positions where both bases agree survive
//! sifting; their bits, in order, form the shared key. The key length is
//! random and may be zero.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use qchat_proto::bits::BitString;

use crate::keys::SharedKey;

/// Number of candidate positions drawn per negotiation.
pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Measurement basis chosen for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Basis {
    /// Z basis.
    Rectilinear,
    /// X basis.
    Diagonal,
}

/// Source of the random draws made during negotiation.
pub trait DrawSource {
    /// Draws one candidate key bit.
    fn draw_bit(&mut self) -> bool;

    /// Draws one measurement basis.
    fn draw_basis(&mut self) -> Basis;
}

/// Adapts any [`rand::Rng`] into a [`DrawSource`] with fair coin flips.
#[derive(Debug)]
pub struct RngDraws<R>(pub R);

impl<R: Rng> DrawSource for RngDraws<R> {
    fn draw_bit(&mut self) -> bool {
        self.0.random_bool(0.5)
    }

    fn draw_basis(&mut self) -> Basis {
        if self.0.random_bool(0.5) {
            Basis::Diagonal
        } else {
            Basis::Rectilinear
        }
    }
}

/// Transcript of one negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sifting {
    /// Candidate bits drawn by the sending party.
    pub candidate_bits: Vec<bool>,
    /// Bases chosen by the sending party.
    pub sender_bases: Vec<Basis>,
    /// Bases chosen by the receiving party.
    pub receiver_bases: Vec<Basis>,
}

impl Sifting {
    /// Performs the draws for `n` positions.
    ///
    /// Draw order: all candidate bits, then the sender's bases, then the
    /// receiver's bases.
    pub fn run<D: DrawSource + ?Sized>(draws: &mut D, n: usize) -> Self {
        let candidate_bits = (0..n).map(|_| draws.draw_bit()).collect();
        let sender_bases = (0..n).map(|_| draws.draw_basis()).collect();
        let receiver_bases = (0..n).map(|_| draws.draw_basis()).collect();
        Self {
            candidate_bits,
            sender_bases,
            receiver_bases,
        }
    }

    /// Bits at the positions where both parties chose the same basis.
    #[must_use]
    pub fn sifted_key(&self) -> SharedKey {
        let bits = self
            .candidate_bits
            .iter()
            .zip(self.sender_bases.iter().zip(&self.receiver_bases))
            .filter(|(_, (sender, receiver))| sender == receiver)
            .map(|(bit, _)| *bit);
        SharedKey::new(BitString::from_bits(bits))
    }
}

/// Runs one negotiation over `n` positions.
pub fn negotiate<D: DrawSource + ?Sized>(draws: &mut D, n: usize) -> SharedKey {
    Sifting::run(draws, n).sifted_key()
}

/// Produces a fresh shared key on demand.
///
/// [`KeyCache::get_or_create`](crate::keys::KeyCache::get_or_create) calls
/// this synchronously on the caller's thread, which in the pipeline is an
/// async worker. Implementations must be CPU-bound and return promptly; they
/// must not sleep, block on I/O, or wait on other tasks.
pub trait KeyNegotiator: Send + Sync {
    /// Negotiates a new key. The result may be empty.
    fn negotiate(&self) -> SharedKey;
}

/// [`KeyNegotiator`] backed by [`negotiate`] over a standard RNG.
pub struct Bb84Negotiator {
    key_length: usize,
    rng: Mutex<StdRng>,
}

impl Bb84Negotiator {
    /// Negotiator drawing `key_length` positions, seeded from the OS.
    #[must_use]
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Negotiator with a fixed seed; the sequence of keys is reproducible.
    #[must_use]
    pub fn seeded(key_length: usize, seed: u64) -> Self {
        Self {
            key_length,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Number of candidate positions drawn per negotiation.
    #[must_use]
    pub const fn key_length(&self) -> usize {
        self.key_length
    }
}

impl Default for Bb84Negotiator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}

impl KeyNegotiator for Bb84Negotiator {
    fn negotiate(&self) -> SharedKey {
        let mut rng = self.rng.lock();
        let key = negotiate(&mut RngDraws(&mut *rng), self.key_length);
        drop(rng);
        tracing::debug!(
            positions = self.key_length,
            key_len = key.len(),
            "sifting complete"
        );
        key
    }
}
