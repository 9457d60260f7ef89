//! Transport cryptography for River
//!
//! Per-message key derivation, AES-256-GCM sealing and opening keyed from a
//! previously negotiated 256-byte shared secret, and the composite splitting
//! step used while bootstrapping the key exchange.
//!
//! Byte offsets into the shared secret are part of the wire protocol and must
//! not change:
//!
//! - message key: `SHA-512(secret[100..140] ∥ plaintext)[32..64]`
//! - nonce: `SHA-512(secret[180..220] ∥ message_key)[0..12]`
//! - AES key: `SHA-512(message_key ∥ secret[170..210])[0..32]`

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use core::fmt;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};

use crate::errors::CryptographicError;
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Length of the negotiated shared secret
pub const SHARED_SECRET_LEN: usize = 256;

/// Length of a derived message key
pub const MESSAGE_KEY_LEN: usize = 32;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// Rounds attempted by [`split_composite`] before giving up
pub const SPLIT_MAX_ROUNDS: u32 = 6;

// ----------------------------------------------------------------------------
// Key Material
// ----------------------------------------------------------------------------

/// Shared secret negotiated during the key exchange
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    pub fn new(bytes: [u8; SHARED_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly 256 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARED_SECRET_LEN {
            return Err(CryptographicError::InvalidKeyLength {
                expected: SHARED_SECRET_LEN,
                actual: bytes.len(),
            }
            .into());
        }
        let mut secret = [0u8; SHARED_SECRET_LEN];
        secret.copy_from_slice(bytes);
        Ok(Self(secret))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }

    /// Short fingerprint for logs; never print the secret itself
    pub fn fingerprint(&self) -> String {
        hex::encode(&sha256(&self.0)[..8])
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedSecret")
            .field(&self.fingerprint())
            .finish()
    }
}

/// Per-message key carried in the envelope header
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey([u8; MESSAGE_KEY_LEN]);

impl MessageKey {
    pub fn new(bytes: [u8; MESSAGE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice recovered out-of-band from an envelope header
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MESSAGE_KEY_LEN {
            return Err(CryptographicError::InvalidKeyLength {
                expected: MESSAGE_KEY_LEN,
                actual: bytes.len(),
            }
            .into());
        }
        let mut key = [0u8; MESSAGE_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKey({})", hex::encode(self.0))
    }
}

/// Output of [`seal`]: the message key travels in the header, the ciphertext
/// (with the GCM tag appended) in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub message_key: MessageKey,
    pub ciphertext: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Hashing
// ----------------------------------------------------------------------------

/// SHA-256 digest of arbitrary input
pub fn sha256<T: AsRef<[u8]>>(data: T) -> [u8; 32] {
    let digest = Sha256::digest(data.as_ref());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-512 digest of arbitrary input
pub fn sha512<T: AsRef<[u8]>>(data: T) -> [u8; 64] {
    let digest = Sha512::digest(data.as_ref());
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

// ----------------------------------------------------------------------------
// Key Derivation
// ----------------------------------------------------------------------------

/// Derive the 32-byte message key for a plaintext
pub fn derive_message_key(secret: &SharedSecret, plaintext: &[u8]) -> MessageKey {
    let mut hasher = Sha512::new();
    hasher.update(&secret.0[100..140]);
    hasher.update(plaintext);
    let digest = hasher.finalize();

    let mut key = [0u8; MESSAGE_KEY_LEN];
    key.copy_from_slice(&digest[32..64]);
    MessageKey(key)
}

/// AES key and nonce for a given message key
fn derive_cipher_material(
    secret: &SharedSecret,
    message_key: &MessageKey,
) -> ([u8; 32], [u8; NONCE_LEN]) {
    let mut iv_hasher = Sha512::new();
    iv_hasher.update(&secret.0[180..220]);
    iv_hasher.update(message_key.0);
    let iv_digest = iv_hasher.finalize();

    let mut key_hasher = Sha512::new();
    key_hasher.update(message_key.0);
    key_hasher.update(&secret.0[170..210]);
    let key_digest = key_hasher.finalize();

    let mut aes_key = [0u8; 32];
    aes_key.copy_from_slice(&key_digest[..32]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&iv_digest[..NONCE_LEN]);
    (aes_key, nonce)
}

// ----------------------------------------------------------------------------
// AEAD
// ----------------------------------------------------------------------------

/// Encrypt a plaintext under keys derived from the shared secret
pub fn seal(secret: &SharedSecret, plaintext: &[u8]) -> Result<SealedPayload> {
    let message_key = derive_message_key(secret, plaintext);
    let (aes_key, nonce) = derive_cipher_material(secret, &message_key);

    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|_| CryptographicError::EncryptionFailed)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptographicError::EncryptionFailed)?;

    Ok(SealedPayload {
        message_key,
        ciphertext,
    })
}

/// Decrypt a ciphertext produced by [`seal`]
///
/// Fails with [`CryptographicError::AuthenticationFailed`] on tampering or a
/// key mismatch. Callers must not retry such failures blindly.
pub fn open(secret: &SharedSecret, message_key: &MessageKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let (aes_key, nonce) = derive_cipher_material(secret, message_key);

    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|_| CryptographicError::AuthenticationFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| CryptographicError::AuthenticationFailed)?;
    Ok(plaintext)
}

// ----------------------------------------------------------------------------
// Composite Splitting
// ----------------------------------------------------------------------------

/// Split `n = p * q` into its two factors, returned as `(p, q)` with `p <= q`
///
/// Uses Pollard's rho with Brent-style cycle detection seeded from the OS RNG.
/// Gives up after [`SPLIT_MAX_ROUNDS`] rounds with a retryable
/// [`CryptographicError::FactorizationFailed`].
pub fn split_composite(n: u64) -> Result<(u64, u64)> {
    split_composite_with_rng(n, &mut OsRng, SPLIT_MAX_ROUNDS)
}

/// [`split_composite`] with a caller-supplied RNG and round budget
///
/// Round `i` walks at most `1 << (i + 18)` steps of `x -> x² + c mod n`,
/// saturating at `u64::MAX`.
pub fn split_composite_with_rng<R: RngCore + ?Sized>(
    n: u64,
    rng: &mut R,
    max_rounds: u32,
) -> Result<(u64, u64)> {
    if n < 4 {
        return Err(CryptographicError::InvalidComposite { value: n }.into());
    }
    if n % 2 == 0 {
        return Ok((2, n / 2));
    }

    for round in 0..max_rounds {
        let c = ((rng.next_u64() & 15) + 17) % n;
        let mut x = rng.next_u64() % (n - 1) + 1;
        let mut y = x;
        let limit = round_step_limit(round);

        let mut step = 1u64;
        while step < limit {
            x = add_mod(mul_mod(x, x, n), c, n);
            let distance = if x < y { n - y + x } else { x - y };
            let g = gcd(distance, n);

            // Brent: move the tortoise on powers of two
            if step & (step - 1) == 0 {
                y = x;
            }
            step += 1;

            if g != 1 {
                if g < n {
                    let other = n / g;
                    return Ok((g.min(other), g.max(other)));
                }
                break;
            }
        }
        tracing::debug!("composite split round {} found no factor of {}", round, n);
    }

    Err(CryptographicError::FactorizationFailed {
        composite: n,
        rounds: max_rounds,
    }
    .into())
}

fn round_step_limit(round: u32) -> u64 {
    round
        .checked_add(18)
        .and_then(|shift| 1u64.checked_shl(shift))
        .unwrap_or(u64::MAX)
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn add_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 + b as u128) % m as u128) as u64
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RiverError;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_secret() -> SharedSecret {
        let mut bytes = [0u8; SHARED_SECRET_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        SharedSecret::new(bytes)
    }

    #[test]
    fn test_message_key_uses_upper_half_of_digest() {
        let secret = test_secret();
        let plaintext = b"hello river";

        let mut material = secret.as_bytes()[100..140].to_vec();
        material.extend_from_slice(plaintext);
        let digest = sha512(&material);

        let key = derive_message_key(&secret, plaintext);
        assert_eq!(key.as_bytes(), &digest[32..64]);
    }

    #[test]
    fn test_seal_matches_manual_derivation() {
        let secret = test_secret();
        let plaintext = b"manual derivation";
        let sealed = seal(&secret, plaintext).unwrap();

        let mut iv_material = secret.as_bytes()[180..220].to_vec();
        iv_material.extend_from_slice(sealed.message_key.as_bytes());
        let mut key_material = sealed.message_key.as_bytes().to_vec();
        key_material.extend_from_slice(&secret.as_bytes()[170..210]);

        let cipher = Aes256Gcm::new_from_slice(&sha512(&key_material)[..32]).unwrap();
        let expected = cipher
            .encrypt(Nonce::from_slice(&sha512(&iv_material)[..12]), &plaintext[..])
            .unwrap();

        assert_eq!(sealed.ciphertext, expected);
        assert_eq!(sealed.ciphertext.len(), plaintext.len() + 16);
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let secret = test_secret();
        let sealed = seal(&secret, b"payload").unwrap();

        let mut other = *secret.as_bytes();
        other[175] ^= 0x01;
        let err = open(&SharedSecret::new(other), &sealed.message_key, &sealed.ciphertext)
            .unwrap_err();
        assert!(matches!(
            err,
            RiverError::Crypto(CryptographicError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_shared_secret_length_checked() {
        assert!(SharedSecret::from_slice(&[0u8; 255]).is_err());
        assert!(SharedSecret::from_slice(&[0u8; 256]).is_ok());
        assert!(MessageKey::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_split_known_pairs() {
        assert_eq!(split_composite(10403).unwrap(), (101, 103));
        assert_eq!(split_composite(103 * 101).unwrap(), (101, 103));
        assert_eq!(split_composite(1_000_003 * 999_983).unwrap(), (999_983, 1_000_003));
        assert_eq!(split_composite(2 * 7919).unwrap(), (2, 7919));
    }

    #[test]
    fn test_round_step_limit_saturates() {
        assert_eq!(round_step_limit(0), 1 << 18);
        assert_eq!(round_step_limit(45), 1 << 63);
        assert_eq!(round_step_limit(46), u64::MAX);
        assert_eq!(round_step_limit(u32::MAX), u64::MAX);
    }

    #[test]
    fn test_split_accepts_large_round_budget() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (a, b) = split_composite_with_rng(101 * 103, &mut rng, 200).unwrap();
        assert_eq!((a, b), (101, 103));
    }

    #[test]
    fn test_split_deterministic_with_seeded_rng() {
        let pq = 1_000_000_007u64 * 3_571u64;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let first = split_composite_with_rng(pq, &mut rng, SPLIT_MAX_ROUNDS).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let second = split_composite_with_rng(pq, &mut rng, SPLIT_MAX_ROUNDS).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, (3_571, 1_000_000_007));
    }

    #[test]
    fn test_split_prime_fails_retryably() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = split_composite_with_rng(10007, &mut rng, 1).unwrap_err();
        assert!(err.is_retryable());
        assert!(split_composite(3).is_err());
    }
}
