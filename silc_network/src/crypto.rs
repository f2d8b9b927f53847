//! Opaque cryptographic services the protocol core depends on. The defaults
//! are adequate for a single administrative domain and for tests; a
//! deployment plugs in its own key handling through these traits.

use crate::id::{ClientId, CLIENTID_HASH_LEN};
use crate::idlist::ChannelKey;
use crate::wire::PublicKey;
use rand::RngCore;
use sha1::{Digest, Sha1};

/// Minimum length of the authentication data in a RESUME_CLIENT packet
pub const MIN_RESUME_AUTH_LEN: usize = 128;

/// Derives the nickname hash carried in client IDs. Every server in a network
/// must use the same hasher or ID derivation drifts between them.
pub trait NicknameHasher {
    fn hash(&self, casefolded_nickname: &[u8]) -> [u8; CLIENTID_HASH_LEN];
}

/// SHA-1, truncated
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha1NicknameHasher;

impl NicknameHasher for Sha1NicknameHasher {
    fn hash(&self, casefolded_nickname: &[u8]) -> [u8; CLIENTID_HASH_LEN] {
        let digest = Sha1::digest(casefolded_nickname);
        let mut out = [0u8; CLIENTID_HASH_LEN];
        out.copy_from_slice(&digest[..CLIENTID_HASH_LEN]);
        out
    }
}

/// Channel keys, public key fingerprints and resume authentication
pub trait KeyService {
    fn generate_channel_key(&self, cipher: &str) -> ChannelKey;

    fn fingerprint(&self, key: &PublicKey) -> [u8; 20];

    /// Check the authentication data a resuming client sent against the
    /// public key stored for the detached client
    fn verify_resume(&self, public_key: &PublicKey, client_id: &ClientId, auth: &[u8]) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyService;

impl DefaultKeyService {
    fn key_len_for(cipher: &str) -> usize {
        if cipher.contains("128") {
            16
        } else if cipher.contains("192") {
            24
        } else {
            32
        }
    }

    /// The authentication data [`DefaultKeyService::verify_resume`] accepts
    pub fn resume_auth_data(public_key: &PublicKey, client_id: &ClientId) -> Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(&public_key.data);
        hasher.update(&client_id.encode());
        let mut out = hasher.finalize().to_vec();
        out.resize(MIN_RESUME_AUTH_LEN, 0);
        out
    }
}

impl KeyService for DefaultKeyService {
    fn generate_channel_key(&self, cipher: &str) -> ChannelKey {
        let mut rng = rand::thread_rng();
        let mut key = vec![0u8; Self::key_len_for(cipher)];
        let mut iv = vec![0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        ChannelKey {
            cipher: cipher.to_string(),
            key,
            iv,
        }
    }

    fn fingerprint(&self, key: &PublicKey) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(&Sha1::digest(&key.data));
        out
    }

    fn verify_resume(&self, public_key: &PublicKey, client_id: &ClientId, auth: &[u8]) -> bool {
        let expected = Self::resume_auth_data(public_key, client_id);
        auth.len() >= MIN_RESUME_AUTH_LEN && auth[..20] == expected[..20]
    }
}
