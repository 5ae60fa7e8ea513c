//! Key capabilities used by the request protocol.
//!
//! Requests carry secret attributes encrypted with a symmetric session key. The session key
//! itself travels wrapped under the public key published by the target factory, so only the
//! holder of the matching private key can read the secrets.

use std::fmt::Debug;
use std::sync::Arc;

use orion::aead;
use orion::hazardous::ecc::x25519;

use crate::common::error::FrontendError;

pub const X25519_KEY_TYPE: &str = "X25519";

pub trait SymmetricKey: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>>;

    /// Raw key material, as wrapped for the target.
    fn code(&self) -> &[u8];

    fn encrypt_hex(&self, data: &[u8]) -> crate::Result<String> {
        self.encrypt(data).map(hex::encode)
    }
}

pub trait PublicKey: Send + Sync + Debug {
    fn encrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>>;

    /// Stable identification of the key, used as the session key cache slot.
    fn fingerprint(&self) -> String;

    fn key_type(&self) -> &str;

    fn encrypt_hex(&self, data: &[u8]) -> crate::Result<String> {
        self.encrypt(data).map(hex::encode)
    }
}

pub trait PrivateKey: Send + Sync {
    fn decrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>>;
}

/// Symmetric key protecting encrypted request attributes.
#[derive(Clone)]
pub struct SessionKey {
    key: Arc<aead::SecretKey>,
}

impl SessionKey {
    pub fn generate() -> Self {
        Self {
            key: Arc::new(aead::SecretKey::default()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(Self {
            key: Arc::new(aead::SecretKey::from_slice(bytes)?),
        })
    }
}

impl Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(***)")
    }
}

impl SymmetricKey for SessionKey {
    fn encrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>> {
        Ok(aead::seal(&self.key, data)?)
    }

    fn decrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>> {
        Ok(aead::open(&self.key, data)?)
    }

    fn code(&self) -> &[u8] {
        self.key.unprotected_as_bytes()
    }
}

/// Derives the AEAD key of a sealed message from the X25519 shared secret and both public keys.
fn derive_seal_key(
    shared: &[u8],
    ephemeral_public: &[u8],
    recipient_public: &[u8],
) -> crate::Result<aead::SecretKey> {
    let mut input = Vec::with_capacity(shared.len() + ephemeral_public.len() * 2);
    input.extend_from_slice(shared);
    input.extend_from_slice(ephemeral_public);
    input.extend_from_slice(recipient_public);
    let digest = orion::hash::digest(&input)?;
    Ok(aead::SecretKey::from_slice(digest.as_ref())?)
}

/// Public key published by a factory.
///
/// Encryption produces `ephemeral public key (32 bytes) || AEAD ciphertext`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X25519PublicKey {
    bytes: [u8; x25519::PUBLIC_KEY_SIZE],
}

impl X25519PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; x25519::PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            FrontendError::CryptoError(format!(
                "Invalid public key length {}, expected {}",
                bytes.len(),
                x25519::PUBLIC_KEY_SIZE
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn from_hex(value: &str) -> crate::Result<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| FrontendError::CryptoError(format!("Invalid public key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl PublicKey for X25519PublicKey {
    fn encrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>> {
        let recipient = x25519::PublicKey::from_slice(&self.bytes)?;
        let ephemeral = x25519::PrivateKey::generate();
        let ephemeral_public = x25519::PublicKey::try_from(&ephemeral)?.to_bytes();
        let shared = x25519::key_agreement(&ephemeral, &recipient)?;
        let key = derive_seal_key(shared.unprotected_as_bytes(), &ephemeral_public, &self.bytes)?;

        let sealed = aead::seal(&key, data)?;
        let mut output = Vec::with_capacity(ephemeral_public.len() + sealed.len());
        output.extend_from_slice(&ephemeral_public);
        output.extend(sealed);
        Ok(output)
    }

    fn fingerprint(&self) -> String {
        self.to_hex()
    }

    fn key_type(&self) -> &str {
        X25519_KEY_TYPE
    }
}

/// Private counterpart of [`X25519PublicKey`], held by factories.
pub struct X25519PrivateKey {
    key: x25519::PrivateKey,
}

impl X25519PrivateKey {
    pub fn generate() -> Self {
        Self {
            key: x25519::PrivateKey::generate(),
        }
    }

    pub fn public_key(&self) -> crate::Result<X25519PublicKey> {
        let public = x25519::PublicKey::try_from(&self.key)?;
        X25519PublicKey::from_bytes(&public.to_bytes())
    }
}

impl PrivateKey for X25519PrivateKey {
    fn decrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>> {
        if data.len() < x25519::PUBLIC_KEY_SIZE {
            return Err(FrontendError::CryptoError(
                "Sealed message is too short".to_string(),
            ));
        }
        let (ephemeral_public, sealed) = data.split_at(x25519::PUBLIC_KEY_SIZE);
        let ephemeral = x25519::PublicKey::from_slice(ephemeral_public)?;
        let own_public = self.public_key()?;
        let shared = x25519::key_agreement(&self.key, &ephemeral)?;
        let key = derive_seal_key(
            shared.unprotected_as_bytes(),
            ephemeral_public,
            &own_public.bytes,
        )?;
        Ok(aead::open(&key, sealed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PrivateKey, PublicKey, SessionKey, SymmetricKey, X25519PrivateKey, X25519PublicKey,
    };

    #[test]
    fn test_session_key_roundtrip() {
        let key = SessionKey::generate();
        let sealed = key.encrypt(b"secret").unwrap();
        assert_ne!(sealed, b"secret");
        assert_eq!(key.decrypt(&sealed).unwrap(), b"secret");

        let copy = SessionKey::from_bytes(key.code()).unwrap();
        assert_eq!(copy.decrypt(&sealed).unwrap(), b"secret");
    }

    #[test]
    fn test_wrapped_session_key() {
        let private = X25519PrivateKey::generate();
        let public = private.public_key().unwrap();
        let session = SessionKey::generate();

        let wrapped = public.encrypt(session.code()).unwrap();
        let unwrapped = private.decrypt(&wrapped).unwrap();
        assert_eq!(unwrapped, session.code());
    }

    #[test]
    fn test_wrong_private_key() {
        let public = X25519PrivateKey::generate().public_key().unwrap();
        let other = X25519PrivateKey::generate();
        let wrapped = public.encrypt(b"data").unwrap();
        assert!(other.decrypt(&wrapped).is_err());
    }

    #[test]
    fn test_public_key_hex() {
        let public = X25519PrivateKey::generate().public_key().unwrap();
        let parsed = X25519PublicKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(parsed, public);
        assert_eq!(parsed.fingerprint(), public.fingerprint());
        assert!(X25519PublicKey::from_hex("abcd").is_err());
        assert!(X25519PublicKey::from_hex("xyz").is_err());
    }
}
