//! Signing capabilities
//!
//! An [`ArtifactSigner`] owns exactly one private key and signs opaque byte
//! strings with it. How the key was obtained (raw file, keystore, vault) is
//! irrelevant once the signer exists; signers are immutable and shared by `Arc`.

use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use blst::min_pk::SecretKey as BlsSecretKey;
use k256::ecdsa::SigningKey;
use rand::RngCore;
use vigil_core::{KeyType, SignerIdentifier};
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};

/// Ethereum proof-of-possession ciphersuite
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// A signature produced by an [`ArtifactSigner`]
#[derive(Clone, PartialEq, Eq)]
pub enum Signature {
    /// Compressed G2 point
    Bls([u8; 96]),
    /// `r ‖ s ‖ recovery id`
    Secp256k1([u8; 65]),
}

impl Signature {
    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bls(bytes) => bytes,
            Self::Secp256k1(bytes) => bytes,
        }
    }

    /// `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Standard base64 encoding.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.as_bytes())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One private key able to sign
#[async_trait]
pub trait ArtifactSigner: Send + Sync + fmt::Debug {
    /// Normalized identifier derived from the public key
    fn identifier(&self) -> &SignerIdentifier;

    /// Signature scheme
    fn key_type(&self) -> KeyType;

    /// Sign `message` and return the encoded signature
    async fn sign(&self, message: &[u8]) -> Result<Signature>;
}

/// BLS12-381 signer (public keys in G1)
pub struct BlsArtifactSigner {
    secret: BlsSecretKey,
    identifier: SignerIdentifier,
}

impl BlsArtifactSigner {
    /// Build from a 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = BlsSecretKey::from_bytes(bytes).map_err(|e| KeyError::KeyMaterial {
            key_type: KeyType::Bls,
            message: format!("{e:?}"),
        })?;
        let identifier = SignerIdentifier::from_public_key(&secret.sk_to_pk().compress());
        Ok(Self { secret, identifier })
    }

    /// Compressed 48-byte public key.
    pub fn public_key(&self) -> [u8; 48] {
        self.secret.sk_to_pk().compress()
    }

    fn sign_sync(&self, message: &[u8]) -> Signature {
        Signature::Bls(self.secret.sign(message, BLS_DST, &[]).compress())
    }
}

impl fmt::Debug for BlsArtifactSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlsArtifactSigner")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ArtifactSigner for BlsArtifactSigner {
    fn identifier(&self) -> &SignerIdentifier {
        &self.identifier
    }

    fn key_type(&self) -> KeyType {
        KeyType::Bls
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(self.sign_sync(message))
    }
}

/// secp256k1 ECDSA signer over 32-byte digests
pub struct Secp256k1ArtifactSigner {
    secret: SigningKey,
    identifier: SignerIdentifier,
}

impl Secp256k1ArtifactSigner {
    /// Build from a 32-byte scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SigningKey::from_slice(bytes).map_err(|e| KeyError::KeyMaterial {
            key_type: KeyType::Secp256k1,
            message: e.to_string(),
        })?;
        let identifier = SignerIdentifier::from_public_key(
            secret.verifying_key().to_encoded_point(true).as_bytes(),
        );
        Ok(Self { secret, identifier })
    }

    /// Compressed 33-byte SEC1 public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.secret
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }
}

impl fmt::Debug for Secp256k1ArtifactSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secp256k1ArtifactSigner")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ArtifactSigner for Secp256k1ArtifactSigner {
    fn identifier(&self) -> &SignerIdentifier {
        &self.identifier
    }

    fn key_type(&self) -> KeyType {
        KeyType::Secp256k1
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature> {
        if message.len() != 32 {
            return Err(KeyError::signing(format!(
                "secp256k1 signing expects a 32-byte digest, got {} bytes",
                message.len()
            )));
        }
        let (signature, recovery_id) = self
            .secret
            .sign_prehash_recoverable(message)
            .map_err(|e| KeyError::signing(e.to_string()))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(Signature::Secp256k1(out))
    }
}

/// Build a signer for `key_type` from raw secret bytes.
pub fn signer_from_secret(
    key_type: KeyType,
    secret: &[u8],
) -> Result<std::sync::Arc<dyn ArtifactSigner>> {
    Ok(match key_type {
        KeyType::Bls => std::sync::Arc::new(BlsArtifactSigner::from_secret_bytes(secret)?),
        KeyType::Secp256k1 => {
            std::sync::Arc::new(Secp256k1ArtifactSigner::from_secret_bytes(secret)?)
        }
    })
}

/// Fresh random secret for `key_type`.
pub fn generate_secret(key_type: KeyType) -> Result<Zeroizing<[u8; 32]>> {
    let mut rng = rand::thread_rng();
    let mut ikm = Zeroizing::new([0u8; 32]);
    match key_type {
        KeyType::Bls => {
            rng.fill_bytes(&mut ikm[..]);
            let secret = BlsSecretKey::key_gen(&ikm[..], &[]).map_err(|e| {
                KeyError::KeyMaterial {
                    key_type,
                    message: format!("{e:?}"),
                }
            })?;
            Ok(Zeroizing::new(secret.to_bytes()))
        }
        KeyType::Secp256k1 => {
            // Out-of-range scalars are rejected; a few draws are always enough.
            for _ in 0..8 {
                rng.fill_bytes(&mut ikm[..]);
                if SigningKey::from_slice(&ikm[..]).is_ok() {
                    return Ok(ikm);
                }
            }
            Err(KeyError::KeyMaterial {
                key_type,
                message: "no valid scalar drawn".to_string(),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;
    use blst::min_pk::{PublicKey, Signature as BlsSignature};
    use blst::BLST_ERROR;
    use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

    #[tokio::test]
    async fn bls_signature_verifies() {
        let signer = BlsArtifactSigner::from_secret_bytes(&bls_secret(1)).unwrap();
        let message = [9u8; 32];
        let signature = signer.sign(&message).await.unwrap();

        let pk = PublicKey::from_bytes(&signer.public_key()).unwrap();
        let sig = BlsSignature::from_bytes(signature.as_bytes()).unwrap();
        assert_eq!(
            sig.verify(true, &message, BLS_DST, &[], &pk, true),
            BLST_ERROR::BLST_SUCCESS
        );
        assert_eq!(signer.identifier().as_str(), hex::encode(signer.public_key()));
    }

    #[tokio::test]
    async fn secp_signature_recovers_public_key() {
        let signer = Secp256k1ArtifactSigner::from_secret_bytes(&secp_secret(7)).unwrap();
        let digest = [3u8; 32];
        let signature = signer.sign(&digest).await.unwrap();
        let bytes = signature.as_bytes();

        let sig = EcdsaSignature::from_slice(&bytes[..64]).unwrap();
        let recid = RecoveryId::from_byte(bytes[64]).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &sig, recid).unwrap();
        assert_eq!(
            recovered.to_encoded_point(true).as_bytes(),
            signer.public_key().as_slice()
        );
    }

    #[tokio::test]
    async fn secp_rejects_non_digest_input() {
        let signer = Secp256k1ArtifactSigner::from_secret_bytes(&secp_secret(7)).unwrap();
        assert!(signer.sign(b"short").await.is_err());
    }

    #[test]
    fn generated_secrets_build_distinct_signers() {
        for key_type in [KeyType::Bls, KeyType::Secp256k1] {
            let first = generate_secret(key_type).unwrap();
            let second = generate_secret(key_type).unwrap();
            let first = signer_from_secret(key_type, &first[..]).unwrap();
            let second = signer_from_secret(key_type, &second[..]).unwrap();
            assert_eq!(first.key_type(), key_type);
            assert_ne!(first.identifier(), second.identifier());
        }
    }

    #[test]
    fn invalid_secret_is_rejected() {
        assert!(BlsArtifactSigner::from_secret_bytes(&[0u8; 31]).is_err());
        assert!(Secp256k1ArtifactSigner::from_secret_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn signature_encodings() {
        let sig = Signature::Secp256k1([0xab; 65]);
        assert!(sig.to_hex().starts_with("0xabab"));
        assert_eq!(sig.to_base64().len(), 88);
    }
}
