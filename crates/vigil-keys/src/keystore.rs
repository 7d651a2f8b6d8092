//! EIP-2335 encrypted keystores
//!
//! Decryption supports both KDFs allowed by the format (`scrypt`, `pbkdf2` with
//! `hmac-sha256`), a `sha256` checksum and `aes-128-ctr`. Encryption always uses
//! pbkdf2 with a caller-chosen iteration count; it backs key import and tests.
//!
//! Passwords are NFKD-normalized and stripped of control characters before use.

use std::path::Path;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const KEYSTORE_VERSION: u32 = 4;
const DERIVED_KEY_LEN: usize = 32;

/// KDF, checksum or cipher module of a keystore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module<P> {
    /// Module function name
    pub function: String,
    /// Function parameters
    pub params: P,
    /// Hex payload (empty for the KDF)
    pub message: String,
}

/// Parameters of the supported KDFs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KdfParams {
    /// `scrypt`
    Scrypt {
        /// Output length
        dklen: usize,
        /// CPU/memory cost, a power of two
        n: u32,
        /// Block size
        r: u32,
        /// Parallelism
        p: u32,
        /// Hex salt
        salt: String,
    },
    /// `pbkdf2`
    Pbkdf2 {
        /// Iteration count
        c: u32,
        /// Output length
        dklen: usize,
        /// Pseudo-random function, always `hmac-sha256`
        prf: String,
        /// Hex salt
        salt: String,
    },
}

/// Cipher parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherParams {
    /// Hex initialization vector
    pub iv: String,
}

/// Crypto section of a keystore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreCrypto {
    /// Key derivation
    pub kdf: Module<KdfParams>,
    /// Password check
    pub checksum: Module<serde_json::Value>,
    /// Secret encryption
    pub cipher: Module<CipherParams>,
}

/// An EIP-2335 keystore document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keystore {
    /// Encrypted secret
    pub crypto: KeystoreCrypto,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hex public key, without prefix
    #[serde(default)]
    pub pubkey: String,
    /// Derivation path
    #[serde(default)]
    pub path: String,
    /// Keystore UUID
    pub uuid: String,
    /// Format version, always 4
    pub version: u32,
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| KeyError::keystore(format!("{field} is not hex: {e}")))
}

/// Normalize a password as the format requires.
pub fn normalize_password(password: &str) -> Zeroizing<String> {
    Zeroizing::new(password.nfkd().filter(|c| !c.is_control()).collect())
}

impl Keystore {
    /// Parse a keystore from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let keystore: Self = serde_json::from_str(json)
            .map_err(|e| KeyError::keystore(format!("malformed keystore json: {e}")))?;
        if keystore.version != KEYSTORE_VERSION {
            return Err(KeyError::keystore(format!(
                "unsupported keystore version {}",
                keystore.version
            )));
        }
        Ok(keystore)
    }

    /// Read and parse a keystore file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| KeyError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| KeyError::keystore(format!("cannot serialize keystore: {e}")))
    }

    /// Decrypt the secret with `password`.
    pub fn decrypt(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let password = normalize_password(password);
        let derived = self.derive_key(password.as_bytes())?;

        let ciphertext = decode_hex("cipher.message", &self.crypto.cipher.message)?;
        let expected = decode_hex("checksum.message", &self.crypto.checksum.message)?;
        if self.crypto.checksum.function != "sha256" {
            return Err(KeyError::keystore(format!(
                "unsupported checksum function {}",
                self.crypto.checksum.function
            )));
        }
        if checksum(&derived, &ciphertext).as_slice() != expected.as_slice() {
            return Err(KeyError::ChecksumMismatch);
        }

        if self.crypto.cipher.function != "aes-128-ctr" {
            return Err(KeyError::keystore(format!(
                "unsupported cipher {}",
                self.crypto.cipher.function
            )));
        }
        let iv = decode_hex("cipher.params.iv", &self.crypto.cipher.params.iv)?;
        let mut secret = Zeroizing::new(ciphertext);
        apply_cipher(&derived[..16], &iv, &mut secret)?;
        Ok(secret)
    }

    fn derive_key(&self, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let kdf = &self.crypto.kdf;
        match (&kdf.params, kdf.function.as_str()) {
            (
                KdfParams::Scrypt {
                    dklen,
                    n,
                    r,
                    p,
                    salt,
                },
                "scrypt",
            ) => {
                check_dklen(*dklen)?;
                if !n.is_power_of_two() || *n < 2 {
                    return Err(KeyError::keystore("scrypt n must be a power of two"));
                }
                let salt = decode_hex("kdf.params.salt", salt)?;
                let log_n = u8::try_from(n.trailing_zeros())
                    .map_err(|_| KeyError::keystore("scrypt n is too large"))?;
                let params = scrypt::Params::new(log_n, *r, *p, *dklen)
                    .map_err(|e| KeyError::keystore(format!("invalid scrypt params: {e}")))?;
                let mut out = Zeroizing::new(vec![0u8; *dklen]);
                scrypt::scrypt(password, &salt, &params, &mut out)
                    .map_err(|e| KeyError::keystore(format!("scrypt failed: {e}")))?;
                Ok(out)
            }
            (
                KdfParams::Pbkdf2 {
                    c,
                    dklen,
                    prf,
                    salt,
                },
                "pbkdf2",
            ) => {
                check_dklen(*dklen)?;
                if prf != "hmac-sha256" {
                    return Err(KeyError::keystore(format!("unsupported pbkdf2 prf {prf}")));
                }
                let salt = decode_hex("kdf.params.salt", salt)?;
                let mut out = Zeroizing::new(vec![0u8; *dklen]);
                pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, *c, &mut out);
                Ok(out)
            }
            (_, function) => Err(KeyError::keystore(format!(
                "kdf function {function} does not match its params"
            ))),
        }
    }

    /// Encrypt `secret` under `password` using pbkdf2 with `iterations` rounds.
    pub fn encrypt(secret: &[u8], password: &str, pubkey: &[u8], iterations: u32) -> Result<Self> {
        let password = normalize_password(password);
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; 32];
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let mut derived = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);

        let mut ciphertext = secret.to_vec();
        apply_cipher(&derived[..16], &iv, &mut ciphertext)?;
        let checksum = checksum(&derived, &ciphertext);

        Ok(Self {
            crypto: KeystoreCrypto {
                kdf: Module {
                    function: "pbkdf2".to_string(),
                    params: KdfParams::Pbkdf2 {
                        c: iterations,
                        dklen: DERIVED_KEY_LEN,
                        prf: "hmac-sha256".to_string(),
                        salt: hex::encode(salt),
                    },
                    message: String::new(),
                },
                checksum: Module {
                    function: "sha256".to_string(),
                    params: serde_json::Value::Object(serde_json::Map::new()),
                    message: hex::encode(checksum),
                },
                cipher: Module {
                    function: "aes-128-ctr".to_string(),
                    params: CipherParams {
                        iv: hex::encode(iv),
                    },
                    message: hex::encode(ciphertext),
                },
            },
            description: None,
            pubkey: hex::encode(pubkey),
            path: String::new(),
            uuid: uuid::Uuid::new_v4().to_string(),
            version: KEYSTORE_VERSION,
        })
    }
}

fn check_dklen(dklen: usize) -> Result<()> {
    if dklen < DERIVED_KEY_LEN {
        return Err(KeyError::keystore(format!(
            "derived key length {dklen} is shorter than {DERIVED_KEY_LEN}"
        )));
    }
    Ok(())
}

fn checksum(derived: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(&derived[16..32]);
    hasher.update(ciphertext);
    hasher.finalize().into()
}

fn apply_cipher(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> Result<()> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|_| KeyError::keystore("aes-128-ctr needs a 16-byte key and iv"))?;
    cipher.apply_keystream(buffer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn encrypt_then_decrypt() {
        let secret = [42u8; 32];
        let keystore = Keystore::encrypt(&secret, "correct horse", &[1u8; 48], 16).unwrap();
        let json = keystore.to_json().unwrap();
        let parsed = Keystore::from_json(&json).unwrap();
        assert_eq!(parsed.decrypt("correct horse").unwrap().as_slice(), &secret);
        assert_eq!(parsed.pubkey, hex::encode([1u8; 48]));
    }

    #[test]
    fn wrong_password_fails_checksum() {
        let keystore = Keystore::encrypt(&[1u8; 32], "right", &[], 16).unwrap();
        assert_matches!(keystore.decrypt("wrong"), Err(KeyError::ChecksumMismatch));
    }

    #[test]
    fn control_characters_are_ignored_in_passwords() {
        let keystore = Keystore::encrypt(&[5u8; 32], "pass\u{7f}word", &[], 16).unwrap();
        assert_eq!(keystore.decrypt("password").unwrap().as_slice(), &[5u8; 32]);
    }

    fn scrypt_keystore(secret: &[u8], password: &str) -> Keystore {
        let salt = [7u8; 32];
        let iv = [9u8; 16];
        let params = scrypt::Params::new(4, 8, 1, 32).unwrap();
        let mut derived = vec![0u8; 32];
        scrypt::scrypt(normalize_password(password).as_bytes(), &salt, &params, &mut derived)
            .unwrap();
        let mut ciphertext = secret.to_vec();
        apply_cipher(&derived[..16], &iv, &mut ciphertext).unwrap();

        let mut keystore = Keystore::encrypt(secret, password, &[], 1).unwrap();
        keystore.crypto.kdf = Module {
            function: "scrypt".to_string(),
            params: KdfParams::Scrypt {
                dklen: 32,
                n: 16,
                r: 8,
                p: 1,
                salt: hex::encode(salt),
            },
            message: String::new(),
        };
        keystore.crypto.checksum.message = hex::encode(checksum(&derived, &ciphertext));
        keystore.crypto.cipher.params.iv = hex::encode(iv);
        keystore.crypto.cipher.message = hex::encode(ciphertext);
        keystore
    }

    #[test]
    fn decrypts_scrypt_keystore() {
        let keystore = scrypt_keystore(&[3u8; 32], "testpassword🔑");
        let parsed = Keystore::from_json(&keystore.to_json().unwrap()).unwrap();
        // Mathematical fraktur letters normalize to plain ASCII under NFKD.
        let secret = parsed.decrypt("𝔱𝔢𝔰𝔱𝔭𝔞𝔰𝔰𝔴𝔬𝔯𝔡🔑").unwrap();
        assert_eq!(secret.as_slice(), &[3u8; 32]);
    }

    #[test]
    fn kdf_function_must_match_params() {
        let mut keystore = scrypt_keystore(&[3u8; 32], "pw");
        keystore.crypto.kdf.function = "pbkdf2".to_string();
        assert_matches!(keystore.decrypt("pw"), Err(KeyError::Keystore { .. }));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut keystore = Keystore::encrypt(&[1u8; 32], "pw", &[], 1).unwrap();
        keystore.version = 3;
        let json = serde_json::to_string(&keystore).unwrap();
        assert_matches!(Keystore::from_json(&json), Err(KeyError::Keystore { .. }));
    }
}
