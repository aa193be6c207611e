//! Signing keys, key sets and key generation.
//!
//! Keys are stored in JWK shape (`kty`, `kid`, `alg`, `use` plus the public parameters) so the
//! public projection can be served as-is from a JWKS endpoint. The private part travels in
//! `private_der` (base64, PKCS#1 for RSA, PKCS#8 for EC and OKP) and is dropped by
//! [`Key::public_key`].

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::{rngs::OsRng, RngCore};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CredentialError, CredentialResult};

const RSA_KEY_BITS: usize = 2048;
const KEY_USE_SIGNING: &str = "sig";

/// Algorithm family, deciding which key material a key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    pub fn of(alg: Algorithm) -> Self {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Okp,
        }
    }

    pub fn is_symmetric(self) -> bool {
        self == KeyFamily::Hmac
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Valid,
    Expired,
}

/// Key parameters, tagged by JWK key type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum KeyMaterial {
    /// Shared secret, base64url in `k`
    #[serde(rename = "oct")]
    Oct { k: String },

    #[serde(rename = "RSA")]
    Rsa {
        n: String,
        e: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_der: Option<String>,
    },

    #[serde(rename = "EC")]
    Ec {
        crv: String,
        x: String,
        y: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_der: Option<String>,
    },

    #[serde(rename = "OKP")]
    Okp {
        crv: String,
        x: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_der: Option<String>,
    },
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Oct { .. } => f.debug_struct("Oct").field("k", &"<redacted>").finish(),
            KeyMaterial::Rsa { private_der, .. } => f
                .debug_struct("Rsa")
                .field("private", &private_der.is_some())
                .finish_non_exhaustive(),
            KeyMaterial::Ec {
                crv, private_der, ..
            } => f
                .debug_struct("Ec")
                .field("crv", crv)
                .field("private", &private_der.is_some())
                .finish_non_exhaustive(),
            KeyMaterial::Okp {
                crv, private_der, ..
            } => f
                .debug_struct("Okp")
                .field("crv", crv)
                .field("private", &private_der.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// A single signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub kid: String,
    pub alg: Algorithm,
    #[serde(rename = "use")]
    pub key_use: String,
    #[serde(flatten)]
    pub material: KeyMaterial,
    pub created_at: DateTime<Utc>,
    pub status: KeyStatus,
}

impl Key {
    /// Generate a fresh signing key with a random key id.
    ///
    /// RSA generation is CPU bound; async callers should run this on a blocking thread.
    pub fn generate(alg: Algorithm) -> CredentialResult<Self> {
        let material = match KeyFamily::of(alg) {
            KeyFamily::Hmac => generate_secret(alg),
            KeyFamily::Rsa => generate_rsa()?,
            KeyFamily::Ec => generate_ec(alg)?,
            KeyFamily::Okp => generate_ed25519()?,
        };

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            alg,
            key_use: KEY_USE_SIGNING.to_string(),
            material,
            created_at: Utc::now(),
            status: KeyStatus::Valid,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.status == KeyStatus::Valid
    }

    /// Copy of this key with every private component removed.
    ///
    /// Fails for symmetric keys: the secret is the only material they have.
    pub fn public_key(&self) -> CredentialResult<Key> {
        let material = match &self.material {
            KeyMaterial::Oct { .. } => return Err(CredentialError::NoPublicKey(self.kid.clone())),
            KeyMaterial::Rsa { n, e, .. } => KeyMaterial::Rsa {
                n: n.clone(),
                e: e.clone(),
                private_der: None,
            },
            KeyMaterial::Ec { crv, x, y, .. } => KeyMaterial::Ec {
                crv: crv.clone(),
                x: x.clone(),
                y: y.clone(),
                private_der: None,
            },
            KeyMaterial::Okp { crv, x, .. } => KeyMaterial::Okp {
                crv: crv.clone(),
                x: x.clone(),
                private_der: None,
            },
        };

        Ok(Key {
            kid: self.kid.clone(),
            alg: self.alg,
            key_use: self.key_use.clone(),
            material,
            created_at: self.created_at,
            status: self.status,
        })
    }

    pub(crate) fn encoding_key(&self) -> CredentialResult<EncodingKey> {
        let missing_private = || -> CredentialError {
            anyhow::anyhow!("Key {} carries no private component", self.kid).into()
        };

        match &self.material {
            KeyMaterial::Oct { k } => Ok(EncodingKey::from_secret(&decode_url(k)?)),
            KeyMaterial::Rsa { private_der, .. } => {
                let der = private_der.as_deref().ok_or_else(missing_private)?;
                Ok(EncodingKey::from_rsa_der(&decode_std(der)?))
            }
            KeyMaterial::Ec { private_der, .. } => {
                let der = private_der.as_deref().ok_or_else(missing_private)?;
                Ok(EncodingKey::from_ec_der(&decode_std(der)?))
            }
            KeyMaterial::Okp { private_der, .. } => {
                let der = private_der.as_deref().ok_or_else(missing_private)?;
                Ok(EncodingKey::from_ed_der(&decode_std(der)?))
            }
        }
    }

    /// Verification material: the shared secret for HMAC, the public half otherwise.
    pub(crate) fn decoding_key(&self) -> CredentialResult<DecodingKey> {
        let key = match &self.material {
            KeyMaterial::Oct { k } => Ok(DecodingKey::from_secret(&decode_url(k)?)),
            KeyMaterial::Rsa { n, e, .. } => DecodingKey::from_rsa_components(n, e),
            KeyMaterial::Ec { x, y, .. } => DecodingKey::from_ec_components(x, y),
            KeyMaterial::Okp { x, .. } => DecodingKey::from_ed_components(x),
        };

        key.map_err(|e| anyhow::anyhow!("Invalid public parameters for key {}: {e}", self.kid).into())
    }
}

/// Keys of one signing domain, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub keys: Vec<Key>,
}

impl KeySet {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    pub fn single(key: Key) -> Self {
        Self { keys: vec![key] }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Newest key still marked valid.
    pub fn signing_key(&self) -> Option<&Key> {
        self.keys.iter().find(|key| key.is_valid())
    }

    pub fn find(&self, kid: &str) -> Option<&Key> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub(crate) fn push_newest(&mut self, key: Key) {
        self.keys.insert(0, key);
    }
}

fn generate_secret(alg: Algorithm) -> KeyMaterial {
    let len = match alg {
        Algorithm::HS384 => 48,
        Algorithm::HS512 => 64,
        _ => 32,
    };
    let mut secret = vec![0u8; len];
    OsRng.fill_bytes(&mut secret);

    KeyMaterial::Oct {
        k: URL_SAFE_NO_PAD.encode(&secret),
    }
}

fn generate_rsa() -> CredentialResult<KeyMaterial> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| CredentialError::KeyGeneration(format!("RSA: {e}")))?;
    let der = private
        .to_pkcs1_der()
        .map_err(|e| CredentialError::KeyGeneration(format!("RSA PKCS#1 encoding: {e}")))?;

    Ok(KeyMaterial::Rsa {
        n: URL_SAFE_NO_PAD.encode(private.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(private.e().to_bytes_be()),
        private_der: Some(STANDARD.encode(der.as_bytes())),
    })
}

fn generate_ec(alg: Algorithm) -> CredentialResult<KeyMaterial> {
    let (signing_alg, crv, coord_len) = match alg {
        Algorithm::ES384 => (&ECDSA_P384_SHA384_FIXED_SIGNING, "P-384", 48),
        _ => (&ECDSA_P256_SHA256_FIXED_SIGNING, "P-256", 32),
    };

    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing_alg, &rng)
        .map_err(|_| CredentialError::KeyGeneration(format!("{crv}: key generation")))?;
    let pair = EcdsaKeyPair::from_pkcs8(signing_alg, pkcs8.as_ref(), &rng)
        .map_err(|e| CredentialError::KeyGeneration(format!("{crv}: {e}")))?;

    // Uncompressed SEC1 point: 0x04 || x || y
    let point = pair.public_key().as_ref();
    if point.len() != 1 + 2 * coord_len {
        return Err(CredentialError::KeyGeneration(format!(
            "{crv}: unexpected public point length {}",
            point.len()
        )));
    }

    Ok(KeyMaterial::Ec {
        crv: crv.to_string(),
        x: URL_SAFE_NO_PAD.encode(&point[1..1 + coord_len]),
        y: URL_SAFE_NO_PAD.encode(&point[1 + coord_len..]),
        private_der: Some(STANDARD.encode(pkcs8.as_ref())),
    })
}

fn generate_ed25519() -> CredentialResult<KeyMaterial> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| CredentialError::KeyGeneration("Ed25519: key generation".to_string()))?;
    let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| CredentialError::KeyGeneration(format!("Ed25519: {e}")))?;

    Ok(KeyMaterial::Okp {
        crv: "Ed25519".to_string(),
        x: URL_SAFE_NO_PAD.encode(pair.public_key().as_ref()),
        private_der: Some(STANDARD.encode(pkcs8.as_ref())),
    })
}

fn decode_url(value: &str) -> CredentialResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| anyhow::anyhow!("Invalid base64url key parameter: {e}").into())
}

fn decode_std(value: &str) -> CredentialResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| anyhow::anyhow!("Invalid base64 private key: {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_mapping() {
        assert_eq!(KeyFamily::of(Algorithm::HS384), KeyFamily::Hmac);
        assert_eq!(KeyFamily::of(Algorithm::PS256), KeyFamily::Rsa);
        assert_eq!(KeyFamily::of(Algorithm::ES384), KeyFamily::Ec);
        assert_eq!(KeyFamily::of(Algorithm::EdDSA), KeyFamily::Okp);
        assert!(KeyFamily::Hmac.is_symmetric());
        assert!(!KeyFamily::Rsa.is_symmetric());
    }

    #[test]
    fn test_hmac_secret_length_follows_algorithm() {
        for (alg, len) in [
            (Algorithm::HS256, 32),
            (Algorithm::HS384, 48),
            (Algorithm::HS512, 64),
        ] {
            let key = Key::generate(alg).unwrap();
            match &key.material {
                KeyMaterial::Oct { k } => assert_eq!(URL_SAFE_NO_PAD.decode(k).unwrap().len(), len),
                other => panic!("unexpected material {:?}", other),
            }
        }
    }

    #[test]
    fn test_generated_key_metadata() {
        let key = Key::generate(Algorithm::ES256).unwrap();
        assert_eq!(key.key_use, "sig");
        assert!(key.is_valid());
        assert!(Uuid::parse_str(&key.kid).is_ok());
        match &key.material {
            KeyMaterial::Ec { crv, x, y, private_der } => {
                assert_eq!(crv, "P-256");
                assert_eq!(URL_SAFE_NO_PAD.decode(x).unwrap().len(), 32);
                assert_eq!(URL_SAFE_NO_PAD.decode(y).unwrap().len(), 32);
                assert!(private_der.is_some());
            }
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_public_key_strips_private_part() {
        let key = Key::generate(Algorithm::EdDSA).unwrap();
        let public = key.public_key().unwrap();

        assert_eq!(public.kid, key.kid);
        assert!(public.encoding_key().is_err());
        let json = serde_json::to_value(&public).unwrap();
        assert_eq!(json["kty"], "OKP");
        assert_eq!(json["crv"], "Ed25519");
        assert_eq!(json["use"], "sig");
        assert!(json.get("private_der").is_none());
    }

    #[test]
    fn test_symmetric_key_has_no_public_projection() {
        let key = Key::generate(Algorithm::HS256).unwrap();
        assert!(matches!(
            key.public_key(),
            Err(CredentialError::NoPublicKey(kid)) if kid == key.kid
        ));
    }

    #[test]
    fn test_key_json_shape_survives_storage() {
        let key = Key::generate(Algorithm::ES384).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let restored: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, key);
        assert!(json.contains(r#""kty":"EC""#));
        assert!(json.contains(r#""alg":"ES384""#));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = Key::generate(Algorithm::HS256).unwrap();
        let secret = match &key.material {
            KeyMaterial::Oct { k } => k.clone(),
            _ => unreachable!(),
        };
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(&secret));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_signing_key_skips_expired() {
        let mut expired = Key::generate(Algorithm::HS256).unwrap();
        expired.status = KeyStatus::Expired;
        let valid = Key::generate(Algorithm::HS256).unwrap();

        let set = KeySet::new(vec![expired.clone(), valid.clone()]);
        assert_eq!(set.signing_key().unwrap().kid, valid.kid);
        assert_eq!(set.find(&expired.kid).unwrap().kid, expired.kid);

        let only_expired = KeySet::single(expired);
        assert!(only_expired.signing_key().is_none());
        assert!(!only_expired.is_empty());
    }
}
