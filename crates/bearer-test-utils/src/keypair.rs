//! Deterministic Ed25519 keypairs for token signing in tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};

/// An Ed25519 keypair derived from a single seed byte, so tests can
/// reproduce the same key material across runs.
pub struct TestKeypair {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Derive a keypair from a seed byte, tagged with the given key ID.
    ///
    /// # Panics
    ///
    /// Panics if ring rejects the seed, which does not happen for the
    /// deterministic expansion used here.
    pub fn new(seed: u8, kid: &str) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create test keypair");

        let public_key_bytes = key_pair.public_key().as_ref().to_vec();
        let private_key_pkcs8 = build_pkcs8_from_seed(&seed_bytes);

        Self {
            kid: kid.to_string(),
            public_key_bytes,
            private_key_pkcs8,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign arbitrary JSON claims into a compact JWT with this key.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails.
    pub fn sign_token(&self, claims: &serde_json::Value) -> String {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        encode(&header, claims, &encoding_key).expect("Failed to sign token")
    }

    /// The public half as a JWK document entry.
    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    /// The public half as a JWK entry with an explicit validity window.
    pub fn jwk_json_with_window(&self, nbf: i64, exp: i64) -> serde_json::Value {
        let mut jwk = self.jwk_json();
        jwk["nbf"] = serde_json::json!(nbf);
        jwk["exp"] = serde_json::json!(exp);
        jwk
    }
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::new();

    // Outer SEQUENCE tag
    pkcs8.push(0x30);
    pkcs8.push(0x2e); // Length: 46 bytes

    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);

    // Algorithm Identifier: SEQUENCE
    pkcs8.push(0x30);
    pkcs8.push(0x05); // Length: 5 bytes
                      // OID for Ed25519: 1.3.101.112
    pkcs8.extend_from_slice(&[0x06, 0x03, 0x2b, 0x65, 0x70]);

    // Private Key: OCTET STRING
    pkcs8.push(0x04);
    pkcs8.push(0x22); // Length: 34 bytes
                      // Inner OCTET STRING with seed
    pkcs8.push(0x04);
    pkcs8.push(0x20); // Length: 32 bytes
    pkcs8.extend_from_slice(seed);

    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_is_deterministic() {
        let a = TestKeypair::new(7, "k7");
        let b = TestKeypair::new(7, "k7");
        assert_eq!(a.public_key_bytes, b.public_key_bytes);
        assert_eq!(a.private_key_pkcs8, b.private_key_pkcs8);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = TestKeypair::new(1, "k1");
        let b = TestKeypair::new(2, "k2");
        assert_ne!(a.public_key_bytes, b.public_key_bytes);
    }

    #[test]
    fn test_jwk_shape() {
        let jwk = TestKeypair::new(3, "k3").jwk_json();
        assert_eq!(jwk["kty"], "OKP");
        assert_eq!(jwk["crv"], "Ed25519");
        assert_eq!(jwk["kid"], "k3");
        assert_eq!(jwk["use"], "sig");
        assert!(jwk["x"].as_str().is_some_and(|x| !x.is_empty()));
        assert!(jwk.get("nbf").is_none());
    }

    #[test]
    fn test_jwk_window() {
        let jwk = TestKeypair::new(3, "k3").jwk_json_with_window(100, 200);
        assert_eq!(jwk["nbf"], 100);
        assert_eq!(jwk["exp"], 200);
    }

    #[test]
    fn test_signed_token_has_three_segments() {
        let keypair = TestKeypair::new(4, "k4");
        let token = keypair.sign_token(&serde_json::json!({ "sub": "u", "exp": 1 }));
        assert_eq!(token.split('.').count(), 3);
    }
}
