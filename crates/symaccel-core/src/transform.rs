//! Accelerator-native transforms and transform chains.

use crate::algorithm::{NativeAead, NativeAuth, NativeCipher};
use crate::session::CryptoOp;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Copied key material owned by a transform. Zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Copy key bytes.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {}])", self.0.len())
    }
}

/// Cipher direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    /// Encrypt
    Encrypt,
    /// Decrypt
    Decrypt,
}

/// Authentication direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOp {
    /// Compute and write a digest
    Generate,
    /// Compare against the supplied digest
    Verify,
}

impl From<CryptoOp> for CipherOp {
    fn from(op: CryptoOp) -> Self {
        match op {
            CryptoOp::Encode => Self::Encrypt,
            CryptoOp::Decode => Self::Decrypt,
        }
    }
}

impl From<CryptoOp> for AuthOp {
    fn from(op: CryptoOp) -> Self {
        match op {
            CryptoOp::Encode => Self::Generate,
            CryptoOp::Decode => Self::Verify,
        }
    }
}

/// Native cipher transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherTransform {
    /// Algorithm
    pub algo: NativeCipher,
    /// Direction
    pub op: CipherOp,
    /// Key
    pub key: KeyMaterial,
    /// IV length in bytes
    pub iv_len: u16,
}

/// Native authentication transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTransform {
    /// Algorithm
    pub algo: NativeAuth,
    /// Direction
    pub op: AuthOp,
    /// Key
    pub key: KeyMaterial,
    /// IV length in bytes
    pub iv_len: u16,
    /// Digest length in bytes
    pub digest_len: u16,
}

/// Native fused AEAD transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadTransform {
    /// Algorithm
    pub algo: NativeAead,
    /// Direction
    pub op: CipherOp,
    /// Key
    pub key: KeyMaterial,
    /// IV length in bytes
    pub iv_len: u16,
    /// AAD length in bytes
    pub aad_len: u16,
    /// Tag length in bytes
    pub digest_len: u16,
}

/// Which primitive runs first when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOrder {
    /// Cipher, then authenticate the result
    CipherThenAuth,
    /// Authenticate, then cipher
    AuthThenCipher,
}

impl ChainOrder {
    /// Resolve the order for a direction and ciphertext-authentication
    /// preference.
    ///
    /// Encoding with authenticated ciphertext runs the cipher first; decoding
    /// must then verify before deciphering, and the other way round.
    #[must_use]
    pub fn resolve(op: CryptoOp, auth_cipher_text: bool) -> Self {
        let cipher_first = match op {
            CryptoOp::Encode => auth_cipher_text,
            CryptoOp::Decode => !auth_cipher_text,
        };
        if cipher_first {
            Self::CipherThenAuth
        } else {
            Self::AuthThenCipher
        }
    }
}

/// Transform chain handed to the accelerator at session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformChain {
    /// Auth algorithm is NULL
    CipherOnly(CipherTransform),
    /// Cipher algorithm is NULL
    AuthOnly(AuthTransform),
    /// Both primitives, in the given order
    Chained {
        /// Cipher transform
        cipher: CipherTransform,
        /// Auth transform
        auth: AuthTransform,
        /// Execution order
        order: ChainOrder,
    },
    /// Fused AEAD
    Aead(AeadTransform),
}

impl TransformChain {
    /// Combine separately built cipher and auth transforms.
    ///
    /// A NULL cipher yields an auth-only chain (even if the auth is NULL as
    /// well); a NULL auth yields a cipher-only chain.
    #[must_use]
    pub fn separate(
        cipher: CipherTransform,
        auth: AuthTransform,
        op: CryptoOp,
        auth_cipher_text: bool,
    ) -> Self {
        if cipher.algo == NativeCipher::Null {
            Self::AuthOnly(auth)
        } else if auth.algo == NativeAuth::Null {
            Self::CipherOnly(cipher)
        } else {
            Self::Chained {
                cipher,
                auth,
                order: ChainOrder::resolve(op, auth_cipher_text),
            }
        }
    }

    /// Cipher transform, if the chain has one.
    #[must_use]
    pub fn cipher(&self) -> Option<&CipherTransform> {
        match self {
            Self::CipherOnly(c) | Self::Chained { cipher: c, .. } => Some(c),
            _ => None,
        }
    }

    /// Auth transform, if the chain has one.
    #[must_use]
    pub fn auth(&self) -> Option<&AuthTransform> {
        match self {
            Self::AuthOnly(a) | Self::Chained { auth: a, .. } => Some(a),
            _ => None,
        }
    }

    /// AEAD transform, if the chain is fused.
    #[must_use]
    pub fn aead(&self) -> Option<&AeadTransform> {
        match self {
            Self::Aead(a) => Some(a),
            _ => None,
        }
    }

    /// Execution order of a chained pair.
    #[must_use]
    pub fn order(&self) -> Option<ChainOrder> {
        match self {
            Self::Chained { order, .. } => Some(*order),
            _ => None,
        }
    }

    /// Digest length produced or checked by the chain.
    #[must_use]
    pub fn digest_len(&self) -> u16 {
        match self {
            Self::AuthOnly(a) | Self::Chained { auth: a, .. } => a.digest_len,
            Self::Aead(a) => a.digest_len,
            Self::CipherOnly(_) => 0,
        }
    }
}

impl fmt::Display for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CipherOnly(c) => write!(f, "{:?}", c.algo),
            Self::AuthOnly(a) => write!(f, "{:?}", a.algo),
            Self::Chained {
                cipher,
                auth,
                order: ChainOrder::CipherThenAuth,
            } => write!(f, "{:?} -> {:?}", cipher.algo, auth.algo),
            Self::Chained {
                cipher,
                auth,
                order: ChainOrder::AuthThenCipher,
            } => write!(f, "{:?} -> {:?}", auth.algo, cipher.algo),
            Self::Aead(a) => write!(f, "{:?}", a.algo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(algo: NativeCipher) -> CipherTransform {
        CipherTransform {
            algo,
            op: CipherOp::Encrypt,
            key: KeyMaterial::new(&[0u8; 16]),
            iv_len: 16,
        }
    }

    fn auth(algo: NativeAuth) -> AuthTransform {
        AuthTransform {
            algo,
            op: AuthOp::Generate,
            key: KeyMaterial::new(&[0u8; 32]),
            iv_len: 0,
            digest_len: 32,
        }
    }

    #[test]
    fn test_order_resolution() {
        assert_eq!(
            ChainOrder::resolve(CryptoOp::Encode, true),
            ChainOrder::CipherThenAuth
        );
        assert_eq!(
            ChainOrder::resolve(CryptoOp::Encode, false),
            ChainOrder::AuthThenCipher
        );
        assert_eq!(
            ChainOrder::resolve(CryptoOp::Decode, true),
            ChainOrder::AuthThenCipher
        );
        assert_eq!(
            ChainOrder::resolve(CryptoOp::Decode, false),
            ChainOrder::CipherThenAuth
        );
    }

    #[test]
    fn test_null_components_collapse_chain() {
        let chain = TransformChain::separate(
            cipher(NativeCipher::Null),
            auth(NativeAuth::Sha256Hmac),
            CryptoOp::Encode,
            true,
        );
        assert!(matches!(chain, TransformChain::AuthOnly(_)));

        let chain = TransformChain::separate(
            cipher(NativeCipher::AesCbc),
            auth(NativeAuth::Null),
            CryptoOp::Encode,
            true,
        );
        assert!(matches!(chain, TransformChain::CipherOnly(_)));
        assert_eq!(chain.digest_len(), 0);

        let chain = TransformChain::separate(
            cipher(NativeCipher::Null),
            auth(NativeAuth::Null),
            CryptoOp::Decode,
            false,
        );
        assert!(matches!(chain, TransformChain::AuthOnly(_)));
    }

    #[test]
    fn test_chained_accessors() {
        let chain = TransformChain::separate(
            cipher(NativeCipher::AesCbc),
            auth(NativeAuth::Sha256Hmac),
            CryptoOp::Encode,
            true,
        );
        assert_eq!(chain.order(), Some(ChainOrder::CipherThenAuth));
        assert_eq!(chain.cipher().map(|c| c.algo), Some(NativeCipher::AesCbc));
        assert_eq!(chain.auth().map(|a| a.algo), Some(NativeAuth::Sha256Hmac));
        assert!(chain.aead().is_none());
        assert_eq!(chain.digest_len(), 32);
        assert_eq!(chain.to_string(), "AesCbc -> Sha256Hmac");
    }

    #[test]
    fn test_key_material_redacted() {
        let key = KeyMaterial::new(&[0xAA; 16]);
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("170"));
        assert!(dbg.contains("REDACTED"));
        assert_eq!(key.len(), 16);
    }
}
