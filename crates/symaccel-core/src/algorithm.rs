//! Algorithm Mapper.
//!
//! Converts abstract, application-facing algorithm identifiers into the
//! accelerator-native enumerations used in transforms and capability tables,
//! and classifies them as AEAD-fused, bit-mode or plain byte-mode. No other
//! module matches on abstract identifiers directly.

use crate::error::AlgorithmError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Abstract cipher algorithm identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherAlg {
    /// No cipher (data passes through)
    #[default]
    Null,
    /// Single DES-CBC, executed as 3DES-CBC with a repeated key
    Des,
    /// Triple DES in CBC mode
    TripleDesCbc,
    /// Triple DES in ECB mode
    TripleDesEcb,
    /// AES in CBC mode
    AesCbc,
    /// AES in counter mode
    AesCtr,
    /// AES in ECB mode
    AesEcb,
    /// AES in 128-bit cipher feedback mode
    AesCfb128,
    /// AES-XTS
    AesXts,
    /// AES-GCM (AEAD)
    AesGcm,
    /// AES-CCM (AEAD)
    AesCcm,
    /// ChaCha20-Poly1305 (AEAD)
    Chacha20Poly1305,
    /// 3GPP KASUMI F8
    KasumiF8,
    /// 3GPP SNOW 3G UEA2
    Snow3gUea2,
    /// 3GPP AES-based EEA2
    AesEea2,
    /// 3GPP ZUC EEA3
    ZucEea3,
}

/// Abstract authentication algorithm identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthAlg {
    /// No authentication
    #[default]
    Null,
    /// HMAC-MD5
    Md5Hmac,
    /// HMAC-SHA-1
    Sha1Hmac,
    /// HMAC-SHA-224
    Sha224Hmac,
    /// HMAC-SHA-256
    Sha256Hmac,
    /// HMAC-SHA-384
    Sha384Hmac,
    /// HMAC-SHA-512
    Sha512Hmac,
    /// AES-XCBC-MAC
    AesXcbcMac,
    /// AES-GCM (AEAD)
    AesGcm,
    /// AES-GMAC
    AesGmac,
    /// AES-CCM (AEAD)
    AesCcm,
    /// AES-CMAC
    AesCmac,
    /// ChaCha20-Poly1305 (AEAD)
    Chacha20Poly1305,
    /// 3GPP KASUMI F9
    KasumiF9,
    /// 3GPP SNOW 3G UIA2
    Snow3gUia2,
    /// 3GPP AES-based EIA2
    AesEia2,
    /// 3GPP ZUC EIA3
    ZucEia3,
}

/// Accelerator-native cipher algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeCipher {
    /// Null cipher
    Null,
    /// Triple DES CBC
    TripleDesCbc,
    /// AES CBC
    AesCbc,
    /// AES CTR
    AesCtr,
    /// KASUMI F8
    KasumiF8,
    /// SNOW 3G UEA2
    Snow3gUea2,
    /// ZUC EEA3
    ZucEea3,
}

/// Accelerator-native authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeAuth {
    /// Null authentication
    Null,
    /// HMAC-MD5
    Md5Hmac,
    /// HMAC-SHA-1
    Sha1Hmac,
    /// HMAC-SHA-256
    Sha256Hmac,
    /// HMAC-SHA-384
    Sha384Hmac,
    /// HMAC-SHA-512
    Sha512Hmac,
    /// AES-GMAC
    AesGmac,
    /// AES-CMAC
    AesCmac,
    /// KASUMI F9
    KasumiF9,
    /// SNOW 3G UIA2
    Snow3gUia2,
    /// ZUC EIA3
    ZucEia3,
}

/// Accelerator-native AEAD algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeAead {
    /// AES-GCM
    AesGcm,
    /// AES-CCM
    AesCcm,
    /// ChaCha20-Poly1305
    Chacha20Poly1305,
}

/// How an algorithm is driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgClass {
    /// Confidentiality and integrity fused into one transform
    Aead,
    /// Stream algorithm with bit-granular lengths
    BitMode,
    /// Ordinary byte-granular algorithm
    ByteMode,
}

impl CipherAlg {
    /// Every abstract cipher identifier.
    pub const ALL: [CipherAlg; 16] = [
        Self::Null,
        Self::Des,
        Self::TripleDesCbc,
        Self::TripleDesEcb,
        Self::AesCbc,
        Self::AesCtr,
        Self::AesEcb,
        Self::AesCfb128,
        Self::AesXts,
        Self::AesGcm,
        Self::AesCcm,
        Self::Chacha20Poly1305,
        Self::KasumiF8,
        Self::Snow3gUea2,
        Self::AesEea2,
        Self::ZucEea3,
    ];

    /// Canonical kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Des => "des",
            Self::TripleDesCbc => "triple-des-cbc",
            Self::TripleDesEcb => "triple-des-ecb",
            Self::AesCbc => "aes-cbc",
            Self::AesCtr => "aes-ctr",
            Self::AesEcb => "aes-ecb",
            Self::AesCfb128 => "aes-cfb128",
            Self::AesXts => "aes-xts",
            Self::AesGcm => "aes-gcm",
            Self::AesCcm => "aes-ccm",
            Self::Chacha20Poly1305 => "chacha20-poly1305",
            Self::KasumiF8 => "kasumi-f8",
            Self::Snow3gUea2 => "snow3g-uea2",
            Self::AesEea2 => "aes-eea2",
            Self::ZucEea3 => "zuc-eea3",
        }
    }
}

impl AuthAlg {
    /// Every abstract authentication identifier.
    pub const ALL: [AuthAlg; 17] = [
        Self::Null,
        Self::Md5Hmac,
        Self::Sha1Hmac,
        Self::Sha224Hmac,
        Self::Sha256Hmac,
        Self::Sha384Hmac,
        Self::Sha512Hmac,
        Self::AesXcbcMac,
        Self::AesGcm,
        Self::AesGmac,
        Self::AesCcm,
        Self::AesCmac,
        Self::Chacha20Poly1305,
        Self::KasumiF9,
        Self::Snow3gUia2,
        Self::AesEia2,
        Self::ZucEia3,
    ];

    /// Canonical kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Md5Hmac => "md5-hmac",
            Self::Sha1Hmac => "sha1-hmac",
            Self::Sha224Hmac => "sha224-hmac",
            Self::Sha256Hmac => "sha256-hmac",
            Self::Sha384Hmac => "sha384-hmac",
            Self::Sha512Hmac => "sha512-hmac",
            Self::AesXcbcMac => "aes-xcbc-mac",
            Self::AesGcm => "aes-gcm",
            Self::AesGmac => "aes-gmac",
            Self::AesCcm => "aes-ccm",
            Self::AesCmac => "aes-cmac",
            Self::Chacha20Poly1305 => "chacha20-poly1305",
            Self::KasumiF9 => "kasumi-f9",
            Self::Snow3gUia2 => "snow3g-uia2",
            Self::AesEia2 => "aes-eia2",
            Self::ZucEia3 => "zuc-eia3",
        }
    }
}

impl fmt::Display for CipherAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for AuthAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| format!("unknown cipher algorithm: {s}"))
    }
}

impl FromStr for AuthAlg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| format!("unknown auth algorithm: {s}"))
    }
}

/// Whether the cipher is fused with its authentication in one transform.
#[must_use]
pub fn cipher_is_aead(alg: CipherAlg) -> bool {
    matches!(
        alg,
        CipherAlg::AesGcm | CipherAlg::AesCcm | CipherAlg::Chacha20Poly1305
    )
}

/// Whether the authentication algorithm is the auth half of an AEAD.
#[must_use]
pub fn auth_is_aead(alg: AuthAlg) -> bool {
    matches!(
        alg,
        AuthAlg::AesGcm | AuthAlg::AesCcm | AuthAlg::Chacha20Poly1305
    )
}

/// Whether the cipher works on bit-granular lengths.
#[must_use]
pub fn cipher_is_bit_mode(alg: CipherAlg) -> bool {
    matches!(
        alg,
        CipherAlg::KasumiF8 | CipherAlg::Snow3gUea2 | CipherAlg::ZucEea3
    )
}

/// Whether the authentication algorithm works on bit-granular lengths.
#[must_use]
pub fn auth_is_bit_mode(alg: AuthAlg) -> bool {
    matches!(
        alg,
        AuthAlg::KasumiF9 | AuthAlg::Snow3gUia2 | AuthAlg::ZucEia3
    )
}

/// Classify a cipher algorithm.
#[must_use]
pub fn classify_cipher(alg: CipherAlg) -> AlgClass {
    if cipher_is_aead(alg) {
        AlgClass::Aead
    } else if cipher_is_bit_mode(alg) {
        AlgClass::BitMode
    } else {
        AlgClass::ByteMode
    }
}

/// Classify an authentication algorithm.
#[must_use]
pub fn classify_auth(alg: AuthAlg) -> AlgClass {
    if auth_is_aead(alg) {
        AlgClass::Aead
    } else if auth_is_bit_mode(alg) {
        AlgClass::BitMode
    } else {
        AlgClass::ByteMode
    }
}

/// Map a non-AEAD cipher to its native transform algorithm.
///
/// # Errors
///
/// Returns `AlgorithmError::UnsupportedAlgorithm` for AEAD ciphers and for
/// identifiers without a native counterpart.
pub fn cipher_to_native(alg: CipherAlg) -> Result<NativeCipher, AlgorithmError> {
    match alg {
        CipherAlg::Null => Ok(NativeCipher::Null),
        CipherAlg::Des | CipherAlg::TripleDesCbc => Ok(NativeCipher::TripleDesCbc),
        CipherAlg::AesCbc => Ok(NativeCipher::AesCbc),
        CipherAlg::AesCtr => Ok(NativeCipher::AesCtr),
        CipherAlg::KasumiF8 => Ok(NativeCipher::KasumiF8),
        CipherAlg::Snow3gUea2 => Ok(NativeCipher::Snow3gUea2),
        CipherAlg::ZucEea3 => Ok(NativeCipher::ZucEea3),
        other => Err(AlgorithmError::UnsupportedAlgorithm(other.name())),
    }
}

/// Map an AEAD cipher to its native AEAD algorithm.
///
/// # Errors
///
/// Returns `AlgorithmError::UnsupportedAlgorithm` for non-AEAD ciphers.
pub fn cipher_to_native_aead(alg: CipherAlg) -> Result<NativeAead, AlgorithmError> {
    match alg {
        CipherAlg::AesGcm => Ok(NativeAead::AesGcm),
        CipherAlg::AesCcm => Ok(NativeAead::AesCcm),
        CipherAlg::Chacha20Poly1305 => Ok(NativeAead::Chacha20Poly1305),
        other => Err(AlgorithmError::UnsupportedAlgorithm(other.name())),
    }
}

/// Map a non-AEAD authentication algorithm to its native transform algorithm.
///
/// # Errors
///
/// Returns `AlgorithmError::UnsupportedAlgorithm` for AEAD algorithms and for
/// identifiers without a native counterpart.
pub fn auth_to_native(alg: AuthAlg) -> Result<NativeAuth, AlgorithmError> {
    match alg {
        AuthAlg::Null => Ok(NativeAuth::Null),
        AuthAlg::Md5Hmac => Ok(NativeAuth::Md5Hmac),
        AuthAlg::Sha1Hmac => Ok(NativeAuth::Sha1Hmac),
        AuthAlg::Sha256Hmac => Ok(NativeAuth::Sha256Hmac),
        AuthAlg::Sha384Hmac => Ok(NativeAuth::Sha384Hmac),
        AuthAlg::Sha512Hmac => Ok(NativeAuth::Sha512Hmac),
        AuthAlg::AesGmac => Ok(NativeAuth::AesGmac),
        AuthAlg::AesCmac => Ok(NativeAuth::AesCmac),
        AuthAlg::KasumiF9 => Ok(NativeAuth::KasumiF9),
        AuthAlg::Snow3gUia2 => Ok(NativeAuth::Snow3gUia2),
        AuthAlg::ZucEia3 => Ok(NativeAuth::ZucEia3),
        other => Err(AlgorithmError::UnsupportedAlgorithm(other.name())),
    }
}

/// Map the auth half of an AEAD to its native AEAD algorithm.
///
/// # Errors
///
/// Returns `AlgorithmError::UnsupportedAlgorithm` for non-AEAD algorithms.
pub fn auth_to_native_aead(alg: AuthAlg) -> Result<NativeAead, AlgorithmError> {
    match alg {
        AuthAlg::AesGcm => Ok(NativeAead::AesGcm),
        AuthAlg::AesCcm => Ok(NativeAead::AesCcm),
        AuthAlg::Chacha20Poly1305 => Ok(NativeAead::Chacha20Poly1305),
        other => Err(AlgorithmError::UnsupportedAlgorithm(other.name())),
    }
}

/// Practical HMAC key length used when enumerating auth sizes.
///
/// Devices commonly accept any HMAC key length; enumerating all of them is
/// useless, so one key length per hash is reported.
#[must_use]
pub fn hmac_key_len(alg: AuthAlg) -> Option<u16> {
    match alg {
        AuthAlg::Md5Hmac => Some(16),
        AuthAlg::Sha1Hmac => Some(20),
        AuthAlg::Sha224Hmac => Some(28),
        AuthAlg::Sha256Hmac => Some(32),
        AuthAlg::Sha384Hmac => Some(48),
        AuthAlg::Sha512Hmac => Some(64),
        _ => None,
    }
}

/// Abstract ciphers reported for a native cipher capability.
#[must_use]
pub fn ciphers_for_native(native: NativeCipher) -> &'static [CipherAlg] {
    match native {
        NativeCipher::Null => &[CipherAlg::Null],
        NativeCipher::TripleDesCbc => &[CipherAlg::TripleDesCbc, CipherAlg::Des],
        NativeCipher::AesCbc => &[CipherAlg::AesCbc],
        NativeCipher::AesCtr => &[CipherAlg::AesCtr],
        NativeCipher::KasumiF8 => &[CipherAlg::KasumiF8],
        NativeCipher::Snow3gUea2 => &[CipherAlg::Snow3gUea2],
        NativeCipher::ZucEea3 => &[CipherAlg::ZucEea3],
    }
}

/// Abstract auth algorithms reported for a native auth capability.
///
/// KASUMI F9 is never reported: real devices expect its IV inside the packet
/// rather than in the descriptor IV slot.
#[must_use]
pub fn auths_for_native(native: NativeAuth) -> &'static [AuthAlg] {
    match native {
        NativeAuth::Null => &[AuthAlg::Null],
        NativeAuth::Md5Hmac => &[AuthAlg::Md5Hmac],
        NativeAuth::Sha1Hmac => &[AuthAlg::Sha1Hmac],
        NativeAuth::Sha256Hmac => &[AuthAlg::Sha256Hmac],
        NativeAuth::Sha384Hmac => &[AuthAlg::Sha384Hmac],
        NativeAuth::Sha512Hmac => &[AuthAlg::Sha512Hmac],
        NativeAuth::AesGmac => &[AuthAlg::AesGmac],
        NativeAuth::AesCmac => &[AuthAlg::AesCmac],
        NativeAuth::KasumiF9 => &[],
        NativeAuth::Snow3gUia2 => &[AuthAlg::Snow3gUia2],
        NativeAuth::ZucEia3 => &[AuthAlg::ZucEia3],
    }
}

/// Abstract cipher and auth identifiers reported for a native AEAD capability.
#[must_use]
pub fn algs_for_native_aead(native: NativeAead) -> (CipherAlg, AuthAlg) {
    match native {
        NativeAead::AesGcm => (CipherAlg::AesGcm, AuthAlg::AesGcm),
        NativeAead::AesCcm => (CipherAlg::AesCcm, AuthAlg::AesCcm),
        NativeAead::Chacha20Poly1305 => (CipherAlg::Chacha20Poly1305, AuthAlg::Chacha20Poly1305),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify_cipher(CipherAlg::AesGcm), AlgClass::Aead);
        assert_eq!(classify_cipher(CipherAlg::Snow3gUea2), AlgClass::BitMode);
        assert_eq!(classify_cipher(CipherAlg::AesCbc), AlgClass::ByteMode);
        assert_eq!(classify_auth(AuthAlg::AesCcm), AlgClass::Aead);
        assert_eq!(classify_auth(AuthAlg::ZucEia3), AlgClass::BitMode);
        assert_eq!(classify_auth(AuthAlg::Sha256Hmac), AlgClass::ByteMode);
    }

    #[test]
    fn test_des_maps_to_triple_des() {
        assert_eq!(cipher_to_native(CipherAlg::Des), Ok(NativeCipher::TripleDesCbc));
        assert_eq!(
            cipher_to_native(CipherAlg::TripleDesCbc),
            Ok(NativeCipher::TripleDesCbc)
        );
    }

    #[test]
    fn test_unsupported_identifiers() {
        for alg in [
            CipherAlg::AesEcb,
            CipherAlg::AesXts,
            CipherAlg::AesCfb128,
            CipherAlg::TripleDesEcb,
            CipherAlg::AesEea2,
        ] {
            assert!(cipher_to_native(alg).is_err(), "{alg}");
            assert!(cipher_to_native_aead(alg).is_err(), "{alg}");
        }
        assert_eq!(
            auth_to_native(AuthAlg::AesXcbcMac),
            Err(AlgorithmError::UnsupportedAlgorithm("aes-xcbc-mac"))
        );
        assert!(auth_to_native(AuthAlg::Sha224Hmac).is_err());
    }

    #[test]
    fn test_aead_not_mapped_as_plain_transform() {
        assert!(cipher_to_native(CipherAlg::AesGcm).is_err());
        assert!(auth_to_native(AuthAlg::AesGcm).is_err());
        assert_eq!(cipher_to_native_aead(CipherAlg::AesCcm), Ok(NativeAead::AesCcm));
        assert_eq!(
            auth_to_native_aead(AuthAlg::Chacha20Poly1305),
            Ok(NativeAead::Chacha20Poly1305)
        );
    }

    #[test]
    fn test_names_roundtrip_through_from_str() {
        for alg in CipherAlg::ALL {
            assert_eq!(alg.name().parse::<CipherAlg>(), Ok(alg));
        }
        for alg in AuthAlg::ALL {
            assert_eq!(alg.name().parse::<AuthAlg>(), Ok(alg));
        }
        assert_eq!("AES-GCM".parse::<CipherAlg>(), Ok(CipherAlg::AesGcm));
        assert!("rot13".parse::<CipherAlg>().is_err());
    }

    #[test]
    fn test_hmac_key_lengths() {
        assert_eq!(hmac_key_len(AuthAlg::Sha256Hmac), Some(32));
        assert_eq!(hmac_key_len(AuthAlg::Sha512Hmac), Some(64));
        assert_eq!(hmac_key_len(AuthAlg::AesCmac), None);
    }

    #[test]
    fn test_reverse_mapping() {
        assert_eq!(
            ciphers_for_native(NativeCipher::TripleDesCbc),
            &[CipherAlg::TripleDesCbc, CipherAlg::Des]
        );
        assert!(auths_for_native(NativeAuth::KasumiF9).is_empty());
        assert_eq!(
            algs_for_native_aead(NativeAead::AesGcm),
            (CipherAlg::AesGcm, AuthAlg::AesGcm)
        );
    }
}
