//! Capability Catalog.
//!
//! Pure queries over the capability tables of the enabled accelerator
//! instances: the global capability summary and the two-call algorithm size
//! enumeration.

use crate::MAX_SESSIONS;
use crate::algorithm::{
    self, AuthAlg, CipherAlg, NativeAead, NativeAuth, NativeCipher, auth_is_aead,
    auth_is_bit_mode, cipher_is_aead, cipher_is_bit_mode,
};
use crate::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Supported parameter sizes as a (min, max, increment) triple.
///
/// A zero increment means only `min` is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmRange {
    /// Smallest supported size
    pub min: u16,
    /// Largest supported size
    pub max: u16,
    /// Step between supported sizes
    pub increment: u16,
}

impl AlgorithmRange {
    /// Range with an explicit step.
    #[must_use]
    pub const fn new(min: u16, max: u16, increment: u16) -> Self {
        Self {
            min,
            max,
            increment,
        }
    }

    /// Range admitting exactly one size.
    #[must_use]
    pub const fn fixed(size: u16) -> Self {
        Self::new(size, size, 0)
    }

    /// Range admitting only zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self::fixed(0)
    }

    /// Whether `size` is one of the admitted sizes.
    #[must_use]
    pub fn contains(&self, size: u32) -> bool {
        let (min, max, inc) = (
            u32::from(self.min),
            u32::from(self.max),
            u32::from(self.increment),
        );
        if size < min || size > max {
            return false;
        }
        if size == min {
            return true;
        }
        inc > 0 && (size - min) % inc == 0
    }

    /// Every admitted size, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u16> + use<> {
        let (min, max, inc) = (
            u32::from(self.min),
            u32::from(self.max),
            u32::from(self.increment),
        );
        let mut next = Some(min);
        std::iter::from_fn(move || {
            let cur = next?;
            if cur > max {
                return None;
            }
            next = (inc > 0).then_some(cur + inc);
            u16::try_from(cur).ok()
        })
    }
}

/// Native cipher capability entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherCapability {
    /// Native algorithm
    pub algo: NativeCipher,
    /// Key lengths
    pub key_size: AlgorithmRange,
    /// IV lengths
    pub iv_size: AlgorithmRange,
}

/// Native authentication capability entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCapability {
    /// Native algorithm
    pub algo: NativeAuth,
    /// Key lengths
    pub key_size: AlgorithmRange,
    /// Digest lengths
    pub digest_size: AlgorithmRange,
    /// IV lengths
    #[serde(default)]
    pub iv_size: AlgorithmRange,
    /// AAD lengths
    #[serde(default)]
    pub aad_size: AlgorithmRange,
}

/// Native AEAD capability entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadCapability {
    /// Native algorithm
    pub algo: NativeAead,
    /// Key lengths
    pub key_size: AlgorithmRange,
    /// Digest (tag) lengths
    pub digest_size: AlgorithmRange,
    /// AAD lengths
    pub aad_size: AlgorithmRange,
    /// IV lengths
    pub iv_size: AlgorithmRange,
}

/// One entry of a device capability list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CapabilityEntry {
    /// Standalone cipher
    Cipher(CipherCapability),
    /// Standalone authentication
    Auth(AuthCapability),
    /// Fused AEAD
    Aead(AeadCapability),
}

/// Capability list and limits of one accelerator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapability {
    /// Driver name of the instance
    pub name: String,
    /// Supported transforms
    pub capabilities: Vec<CapabilityEntry>,
    /// Instance is a hardware accelerator
    pub hw_accelerated: bool,
    /// Maximum native sessions; zero means unbounded
    pub max_sessions: u32,
    /// Maximum queue pairs
    pub max_queue_pairs: u16,
    /// NUMA socket the instance is attached to
    pub socket_id: u8,
}

impl DeviceCapability {
    /// First cipher entry for `algo`.
    #[must_use]
    pub fn cipher(&self, algo: NativeCipher) -> Option<&CipherCapability> {
        self.capabilities.iter().find_map(|entry| match entry {
            CapabilityEntry::Cipher(c) if c.algo == algo => Some(c),
            _ => None,
        })
    }

    /// First auth entry for `algo`.
    #[must_use]
    pub fn auth(&self, algo: NativeAuth) -> Option<&AuthCapability> {
        self.capabilities.iter().find_map(|entry| match entry {
            CapabilityEntry::Auth(a) if a.algo == algo => Some(a),
            _ => None,
        })
    }

    /// First AEAD entry for `algo`.
    #[must_use]
    pub fn aead(&self, algo: NativeAead) -> Option<&AeadCapability> {
        self.capabilities.iter().find_map(|entry| match entry {
            CapabilityEntry::Aead(a) if a.algo == algo => Some(a),
            _ => None,
        })
    }
}

/// Support level of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    /// Not supported
    No,
    /// Supported
    Yes,
    /// Supported and the preferred choice
    Preferred,
}

/// Capability summary across all enabled instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCapability {
    /// Synchronous operation support
    pub sync_mode: Support,
    /// Asynchronous operation support
    pub async_mode: Support,
    /// Supported ciphers
    pub ciphers: BTreeSet<CipherAlg>,
    /// Supported authentication algorithms
    pub auths: BTreeSet<AuthAlg>,
    /// Ciphers available in hardware
    pub hw_ciphers: BTreeSet<CipherAlg>,
    /// Authentication algorithms available in hardware
    pub hw_auths: BTreeSet<AuthAlg>,
    /// Maximum number of sessions
    pub max_sessions: u32,
}

/// One admissible cipher parameter combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherVariant {
    /// Key length in bytes
    pub key_len: u32,
    /// IV length in bytes
    pub iv_len: u32,
    /// Lengths are given in bits
    pub bit_mode: bool,
}

/// One admissible authentication parameter combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVariant {
    /// Digest length in bytes
    pub digest_len: u32,
    /// Key length in bytes
    pub key_len: u32,
    /// IV length in bytes
    pub iv_len: u32,
    /// AAD lengths
    pub aad_len: AlgorithmRange,
    /// Lengths are given in bits
    pub bit_mode: bool,
}

fn process_device(
    dev: &DeviceCapability,
    ciphers: &mut BTreeSet<CipherAlg>,
    auths: &mut BTreeSet<AuthAlg>,
) {
    ciphers.insert(CipherAlg::Null);
    auths.insert(AuthAlg::Null);

    for entry in &dev.capabilities {
        match entry {
            CapabilityEntry::Cipher(c) => {
                ciphers.extend(algorithm::ciphers_for_native(c.algo));
            }
            CapabilityEntry::Auth(a) => {
                auths.extend(algorithm::auths_for_native(a.algo));
            }
            CapabilityEntry::Aead(a) => {
                let (cipher, auth) = algorithm::algs_for_native_aead(a.algo);
                ciphers.insert(cipher);
                auths.insert(auth);
            }
        }
    }
}

/// Summarize the capabilities of all enabled instances.
///
/// `max_sessions` never exceeds `pool_capacity`, the number of session slots
/// the caller can actually hand out.
///
/// # Errors
///
/// Returns `CapabilityError::NoDevices` when `devices` is empty.
pub fn global_capability(
    devices: &[DeviceCapability],
    pool_capacity: usize,
) -> Result<GlobalCapability, CapabilityError> {
    if devices.is_empty() {
        tracing::error!("No crypto devices available");
        return Err(CapabilityError::NoDevices);
    }

    let mut capa = GlobalCapability {
        sync_mode: Support::Yes,
        async_mode: Support::Preferred,
        ciphers: BTreeSet::new(),
        auths: BTreeSet::new(),
        hw_ciphers: BTreeSet::new(),
        hw_auths: BTreeSet::new(),
        max_sessions: pool_capacity.min(MAX_SESSIONS) as u32,
    };

    for dev in devices {
        process_device(dev, &mut capa.ciphers, &mut capa.auths);
        if dev.hw_accelerated {
            capa.hw_ciphers = capa.ciphers.clone();
            capa.hw_auths = capa.auths.clone();
        }
        if dev.max_sessions != 0 {
            capa.max_sessions = capa.max_sessions.min(dev.max_sessions);
        }
    }

    Ok(capa)
}

fn gen_cipher_variants(
    key_size: &AlgorithmRange,
    iv_size: &AlgorithmRange,
    bit_mode: bool,
    out: &mut [CipherVariant],
    mut idx: usize,
) -> usize {
    for key_len in key_size.iter() {
        for iv_len in iv_size.iter() {
            if let Some(slot) = out.get_mut(idx) {
                *slot = CipherVariant {
                    key_len: u32::from(key_len),
                    iv_len: u32::from(iv_len),
                    bit_mode,
                };
            }
            idx += 1;
        }
    }
    idx
}

fn gen_auth_variants(
    key_size: &AlgorithmRange,
    iv_size: &AlgorithmRange,
    digest_size: &AlgorithmRange,
    aad_size: &AlgorithmRange,
    bit_mode: bool,
    out: &mut [AuthVariant],
    mut idx: usize,
) -> usize {
    for digest_len in digest_size.iter() {
        for key_len in key_size.iter() {
            for iv_len in iv_size.iter() {
                if let Some(slot) = out.get_mut(idx) {
                    *slot = AuthVariant {
                        digest_len: u32::from(digest_len),
                        key_len: u32::from(key_len),
                        iv_len: u32::from(iv_len),
                        aad_len: *aad_size,
                        bit_mode,
                    };
                }
                idx += 1;
            }
        }
    }
    idx
}

/// Enumerate the admissible (key length, IV length) pairs of a cipher.
///
/// Writes up to `out.len()` variants and returns the total count, so a
/// caller can size a buffer with an empty slice first. NULL always yields a
/// byte-mode and a bit-mode variant, even without devices.
///
/// # Errors
///
/// Fails for algorithms the mapper does not know and when no instance is
/// present.
pub fn cipher_sizes(
    devices: &[DeviceCapability],
    alg: CipherAlg,
    out: &mut [CipherVariant],
) -> Result<usize, CapabilityError> {
    if alg == CipherAlg::Null {
        let null = [
            CipherVariant::default(),
            CipherVariant {
                bit_mode: true,
                ..CipherVariant::default()
            },
        ];
        for (slot, v) in out.iter_mut().zip(null) {
            *slot = v;
        }
        return Ok(2);
    }

    let bit_mode = cipher_is_bit_mode(alg);
    let mut idx = 0;

    if cipher_is_aead(alg) {
        let native = algorithm::cipher_to_native_aead(alg)?;
        if devices.is_empty() {
            return Err(CapabilityError::NoDevices);
        }
        for cap in devices.iter().filter_map(|d| d.aead(native)) {
            idx = gen_cipher_variants(&cap.key_size, &cap.iv_size, bit_mode, out, idx);
        }
    } else {
        let native = algorithm::cipher_to_native(alg)?;
        if devices.is_empty() {
            return Err(CapabilityError::NoDevices);
        }
        for cap in devices.iter().filter_map(|d| d.cipher(native)) {
            idx = gen_cipher_variants(&cap.key_size, &cap.iv_size, bit_mode, out, idx);
        }
    }

    Ok(idx)
}

/// Enumerate the admissible (digest, key, IV length) triples of an
/// authentication algorithm.
///
/// HMAC algorithms report a single practical key length per digest length;
/// instances whose key range does not admit it are skipped. AEAD auth
/// variants carry zero key and IV lengths.
///
/// # Errors
///
/// Fails for algorithms the mapper does not know and when no instance is
/// present.
pub fn auth_sizes(
    devices: &[DeviceCapability],
    alg: AuthAlg,
    out: &mut [AuthVariant],
) -> Result<usize, CapabilityError> {
    if alg == AuthAlg::Null {
        let null = [
            AuthVariant::default(),
            AuthVariant {
                bit_mode: true,
                ..AuthVariant::default()
            },
        ];
        for (slot, v) in out.iter_mut().zip(null) {
            *slot = v;
        }
        return Ok(2);
    }

    let bit_mode = auth_is_bit_mode(alg);
    let mut idx = 0;

    if auth_is_aead(alg) {
        let native = algorithm::auth_to_native_aead(alg)?;
        if devices.is_empty() {
            return Err(CapabilityError::NoDevices);
        }
        let zero = AlgorithmRange::zero();
        for cap in devices.iter().filter_map(|d| d.aead(native)) {
            idx = gen_auth_variants(
                &zero,
                &zero,
                &cap.digest_size,
                &cap.aad_size,
                bit_mode,
                out,
                idx,
            );
        }
    } else {
        let native = algorithm::auth_to_native(alg)?;
        if devices.is_empty() {
            return Err(CapabilityError::NoDevices);
        }
        let key_override = algorithm::hmac_key_len(alg).map(AlgorithmRange::fixed);
        for cap in devices.iter().filter_map(|d| d.auth(native)) {
            let key_size = match key_override {
                Some(ovr) if !cap.key_size.contains(u32::from(ovr.min)) => continue,
                Some(ovr) => ovr,
                None => cap.key_size,
            };
            idx = gen_auth_variants(
                &key_size,
                &cap.iv_size,
                &cap.digest_size,
                &cap.aad_size,
                bit_mode,
                out,
                idx,
            );
        }
    }

    Ok(idx)
}

/// Two-call enumeration of cipher variants into a `Vec`.
///
/// # Errors
///
/// Same as [`cipher_sizes`].
pub fn cipher_variants(
    devices: &[DeviceCapability],
    alg: CipherAlg,
) -> Result<Vec<CipherVariant>, CapabilityError> {
    let total = cipher_sizes(devices, alg, &mut [])?;
    let mut out = vec![CipherVariant::default(); total];
    cipher_sizes(devices, alg, &mut out)?;
    Ok(out)
}

/// Two-call enumeration of authentication variants into a `Vec`.
///
/// # Errors
///
/// Same as [`auth_sizes`].
pub fn auth_variants(
    devices: &[DeviceCapability],
    alg: AuthAlg,
) -> Result<Vec<AuthVariant>, CapabilityError> {
    let total = auth_sizes(devices, alg, &mut [])?;
    let mut out = vec![AuthVariant::default(); total];
    auth_sizes(devices, alg, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, hw: bool, max_sessions: u32) -> DeviceCapability {
        DeviceCapability {
            name: name.into(),
            capabilities: vec![
                CapabilityEntry::Cipher(CipherCapability {
                    algo: NativeCipher::AesCbc,
                    key_size: AlgorithmRange::new(16, 32, 8),
                    iv_size: AlgorithmRange::fixed(16),
                }),
                CapabilityEntry::Cipher(CipherCapability {
                    algo: NativeCipher::TripleDesCbc,
                    key_size: AlgorithmRange::fixed(24),
                    iv_size: AlgorithmRange::fixed(8),
                }),
                CapabilityEntry::Auth(AuthCapability {
                    algo: NativeAuth::Sha256Hmac,
                    key_size: AlgorithmRange::new(1, 64, 1),
                    digest_size: AlgorithmRange::new(16, 32, 16),
                    iv_size: AlgorithmRange::zero(),
                    aad_size: AlgorithmRange::zero(),
                }),
                CapabilityEntry::Auth(AuthCapability {
                    algo: NativeAuth::KasumiF9,
                    key_size: AlgorithmRange::fixed(16),
                    digest_size: AlgorithmRange::fixed(4),
                    iv_size: AlgorithmRange::fixed(8),
                    aad_size: AlgorithmRange::zero(),
                }),
                CapabilityEntry::Aead(AeadCapability {
                    algo: NativeAead::AesGcm,
                    key_size: AlgorithmRange::new(16, 32, 8),
                    digest_size: AlgorithmRange::fixed(16),
                    aad_size: AlgorithmRange::new(0, 32, 1),
                    iv_size: AlgorithmRange::fixed(12),
                }),
            ],
            hw_accelerated: hw,
            max_sessions,
            max_queue_pairs: 8,
            socket_id: 0,
        }
    }

    #[test]
    fn test_range_contains() {
        let r = AlgorithmRange::new(16, 32, 8);
        assert!(r.contains(16));
        assert!(r.contains(24));
        assert!(r.contains(32));
        assert!(!r.contains(20));
        assert!(!r.contains(40));
        assert!(!r.contains(8));

        let fixed = AlgorithmRange::fixed(12);
        assert!(fixed.contains(12));
        assert!(!fixed.contains(13));
    }

    #[test]
    fn test_range_iter() {
        let sizes: Vec<u16> = AlgorithmRange::new(16, 32, 8).iter().collect();
        assert_eq!(sizes, vec![16, 24, 32]);
        let sizes: Vec<u16> = AlgorithmRange::fixed(12).iter().collect();
        assert_eq!(sizes, vec![12]);
        let sizes: Vec<u16> = AlgorithmRange::new(65534, 65535, 1).iter().collect();
        assert_eq!(sizes, vec![65534, 65535]);
    }

    #[test]
    fn test_global_capability() {
        let devs = vec![device("sw", false, 4096), device("hw", true, 512)];
        let capa = global_capability(&devs, MAX_SESSIONS).unwrap();
        assert_eq!(capa.sync_mode, Support::Yes);
        assert_eq!(capa.async_mode, Support::Preferred);
        assert_eq!(capa.max_sessions, 512);
        assert!(capa.ciphers.contains(&CipherAlg::Null));
        assert!(capa.ciphers.contains(&CipherAlg::Des));
        assert!(capa.ciphers.contains(&CipherAlg::TripleDesCbc));
        assert!(capa.ciphers.contains(&CipherAlg::AesGcm));
        assert!(capa.auths.contains(&AuthAlg::AesGcm));
        assert!(!capa.auths.contains(&AuthAlg::KasumiF9));
        assert!(capa.hw_ciphers.contains(&CipherAlg::AesCbc));
    }

    #[test]
    fn test_global_capability_caps_and_unbounded() {
        let devs = vec![device("a", false, 0), device("b", false, 100_000)];
        let capa = global_capability(&devs, MAX_SESSIONS).unwrap();
        assert_eq!(capa.max_sessions, MAX_SESSIONS as u32);
        assert!(capa.hw_ciphers.is_empty());

        let capa = global_capability(&devs, usize::MAX).unwrap();
        assert_eq!(capa.max_sessions, MAX_SESSIONS as u32);
    }

    #[test]
    fn test_global_capability_bounded_by_pool() {
        let devs = vec![device("sw", false, 4096), device("open", false, 0)];
        let capa = global_capability(&devs, 16).unwrap();
        assert_eq!(capa.max_sessions, 16);

        let devs = vec![device("small", false, 8)];
        let capa = global_capability(&devs, 16).unwrap();
        assert_eq!(capa.max_sessions, 8);
    }

    #[test]
    fn test_global_capability_no_devices() {
        assert_eq!(global_capability(&[], 16), Err(CapabilityError::NoDevices));
    }

    #[test]
    fn test_null_always_two_variants() {
        let mut buf = [CipherVariant::default(); 2];
        assert_eq!(cipher_sizes(&[], CipherAlg::Null, &mut buf), Ok(2));
        assert!(!buf[0].bit_mode);
        assert!(buf[1].bit_mode);

        let mut abuf = [AuthVariant::default(); 2];
        assert_eq!(auth_sizes(&[], AuthAlg::Null, &mut abuf), Ok(2));
        assert!(abuf[1].bit_mode);

        assert_eq!(cipher_sizes(&[], CipherAlg::Null, &mut []), Ok(2));
    }

    #[test]
    fn test_cipher_sizes_two_call() {
        let devs = vec![device("sw", false, 0)];
        let total = cipher_sizes(&devs, CipherAlg::AesCbc, &mut []).unwrap();
        assert_eq!(total, 3);

        let mut short = [CipherVariant::default(); 1];
        assert_eq!(cipher_sizes(&devs, CipherAlg::AesCbc, &mut short), Ok(3));
        assert_eq!(short[0].key_len, 16);

        let all = cipher_variants(&devs, CipherAlg::AesCbc).unwrap();
        assert_eq!(
            all.iter().map(|v| v.key_len).collect::<Vec<_>>(),
            vec![16, 24, 32]
        );
        assert!(all.iter().all(|v| v.iv_len == 16 && !v.bit_mode));
    }

    #[test]
    fn test_cipher_sizes_aead() {
        let devs = vec![device("sw", false, 0), device("hw", true, 0)];
        let all = cipher_variants(&devs, CipherAlg::AesGcm).unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.iter().all(|v| v.iv_len == 12));
    }

    #[test]
    fn test_cipher_sizes_errors() {
        let devs = vec![device("sw", false, 0)];
        assert!(matches!(
            cipher_sizes(&devs, CipherAlg::AesXts, &mut []),
            Err(CapabilityError::Algorithm(_))
        ));
        assert_eq!(
            cipher_sizes(&[], CipherAlg::AesCbc, &mut []),
            Err(CapabilityError::NoDevices)
        );
        assert_eq!(cipher_sizes(&devs, CipherAlg::AesCtr, &mut []), Ok(0));
    }

    #[test]
    fn test_auth_sizes_hmac_override() {
        let devs = vec![device("sw", false, 0)];
        let all = auth_variants(&devs, AuthAlg::Sha256Hmac).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|v| v.key_len == 32));
        assert_eq!(all[0].digest_len, 16);
        assert_eq!(all[1].digest_len, 32);
    }

    #[test]
    fn test_auth_sizes_hmac_key_not_admitted() {
        let mut dev = device("narrow", false, 0);
        dev.capabilities = vec![CapabilityEntry::Auth(AuthCapability {
            algo: NativeAuth::Sha1Hmac,
            key_size: AlgorithmRange::fixed(64),
            digest_size: AlgorithmRange::fixed(20),
            iv_size: AlgorithmRange::zero(),
            aad_size: AlgorithmRange::zero(),
        })];
        assert_eq!(auth_sizes(&[dev], AuthAlg::Sha1Hmac, &mut []), Ok(0));
    }

    #[test]
    fn test_auth_sizes_aead() {
        let devs = vec![device("sw", false, 0)];
        let all = auth_variants(&devs, AuthAlg::AesGcm).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key_len, 0);
        assert_eq!(all[0].iv_len, 0);
        assert_eq!(all[0].digest_len, 16);
        assert_eq!(all[0].aad_len, AlgorithmRange::new(0, 32, 1));
    }

    #[test]
    fn test_capability_entry_serde() {
        let entry = CapabilityEntry::Aead(AeadCapability {
            algo: NativeAead::AesCcm,
            key_size: AlgorithmRange::new(16, 32, 16),
            digest_size: AlgorithmRange::fixed(16),
            aad_size: AlgorithmRange::new(0, 14, 1),
            iv_size: AlgorithmRange::fixed(12),
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"aead\""));
        assert!(json.contains("\"algo\":\"aes-ccm\""));
        let back: CapabilityEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
