//! Software-emulated accelerator backend.
//!
//! [`SoftDriver`] implements [`CryptoDriver`] entirely in software using the
//! RustCrypto primitives. Operations execute at enqueue time and become
//! visible on the queue pair's completion ring, optionally after a number of
//! empty polls. A stalled device never completes anything.
//!
//! ## Usage
//!
//! ```ignore
//! use symaccel_core::soft::{SoftDeviceConfig, SoftDriver};
//!
//! let mut slow = SoftDeviceConfig::standard("soft1");
//! slow.completion_delay_polls = 4;
//! let driver = SoftDriver::new(vec![SoftDeviceConfig::standard("soft0"), slow]);
//! ```

mod device;
mod exec;

use crate::AES_CCM_AAD_OFFSET;
use crate::algorithm::{NativeAead, NativeAuth, NativeCipher};
use crate::capability::{
    AeadCapability, AlgorithmRange, AuthCapability, CapabilityEntry, CipherCapability,
    DeviceCapability,
};
use crate::descriptor::OpDescriptor;
use crate::driver::{CryptoDriver, DeviceId, NativeSessionId};
use crate::error::DriverError;
use crate::packet::PACKET_AAD_MAX;
use crate::transform::TransformChain;
use device::SoftDevice;
use exec::{AEAD_IV_LEN, AEAD_TAG_LEN};
use serde::{Deserialize, Serialize};

/// Default native session limit of a software device.
pub const DEFAULT_MAX_SESSIONS: u32 = 4096;

/// Default queue pair limit of a software device.
pub const DEFAULT_MAX_QUEUE_PAIRS: u16 = 8;

/// Description of one software accelerator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftDeviceConfig {
    /// Instance name
    pub name: String,

    /// Report the instance as hardware accelerated
    pub hw_accelerated: bool,

    /// Native session limit (0 = unbounded)
    pub max_sessions: u32,

    /// Queue pair limit
    pub max_queue_pairs: u16,

    /// NUMA socket to report
    pub socket_id: u8,

    /// Advertised capability list
    pub capabilities: Vec<CapabilityEntry>,

    /// Empty polls before a completed operation can be dequeued
    pub completion_delay_polls: u32,

    /// Never complete any operation
    pub stalled: bool,
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self::standard("soft0")
    }
}

impl SoftDeviceConfig {
    /// Instance advertising everything the software backend can execute.
    #[must_use]
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hw_accelerated: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_queue_pairs: DEFAULT_MAX_QUEUE_PAIRS,
            socket_id: 0,
            capabilities: standard_capabilities(),
            completion_delay_polls: 0,
            stalled: false,
        }
    }

    /// Same instance with a different capability list.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<CapabilityEntry>) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn device_capability(&self) -> DeviceCapability {
        DeviceCapability {
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
            hw_accelerated: self.hw_accelerated,
            max_sessions: self.max_sessions,
            max_queue_pairs: self.max_queue_pairs,
            socket_id: self.socket_id,
        }
    }
}

fn cipher(algo: NativeCipher, key_size: AlgorithmRange, iv: u16) -> CapabilityEntry {
    CapabilityEntry::Cipher(CipherCapability {
        algo,
        key_size,
        iv_size: AlgorithmRange::fixed(iv),
    })
}

fn hmac(algo: NativeAuth, max_key: u16, digest_size: AlgorithmRange) -> CapabilityEntry {
    CapabilityEntry::Auth(AuthCapability {
        algo,
        key_size: AlgorithmRange::new(1, max_key, 1),
        digest_size,
        iv_size: AlgorithmRange::zero(),
        aad_size: AlgorithmRange::zero(),
    })
}

fn aead(algo: NativeAead, key_size: AlgorithmRange, max_aad: u16) -> CapabilityEntry {
    CapabilityEntry::Aead(AeadCapability {
        algo,
        key_size,
        digest_size: AlgorithmRange::fixed(AEAD_TAG_LEN),
        aad_size: AlgorithmRange::new(0, max_aad, 1),
        iv_size: AlgorithmRange::fixed(AEAD_IV_LEN),
    })
}

/// Capability list of [`SoftDeviceConfig::standard`].
#[must_use]
pub fn standard_capabilities() -> Vec<CapabilityEntry> {
    let aes_keys = AlgorithmRange::new(16, 32, 8);
    let aes_128_256 = AlgorithmRange::new(16, 32, 16);
    let max_aad = PACKET_AAD_MAX as u16;
    let max_ccm_aad = (PACKET_AAD_MAX - AES_CCM_AAD_OFFSET) as u16;

    vec![
        cipher(NativeCipher::AesCbc, aes_keys, 16),
        cipher(NativeCipher::AesCtr, aes_keys, 16),
        cipher(NativeCipher::TripleDesCbc, AlgorithmRange::fixed(24), 8),
        hmac(NativeAuth::Md5Hmac, 64, AlgorithmRange::new(12, 16, 4)),
        hmac(NativeAuth::Sha1Hmac, 64, AlgorithmRange::new(12, 20, 8)),
        hmac(NativeAuth::Sha256Hmac, 64, AlgorithmRange::new(16, 32, 16)),
        hmac(NativeAuth::Sha384Hmac, 128, AlgorithmRange::new(24, 48, 24)),
        hmac(NativeAuth::Sha512Hmac, 128, AlgorithmRange::new(32, 64, 32)),
        CapabilityEntry::Auth(AuthCapability {
            algo: NativeAuth::AesCmac,
            key_size: aes_128_256,
            digest_size: AlgorithmRange::new(12, 16, 4),
            iv_size: AlgorithmRange::zero(),
            aad_size: AlgorithmRange::zero(),
        }),
        CapabilityEntry::Auth(AuthCapability {
            algo: NativeAuth::AesGmac,
            key_size: aes_128_256,
            digest_size: AlgorithmRange::fixed(16),
            iv_size: AlgorithmRange::fixed(AEAD_IV_LEN),
            aad_size: AlgorithmRange::zero(),
        }),
        aead(NativeAead::AesGcm, aes_128_256, max_aad),
        aead(NativeAead::AesCcm, aes_128_256, max_ccm_aad),
        aead(NativeAead::Chacha20Poly1305, AlgorithmRange::fixed(32), max_aad),
    ]
}

/// Software accelerator driver.
pub struct SoftDriver {
    devices: Vec<SoftDevice>,
}

impl SoftDriver {
    /// Create one instance per entry; at most 255 are kept.
    #[must_use]
    pub fn new(devices: Vec<SoftDeviceConfig>) -> Self {
        let devices = devices
            .into_iter()
            .take(usize::from(u8::MAX))
            .enumerate()
            .map(|(id, config)| SoftDevice::new(id as DeviceId, config))
            .collect();
        Self { devices }
    }

    /// Native sessions currently held by an instance.
    #[must_use]
    pub fn session_count(&self, dev: DeviceId) -> Option<usize> {
        self.devices.get(usize::from(dev)).map(SoftDevice::session_count)
    }

    fn device(&self, dev: DeviceId) -> Result<&SoftDevice, DriverError> {
        self.devices
            .get(usize::from(dev))
            .ok_or(DriverError::NoSuchDevice(dev))
    }
}

impl std::fmt::Debug for SoftDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDriver")
            .field(
                "devices",
                &self.devices.iter().map(|d| d.config().name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CryptoDriver for SoftDriver {
    fn device_count(&self) -> u8 {
        u8::try_from(self.devices.len()).unwrap_or(u8::MAX)
    }

    fn device_info(&self, dev: DeviceId) -> Result<DeviceCapability, DriverError> {
        Ok(self.device(dev)?.config().device_capability())
    }

    fn configure(
        &self,
        dev: DeviceId,
        queue_pairs: u16,
        descriptors_per_qp: u32,
    ) -> Result<(), DriverError> {
        self.device(dev)?.configure(queue_pairs, descriptors_per_qp)
    }

    fn start(&self, dev: DeviceId) -> Result<(), DriverError> {
        self.device(dev)?.start()
    }

    fn stop(&self, dev: DeviceId) -> Result<(), DriverError> {
        self.device(dev)?.stop()
    }

    fn session_init(
        &self,
        dev: DeviceId,
        chain: &TransformChain,
    ) -> Result<NativeSessionId, DriverError> {
        self.device(dev)?.session_init(chain)
    }

    fn session_clear(&self, dev: DeviceId, id: NativeSessionId) -> Result<(), DriverError> {
        self.device(dev)?.session_clear(id)
    }

    fn enqueue_burst(
        &self,
        dev: DeviceId,
        qp: u16,
        ops: Vec<Box<OpDescriptor>>,
    ) -> Vec<Box<OpDescriptor>> {
        match self.device(dev) {
            Ok(device) => device.enqueue(qp, ops),
            Err(_) => ops,
        }
    }

    fn dequeue_burst(&self, dev: DeviceId, qp: u16, max: usize) -> Vec<Box<OpDescriptor>> {
        self.device(dev)
            .map(|device| device.dequeue(qp, max))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DataRange, DescriptorPool, OpStatus};
    use crate::packet::Packet;
    use crate::transform::{CipherOp, CipherTransform, KeyMaterial};

    fn ctr_chain() -> TransformChain {
        TransformChain::CipherOnly(CipherTransform {
            algo: NativeCipher::AesCtr,
            op: CipherOp::Encrypt,
            key: KeyMaterial::new(&[3u8; 16]),
            iv_len: 16,
        })
    }

    fn started(config: SoftDeviceConfig) -> SoftDriver {
        let driver = SoftDriver::new(vec![config]);
        driver.configure(0, 1, 2).unwrap();
        driver.start(0).unwrap();
        driver
    }

    #[test]
    fn test_lifecycle_errors() {
        let driver = SoftDriver::new(vec![SoftDeviceConfig::standard("soft0")]);
        assert_eq!(driver.start(0), Err(DriverError::NotConfigured(0)));
        assert_eq!(driver.device_info(1), Err(DriverError::NoSuchDevice(1)));
        assert!(matches!(
            driver.configure(0, 9, 16),
            Err(DriverError::InvalidConfig(_))
        ));
        driver.configure(0, 2, 16).unwrap();
        assert_eq!(
            driver.configure(0, 2, 16),
            Err(DriverError::AlreadyConfigured(0))
        );
    }

    #[test]
    fn test_session_capacity() {
        let mut config = SoftDeviceConfig::standard("tiny");
        config.max_sessions = 1;
        let driver = started(config);
        let id = driver.session_init(0, &ctr_chain()).unwrap();
        assert_eq!(
            driver.session_init(0, &ctr_chain()),
            Err(DriverError::SessionCapacity(0))
        );
        driver.session_clear(0, id).unwrap();
        assert_eq!(
            driver.session_clear(0, id),
            Err(DriverError::UnknownSession(id.0))
        );
        assert_eq!(driver.session_count(0), Some(0));
    }

    #[test]
    fn test_ring_full_rejects() {
        let driver = started(SoftDeviceConfig::standard("soft0"));
        let session = driver.session_init(0, &ctr_chain()).unwrap();
        let pool = DescriptorPool::new(3);
        let ops = (0..3)
            .map(|_| {
                let mut desc = pool.alloc().unwrap();
                desc.session = Some(session);
                desc.packet = Some(Packet::new(16));
                desc.cipher_range = DataRange::new(0, 16);
                desc
            })
            .collect();

        let rejected = driver.enqueue_burst(0, 0, ops);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].status, OpStatus::NotProcessed);

        let done = driver.dequeue_burst(0, 0, 8);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|d| d.status == OpStatus::Success));
    }

    #[test]
    fn test_unknown_session_status() {
        let driver = started(SoftDeviceConfig::standard("soft0"));
        let pool = DescriptorPool::new(1);
        let mut desc = pool.alloc().unwrap();
        desc.session = Some(NativeSessionId(999));
        desc.packet = Some(Packet::new(4));
        assert!(driver.enqueue_burst(0, 0, vec![desc]).is_empty());
        let done = driver.dequeue_burst(0, 0, 1);
        assert_eq!(done[0].status, OpStatus::InvalidSession);
    }

    #[test]
    fn test_completion_delay() {
        let mut config = SoftDeviceConfig::standard("slow");
        config.completion_delay_polls = 2;
        let driver = started(config);
        let pool = DescriptorPool::new(1);
        let mut desc = pool.alloc().unwrap();
        desc.session = Some(driver.session_init(0, &ctr_chain()).unwrap());
        desc.packet = Some(Packet::new(4));
        driver.enqueue_burst(0, 0, vec![desc]);

        assert!(driver.dequeue_burst(0, 0, 1).is_empty());
        assert!(driver.dequeue_burst(0, 0, 1).is_empty());
        assert_eq!(driver.dequeue_burst(0, 0, 1).len(), 1);
    }

    #[test]
    fn test_stopped_device_rejects() {
        let driver = started(SoftDeviceConfig::standard("soft0"));
        driver.stop(0).unwrap();
        let pool = DescriptorPool::new(1);
        let desc = pool.alloc().unwrap();
        assert_eq!(driver.enqueue_burst(0, 0, vec![desc]).len(), 1);
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: SoftDeviceConfig =
            serde_json::from_str(r#"{"name": "remote", "socket_id": 1, "stalled": true}"#).unwrap();
        assert_eq!(config.name, "remote");
        assert_eq!(config.socket_id, 1);
        assert!(config.stalled);
        assert_eq!(config.capabilities, standard_capabilities());
    }
}
