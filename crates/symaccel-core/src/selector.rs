//! Device Selector.
//!
//! Scans the enabled instances in ascending order and returns the first one
//! whose advertised ranges admit every requested length. NULL components run
//! in software and are never range checked.

use crate::MAX_IV_LENGTH;
use crate::algorithm::{NativeAuth, NativeCipher};
use crate::capability::{AlgorithmRange, DeviceCapability};
use crate::driver::DeviceId;
use crate::transform::{AeadTransform, AuthTransform, CipherTransform};
use thiserror::Error;
use tracing::debug;

/// No enabled instance admits the requested transform.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no suitable crypto device")]
pub struct NoSuitableDevice;

/// An accelerator instance that was configured and started.
#[derive(Debug, Clone)]
pub struct EnabledDevice {
    /// Driver device id
    pub id: DeviceId,
    /// Capability snapshot taken at initialization
    pub info: DeviceCapability,
    /// Queue pairs configured on the instance
    pub queue_pairs: u16,
}

fn admits(range: &AlgorithmRange, len: impl Into<u32>) -> bool {
    range.contains(len.into())
}

fn iv_admitted(range: &AlgorithmRange, len: u16) -> bool {
    usize::from(len) <= MAX_IV_LENGTH && admits(range, len)
}

/// Pick the device for a fused AEAD transform.
///
/// # Errors
///
/// Returns `NoSuitableDevice` if no instance matches.
pub fn select_device_for_aead(
    devices: &[EnabledDevice],
    xform: &AeadTransform,
) -> Result<DeviceId, NoSuitableDevice> {
    for dev in devices {
        let Some(cap) = dev.info.aead(xform.algo) else {
            continue;
        };

        if !admits(&cap.key_size, xform.key.len() as u32) {
            debug!(dev = dev.id, algo = ?xform.algo, "Unsupported aead key length");
            continue;
        }
        if !iv_admitted(&cap.iv_size, xform.iv_len) {
            debug!(dev = dev.id, algo = ?xform.algo, "Unsupported iv length");
            continue;
        }
        if !admits(&cap.digest_size, xform.digest_len) {
            debug!(dev = dev.id, algo = ?xform.algo, "Unsupported digest length");
            continue;
        }
        if !admits(&cap.aad_size, xform.aad_len) {
            debug!(dev = dev.id, algo = ?xform.algo, "Unsupported aad length");
            continue;
        }

        return Ok(dev.id);
    }

    Err(NoSuitableDevice)
}

fn cipher_fits(dev: &EnabledDevice, xform: &CipherTransform) -> bool {
    if xform.algo == NativeCipher::Null {
        return true;
    }
    let Some(cap) = dev.info.cipher(xform.algo) else {
        return false;
    };
    if !admits(&cap.key_size, xform.key.len() as u32) {
        debug!(dev = dev.id, algo = ?xform.algo, "Unsupported cipher key length");
        return false;
    }
    if !iv_admitted(&cap.iv_size, xform.iv_len) {
        debug!(dev = dev.id, algo = ?xform.algo, "Unsupported iv length");
        return false;
    }
    true
}

fn auth_fits(dev: &EnabledDevice, xform: &AuthTransform) -> bool {
    if xform.algo == NativeAuth::Null {
        return true;
    }
    let Some(cap) = dev.info.auth(xform.algo) else {
        return false;
    };
    if !admits(&cap.key_size, xform.key.len() as u32) {
        debug!(dev = dev.id, algo = ?xform.algo, "Unsupported auth key length");
        return false;
    }
    if !admits(&cap.digest_size, xform.digest_len) {
        debug!(dev = dev.id, algo = ?xform.algo, "Unsupported digest length");
        return false;
    }
    if !iv_admitted(&cap.iv_size, xform.iv_len) {
        debug!(dev = dev.id, algo = ?xform.algo, "Unsupported iv length");
        return false;
    }
    true
}

/// Pick the device for a separate cipher and auth pair.
///
/// # Errors
///
/// Returns `NoSuitableDevice` if no instance matches both.
pub fn select_device_for_separate(
    devices: &[EnabledDevice],
    cipher: &CipherTransform,
    auth: &AuthTransform,
) -> Result<DeviceId, NoSuitableDevice> {
    devices
        .iter()
        .find(|dev| cipher_fits(dev, cipher) && auth_fits(dev, auth))
        .map(|dev| dev.id)
        .ok_or(NoSuitableDevice)
}
