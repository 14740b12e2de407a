//! Operation descriptors and the shared descriptor pool.
//!
//! A descriptor is the per-call record handed to the accelerator. It carries
//! a fixed IV area with two slots: the cipher IV at [`CIPHER_IV_OFFSET`] and
//! the auth IV at [`AUTH_IV_OFFSET`]. Digest and AAD bytes are not carried
//! here; the accelerator reads them from the scratch regions of the attached
//! packet.

use crate::MAX_IV_LENGTH;
use crate::driver::NativeSessionId;
use crate::packet::Packet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Offset of the cipher (or AEAD) IV slot.
pub const CIPHER_IV_OFFSET: usize = 0;

/// Offset of the auth IV slot.
pub const AUTH_IV_OFFSET: usize = MAX_IV_LENGTH;

/// Size of the descriptor IV area.
pub const IV_AREA_LEN: usize = 2 * MAX_IV_LENGTH;

/// Byte range inside a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    /// First byte
    pub offset: u32,
    /// Number of bytes
    pub length: u32,
}

impl DataRange {
    /// Range starting at `offset` covering `length` bytes.
    #[must_use]
    pub const fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// Exclusive end, if it does not overflow.
    #[must_use]
    pub fn end(&self) -> Option<usize> {
        (self.offset as usize).checked_add(self.length as usize)
    }

    /// Whether the range fits in `len` bytes.
    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.end().is_some_and(|end| end <= len)
    }
}

/// Completion status written by the accelerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpStatus {
    /// Not yet processed
    #[default]
    NotProcessed,
    /// Processed successfully
    Success,
    /// Digest verification failed
    AuthFailed,
    /// Session unknown to the device
    InvalidSession,
    /// Descriptor arguments rejected
    InvalidArgs,
    /// Any other processing error
    Error,
}

/// Per-call operation descriptor.
#[derive(Debug)]
pub struct OpDescriptor {
    id: u64,
    /// Completion status
    pub status: OpStatus,
    /// Attached native session
    pub session: Option<NativeSessionId>,
    /// IV area: cipher slot, then auth slot
    pub iv: [u8; IV_AREA_LEN],
    /// Bytes to cipher (AEAD: bytes to encrypt and authenticate)
    pub cipher_range: DataRange,
    /// Bytes to authenticate
    pub auth_range: DataRange,
    /// Digest bytes live in the packet digest scratch
    pub digest_in_scratch: bool,
    /// Packet being processed
    pub packet: Option<Packet>,
}

impl OpDescriptor {
    fn new() -> Self {
        Self {
            id: 0,
            status: OpStatus::NotProcessed,
            session: None,
            iv: [0u8; IV_AREA_LEN],
            cipher_range: DataRange::default(),
            auth_range: DataRange::default(),
            digest_in_scratch: false,
            packet: None,
        }
    }

    fn reset(&mut self, id: u64) {
        self.id = id;
        self.status = OpStatus::NotProcessed;
        self.session = None;
        self.iv = [0u8; IV_AREA_LEN];
        self.cipher_range = DataRange::default();
        self.auth_range = DataRange::default();
        self.digest_in_scratch = false;
        self.packet = None;
    }

    /// Allocation sequence number, unique while the descriptor is in use.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cipher IV slot.
    #[must_use]
    pub fn cipher_iv(&self) -> &[u8] {
        &self.iv[CIPHER_IV_OFFSET..CIPHER_IV_OFFSET + MAX_IV_LENGTH]
    }

    /// Mutable cipher IV slot.
    pub fn cipher_iv_mut(&mut self) -> &mut [u8] {
        &mut self.iv[CIPHER_IV_OFFSET..CIPHER_IV_OFFSET + MAX_IV_LENGTH]
    }

    /// Auth IV slot.
    #[must_use]
    pub fn auth_iv(&self) -> &[u8] {
        &self.iv[AUTH_IV_OFFSET..AUTH_IV_OFFSET + MAX_IV_LENGTH]
    }

    /// Mutable auth IV slot.
    pub fn auth_iv_mut(&mut self) -> &mut [u8] {
        &mut self.iv[AUTH_IV_OFFSET..AUTH_IV_OFFSET + MAX_IV_LENGTH]
    }
}

struct PoolState {
    free: Vec<Box<OpDescriptor>>,
    created: usize,
}

/// Shared pool of operation descriptors.
///
/// One lock serializes allocation across all callers. Descriptors are created
/// lazily up to the capacity and recycled afterwards.
pub struct DescriptorPool {
    state: Mutex<PoolState>,
    capacity: usize,
    next_id: AtomicU64,
}

impl DescriptorPool {
    /// Create a pool of at most `capacity` descriptors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: Vec::new(),
                created: 0,
            }),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Take a reset descriptor, or `None` if all are in use.
    pub fn alloc(&self) -> Option<Box<OpDescriptor>> {
        let mut desc = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.free.pop() {
                Some(desc) => desc,
                None if state.created < self.capacity => {
                    state.created += 1;
                    Box::new(OpDescriptor::new())
                }
                None => return None,
            }
        };
        desc.reset(self.next_id.fetch_add(1, Ordering::Relaxed));
        Some(desc)
    }

    /// Return a descriptor. Any attached packet is dropped.
    pub fn free(&self, mut desc: Box<OpDescriptor>) {
        desc.packet = None;
        desc.session = None;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.free.push(desc);
    }

    /// Maximum number of descriptors.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Descriptors currently handed out (including ones lost to timeouts).
    #[must_use]
    pub fn in_use(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.created - state.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iv_slots_do_not_overlap() {
        let pool = DescriptorPool::new(1);
        let mut desc = pool.alloc().unwrap();
        desc.cipher_iv_mut().fill(0x11);
        desc.auth_iv_mut().fill(0x22);
        assert_eq!(desc.iv[..MAX_IV_LENGTH], [0x11; MAX_IV_LENGTH]);
        assert_eq!(desc.iv[MAX_IV_LENGTH..], [0x22; MAX_IV_LENGTH]);
    }

    #[test]
    fn test_pool_exhaustion_and_reuse() {
        let pool = DescriptorPool::new(2);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert_eq!(pool.in_use(), 2);
        assert_ne!(a.id(), b.id());

        let old_id = a.id();
        pool.free(a);
        let mut c = pool.alloc().unwrap();
        assert_ne!(c.id(), old_id);
        assert_eq!(c.status, OpStatus::NotProcessed);
        c.status = OpStatus::Success;
        c.cipher_iv_mut()[0] = 9;
        pool.free(c);

        let d = pool.alloc().unwrap();
        assert_eq!(d.status, OpStatus::NotProcessed);
        assert_eq!(d.cipher_iv()[0], 0);
        drop(b);
    }

    #[test]
    fn test_data_range_fits() {
        assert!(DataRange::new(0, 16).fits(16));
        assert!(!DataRange::new(8, 16).fits(16));
        assert!(!DataRange::new(u32::MAX, u32::MAX).fits(usize::MAX / 2));
    }
}
