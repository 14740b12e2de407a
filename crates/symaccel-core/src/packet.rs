//! Packet buffers.
//!
//! A [`Packet`] owns its data bytes plus two per-buffer scratch regions the
//! accelerator reads and writes instead of caller-visible memory: one for the
//! digest and one for AEAD additional data. Pooled packets give their slot
//! back to the [`PacketPool`] on drop.

use crate::engine::OperationResult;
use crate::error::PacketError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size of the per-packet digest scratch region.
pub const PACKET_DIGEST_MAX: usize = 64;

/// Size of the per-packet AAD scratch region.
pub const PACKET_AAD_MAX: usize = 32;

/// Event subtype of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketSubtype {
    /// Plain packet
    #[default]
    Basic,
    /// Packet carrying a crypto operation result
    Crypto,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    capacity: usize,
    in_use: AtomicUsize,
}

/// Bounded packet allocator.
#[derive(Debug, Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    /// Create a pool holding at most `capacity` packets at a time.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                capacity,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Packets currently allocated.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Packets that can still be allocated.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.capacity.saturating_sub(self.in_use())
    }

    /// Allocate a zero-filled packet of `len` bytes.
    ///
    /// Returns `None` when the pool is exhausted.
    #[must_use]
    pub fn alloc(&self, len: usize) -> Option<Packet> {
        let capacity = self.inner.capacity;
        self.inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()?;

        let mut pkt = Packet::new(len);
        pkt.pool = Some(Arc::clone(&self.inner));
        Some(pkt)
    }
}

/// Packet buffer with crypto scratch regions and metadata.
pub struct Packet {
    data: Vec<u8>,
    digest: [u8; PACKET_DIGEST_MAX],
    aad: [u8; PACKET_AAD_MAX],
    subtype: PacketSubtype,
    crypto_err: bool,
    user_ctx: u64,
    result: Option<OperationResult>,
    pool: Option<Arc<PoolInner>>,
}

impl Packet {
    /// Unpooled zero-filled packet.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    /// Unpooled packet taking ownership of `data`.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            digest: [0u8; PACKET_DIGEST_MAX],
            aad: [0u8; PACKET_AAD_MAX],
            subtype: PacketSubtype::Basic,
            crypto_err: false,
            user_ctx: 0,
            result: None,
            pool: None,
        }
    }

    /// Unpooled packet holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Data length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Packet data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable packet data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the packet and return its data.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), PacketError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(PacketError::OutOfBounds {
                offset,
                len,
                packet_len: self.data.len(),
            }),
        }
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if the range exceeds the data.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], PacketError> {
        self.check_range(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Mutably borrow `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if the range exceeds the data.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], PacketError> {
        self.check_range(offset, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if the range exceeds the data.
    pub fn copy_to_mem(&self, offset: usize, dst: &mut [u8]) -> Result<(), PacketError> {
        dst.copy_from_slice(self.slice(offset, dst.len())?);
        Ok(())
    }

    /// Copy `src` into the packet at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if the range exceeds the data.
    pub fn copy_from_mem(&mut self, offset: usize, src: &[u8]) -> Result<(), PacketError> {
        self.slice_mut(offset, src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Fill `len` bytes at `offset` with `byte`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if the range exceeds the data.
    pub fn fill(&mut self, offset: usize, len: usize, byte: u8) -> Result<(), PacketError> {
        self.slice_mut(offset, len)?.fill(byte);
        Ok(())
    }

    /// Copy the data of `src` to the start of this packet and take over its
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::OutOfBounds` if `src` is longer than this packet.
    pub fn copy_from_packet(&mut self, src: &Packet) -> Result<(), PacketError> {
        self.copy_from_mem(0, &src.data)?;
        self.user_ctx = src.user_ctx;
        self.subtype = src.subtype;
        self.crypto_err = src.crypto_err;
        self.result = src.result;
        Ok(())
    }

    /// Digest scratch region.
    #[must_use]
    pub fn digest_buf(&self) -> &[u8; PACKET_DIGEST_MAX] {
        &self.digest
    }

    /// Mutable digest scratch region.
    pub fn digest_buf_mut(&mut self) -> &mut [u8; PACKET_DIGEST_MAX] {
        &mut self.digest
    }

    /// AAD scratch region.
    #[must_use]
    pub fn aad_buf(&self) -> &[u8; PACKET_AAD_MAX] {
        &self.aad
    }

    /// Mutable AAD scratch region.
    pub fn aad_buf_mut(&mut self) -> &mut [u8; PACKET_AAD_MAX] {
        &mut self.aad
    }

    /// Copy `len` data bytes at `offset` into the digest scratch.
    ///
    /// # Errors
    ///
    /// Fails if the range exceeds the data or the scratch region.
    pub fn stage_digest(&mut self, offset: usize, len: usize) -> Result<(), PacketError> {
        if len > PACKET_DIGEST_MAX {
            return Err(PacketError::ScratchOverflow {
                region: "digest",
                offset: 0,
                len,
                capacity: PACKET_DIGEST_MAX,
            });
        }
        self.check_range(offset, len)?;
        self.digest[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(())
    }

    /// Copy the first `len` digest scratch bytes into the data at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the range exceeds the data or the scratch region.
    pub fn unstage_digest(&mut self, offset: usize, len: usize) -> Result<(), PacketError> {
        if len > PACKET_DIGEST_MAX {
            return Err(PacketError::ScratchOverflow {
                region: "digest",
                offset: 0,
                len,
                capacity: PACKET_DIGEST_MAX,
            });
        }
        self.check_range(offset, len)?;
        self.data[offset..offset + len].copy_from_slice(&self.digest[..len]);
        Ok(())
    }

    /// Write `src` into the AAD scratch at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::ScratchOverflow` if it does not fit.
    pub fn write_aad(&mut self, offset: usize, src: &[u8]) -> Result<(), PacketError> {
        match offset.checked_add(src.len()) {
            Some(end) if end <= PACKET_AAD_MAX => {
                self.aad[offset..end].copy_from_slice(src);
                Ok(())
            }
            _ => Err(PacketError::ScratchOverflow {
                region: "aad",
                offset,
                len: src.len(),
                capacity: PACKET_AAD_MAX,
            }),
        }
    }

    /// Event subtype.
    #[must_use]
    pub fn subtype(&self) -> PacketSubtype {
        self.subtype
    }

    /// Set the event subtype.
    pub fn set_subtype(&mut self, subtype: PacketSubtype) {
        self.subtype = subtype;
    }

    /// Whether the last crypto operation on this packet failed.
    #[must_use]
    pub fn has_crypto_err(&self) -> bool {
        self.crypto_err
    }

    /// Set the crypto error flag.
    pub fn set_crypto_err(&mut self, err: bool) {
        self.crypto_err = err;
    }

    /// Opaque caller context carried with the packet.
    #[must_use]
    pub fn user_ctx(&self) -> u64 {
        self.user_ctx
    }

    /// Set the caller context.
    pub fn set_user_ctx(&mut self, ctx: u64) {
        self.user_ctx = ctx;
    }

    /// Result of the last crypto operation, if the packet carries one.
    #[must_use]
    pub fn crypto_result(&self) -> Option<&OperationResult> {
        match self.subtype {
            PacketSubtype::Crypto => self.result.as_ref(),
            PacketSubtype::Basic => None,
        }
    }

    pub(crate) fn set_crypto_result(&mut self, result: OperationResult) {
        self.result = Some(result);
        self.crypto_err = !result.ok;
        self.subtype = PacketSubtype::Crypto;
    }

    /// Whether the packet was taken from a [`PacketPool`].
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("subtype", &self.subtype)
            .field("crypto_err", &self.crypto_err)
            .field("user_ctx", &self.user_ctx)
            .field("pool", &self.pool.as_ref().map(|p| p.name.as_str()))
            .finish_non_exhaustive()
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.in_use.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_accounting() {
        let pool = PacketPool::new("pkt", 2);
        let a = pool.alloc(64).unwrap();
        let b = pool.alloc(32).unwrap();
        assert!(pool.alloc(1).is_none());
        assert_eq!(pool.in_use(), 2);
        assert!(a.is_pooled());
        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_bounds_checked_copies() {
        let mut pkt = Packet::new(8);
        pkt.copy_from_mem(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(pkt.data(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(
            pkt.copy_from_mem(6, &[1, 2, 3]),
            Err(PacketError::OutOfBounds {
                offset: 6,
                len: 3,
                packet_len: 8
            })
        );
        assert!(pkt.fill(usize::MAX, 2, 0).is_err());

        let mut out = [0u8; 2];
        pkt.copy_to_mem(5, &mut out).unwrap();
        assert_eq!(out, [2, 3]);
    }

    #[test]
    fn test_digest_staging() {
        let mut pkt = Packet::from_slice(&[0, 0, 0xAA, 0xBB, 0xCC]);
        pkt.stage_digest(2, 3).unwrap();
        pkt.fill(2, 3, 0).unwrap();
        assert_eq!(pkt.data(), &[0; 5]);
        pkt.unstage_digest(2, 3).unwrap();
        assert_eq!(pkt.data(), &[0, 0, 0xAA, 0xBB, 0xCC]);
        assert!(pkt.stage_digest(0, PACKET_DIGEST_MAX + 1).is_err());
    }

    #[test]
    fn test_aad_scratch_bounds() {
        let mut pkt = Packet::new(0);
        pkt.write_aad(18, &[7; 14]).unwrap();
        assert_eq!(pkt.aad_buf()[18..], [7; 14]);
        assert!(matches!(
            pkt.write_aad(18, &[7; 15]),
            Err(PacketError::ScratchOverflow { region: "aad", .. })
        ));
    }

    #[test]
    fn test_copy_from_packet_takes_metadata() {
        let mut src = Packet::from_slice(b"hello");
        src.set_user_ctx(42);
        let mut dst = Packet::new(8);
        dst.copy_from_packet(&src).unwrap();
        assert_eq!(&dst.data()[..5], b"hello");
        assert_eq!(dst.user_ctx(), 42);

        let mut small = Packet::new(2);
        assert!(small.copy_from_packet(&src).is_err());
    }

    #[test]
    fn test_result_only_visible_on_crypto_subtype() {
        let mut pkt = Packet::new(4);
        assert!(pkt.crypto_result().is_none());
        pkt.set_crypto_result(OperationResult::success());
        assert_eq!(pkt.subtype(), PacketSubtype::Crypto);
        assert!(pkt.crypto_result().is_some_and(|r| r.ok));
        assert!(!pkt.has_crypto_err());
        pkt.set_subtype(PacketSubtype::Basic);
        assert!(pkt.crypto_result().is_none());
    }
}
