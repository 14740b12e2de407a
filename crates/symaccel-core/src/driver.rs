//! Accelerator driver seam.
//!
//! The engine never talks to an accelerator directly; everything goes through
//! [`CryptoDriver`]. A hardware poll-mode driver and the software backend in
//! [`crate::soft`] both implement it.

use crate::capability::DeviceCapability;
use crate::descriptor::OpDescriptor;
use crate::error::DriverError;
use crate::transform::TransformChain;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Accelerator instance index.
pub type DeviceId = u8;

/// Handle of an accelerator-native session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSessionId(pub u64);

impl fmt::Display for NativeSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Accelerator driver interface.
///
/// All methods take `&self`; implementations synchronize internally.
/// Enqueue and dequeue on one queue pair are expected to be called by one
/// thread at a time (the engine serializes them per queue pair).
pub trait CryptoDriver: Send + Sync {
    /// Number of accelerator instances present.
    fn device_count(&self) -> u8;

    /// Capability list and limits of one instance.
    fn device_info(&self, dev: DeviceId) -> Result<DeviceCapability, DriverError>;

    /// Configure an instance with `queue_pairs` queue pairs of
    /// `descriptors_per_qp` descriptors each.
    fn configure(
        &self,
        dev: DeviceId,
        queue_pairs: u16,
        descriptors_per_qp: u32,
    ) -> Result<(), DriverError>;

    /// Start a configured instance.
    fn start(&self, dev: DeviceId) -> Result<(), DriverError>;

    /// Stop an instance. Pending operations are dropped.
    fn stop(&self, dev: DeviceId) -> Result<(), DriverError>;

    /// Create and initialize a native session from a transform chain.
    fn session_init(
        &self,
        dev: DeviceId,
        chain: &TransformChain,
    ) -> Result<NativeSessionId, DriverError>;

    /// Clear and free a native session.
    fn session_clear(&self, dev: DeviceId, id: NativeSessionId) -> Result<(), DriverError>;

    /// Submit descriptors to a queue pair.
    ///
    /// Returns the descriptors that were NOT accepted, in submission order.
    fn enqueue_burst(
        &self,
        dev: DeviceId,
        qp: u16,
        ops: Vec<Box<OpDescriptor>>,
    ) -> Vec<Box<OpDescriptor>>;

    /// Retrieve up to `max` completed descriptors from a queue pair.
    ///
    /// Never blocks; an empty vector means nothing has completed yet.
    fn dequeue_burst(&self, dev: DeviceId, qp: u16, max: usize) -> Vec<Box<OpDescriptor>>;
}

/// Per-socket memory pool backing native session objects.
///
/// Created once at subsystem initialization; one object is taken for every
/// native session and returned when the session is cleared.
#[derive(Debug)]
pub struct SessionMempool {
    name: String,
    socket_id: u8,
    capacity: usize,
    available: AtomicUsize,
}

impl SessionMempool {
    /// Create a pool named after the socket it serves.
    #[must_use]
    pub fn new(socket_id: u8, capacity: usize) -> Self {
        Self {
            name: format!("sess_mp_{socket_id}"),
            socket_id,
            capacity,
            available: AtomicUsize::new(capacity),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket served by this pool.
    #[must_use]
    pub fn socket_id(&self) -> u8 {
        self.socket_id
    }

    /// Total number of objects.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Objects currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Take one object.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::MempoolExhausted` when no object is free.
    pub fn take(&self) -> Result<(), DriverError> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| DriverError::MempoolExhausted(self.name.clone()))
    }

    /// Return one object.
    pub fn give_back(&self) {
        let capacity = self.capacity;
        let _ = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mempool_take_and_return() {
        let mp = SessionMempool::new(1, 2);
        assert_eq!(mp.name(), "sess_mp_1");
        assert_eq!(mp.socket_id(), 1);
        mp.take().unwrap();
        mp.take().unwrap();
        assert_eq!(
            mp.take(),
            Err(DriverError::MempoolExhausted("sess_mp_1".into()))
        );
        mp.give_back();
        assert_eq!(mp.available(), 1);
    }

    #[test]
    fn test_mempool_return_never_exceeds_capacity() {
        let mp = SessionMempool::new(0, 1);
        mp.give_back();
        assert_eq!(mp.available(), mp.capacity());
    }

    #[test]
    fn test_native_session_id_display() {
        assert_eq!(NativeSessionId(255).to_string(), "0xff");
    }
}
