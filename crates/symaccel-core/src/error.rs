//! Error types for the engine.
//!
//! Errors are split by the phase they belong to:
//!
//! - **Creation-time** (`SessionCreateError`): always carry a reason code and
//!   leave no partial state behind.
//! - **Per-call hard failures** (`OperationError`): resource exhaustion,
//!   timeout or malformed requests. Soft per-primitive outcomes (`IV_INVALID`,
//!   `ICV_CHECK`) are never errors; they travel in the operation result.
//! - **Lifecycle** (`InitError`, `TerminateError`).

use crate::driver::DeviceId;
use crate::packet::Packet;
use thiserror::Error;

/// Abstract to native algorithm mapping failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    /// The mapper has no native counterpart for this identifier
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(&'static str),
}

/// Errors reported by an accelerator driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Device id out of range
    #[error("no such accelerator device: {0}")]
    NoSuchDevice(DeviceId),

    /// Device used before `configure`
    #[error("accelerator device {0} is not configured")]
    NotConfigured(DeviceId),

    /// `configure` called twice
    #[error("accelerator device {0} is already configured")]
    AlreadyConfigured(DeviceId),

    /// Device rejected its configuration
    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    /// The device cannot instantiate this transform chain
    #[error("unsupported transform: {0}")]
    UnsupportedTransform(String),

    /// Native session table of the device is full
    #[error("accelerator device {0} has no free session entries")]
    SessionCapacity(DeviceId),

    /// Native session id not known to the device
    #[error("unknown native session {0}")]
    UnknownSession(u64),

    /// Native session mempool has no free objects
    #[error("session mempool {0} exhausted")]
    MempoolExhausted(String),
}

/// Out-of-bounds access to packet data or scratch regions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Range does not fit inside the packet
    #[error("range {offset}+{len} exceeds packet length {packet_len}")]
    OutOfBounds {
        /// Start of the range
        offset: usize,
        /// Length of the range
        len: usize,
        /// Packet data length
        packet_len: usize,
    },

    /// Copy does not fit inside a scratch region
    #[error("{len} bytes at {offset} exceed the {capacity}-byte {region} scratch")]
    ScratchOverflow {
        /// Scratch region name
        region: &'static str,
        /// Start inside the region
        offset: usize,
        /// Bytes requested
        len: usize,
        /// Region size
        capacity: usize,
    },
}

/// Capability query failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Zero accelerator instances are present
    #[error("no crypto devices available")]
    NoDevices,

    /// Algorithm not recognised by the mapper
    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
}

/// Reason code attached to a failed session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    /// Out of sessions, descriptors, matching devices or accelerator memory
    ResourceExhausted,
    /// Cipher (or AEAD) parameters rejected
    InvalidCipher,
    /// Authentication parameters rejected
    InvalidAuth,
}

/// Broad recovery category of a creation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller must fix the parameters
    Configuration,
    /// Caller may free resources or retry later
    ResourceExhausted,
}

/// Session creation failed; no partial state was left behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionCreateError {
    /// No accelerator instance is present at all
    #[error("no crypto devices available")]
    NoDevices,

    /// Every session slot is in use
    #[error("session pool exhausted")]
    PoolExhausted,

    /// Cipher or AEAD transform could not be built
    #[error("invalid cipher parameters: {0}")]
    InvalidCipher(String),

    /// Authentication transform could not be built
    #[error("invalid auth parameters: {0}")]
    InvalidAuth(String),

    /// No enabled device advertises ranges matching the transform chain
    #[error("no accelerator instance supports the requested transform")]
    NoSuitableDevice,

    /// Accelerator-side session object could not be created
    #[error("accelerator session setup failed: {0}")]
    Accelerator(#[from] DriverError),
}

impl SessionCreateError {
    /// Reason code in the accelerator API's vocabulary.
    #[must_use]
    pub fn status(&self) -> CreateStatus {
        match self {
            Self::InvalidCipher(_) => CreateStatus::InvalidCipher,
            Self::InvalidAuth(_) => CreateStatus::InvalidAuth,
            Self::NoDevices
            | Self::PoolExhausted
            | Self::NoSuitableDevice
            | Self::Accelerator(_) => CreateStatus::ResourceExhausted,
        }
    }

    /// Whether the caller has to change parameters or just wait for capacity.
    ///
    /// A size outside every advertised range is a configuration problem even
    /// though it is reported with the `ResourceExhausted` status code.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCipher(_) | Self::InvalidAuth(_) | Self::NoSuitableDevice => {
                ErrorCategory::Configuration
            }
            Self::NoDevices | Self::PoolExhausted | Self::Accelerator(_) => {
                ErrorCategory::ResourceExhausted
            }
        }
    }
}

/// Session destruction failed.
///
/// The software-side slot is released even when the accelerator fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionDestroyError {
    /// Handle does not name a live session
    #[error("unknown or already destroyed session")]
    UnknownSession,

    /// Accelerator failed to clear or free the native session
    #[error("accelerator session teardown failed: {0}")]
    Accelerator(#[from] DriverError),
}

/// Hard failure of a single operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Handle does not name a live session
    #[error("unknown or destroyed session")]
    UnknownSession,

    /// Output packet could not be obtained
    #[error("output packet allocation failed")]
    AllocFailed,

    /// Descriptor pool is empty
    #[error("operation descriptor pool exhausted")]
    DescriptorExhausted,

    /// Accelerator accepted zero descriptors
    #[error("failed to enqueue operation on device {dev} queue pair {qp}")]
    EnqueueFailed {
        /// Device the operation was submitted to
        dev: DeviceId,
        /// Queue pair used
        qp: u16,
    },

    /// Accelerator did not complete within the retry ceiling
    #[error("operation timed out on device {dev} queue pair {qp} after {retries} retries")]
    Timeout {
        /// Device the operation was submitted to
        dev: DeviceId,
        /// Queue pair used
        qp: u16,
        /// Empty dequeue attempts made
        retries: u32,
    },

    /// Request does not fit the packet or session
    #[error("invalid operation parameter: {0}")]
    InvalidParameter(String),

    /// Session mode does not match the entry point
    #[error("session is not configured for {0} operation")]
    WrongMode(&'static str),

    /// Accelerator completed the operation but returned no packet
    #[error("device {dev} queue pair {qp} returned an operation without its packet")]
    LostPacket {
        /// Device the operation was submitted to
        dev: DeviceId,
        /// Queue pair used
        qp: u16,
    },

    /// Completion sink refused the result
    #[error("completion sink rejected the result")]
    CompletionFailed,
}

impl OperationError {
    /// Returns true if resubmitting the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocFailed
                | Self::DescriptorExhausted
                | Self::EnqueueFailed { .. }
                | Self::Timeout { .. }
                | Self::CompletionFailed
        )
    }
}

/// Hard failure of an operation, with the input packet when the engine still
/// holds it.
///
/// The packet comes back untouched for every failure raised before the
/// descriptor reaches the accelerator, and for rejected enqueues. After a
/// timeout the packet stays with the device and `packet` is `None`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct OperationFailure {
    /// What went wrong
    pub error: OperationError,
    /// Caller's packet, ready to be resubmitted
    pub packet: Option<Packet>,
}

impl OperationFailure {
    /// Failure that hands `packet` back to the caller.
    #[must_use]
    pub fn with_packet(error: OperationError, packet: Packet) -> Self {
        Self {
            error,
            packet: Some(packet),
        }
    }

    /// Take the returned packet, if any.
    #[must_use]
    pub fn into_packet(self) -> Option<Packet> {
        self.packet
    }
}

impl From<OperationError> for OperationFailure {
    fn from(error: OperationError) -> Self {
        Self {
            error,
            packet: None,
        }
    }
}

/// Subsystem initialisation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    /// Engine configuration failed validation
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// A device could not be configured or started
    #[error("failed to bring up accelerator device {dev}: {source}")]
    Device {
        /// Device that failed
        dev: DeviceId,
        /// Driver error
        #[source]
        source: DriverError,
    },
}

/// Subsystem shutdown completed with errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminateError {
    /// Sessions were still live at shutdown
    #[error("crypto sessions still active: {active}")]
    LeakDetected {
        /// Number of sessions not returned to the pool
        active: usize,
    },

    /// A device failed to stop
    #[error("failed to stop accelerator device {dev}: {source}")]
    Device {
        /// Device that failed
        dev: DeviceId,
        /// Driver error
        #[source]
        source: DriverError,
    },
}
