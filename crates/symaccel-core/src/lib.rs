//! # symaccel core
//!
//! Synchronous symmetric-crypto execution engine sitting between an
//! application-facing crypto API and a pool of crypto accelerator instances.
//!
//! This crate provides:
//! - Capability catalog and algorithm-size enumeration across accelerators
//! - Abstract to accelerator-native algorithm mapping
//! - A fixed-capacity session pool with O(1) allocate/free
//! - Device selection and transform-chain construction per session
//! - The per-call operation engine (IV/AAD/digest placement, submit, poll)
//! - A software-emulated accelerator backend (`soft` feature)
//!
//! ## Component Order
//!
//! | Component | Module | State |
//! |-----------|--------|-------|
//! | Capability Catalog | [`capability`] | none |
//! | Algorithm Mapper | [`algorithm`] | none |
//! | Session Pool | [`pool`] | one lock |
//! | Device Selector | [`selector`] | none |
//! | Session Builder | [`session`] | per session |
//! | Operation Engine | [`engine`] | per call |
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use symaccel_core::{EngineConfig, SubsystemContext};
//! use symaccel_core::soft::{SoftDeviceConfig, SoftDriver};
//!
//! let driver = Arc::new(SoftDriver::new(vec![SoftDeviceConfig::standard("soft0")]));
//! let ctx = SubsystemContext::init(driver, EngineConfig::default())?;
//! let caps = ctx.capability()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod algorithm;
pub mod capability;
pub mod completion;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod packet;
pub mod pool;
pub mod selector;
pub mod session;
#[cfg(feature = "soft")]
pub mod soft;
pub mod transform;

pub use algorithm::{AuthAlg, CipherAlg};
pub use capability::{AlgorithmRange, AuthVariant, CipherVariant, GlobalCapability};
pub use completion::{ChannelSink, CompletionEvent, CompletionSink};
pub use config::EngineConfig;
pub use context::SubsystemContext;
pub use descriptor::DataRange;
pub use engine::{AlgError, BatchReport, OperationOutput, OperationRequest, OperationResult};
pub use error::{
    CapabilityError, CreateStatus, ErrorCategory, InitError, OperationError, OperationFailure,
    SessionCreateError, SessionDestroyError, TerminateError,
};
pub use packet::{Packet, PacketPool};
pub use pool::SessionHandle;
pub use session::{CryptoOp, OpMode, SessionParams};

/// Capacity of the session pool; also caps the reported global session count.
pub const MAX_SESSIONS: usize = 2048;

/// Size of each of the two IV slots in an operation descriptor.
pub const MAX_IV_LENGTH: usize = 16;

/// Offset of the AAD inside the packet AAD scratch for AES-CCM (B0 block
/// plus the encoded AAD length).
pub const AES_CCM_AAD_OFFSET: usize = 18;

/// Number of descriptors configured per accelerator queue pair.
pub const NB_DESC_PER_QUEUE_PAIR: u32 = 4096;

/// Default size of the descriptor pool and of each native session mempool.
pub const NB_MBUF: usize = 8192;

/// Maximum number of empty dequeue attempts before an operation times out.
pub const MAX_DEQ_RETRIES: u32 = 100_000;
