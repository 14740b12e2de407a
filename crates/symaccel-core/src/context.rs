//! Subsystem context.
//!
//! Everything the engine needs after initialization: the driver, the
//! enabled devices with their capability snapshots, the per-socket session
//! mempools, the session pool, the descriptor pool and one submission lane
//! per queue pair. Immutable after [`SubsystemContext::init`] apart from the
//! internally locked pools.

use crate::algorithm::{AuthAlg, CipherAlg};
use crate::capability::{self, AuthVariant, CipherVariant, DeviceCapability, GlobalCapability};
use crate::config::EngineConfig;
use crate::descriptor::DescriptorPool;
use crate::driver::{CryptoDriver, DeviceId, SessionMempool};
use crate::engine::{self, BatchReport, OperationOutput, OperationRequest};
use crate::error::{
    CapabilityError, InitError, OperationFailure, SessionCreateError, SessionDestroyError,
    TerminateError,
};
use crate::pool::{PoolStats, SessionHandle, SessionPool};
use crate::selector::EnabledDevice;
use crate::session::{self, Session, SessionParams};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Initialized crypto subsystem.
pub struct SubsystemContext {
    driver: Arc<dyn CryptoDriver>,
    config: EngineConfig,
    devices: Vec<EnabledDevice>,
    capabilities: Vec<DeviceCapability>,
    mempools: BTreeMap<u8, SessionMempool>,
    sessions: SessionPool<Session>,
    descriptors: DescriptorPool,
    lanes: BTreeMap<DeviceId, Vec<Mutex<()>>>,
}

impl SubsystemContext {
    /// Configure and start every device the driver reports.
    ///
    /// Zero devices is not an error; capability queries and session creation
    /// fail later instead.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when a device cannot be brought
    /// up. Devices started before the failure are stopped again.
    pub fn init(driver: Arc<dyn CryptoDriver>, config: EngineConfig) -> Result<Self, InitError> {
        config.validate()?;

        let count = driver.device_count();
        if count == 0 {
            warn!("No crypto devices available");
        }

        let mut devices: Vec<EnabledDevice> = Vec::with_capacity(usize::from(count));
        let mut mempools = BTreeMap::new();
        let mut lanes = BTreeMap::new();

        for dev in 0..count {
            if let Err(e) = Self::bring_up(&*driver, &config, dev, &mut devices, &mut mempools) {
                for started in &devices {
                    if let Err(stop_err) = driver.stop(started.id) {
                        warn!(
                            dev = started.id,
                            error = %stop_err,
                            "Failed to stop device during rollback"
                        );
                    }
                }
                return Err(e);
            }
            if let Some(enabled) = devices.last() {
                lanes.insert(
                    enabled.id,
                    (0..enabled.queue_pairs).map(|_| Mutex::new(())).collect(),
                );
            }
        }

        let capabilities = devices.iter().map(|d| d.info.clone()).collect();

        info!(
            devices = devices.len(),
            max_sessions = config.max_sessions,
            descriptors = config.descriptor_pool_size,
            "Crypto subsystem initialized"
        );

        Ok(Self {
            sessions: SessionPool::new(config.max_sessions),
            descriptors: DescriptorPool::new(config.descriptor_pool_size),
            driver,
            config,
            devices,
            capabilities,
            mempools,
            lanes,
        })
    }

    fn bring_up(
        driver: &dyn CryptoDriver,
        config: &EngineConfig,
        dev: DeviceId,
        devices: &mut Vec<EnabledDevice>,
        mempools: &mut BTreeMap<u8, SessionMempool>,
    ) -> Result<(), InitError> {
        let device_err = |source| InitError::Device { dev, source };

        let info = driver.device_info(dev).map_err(device_err)?;
        let queue_pairs = config.queue_pairs_for(info.max_queue_pairs);
        let socket_id = info.socket_id;

        mempools.entry(socket_id).or_insert_with(|| {
            info!(socket = socket_id, "Allocated session pool on socket");
            SessionMempool::new(socket_id, config.session_mempool_size)
        });

        driver
            .configure(dev, queue_pairs, config.descriptors_per_queue_pair)
            .map_err(|source| {
                error!(dev, error = %source, "Failed to configure cryptodev");
                device_err(source)
            })?;
        driver.start(dev).map_err(|source| {
            error!(dev, error = %source, "Failed to start device");
            device_err(source)
        })?;

        debug!(dev, name = %info.name, queue_pairs, socket = socket_id, "Crypto device started");
        devices.push(EnabledDevice {
            id: dev,
            info,
            queue_pairs,
        });
        Ok(())
    }

    /// Configuration the subsystem was initialized with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Devices that were configured and started, in scan order.
    #[must_use]
    pub fn enabled_devices(&self) -> &[EnabledDevice] {
        &self.devices
    }

    /// Capability summary across all enabled devices.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::NoDevices` if none are enabled.
    pub fn capability(&self) -> Result<GlobalCapability, CapabilityError> {
        capability::global_capability(&self.capabilities, self.sessions.capacity())
    }

    /// Two-call cipher size enumeration; see [`capability::cipher_sizes`].
    ///
    /// # Errors
    ///
    /// Fails for unknown algorithms and when no device is enabled.
    pub fn cipher_capability(
        &self,
        alg: CipherAlg,
        out: &mut [CipherVariant],
    ) -> Result<usize, CapabilityError> {
        capability::cipher_sizes(&self.capabilities, alg, out)
    }

    /// Two-call auth size enumeration; see [`capability::auth_sizes`].
    ///
    /// # Errors
    ///
    /// Fails for unknown algorithms and when no device is enabled.
    pub fn auth_capability(
        &self,
        alg: AuthAlg,
        out: &mut [AuthVariant],
    ) -> Result<usize, CapabilityError> {
        capability::auth_sizes(&self.capabilities, alg, out)
    }

    /// All cipher variants of `alg`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::cipher_capability`].
    pub fn cipher_variants(&self, alg: CipherAlg) -> Result<Vec<CipherVariant>, CapabilityError> {
        capability::cipher_variants(&self.capabilities, alg)
    }

    /// All auth variants of `alg`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::auth_capability`].
    pub fn auth_variants(&self, alg: AuthAlg) -> Result<Vec<AuthVariant>, CapabilityError> {
        capability::auth_variants(&self.capabilities, alg)
    }

    /// Create a session.
    ///
    /// # Errors
    ///
    /// See [`SessionCreateError`]; no partial state is left behind.
    pub fn create_session(
        &self,
        params: SessionParams,
    ) -> Result<SessionHandle, SessionCreateError> {
        session::create(self, params)
    }

    /// Destroy a session.
    ///
    /// # Errors
    ///
    /// Fails for unknown handles and when the accelerator cannot clear the
    /// native session (the slot is released regardless).
    pub fn destroy_session(&self, handle: SessionHandle) -> Result<(), SessionDestroyError> {
        session::destroy(self, handle)
    }

    /// Look up a live session.
    #[must_use]
    pub fn session(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.sessions.get(handle)
    }

    /// Session pool occupancy.
    #[must_use]
    pub fn session_stats(&self) -> PoolStats {
        self.sessions.stats()
    }

    /// Descriptors currently out of the pool.
    #[must_use]
    pub fn descriptors_in_use(&self) -> usize {
        self.descriptors.in_use()
    }

    /// Run one operation to completion.
    ///
    /// # Errors
    ///
    /// Hard failures only; crypto failures are reported in the result. The
    /// failure hands the input packet back unless the accelerator kept it.
    pub fn operate(
        &self,
        request: OperationRequest<'_>,
    ) -> Result<OperationOutput, OperationFailure> {
        engine::operate(self, request)
    }

    /// Run operations on a synchronous session in order, stopping at the
    /// first hard failure.
    pub fn operate_sync(&self, requests: Vec<OperationRequest<'_>>) -> BatchReport {
        engine::operate_sync(self, requests)
    }

    /// Run operations on an asynchronous session and push each result into
    /// its completion sink, stopping at the first hard failure.
    ///
    /// Returns the number of results delivered and the failure, if any.
    pub fn operate_async(
        &self,
        requests: Vec<OperationRequest<'_>>,
    ) -> (usize, Option<OperationFailure>) {
        engine::operate_async(self, requests)
    }

    /// Stop all devices and check for leaked sessions.
    ///
    /// # Errors
    ///
    /// Returns `LeakDetected` if sessions are still live, or the first device
    /// stop failure. Every device is stopped either way.
    pub fn terminate(self) -> Result<(), TerminateError> {
        let mut result = Ok(());

        let stats = self.sessions.stats();
        if stats.free != stats.capacity {
            error!(active = stats.in_use, "crypto sessions still active");
            result = Err(TerminateError::LeakDetected {
                active: stats.in_use,
            });
        }

        for dev in &self.devices {
            if let Err(source) = self.driver.stop(dev.id) {
                error!(dev = dev.id, error = %source, "Failed to stop crypto device");
                if result.is_ok() {
                    result = Err(TerminateError::Device {
                        dev: dev.id,
                        source,
                    });
                }
            }
        }

        info!("Crypto subsystem terminated");
        result
    }

    pub(crate) fn driver(&self) -> &dyn CryptoDriver {
        &*self.driver
    }

    pub(crate) fn devices(&self) -> &[EnabledDevice] {
        &self.devices
    }

    pub(crate) fn enabled_device(&self, id: DeviceId) -> Option<&EnabledDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub(crate) fn mempool(&self, socket_id: u8) -> Option<&SessionMempool> {
        self.mempools.get(&socket_id)
    }

    pub(crate) fn sessions(&self) -> &SessionPool<Session> {
        &self.sessions
    }

    pub(crate) fn descriptors(&self) -> &DescriptorPool {
        &self.descriptors
    }

    pub(crate) fn lane(&self, dev: DeviceId, qp: u16) -> Option<&Mutex<()>> {
        self.lanes.get(&dev)?.get(usize::from(qp))
    }
}

impl fmt::Debug for SubsystemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemContext")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("sessions", &self.sessions.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "soft"))]
mod tests {
    use super::*;
    use crate::soft::{SoftDeviceConfig, SoftDriver};

    fn context(devices: Vec<SoftDeviceConfig>) -> SubsystemContext {
        SubsystemContext::init(Arc::new(SoftDriver::new(devices)), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_init_without_devices() {
        let ctx = context(vec![]);
        assert!(ctx.enabled_devices().is_empty());
        assert_eq!(ctx.capability(), Err(CapabilityError::NoDevices));
        assert!(matches!(
            ctx.create_session(SessionParams::default()),
            Err(SessionCreateError::NoDevices)
        ));
        ctx.terminate().unwrap();
    }

    #[test]
    fn test_init_shares_mempool_per_socket() {
        let mut remote = SoftDeviceConfig::standard("soft1");
        remote.socket_id = 1;
        let ctx = context(vec![
            SoftDeviceConfig::standard("soft0"),
            SoftDeviceConfig::standard("soft0b"),
            remote,
        ]);
        assert_eq!(ctx.mempools.len(), 2);
        assert_eq!(ctx.mempool(1).map(SessionMempool::name), Some("sess_mp_1"));
        assert!(ctx.lane(2, 0).is_some());
        assert!(ctx.lane(3, 0).is_none());
    }

    #[test]
    fn test_queue_pairs_capped() {
        let mut dev = SoftDeviceConfig::standard("soft0");
        dev.max_queue_pairs = 2;
        let config = EngineConfig {
            queue_pairs: Some(8),
            ..EngineConfig::default()
        };
        let ctx = SubsystemContext::init(Arc::new(SoftDriver::new(vec![dev])), config).unwrap();
        assert_eq!(ctx.enabled_devices()[0].queue_pairs, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_sessions: 0,
            ..EngineConfig::default()
        };
        let err = SubsystemContext::init(Arc::new(SoftDriver::new(vec![])), config).unwrap_err();
        assert!(matches!(err, InitError::InvalidConfig(_)));
    }

    #[test]
    fn test_terminate_reports_leak() {
        let ctx = context(vec![SoftDeviceConfig::standard("soft0")]);
        ctx.create_session(SessionParams::default()).unwrap();
        assert_eq!(
            ctx.terminate(),
            Err(TerminateError::LeakDetected { active: 1 })
        );
    }
}
