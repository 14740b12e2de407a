//! One software accelerator instance.

use super::SoftDeviceConfig;
use super::exec;
use crate::descriptor::{OpDescriptor, OpStatus};
use crate::driver::{DeviceId, NativeSessionId};
use crate::error::DriverError;
use crate::transform::TransformChain;
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Completed descriptors waiting to be dequeued, plus the number of empty
/// polls still owed before they become visible.
struct QueuePair {
    done: ArrayQueue<Box<OpDescriptor>>,
    pending_polls: AtomicU32,
}

pub(crate) struct SoftDevice {
    id: DeviceId,
    config: SoftDeviceConfig,
    queue_pairs: OnceLock<Vec<QueuePair>>,
    started: AtomicBool,
    sessions: DashMap<u64, Arc<TransformChain>>,
    next_session: AtomicU64,
}

impl SoftDevice {
    pub(crate) fn new(id: DeviceId, config: SoftDeviceConfig) -> Self {
        Self {
            id,
            config,
            queue_pairs: OnceLock::new(),
            started: AtomicBool::new(false),
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
        }
    }

    pub(crate) fn config(&self) -> &SoftDeviceConfig {
        &self.config
    }

    pub(crate) fn configure(&self, queue_pairs: u16, descriptors: u32) -> Result<(), DriverError> {
        if queue_pairs == 0 || queue_pairs > self.config.max_queue_pairs {
            return Err(DriverError::InvalidConfig(format!(
                "{} queue pairs requested, device supports 1..={}",
                queue_pairs, self.config.max_queue_pairs
            )));
        }
        if descriptors == 0 {
            return Err(DriverError::InvalidConfig(
                "queue pair needs at least one descriptor".into(),
            ));
        }

        let qps = (0..queue_pairs)
            .map(|_| QueuePair {
                done: ArrayQueue::new(descriptors as usize),
                pending_polls: AtomicU32::new(0),
            })
            .collect();
        self.queue_pairs
            .set(qps)
            .map_err(|_| DriverError::AlreadyConfigured(self.id))?;
        debug!(dev = self.id, queue_pairs, descriptors, "Configured software device");
        Ok(())
    }

    pub(crate) fn start(&self) -> Result<(), DriverError> {
        if self.queue_pairs.get().is_none() {
            return Err(DriverError::NotConfigured(self.id));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<(), DriverError> {
        let Some(qps) = self.queue_pairs.get() else {
            return Err(DriverError::NotConfigured(self.id));
        };
        self.started.store(false, Ordering::Release);

        let dropped: usize = qps
            .iter()
            .map(|qp| std::iter::from_fn(|| qp.done.pop()).count())
            .sum();
        if dropped > 0 {
            warn!(dev = self.id, dropped, "Dropped undequeued operations on stop");
        }
        Ok(())
    }

    pub(crate) fn session_init(
        &self,
        chain: &TransformChain,
    ) -> Result<NativeSessionId, DriverError> {
        let max = self.config.max_sessions as usize;
        if max != 0 && self.sessions.len() >= max {
            return Err(DriverError::SessionCapacity(self.id));
        }
        exec::check_chain(chain).map_err(DriverError::UnsupportedTransform)?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(id, Arc::new(chain.clone()));
        Ok(NativeSessionId(id))
    }

    pub(crate) fn session_clear(&self, id: NativeSessionId) -> Result<(), DriverError> {
        self.sessions
            .remove(&id.0)
            .map(|_| ())
            .ok_or(DriverError::UnknownSession(id.0))
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn queue_pair(&self, qp: u16) -> Option<&QueuePair> {
        self.queue_pairs.get()?.get(usize::from(qp))
    }

    /// Execute and queue each descriptor. Stops at the first one that does
    /// not fit and hands it back with the rest.
    pub(crate) fn enqueue(&self, qp: u16, ops: Vec<Box<OpDescriptor>>) -> Vec<Box<OpDescriptor>> {
        let Some(queue) = self.queue_pair(qp) else {
            return ops;
        };
        if !self.started.load(Ordering::Acquire) {
            return ops;
        }

        let mut ops = ops.into_iter();
        let mut rejected = Vec::new();
        for mut desc in ops.by_ref() {
            if queue.done.is_full() {
                rejected.push(desc);
                break;
            }

            let chain = desc
                .session
                .and_then(|id| self.sessions.get(&id.0).map(|s| Arc::clone(s.value())));
            desc.status = match chain {
                Some(chain) => exec::execute(&chain, &mut desc),
                None => OpStatus::InvalidSession,
            };

            if let Err(desc) = queue.done.push(desc) {
                rejected.push(desc);
                break;
            }
            queue
                .pending_polls
                .store(self.config.completion_delay_polls, Ordering::Release);
        }
        rejected.extend(ops);
        rejected
    }

    pub(crate) fn dequeue(&self, qp: u16, max: usize) -> Vec<Box<OpDescriptor>> {
        let Some(queue) = self.queue_pair(qp) else {
            return Vec::new();
        };
        if self.config.stalled {
            return Vec::new();
        }
        let owed = queue
            .pending_polls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if owed.is_ok() {
            return Vec::new();
        }

        std::iter::from_fn(|| queue.done.pop()).take(max).collect()
    }
}
