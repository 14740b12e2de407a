//! Operation Engine.
//!
//! Runs one crypto operation per call through a fixed state machine:
//! take a descriptor, resolve the output packet, place IV/AAD/digest,
//! submit on a queue pair, poll for completion, classify the outcome.
//!
//! Soft per-primitive outcomes ([`AlgError::IvInvalid`], [`AlgError::IcvCheck`],
//! [`AlgError::Failed`]) are reported in the [`OperationResult`]; everything
//! else is a hard [`OperationError`], returned inside an [`OperationFailure`]
//! together with the caller's packet whenever the engine still holds it.

use crate::algorithm::NativeAead;
use crate::completion::CompletionEvent;
use crate::context::SubsystemContext;
use crate::descriptor::{DataRange, OpDescriptor, OpStatus};
use crate::driver::DeviceId;
use crate::error::{OperationError, OperationFailure};
use crate::packet::Packet;
use crate::pool::SessionHandle;
use crate::session::{OpMode, Session};
use crate::{AES_CCM_AAD_OFFSET, MAX_IV_LENGTH};
use serde::{Deserialize, Serialize};
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error, trace, warn};

/// Per-primitive outcome of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgError {
    /// No error
    #[default]
    None,
    /// Required IV was not supplied by the call or the session
    IvInvalid,
    /// Integrity check failed
    IcvCheck,
    /// Accelerator reported a processing error
    Failed,
}

/// Classified outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Cipher outcome
    pub cipher: AlgError,
    /// Auth outcome
    pub auth: AlgError,
    /// Both outcomes are `None`
    pub ok: bool,
}

impl OperationResult {
    /// Combine the two outcomes.
    #[must_use]
    pub fn new(cipher: AlgError, auth: AlgError) -> Self {
        Self {
            cipher,
            auth,
            ok: cipher == AlgError::None && auth == AlgError::None,
        }
    }

    /// Both primitives succeeded.
    #[must_use]
    pub fn success() -> Self {
        Self::new(AlgError::None, AlgError::None)
    }
}

impl Default for OperationResult {
    fn default() -> Self {
        Self::success()
    }
}

/// One operation request.
///
/// Without an explicit output packet the operation runs in place, unless the
/// session names an output pool; then a fresh packet is allocated.
#[derive(Debug)]
pub struct OperationRequest<'a> {
    /// Session to run on
    pub session: SessionHandle,
    /// Input packet
    pub packet: Packet,
    /// Caller-provided output packet
    pub out: Option<Packet>,
    /// Per-call cipher IV, overriding the session IV
    pub cipher_iv: Option<&'a [u8]>,
    /// Per-call auth IV, overriding the session IV
    pub auth_iv: Option<&'a [u8]>,
    /// Additional authenticated data (AEAD only)
    pub aad: Option<&'a [u8]>,
    /// Offset of the digest inside the packet
    pub hash_result_offset: u32,
    /// Bytes to cipher
    pub cipher_range: DataRange,
    /// Bytes to authenticate
    pub auth_range: DataRange,
}

impl<'a> OperationRequest<'a> {
    /// In-place request with empty ranges.
    #[must_use]
    pub fn new(session: SessionHandle, packet: Packet) -> Self {
        Self {
            session,
            packet,
            out: None,
            cipher_iv: None,
            auth_iv: None,
            aad: None,
            hash_result_offset: 0,
            cipher_range: DataRange::default(),
            auth_range: DataRange::default(),
        }
    }

    /// Write the result into `out` instead of the input packet.
    #[must_use]
    pub fn out(mut self, out: Packet) -> Self {
        self.out = Some(out);
        self
    }

    /// Per-call cipher IV.
    #[must_use]
    pub fn cipher_iv(mut self, iv: &'a [u8]) -> Self {
        self.cipher_iv = Some(iv);
        self
    }

    /// Per-call auth IV.
    #[must_use]
    pub fn auth_iv(mut self, iv: &'a [u8]) -> Self {
        self.auth_iv = Some(iv);
        self
    }

    /// AEAD additional data.
    #[must_use]
    pub fn aad(mut self, aad: &'a [u8]) -> Self {
        self.aad = Some(aad);
        self
    }

    /// Digest location.
    #[must_use]
    pub fn hash_result_offset(mut self, offset: u32) -> Self {
        self.hash_result_offset = offset;
        self
    }

    /// Cipher range.
    #[must_use]
    pub fn cipher_range(mut self, offset: u32, length: u32) -> Self {
        self.cipher_range = DataRange::new(offset, length);
        self
    }

    /// Auth range.
    #[must_use]
    pub fn auth_range(mut self, offset: u32, length: u32) -> Self {
        self.auth_range = DataRange::new(offset, length);
        self
    }
}

/// Output of a completed operation.
#[derive(Debug)]
pub struct OperationOutput {
    /// Resolved output packet, carrying the stored result
    pub packet: Packet,
    /// Classified outcome
    pub result: OperationResult,
}

/// Outcome of a batch call.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Outputs of the requests that completed, in submission order
    pub outputs: Vec<OperationOutput>,
    /// Hard failure that stopped the batch, with the failing request's packet
    pub error: Option<OperationFailure>,
}

impl BatchReport {
    /// Number of requests that completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outputs.len()
    }
}

static NEXT_EXEC_CONTEXT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static EXEC_CONTEXT: usize = NEXT_EXEC_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Execution context id of the calling thread, used to spread load across
/// queue pairs.
#[must_use]
pub fn exec_context_id() -> usize {
    EXEC_CONTEXT.with(|id| *id)
}

fn invalid(msg: impl Into<String>) -> OperationError {
    OperationError::InvalidParameter(msg.into())
}

/// Output packet for the request, or `None` to run in place.
///
/// The input is only read here; it stays with the caller until the operation
/// completes.
fn resolve_output(
    session: &Session,
    input: &Packet,
    out: Option<Packet>,
) -> Result<Option<Packet>, OperationError> {
    let mut out = match out {
        Some(out) => out,
        None => match &session.params().output_pool {
            Some(pool) => pool.alloc(input.len()).ok_or_else(|| {
                debug!(pool = pool.name(), "Alloc failed");
                OperationError::AllocFailed
            })?,
            None => return Ok(None),
        },
    };

    out.copy_from_packet(input)
        .map_err(|e| invalid(format!("output packet: {e}")))?;
    Ok(Some(out))
}

struct Placement<'r> {
    cipher_iv: Option<&'r [u8]>,
    auth_iv: Option<&'r [u8]>,
    aad: Option<&'r [u8]>,
    hash_result_offset: usize,
    cipher_range: DataRange,
    auth_range: DataRange,
}

fn check_bounds(
    session: &Session,
    pkt: &Packet,
    req: &Placement<'_>,
) -> Result<(), OperationError> {
    let len = pkt.len();
    if !req.cipher_range.fits(len) {
        return Err(invalid(format!(
            "cipher range {}+{} exceeds packet length {len}",
            req.cipher_range.offset, req.cipher_range.length
        )));
    }
    if !req.auth_range.fits(len) {
        return Err(invalid(format!(
            "auth range {}+{} exceeds packet length {len}",
            req.auth_range.offset, req.auth_range.length
        )));
    }

    let digest_len = session.params().auth_digest_len as usize;
    if digest_len != 0 {
        let end = req.hash_result_offset.checked_add(digest_len);
        if end.is_none_or(|end| end > len) {
            return Err(invalid(format!(
                "digest at {} (+{digest_len}) exceeds packet length {len}",
                req.hash_result_offset
            )));
        }
    }

    if let Some(aead) = session.chain().aead() {
        let aad_len = usize::from(aead.aad_len);
        if aad_len != 0 && req.aad.is_none_or(|aad| aad.len() < aad_len) {
            return Err(invalid(format!("{aad_len} bytes of AAD required")));
        }
    }
    Ok(())
}

/// Copy the IV for one primitive into its descriptor slot.
///
/// Returns `IvInvalid` when neither the call nor the session supplies one
/// and the transform needs it.
fn place_iv(
    slot: &mut [u8],
    explicit: Option<&[u8]>,
    cached: Option<&[u8]>,
    iv_len: usize,
) -> Result<AlgError, OperationError> {
    let Some(src) = explicit.or(cached) else {
        return Ok(if iv_len == 0 {
            AlgError::None
        } else {
            AlgError::IvInvalid
        });
    };
    if iv_len > slot.len() {
        return Err(invalid(format!("iv length {iv_len} exceeds {MAX_IV_LENGTH}")));
    }
    let Some(src) = src.get(..iv_len) else {
        return Err(invalid(format!("{iv_len} byte iv required, got {}", src.len())));
    };
    slot[..iv_len].copy_from_slice(src);
    Ok(AlgError::None)
}

/// Place the IVs and AAD, then stage the digest.
///
/// Packet data is only written once every check has passed, so an error
/// leaves it as the caller passed it in.
fn fill_params(
    session: &Session,
    pkt: &mut Packet,
    req: &Placement<'_>,
    desc: &mut OpDescriptor,
) -> Result<(AlgError, AlgError), OperationError> {
    let params = session.params();
    let packet_err = |e: crate::error::PacketError| invalid(e.to_string());

    desc.cipher_range = req.cipher_range;
    desc.auth_range = req.auth_range;

    let cached_cipher_iv = params.cipher_iv.as_ref().map(|iv| iv.as_slice());

    let rc = if let Some(aead) = session.chain().aead() {
        let aad = req.aad.unwrap_or_default();
        let aad = aad.get(..usize::from(aead.aad_len)).unwrap_or(aad);
        let iv_len = usize::from(aead.iv_len);

        let slot = if aead.algo == NativeAead::AesCcm {
            pkt.write_aad(AES_CCM_AAD_OFFSET, aad).map_err(packet_err)?;
            let slot = desc.cipher_iv_mut();
            slot[0] = aead.iv_len as u8;
            &mut slot[1..]
        } else {
            pkt.write_aad(0, aad).map_err(packet_err)?;
            desc.cipher_iv_mut()
        };
        let rc_cipher = place_iv(slot, req.cipher_iv, cached_cipher_iv, iv_len)?;
        (rc_cipher, AlgError::None)
    } else {
        let cached_auth_iv = params.auth_iv.as_ref().map(|iv| iv.as_slice());
        let rc_cipher = place_iv(
            desc.cipher_iv_mut(),
            req.cipher_iv,
            cached_cipher_iv,
            params.cipher_iv_len as usize,
        )?;
        let rc_auth = place_iv(
            desc.auth_iv_mut(),
            req.auth_iv,
            cached_auth_iv,
            params.auth_iv_len as usize,
        )?;
        (rc_cipher, rc_auth)
    };

    // Verify compares against the staged bytes; generate overwrites them.
    let digest_len = params.auth_digest_len as usize;
    if digest_len != 0 {
        pkt.stage_digest(req.hash_result_offset, digest_len)
            .map_err(packet_err)?;
        pkt.fill(req.hash_result_offset, digest_len, 0)
            .map_err(packet_err)?;
        desc.digest_in_scratch = true;
    }
    Ok(rc)
}

/// Enqueue one descriptor and poll until it comes back.
///
/// The lane lock is held throughout so no other caller can dequeue this
/// descriptor. Late descriptors from earlier timed-out calls are reclaimed.
/// A descriptor that never reaches the device gives its packet back in the
/// failure.
fn submit(
    ctx: &SubsystemContext,
    dev: DeviceId,
    qp: u16,
    mut desc: Box<OpDescriptor>,
) -> Result<Box<OpDescriptor>, OperationFailure> {
    let Some(lane) = ctx.lane(dev, qp) else {
        error!(dev, qp, "No such queue pair");
        let packet = desc.packet.take();
        ctx.descriptors().free(desc);
        return Err(OperationFailure {
            error: OperationError::EnqueueFailed { dev, qp },
            packet,
        });
    };
    let _guard = lane.lock().unwrap_or_else(PoisonError::into_inner);

    let id = desc.id();
    let driver = ctx.driver();
    if let Some(mut rejected) = driver.enqueue_burst(dev, qp, vec![desc]).into_iter().next() {
        error!(dev, qp, "Failed to enqueue packet");
        let packet = rejected.packet.take();
        ctx.descriptors().free(rejected);
        return Err(OperationFailure {
            error: OperationError::EnqueueFailed { dev, qp },
            packet,
        });
    }

    let retries = ctx.config().dequeue_retries;
    let delay = ctx.config().retry_delay();
    let mut attempts = 0;
    loop {
        for done in driver.dequeue_burst(dev, qp, 1) {
            if done.id() == id {
                trace!(dev, qp, id, attempts, "Operation completed");
                return Ok(done);
            }
            debug!(dev, qp, id = done.id(), "Reclaimed late descriptor");
            ctx.descriptors().free(done);
        }

        if attempts >= retries {
            error!(dev, qp, retries, "Failed to dequeue packet");
            return Err(OperationError::Timeout { dev, qp, retries }.into());
        }
        attempts += 1;
        if delay.is_zero() {
            std::hint::spin_loop();
        } else {
            thread::sleep(delay);
        }
    }
}

fn classify(status: OpStatus) -> (AlgError, AlgError) {
    match status {
        OpStatus::Success => (AlgError::None, AlgError::None),
        OpStatus::AuthFailed => (AlgError::None, AlgError::IcvCheck),
        other => {
            debug!(status = ?other, "Accelerator reported failure");
            (AlgError::Failed, AlgError::None)
        }
    }
}

/// Failure carrying the caller's input: the untouched original when the
/// result went to a separate output packet, else `working` itself.
fn hand_back(error: OperationError, input: Option<Packet>, working: Packet) -> OperationFailure {
    OperationFailure::with_packet(error, input.unwrap_or(working))
}

/// Run one operation to completion.
pub(crate) fn operate(
    ctx: &SubsystemContext,
    request: OperationRequest<'_>,
) -> Result<OperationOutput, OperationFailure> {
    let OperationRequest {
        session: handle,
        packet,
        out,
        cipher_iv,
        auth_iv,
        aad,
        hash_result_offset,
        cipher_range,
        auth_range,
    } = request;

    let Some(session) = ctx.sessions().get(handle) else {
        return Err(OperationFailure::with_packet(
            OperationError::UnknownSession,
            packet,
        ));
    };
    let placement = Placement {
        cipher_iv,
        auth_iv,
        aad,
        hash_result_offset: hash_result_offset as usize,
        cipher_range,
        auth_range,
    };

    let Some(mut desc) = ctx.descriptors().alloc() else {
        error!("Failed to allocate crypto operation");
        return Err(OperationFailure::with_packet(
            OperationError::DescriptorExhausted,
            packet,
        ));
    };

    // `input` is kept until completion whenever the result goes elsewhere.
    let (mut pkt, input) = match resolve_output(&session, &packet, out) {
        Ok(Some(out)) => (out, Some(packet)),
        Ok(None) => (packet, None),
        Err(e) => {
            ctx.descriptors().free(desc);
            return Err(OperationFailure::with_packet(e, packet));
        }
    };

    let filled = check_bounds(&session, &pkt, &placement)
        .and_then(|()| fill_params(&session, &mut pkt, &placement, &mut desc));
    let (mut rc_cipher, mut rc_auth) = match filled {
        Ok(rc) => rc,
        Err(e) => {
            ctx.descriptors().free(desc);
            return Err(hand_back(e, input, pkt));
        }
    };

    let digest_len = session.params().auth_digest_len as usize;
    let mut status = OpStatus::NotProcessed;
    if rc_cipher == AlgError::None && rc_auth == AlgError::None {
        let dev = session.device();
        let qp = (exec_context_id() % usize::from(session.queue_pairs().max(1))) as u16;

        desc.session = Some(session.native());
        desc.packet = Some(pkt);
        let mut done = match submit(ctx, dev, qp, desc) {
            Ok(done) => done,
            Err(mut failure) => {
                if input.is_some() {
                    failure.packet = input;
                } else if let Some(pkt) = failure.packet.as_mut() {
                    restore_digest(pkt, placement.hash_result_offset, digest_len);
                }
                return Err(failure);
            }
        };

        status = done.status;
        let returned = done.packet.take();
        ctx.descriptors().free(done);
        pkt = match returned {
            Some(pkt) => pkt,
            None => {
                return Err(OperationFailure {
                    error: OperationError::LostPacket { dev, qp },
                    packet: input,
                });
            }
        };
        (rc_cipher, rc_auth) = classify(status);
    } else {
        debug!(session = %handle, ?rc_cipher, ?rc_auth, "IV missing, operation not submitted");
        ctx.descriptors().free(desc);
    }

    if digest_len != 0 && status == OpStatus::Success {
        if let Err(e) = pkt.unstage_digest(placement.hash_result_offset, digest_len) {
            return Err(hand_back(invalid(e.to_string()), input, pkt));
        }
    }

    let result = OperationResult::new(rc_cipher, rc_auth);
    pkt.set_crypto_result(result);
    Ok(OperationOutput {
        packet: pkt,
        result,
    })
}

/// Put the staged digest bytes back after a rejected enqueue.
fn restore_digest(pkt: &mut Packet, offset: usize, len: usize) {
    if len == 0 {
        return;
    }
    if let Err(e) = pkt.unstage_digest(offset, len) {
        warn!(error = %e, "Could not restore digest area");
    }
}

fn require_mode(
    ctx: &SubsystemContext,
    handle: SessionHandle,
    mode: OpMode,
) -> Result<std::sync::Arc<Session>, OperationError> {
    let session = ctx
        .sessions()
        .get(handle)
        .ok_or(OperationError::UnknownSession)?;
    if session.params().op_mode != mode {
        return Err(OperationError::WrongMode(match mode {
            OpMode::Sync => "synchronous",
            OpMode::Async => "asynchronous",
        }));
    }
    Ok(session)
}

/// Run requests on synchronous sessions, stopping at the first hard failure.
pub(crate) fn operate_sync(
    ctx: &SubsystemContext,
    requests: Vec<OperationRequest<'_>>,
) -> BatchReport {
    let mut report = BatchReport {
        outputs: Vec::with_capacity(requests.len()),
        error: None,
    };

    for request in requests {
        let outcome = match require_mode(ctx, request.session, OpMode::Sync) {
            Ok(_) => operate(ctx, request),
            Err(e) => Err(OperationFailure::with_packet(e, request.packet)),
        };
        match outcome {
            Ok(output) => report.outputs.push(output),
            Err(failure) => {
                report.error = Some(failure);
                break;
            }
        }
    }
    report
}

/// Run requests on asynchronous sessions and deliver each result to the
/// session's completion sink.
///
/// When the sink refuses a result, the failure carries the finished packet.
pub(crate) fn operate_async(
    ctx: &SubsystemContext,
    requests: Vec<OperationRequest<'_>>,
) -> (usize, Option<OperationFailure>) {
    let mut delivered = 0;

    for request in requests {
        let handle = request.session;
        let session = match require_mode(ctx, handle, OpMode::Async) {
            Ok(session) => session,
            Err(e) => return (delivered, Some(OperationFailure::with_packet(e, request.packet))),
        };
        let Some(sink) = session.params().compl_sink.clone() else {
            let e = OperationError::WrongMode("asynchronous");
            return (delivered, Some(OperationFailure::with_packet(e, request.packet)));
        };

        let output = match operate(ctx, request) {
            Ok(output) => output,
            Err(failure) => return (delivered, Some(failure)),
        };
        let event = CompletionEvent {
            session: handle,
            packet: output.packet,
            result: output.result,
        };
        if let Err(dropped) = sink.enqueue(event) {
            warn!(session = %dropped.session, "Completion sink rejected result, event dropped");
            let failure =
                OperationFailure::with_packet(OperationError::CompletionFailed, dropped.packet);
            return (delivered, Some(failure));
        }
        delivered += 1;
    }
    (delivered, None)
}
