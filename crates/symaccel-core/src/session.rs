//! Session Builder.
//!
//! Turns caller parameters into an accelerator-native transform chain, picks
//! a device, and creates the native session object. Every failure path gives
//! the pool slot back before returning.

use crate::algorithm::{self, AuthAlg, CipherAlg, NativeAead, cipher_is_aead};
use crate::completion::CompletionSink;
use crate::context::SubsystemContext;
use crate::driver::{DeviceId, NativeSessionId};
use crate::error::{DriverError, SessionCreateError, SessionDestroyError};
use crate::packet::{PACKET_AAD_MAX, PACKET_DIGEST_MAX, PacketPool};
use crate::pool::SessionHandle;
use crate::selector::{self, NoSuitableDevice};
use crate::transform::{AeadTransform, AuthTransform, CipherTransform, KeyMaterial, TransformChain};
use crate::{AES_CCM_AAD_OFFSET, MAX_IV_LENGTH};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// Operation direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CryptoOp {
    /// Encrypt and/or generate a digest
    #[default]
    Encode,
    /// Decrypt and/or verify a digest
    Decode,
}

/// How results are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpMode {
    /// Results are returned to the caller
    #[default]
    Sync,
    /// Results are pushed into the session's completion sink
    Async,
}

/// Caller-supplied session parameters.
///
/// Built with the chained setters; immutable once a session exists.
#[derive(Clone, Default)]
pub struct SessionParams {
    /// Direction
    pub op: CryptoOp,
    /// Authenticate the ciphertext (encrypt-then-MAC on encode)
    pub auth_cipher_text: bool,
    /// Result delivery mode
    pub op_mode: OpMode,
    /// Cipher algorithm
    pub cipher_alg: CipherAlg,
    /// Cipher (or AEAD) key
    pub cipher_key: KeyMaterial,
    /// Cipher IV length
    pub cipher_iv_len: u32,
    /// Cipher IV used when a call supplies none
    pub cipher_iv: Option<Zeroizing<Vec<u8>>>,
    /// Auth algorithm
    pub auth_alg: AuthAlg,
    /// Auth key
    pub auth_key: KeyMaterial,
    /// Auth IV length
    pub auth_iv_len: u32,
    /// Auth IV used when a call supplies none
    pub auth_iv: Option<Zeroizing<Vec<u8>>>,
    /// Digest length
    pub auth_digest_len: u32,
    /// AEAD additional data length
    pub auth_aad_len: u32,
    /// Pool output packets are allocated from when a call gives none
    pub output_pool: Option<PacketPool>,
    /// Destination of asynchronous results
    pub compl_sink: Option<Arc<dyn CompletionSink>>,
}

impl SessionParams {
    /// NULL/NULL parameters for the given direction.
    #[must_use]
    pub fn new(op: CryptoOp) -> Self {
        Self {
            op,
            ..Self::default()
        }
    }

    /// Set the cipher algorithm and key.
    #[must_use]
    pub fn cipher(mut self, alg: CipherAlg, key: &[u8]) -> Self {
        self.cipher_alg = alg;
        self.cipher_key = KeyMaterial::new(key);
        self
    }

    /// Set a session cipher IV (and its length).
    #[must_use]
    pub fn cipher_iv(mut self, iv: &[u8]) -> Self {
        self.cipher_iv_len = iv.len() as u32;
        self.cipher_iv = Some(Zeroizing::new(iv.to_vec()));
        self
    }

    /// Declare the cipher IV length without a session IV; every call must
    /// then supply one.
    #[must_use]
    pub fn cipher_iv_len(mut self, len: u32) -> Self {
        self.cipher_iv_len = len;
        self
    }

    /// Set the auth algorithm and key.
    #[must_use]
    pub fn auth(mut self, alg: AuthAlg, key: &[u8]) -> Self {
        self.auth_alg = alg;
        self.auth_key = KeyMaterial::new(key);
        self
    }

    /// Set a session auth IV (and its length).
    #[must_use]
    pub fn auth_iv(mut self, iv: &[u8]) -> Self {
        self.auth_iv_len = iv.len() as u32;
        self.auth_iv = Some(Zeroizing::new(iv.to_vec()));
        self
    }

    /// Declare the auth IV length without a session IV.
    #[must_use]
    pub fn auth_iv_len(mut self, len: u32) -> Self {
        self.auth_iv_len = len;
        self
    }

    /// Set the digest length.
    #[must_use]
    pub fn digest_len(mut self, len: u32) -> Self {
        self.auth_digest_len = len;
        self
    }

    /// Set the AEAD AAD length.
    #[must_use]
    pub fn aad_len(mut self, len: u32) -> Self {
        self.auth_aad_len = len;
        self
    }

    /// Authenticate ciphertext instead of plaintext.
    #[must_use]
    pub fn auth_cipher_text(mut self, yes: bool) -> Self {
        self.auth_cipher_text = yes;
        self
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn mode(mut self, mode: OpMode) -> Self {
        self.op_mode = mode;
        self
    }

    /// Allocate output packets from `pool` when a call gives none.
    #[must_use]
    pub fn output_pool(mut self, pool: PacketPool) -> Self {
        self.output_pool = Some(pool);
        self
    }

    /// Deliver asynchronous results to `sink`.
    #[must_use]
    pub fn completion_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.compl_sink = Some(sink);
        self
    }
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("op", &self.op)
            .field("auth_cipher_text", &self.auth_cipher_text)
            .field("op_mode", &self.op_mode)
            .field("cipher_alg", &self.cipher_alg)
            .field("cipher_key", &self.cipher_key)
            .field("cipher_iv_len", &self.cipher_iv_len)
            .field("auth_alg", &self.auth_alg)
            .field("auth_key", &self.auth_key)
            .field("auth_iv_len", &self.auth_iv_len)
            .field("auth_digest_len", &self.auth_digest_len)
            .field("auth_aad_len", &self.auth_aad_len)
            .field("output_pool", &self.output_pool.as_ref().map(PacketPool::name))
            .field("compl_sink", &self.compl_sink.is_some())
            .finish()
    }
}

/// A negotiated session bound to one accelerator instance.
#[derive(Debug)]
pub struct Session {
    params: SessionParams,
    device: DeviceId,
    socket_id: u8,
    queue_pairs: u16,
    chain: TransformChain,
    native: NativeSessionId,
}

impl Session {
    /// Parameters the session was created with.
    #[must_use]
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Selected accelerator instance.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Queue pairs available on the selected instance.
    #[must_use]
    pub fn queue_pairs(&self) -> u16 {
        self.queue_pairs
    }

    /// Transform chain given to the accelerator.
    #[must_use]
    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    /// Accelerator-native session object.
    #[must_use]
    pub fn native(&self) -> NativeSessionId {
        self.native
    }

    /// Whether the session uses a fused AEAD transform.
    #[must_use]
    pub fn is_aead(&self) -> bool {
        self.chain.aead().is_some()
    }
}

fn narrow(len: u32, what: &str) -> Result<u16, String> {
    u16::try_from(len).map_err(|_| format!("{what} length {len} out of range"))
}

fn check_iv_data(iv: Option<&Zeroizing<Vec<u8>>>, iv_len: u32) -> Result<(), String> {
    match iv {
        Some(data) if data.len() < iv_len as usize => Err(format!(
            "session IV holds {} bytes, {iv_len} required",
            data.len()
        )),
        _ => Ok(()),
    }
}

/// Build the fused AEAD transform.
pub(crate) fn build_aead(params: &SessionParams) -> Result<AeadTransform, SessionCreateError> {
    let invalid = SessionCreateError::InvalidCipher;
    let algo = algorithm::cipher_to_native_aead(params.cipher_alg)
        .map_err(|e| invalid(e.to_string()))?;
    let iv_len = narrow(params.cipher_iv_len, "iv").map_err(invalid)?;
    let aad_len = narrow(params.auth_aad_len, "aad").map_err(invalid)?;
    let digest_len = narrow(params.auth_digest_len, "digest").map_err(invalid)?;
    check_iv_data(params.cipher_iv.as_ref(), params.cipher_iv_len).map_err(invalid)?;

    if usize::from(aad_len) > PACKET_AAD_MAX {
        error!(aad_len, "Requested too long AAD");
        return Err(invalid(format!("aad length {aad_len} exceeds {PACKET_AAD_MAX}")));
    }
    if algo == NativeAead::AesCcm {
        if usize::from(aad_len) + AES_CCM_AAD_OFFSET > PACKET_AAD_MAX {
            error!(aad_len, "Requested too long AAD for CCM");
            return Err(invalid(format!(
                "aad length {aad_len} exceeds {} for AES-CCM",
                PACKET_AAD_MAX - AES_CCM_AAD_OFFSET
            )));
        }
        // The CCM IV slot starts with a length byte.
        if usize::from(iv_len) + 1 > MAX_IV_LENGTH {
            return Err(invalid(format!("iv length {iv_len} too long for AES-CCM")));
        }
    }
    if usize::from(digest_len) > PACKET_DIGEST_MAX {
        error!(digest_len, "Requested too long digest");
        return Err(invalid(format!(
            "digest length {digest_len} exceeds {PACKET_DIGEST_MAX}"
        )));
    }

    Ok(AeadTransform {
        algo,
        op: params.op.into(),
        key: params.cipher_key.clone(),
        iv_len,
        aad_len,
        digest_len,
    })
}

/// Build the standalone cipher transform.
pub(crate) fn build_cipher(params: &SessionParams) -> Result<CipherTransform, SessionCreateError> {
    let invalid = SessionCreateError::InvalidCipher;
    let algo = algorithm::cipher_to_native(params.cipher_alg).map_err(|e| invalid(e.to_string()))?;
    let iv_len = narrow(params.cipher_iv_len, "iv").map_err(invalid)?;
    check_iv_data(params.cipher_iv.as_ref(), params.cipher_iv_len).map_err(invalid)?;

    Ok(CipherTransform {
        algo,
        op: params.op.into(),
        key: params.cipher_key.clone(),
        iv_len,
    })
}

/// Build the standalone auth transform.
pub(crate) fn build_auth(params: &SessionParams) -> Result<AuthTransform, SessionCreateError> {
    let invalid = SessionCreateError::InvalidAuth;
    let algo = algorithm::auth_to_native(params.auth_alg).map_err(|e| invalid(e.to_string()))?;
    let iv_len = narrow(params.auth_iv_len, "iv").map_err(invalid)?;
    let digest_len = narrow(params.auth_digest_len, "digest").map_err(invalid)?;
    check_iv_data(params.auth_iv.as_ref(), params.auth_iv_len).map_err(invalid)?;

    if usize::from(digest_len) > PACKET_DIGEST_MAX {
        error!(digest_len, "Requested too long digest");
        return Err(invalid(format!(
            "digest length {digest_len} exceeds {PACKET_DIGEST_MAX}"
        )));
    }

    Ok(AuthTransform {
        algo,
        op: params.op.into(),
        key: params.auth_key.clone(),
        iv_len,
        digest_len,
    })
}

fn no_device(_: NoSuitableDevice) -> SessionCreateError {
    error!("Couldn't find a crypto device");
    SessionCreateError::NoSuitableDevice
}

/// Negotiate a session and install it in the pool.
pub(crate) fn create(
    ctx: &SubsystemContext,
    params: SessionParams,
) -> Result<SessionHandle, SessionCreateError> {
    if ctx.devices().is_empty() {
        error!("No crypto devices available");
        return Err(SessionCreateError::NoDevices);
    }

    // Dropping the reservation on any early return frees the slot.
    let reservation = ctx.sessions().reserve().ok_or_else(|| {
        error!("Failed to allocate a session");
        SessionCreateError::PoolExhausted
    })?;

    let (chain, dev_id) = if cipher_is_aead(params.cipher_alg) {
        let xform = build_aead(&params)?;
        let dev = selector::select_device_for_aead(ctx.devices(), &xform).map_err(no_device)?;
        (TransformChain::Aead(xform), dev)
    } else {
        let cipher = build_cipher(&params)?;
        let auth = build_auth(&params)?;
        let dev = selector::select_device_for_separate(ctx.devices(), &cipher, &auth)
            .map_err(no_device)?;
        (
            TransformChain::separate(cipher, auth, params.op, params.auth_cipher_text),
            dev,
        )
    };

    let device = ctx
        .enabled_device(dev_id)
        .ok_or(DriverError::NoSuchDevice(dev_id))?;
    let socket_id = device.info.socket_id;
    let queue_pairs = device.queue_pairs;
    let mempool = ctx
        .mempool(socket_id)
        .ok_or_else(|| DriverError::MempoolExhausted(format!("sess_mp_{socket_id}")))?;

    mempool.take()?;
    let native = match ctx.driver().session_init(dev_id, &chain) {
        Ok(native) => native,
        Err(e) => {
            mempool.give_back();
            error!(dev = dev_id, error = %e, "Failed to initialize accelerator session");
            return Err(e.into());
        }
    };

    debug!(dev = dev_id, %native, chain = %chain, "Created crypto session");
    let handle = reservation.commit(Session {
        params,
        device: dev_id,
        socket_id,
        queue_pairs,
        chain,
        native,
    });
    Ok(handle)
}

/// Clear the native session and return the slot.
///
/// The slot is released even when the accelerator fails; the failure is
/// still reported.
pub(crate) fn destroy(
    ctx: &SubsystemContext,
    handle: SessionHandle,
) -> Result<(), SessionDestroyError> {
    let session = ctx
        .sessions()
        .get(handle)
        .ok_or(SessionDestroyError::UnknownSession)?;

    let cleared = ctx.driver().session_clear(session.device, session.native);
    if cleared.is_ok() {
        if let Some(mempool) = ctx.mempool(session.socket_id) {
            mempool.give_back();
        }
    }

    if ctx.sessions().release(handle).is_none() {
        return Err(SessionDestroyError::UnknownSession);
    }

    cleared.map_err(|e| {
        warn!(%handle, error = %e, "Accelerator session teardown failed, slot released");
        SessionDestroyError::Accelerator(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{NativeAuth, NativeCipher};
    use crate::transform::{AuthOp, CipherOp};

    #[test]
    fn test_builder_sets_lengths() {
        let params = SessionParams::new(CryptoOp::Decode)
            .cipher(CipherAlg::AesCbc, &[1; 16])
            .cipher_iv(&[2; 16])
            .auth(AuthAlg::Sha256Hmac, &[3; 32])
            .digest_len(32)
            .auth_cipher_text(true);
        assert_eq!(params.cipher_iv_len, 16);
        assert_eq!(params.auth_digest_len, 32);
        assert_eq!(params.op_mode, OpMode::Sync);
        let dbg = format!("{params:?}");
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn test_build_separate_transforms() {
        let params = SessionParams::new(CryptoOp::Decode)
            .cipher(CipherAlg::Des, &[1; 24])
            .cipher_iv_len(8)
            .auth(AuthAlg::Md5Hmac, &[3; 16])
            .digest_len(12);
        let cipher = build_cipher(&params).unwrap();
        assert_eq!(cipher.algo, NativeCipher::TripleDesCbc);
        assert_eq!(cipher.op, CipherOp::Decrypt);
        assert_eq!(cipher.iv_len, 8);
        let auth = build_auth(&params).unwrap();
        assert_eq!(auth.algo, NativeAuth::Md5Hmac);
        assert_eq!(auth.op, AuthOp::Verify);
        assert_eq!(auth.digest_len, 12);
    }

    #[test]
    fn test_build_rejects_unsupported_and_oversized() {
        let params = SessionParams::new(CryptoOp::Encode).cipher(CipherAlg::AesXts, &[0; 32]);
        assert!(matches!(
            build_cipher(&params),
            Err(SessionCreateError::InvalidCipher(_))
        ));

        let params = SessionParams::new(CryptoOp::Encode)
            .auth(AuthAlg::Sha512Hmac, &[0; 64])
            .digest_len(65);
        assert!(matches!(
            build_auth(&params),
            Err(SessionCreateError::InvalidAuth(_))
        ));
    }

    #[test]
    fn test_build_aead_bounds() {
        let gcm = SessionParams::new(CryptoOp::Encode)
            .cipher(CipherAlg::AesGcm, &[0; 16])
            .cipher_iv_len(12)
            .digest_len(16);
        assert!(build_aead(&gcm.clone().aad_len(32)).is_ok());
        assert!(build_aead(&gcm.clone().aad_len(33)).is_err());
        assert!(build_aead(&gcm.clone().digest_len(80)).is_err());

        let ccm = SessionParams::new(CryptoOp::Encode)
            .cipher(CipherAlg::AesCcm, &[0; 16])
            .cipher_iv_len(12)
            .digest_len(16);
        assert!(build_aead(&ccm.clone().aad_len(14)).is_ok());
        assert!(matches!(
            build_aead(&ccm.clone().aad_len(15)),
            Err(SessionCreateError::InvalidCipher(_))
        ));
        assert!(build_aead(&ccm.cipher_iv_len(16)).is_err());
    }

    #[test]
    fn test_short_session_iv_rejected() {
        let mut params = SessionParams::new(CryptoOp::Encode)
            .cipher(CipherAlg::AesCbc, &[0; 16])
            .cipher_iv(&[0; 8]);
        params.cipher_iv_len = 16;
        assert!(build_cipher(&params).is_err());
    }
}
