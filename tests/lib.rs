//! Shared fixtures for the symaccel integration and property tests.

use std::sync::Arc;
use symaccel_core::soft::{SoftDeviceConfig, SoftDriver};
use symaccel_core::{
    AuthAlg, CipherAlg, CryptoOp, EngineConfig, OperationOutput, OperationRequest, Packet,
    SessionHandle, SessionParams, SubsystemContext,
};

/// Digest length used by the CBC + HMAC fixtures.
pub const HMAC_DIGEST_LEN: usize = 32;

/// Tag length used by the AEAD fixtures.
pub const TAG_LEN: usize = 16;

/// Context over the given software devices.
///
/// # Panics
///
/// Panics if the engine fails to initialise.
pub fn soft_context(devices: Vec<SoftDeviceConfig>, config: EngineConfig) -> SubsystemContext {
    SubsystemContext::init(Arc::new(SoftDriver::new(devices)), config).expect("engine init")
}

/// Context over one standard software device with default settings.
pub fn default_context() -> SubsystemContext {
    soft_context(
        vec![SoftDeviceConfig::standard("soft0")],
        EngineConfig::default(),
    )
}

/// Engine configuration with small pools, for tests that build many contexts.
pub fn small_config(max_sessions: usize) -> EngineConfig {
    EngineConfig {
        max_sessions,
        queue_pairs: Some(1),
        descriptors_per_queue_pair: 64,
        descriptor_pool_size: 64,
        session_mempool_size: 64,
        dequeue_retries: 1_000,
        retry_delay_ns: 0,
    }
}

/// AES-128-CBC with HMAC-SHA256 over the ciphertext; IV supplied per call.
pub fn cbc_hmac_params(op: CryptoOp, key: &[u8; 16], mac_key: &[u8; 32]) -> SessionParams {
    SessionParams::new(op)
        .cipher(CipherAlg::AesCbc, key)
        .cipher_iv_len(16)
        .auth(AuthAlg::Sha256Hmac, mac_key)
        .digest_len(HMAC_DIGEST_LEN as u32)
        .auth_cipher_text(true)
}

/// AES-128-GCM with a session IV and no AAD.
pub fn gcm_params(op: CryptoOp, key: &[u8; 16], iv: &[u8; 12]) -> SessionParams {
    SessionParams::new(op)
        .cipher(CipherAlg::AesGcm, key)
        .cipher_iv(iv)
        .auth(AuthAlg::AesGcm, &[])
        .digest_len(TAG_LEN as u32)
}

/// Run one CBC + HMAC operation over `data`, which must be a whole number of
/// blocks followed by room for the digest.
///
/// # Panics
///
/// Panics if the engine reports a hard failure.
pub fn cbc_hmac_op(
    ctx: &SubsystemContext,
    session: SessionHandle,
    iv: &[u8; 16],
    data: Vec<u8>,
) -> OperationOutput {
    let len = (data.len() - HMAC_DIGEST_LEN) as u32;
    ctx.operate(
        OperationRequest::new(session, Packet::from_vec(data))
            .cipher_iv(iv)
            .cipher_range(0, len)
            .auth_range(0, len)
            .hash_result_offset(len),
    )
    .expect("operate")
}

/// Run one AEAD operation over `data` with the tag at its end.
///
/// # Panics
///
/// Panics if the engine reports a hard failure.
pub fn aead_op(ctx: &SubsystemContext, session: SessionHandle, data: Vec<u8>) -> OperationOutput {
    let len = (data.len() - TAG_LEN) as u32;
    ctx.operate(
        OperationRequest::new(session, Packet::from_vec(data))
            .cipher_range(0, len)
            .hash_result_offset(len),
    )
    .expect("operate")
}

/// `plaintext` followed by a zeroed digest area of `digest_len` bytes.
pub fn with_digest_room(plaintext: &[u8], digest_len: usize) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    buf.resize(plaintext.len() + digest_len, 0);
    buf
}
