//! Performance benchmarks for the synchronous operation path.
//!
//! Run with: `cargo bench -p symaccel-core`
//!
//! Every iteration goes through the full per-call state machine (descriptor
//! allocation, IV/digest staging, enqueue, poll) against the software
//! accelerator, so the numbers include engine overhead on top of the cipher.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::RngCore;
use std::sync::Arc;
use symaccel_core::soft::{SoftDeviceConfig, SoftDriver};
use symaccel_core::{
    AuthAlg, CipherAlg, CryptoOp, EngineConfig, OperationRequest, Packet, SessionParams,
    SubsystemContext,
};

const SIZES: [usize; 5] = [64, 256, 1024, 4096, 16384];

fn context() -> SubsystemContext {
    let driver = Arc::new(SoftDriver::new(vec![SoftDeviceConfig::standard("soft0")]));
    SubsystemContext::init(driver, EngineConfig::default()).expect("init")
}

// ============================================================================
// AEAD
// ============================================================================

fn bench_gcm_encode(c: &mut Criterion) {
    let ctx = context();
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    let session = ctx
        .create_session(
            SessionParams::new(CryptoOp::Encode)
                .cipher(CipherAlg::AesGcm, &key)
                .cipher_iv(&[7u8; 12])
                .auth(AuthAlg::AesGcm, &[])
                .digest_len(16),
        )
        .expect("session");

    let mut group = c.benchmark_group("operate_aes_gcm");
    for size in SIZES {
        let payload = vec![0xAA; size + 16];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let request = OperationRequest::new(session, Packet::from_slice(&payload))
                    .cipher_range(0, size as u32)
                    .hash_result_offset(size as u32);
                black_box(ctx.operate(request).expect("operate"))
            })
        });
    }
    group.finish();
}

// ============================================================================
// Chained cipher + HMAC
// ============================================================================

fn bench_cbc_hmac_encode(c: &mut Criterion) {
    let ctx = context();
    let session = ctx
        .create_session(
            SessionParams::new(CryptoOp::Encode)
                .cipher(CipherAlg::AesCbc, &[0x11; 16])
                .cipher_iv(&[0x22; 16])
                .auth(AuthAlg::Sha256Hmac, &[0x33; 32])
                .digest_len(32)
                .auth_cipher_text(true),
        )
        .expect("session");

    let mut group = c.benchmark_group("operate_aes_cbc_hmac_sha256");
    for size in SIZES {
        let payload = vec![0x55; size + 32];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let request = OperationRequest::new(session, Packet::from_slice(&payload))
                    .cipher_range(0, size as u32)
                    .auth_range(0, size as u32)
                    .hash_result_offset(size as u32);
                black_box(ctx.operate(request).expect("operate"))
            })
        });
    }
    group.finish();
}

// ============================================================================
// Session lifecycle
// ============================================================================

fn bench_session_create_destroy(c: &mut Criterion) {
    let ctx = context();
    let params = SessionParams::new(CryptoOp::Encode)
        .cipher(CipherAlg::AesCtr, &[0x44; 16])
        .cipher_iv_len(16);

    c.bench_function("session_create_destroy", |b| {
        b.iter(|| {
            let handle = ctx.create_session(params.clone()).expect("session");
            ctx.destroy_session(black_box(handle)).expect("destroy");
        })
    });
}

criterion_group!(
    benches,
    bench_gcm_encode,
    bench_cbc_hmac_encode,
    bench_session_create_destroy
);
criterion_main!(benches);
