//! symaccel CLI
//!
//! Inspect, self-test and benchmark the symmetric crypto engine against the
//! software accelerator backend.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use rand::RngCore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use symaccel_core::capability::DeviceCapability;
use symaccel_core::driver::DeviceId;
use symaccel_core::soft::SoftDriver;
use symaccel_core::{
    AlgError, AuthAlg, CipherAlg, CryptoOp, GlobalCapability, OperationRequest, Packet,
    SessionHandle, SessionParams, SubsystemContext,
};
use tracing::{debug, info};

use config::Config;
use progress::{BenchProgress, format_bytes, format_duration, format_throughput};

/// symaccel - symmetric crypto accelerator engine
#[derive(Parser)]
#[command(name = "symaccel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show global and per-device capabilities
    Caps {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List admissible key/IV/digest sizes of one algorithm
    Sizes {
        /// Cipher algorithm (e.g. aes-cbc)
        #[arg(long, conflicts_with = "auth", required_unless_present = "auth")]
        cipher: Option<CipherAlg>,

        /// Authentication algorithm (e.g. sha256-hmac)
        #[arg(long)]
        auth: Option<AuthAlg>,
    },

    /// Run known-answer and round-trip checks
    Selftest,

    /// Measure synchronous operation throughput
    Bench {
        /// Cipher algorithm
        #[arg(long, default_value = "aes-gcm")]
        cipher: CipherAlg,

        /// Number of operations
        #[arg(long, default_value_t = 10_000)]
        count: u64,

        /// Payload bytes per operation
        #[arg(long, default_value_t = 1024)]
        size: usize,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        let path = cli.config.unwrap_or_else(Config::default_path);
        return init_config(&path, force);
    }

    let config = Config::resolve(cli.config.as_deref())?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    config.validate()?;
    let ctx = open_context(&config)?;

    let outcome = match cli.command {
        Commands::Caps { json } => show_capabilities(&ctx, json),
        Commands::Sizes { cipher, auth } => show_sizes(&ctx, cipher, auth),
        Commands::Selftest => run_selftest(&ctx),
        Commands::Bench {
            cipher,
            count,
            size,
        } => run_bench(&ctx, cipher, count, size),
        Commands::InitConfig { .. } => Ok(()),
    };

    ctx.terminate()?;
    outcome
}

fn open_context(config: &Config) -> anyhow::Result<SubsystemContext> {
    let driver = Arc::new(SoftDriver::new(config.devices.clone()));
    let ctx = SubsystemContext::init(driver, config.engine.clone())?;
    debug!(devices = ctx.enabled_devices().len(), "Engine ready");
    Ok(ctx)
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

// ============================================================================
// caps / sizes
// ============================================================================

#[derive(Serialize)]
struct DeviceReport<'a> {
    id: DeviceId,
    queue_pairs: u16,
    #[serde(flatten)]
    info: &'a DeviceCapability,
}

#[derive(Serialize)]
struct CapabilityReport<'a> {
    global: GlobalCapability,
    devices: Vec<DeviceReport<'a>>,
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    let names: Vec<String> = items.into_iter().map(|item| item.to_string()).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}

fn show_capabilities(ctx: &SubsystemContext, json: bool) -> anyhow::Result<()> {
    let report = CapabilityReport {
        global: ctx.capability()?,
        devices: ctx
            .enabled_devices()
            .iter()
            .map(|dev| DeviceReport {
                id: dev.id,
                queue_pairs: dev.queue_pairs,
                info: &dev.info,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let global = &report.global;
    println!("Global capability:");
    println!("  Sync mode:    {:?}", global.sync_mode);
    println!("  Async mode:   {:?}", global.async_mode);
    println!("  Max sessions: {}", global.max_sessions);
    println!("  Ciphers:      {}", join(&global.ciphers));
    println!("  Auths:        {}", join(&global.auths));
    println!("  HW ciphers:   {}", join(&global.hw_ciphers));
    println!("  HW auths:     {}", join(&global.hw_auths));
    println!();
    println!("Devices:");
    for dev in &report.devices {
        println!(
            "  [{}] {} (socket {}, {} queue pairs, {}, {} capability entries)",
            dev.id,
            dev.info.name,
            dev.info.socket_id,
            dev.queue_pairs,
            if dev.info.hw_accelerated { "hardware" } else { "software" },
            dev.info.capabilities.len()
        );
    }
    Ok(())
}

fn show_sizes(
    ctx: &SubsystemContext,
    cipher: Option<CipherAlg>,
    auth: Option<AuthAlg>,
) -> anyhow::Result<()> {
    if let Some(alg) = cipher {
        let variants = ctx.cipher_variants(alg)?;
        println!("{alg}: {} variant(s)", variants.len());
        println!("  {:>8} {:>8} {:>8}", "key", "iv", "bits");
        for v in variants {
            println!("  {:>8} {:>8} {:>8}", v.key_len, v.iv_len, v.bit_mode);
        }
    }
    if let Some(alg) = auth {
        let variants = ctx.auth_variants(alg)?;
        println!("{alg}: {} variant(s)", variants.len());
        println!(
            "  {:>8} {:>8} {:>8} {:>12} {:>8}",
            "digest", "key", "iv", "aad", "bits"
        );
        for v in variants {
            println!(
                "  {:>8} {:>8} {:>8} {:>12} {:>8}",
                v.digest_len,
                v.key_len,
                v.iv_len,
                format!("{}..={}", v.aad_len.min, v.aad_len.max),
                v.bit_mode
            );
        }
    }
    Ok(())
}

// ============================================================================
// selftest
// ============================================================================

type SelfTest = fn(&SubsystemContext) -> anyhow::Result<()>;

const SELF_TESTS: [(&str, SelfTest); 3] = [
    ("aes-cbc + sha256-hmac round trip", cbc_hmac_round_trip),
    ("aes-gcm known answer", gcm_known_answer),
    ("aes-gcm tamper detection", gcm_tamper),
];

/// Run `check` with an encode and a decode session, destroying both
/// afterwards whatever the outcome.
fn with_sessions<F>(
    ctx: &SubsystemContext,
    params: impl Fn(CryptoOp) -> SessionParams,
    check: F,
) -> anyhow::Result<()>
where
    F: FnOnce(SessionHandle, SessionHandle) -> anyhow::Result<()>,
{
    let enc = ctx.create_session(params(CryptoOp::Encode))?;
    let dec = match ctx.create_session(params(CryptoOp::Decode)) {
        Ok(handle) => handle,
        Err(e) => {
            ctx.destroy_session(enc)?;
            return Err(e.into());
        }
    };
    let result = check(enc, dec);
    ctx.destroy_session(enc)?;
    ctx.destroy_session(dec)?;
    result
}

fn gcm_params(op: CryptoOp) -> SessionParams {
    SessionParams::new(op)
        .cipher(CipherAlg::AesGcm, &[0u8; 16])
        .cipher_iv(&[0u8; 12])
        .auth(AuthAlg::AesGcm, &[])
        .digest_len(16)
}

fn cbc_hmac_round_trip(ctx: &SubsystemContext) -> anyhow::Result<()> {
    let params = |op| {
        SessionParams::new(op)
            .cipher(CipherAlg::AesCbc, &[0x2b; 16])
            .cipher_iv_len(16)
            .auth(AuthAlg::Sha256Hmac, &[0x0b; 32])
            .digest_len(32)
            .auth_cipher_text(true)
    };
    with_sessions(ctx, params, |enc, dec| {
        let iv = [0x5a; 16];
        let plaintext: Vec<u8> = (0u8..64).collect();
        let mut buf = plaintext.clone();
        buf.resize(64 + 32, 0);

        let sealed = ctx.operate(
            OperationRequest::new(enc, Packet::from_vec(buf))
                .cipher_iv(&iv)
                .cipher_range(0, 64)
                .auth_range(0, 64)
                .hash_result_offset(64),
        )?;
        anyhow::ensure!(sealed.result.ok, "encode failed: {:?}", sealed.result);
        anyhow::ensure!(
            sealed.packet.data()[..64] != plaintext[..],
            "ciphertext equals plaintext"
        );

        let opened = ctx.operate(
            OperationRequest::new(dec, sealed.packet)
                .cipher_iv(&iv)
                .cipher_range(0, 64)
                .auth_range(0, 64)
                .hash_result_offset(64),
        )?;
        anyhow::ensure!(opened.result.ok, "decode failed: {:?}", opened.result);
        anyhow::ensure!(
            opened.packet.data()[..64] == plaintext[..],
            "round trip mismatch"
        );
        Ok(())
    })
}

fn gcm_known_answer(ctx: &SubsystemContext) -> anyhow::Result<()> {
    const EXPECTED: &str = "0388dace60b6a392f328c2b971b2fe78ab6e47d42cec13bdf53a67b21257bddf";

    with_sessions(ctx, gcm_params, |enc, dec| {
        let sealed = ctx.operate(
            OperationRequest::new(enc, Packet::new(32))
                .cipher_range(0, 16)
                .hash_result_offset(16),
        )?;
        anyhow::ensure!(sealed.result.ok, "encode failed: {:?}", sealed.result);
        let got = hex::encode(sealed.packet.data());
        anyhow::ensure!(got == EXPECTED, "expected {EXPECTED}, got {got}");

        let opened = ctx.operate(
            OperationRequest::new(dec, sealed.packet)
                .cipher_range(0, 16)
                .hash_result_offset(16),
        )?;
        anyhow::ensure!(opened.result.ok, "decode failed: {:?}", opened.result);
        anyhow::ensure!(
            opened.packet.data()[..16] == [0u8; 16],
            "decrypted block is not zero"
        );
        Ok(())
    })
}

fn gcm_tamper(ctx: &SubsystemContext) -> anyhow::Result<()> {
    with_sessions(ctx, gcm_params, |enc, dec| {
        let sealed = ctx.operate(
            OperationRequest::new(enc, Packet::new(48))
                .cipher_range(0, 32)
                .hash_result_offset(32),
        )?;
        let mut data = sealed.packet.into_vec();
        data[7] ^= 0x80;

        let opened = ctx.operate(
            OperationRequest::new(dec, Packet::from_vec(data))
                .cipher_range(0, 32)
                .hash_result_offset(32),
        )?;
        anyhow::ensure!(
            opened.result.auth == AlgError::IcvCheck && !opened.result.ok,
            "tampered ciphertext was accepted: {:?}",
            opened.result
        );
        anyhow::ensure!(opened.packet.has_crypto_err(), "packet error flag not set");
        Ok(())
    })
}

fn run_selftest(ctx: &SubsystemContext) -> anyhow::Result<()> {
    let mut failed = 0;
    for (name, check) in SELF_TESTS {
        match check(ctx) {
            Ok(()) => println!("  PASS  {name}"),
            Err(e) => {
                failed += 1;
                println!("  FAIL  {name}: {e:#}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} self-tests failed", SELF_TESTS.len());
    }
    println!("All {} self-tests passed", SELF_TESTS.len());
    Ok(())
}

// ============================================================================
// bench
// ============================================================================

struct BenchSetup {
    params: SessionParams,
    digest_len: u32,
    block: usize,
    aead: bool,
}

fn bench_setup(cipher: CipherAlg) -> anyhow::Result<BenchSetup> {
    let mut rng = rand::thread_rng();
    let mut random = |len: usize| {
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        bytes
    };

    let aead_auth = match cipher {
        CipherAlg::AesGcm => Some(AuthAlg::AesGcm),
        CipherAlg::AesCcm => Some(AuthAlg::AesCcm),
        CipherAlg::Chacha20Poly1305 => Some(AuthAlg::Chacha20Poly1305),
        _ => None,
    };
    if let Some(auth) = aead_auth {
        let key_len = if cipher == CipherAlg::Chacha20Poly1305 { 32 } else { 16 };
        let params = SessionParams::new(CryptoOp::Encode)
            .cipher(cipher, &random(key_len))
            .cipher_iv(&random(12))
            .auth(auth, &[])
            .digest_len(16);
        return Ok(BenchSetup {
            params,
            digest_len: 16,
            block: 1,
            aead: true,
        });
    }

    let (key_len, iv_len, block) = match cipher {
        CipherAlg::AesCbc => (16, 16, 16),
        CipherAlg::AesCtr => (16, 16, 1),
        CipherAlg::TripleDesCbc => (24, 8, 8),
        other => anyhow::bail!(
            "bench does not support {other}; use aes-gcm, aes-ccm, chacha20-poly1305, aes-cbc, aes-ctr or triple-des-cbc"
        ),
    };
    let params = SessionParams::new(CryptoOp::Encode)
        .cipher(cipher, &random(key_len))
        .cipher_iv(&random(iv_len))
        .auth(AuthAlg::Sha256Hmac, &random(32))
        .digest_len(32)
        .auth_cipher_text(true);
    Ok(BenchSetup {
        params,
        digest_len: 32,
        block,
        aead: false,
    })
}

fn run_bench(
    ctx: &SubsystemContext,
    cipher: CipherAlg,
    count: u64,
    size: usize,
) -> anyhow::Result<()> {
    let setup = bench_setup(cipher)?;
    if size == 0 || size % setup.block != 0 {
        anyhow::bail!(
            "{cipher} needs a non-empty payload that is a multiple of {} bytes",
            setup.block
        );
    }
    let len = u32::try_from(size)?;

    let handle = ctx.create_session(setup.params)?;
    let payload = vec![0xa5u8; size + setup.digest_len as usize];
    info!(%cipher, count, size, "Starting benchmark");

    let label = format!("{cipher}, {count} x {}", format_bytes(size as u64));
    let progress = BenchProgress::new(count, &label);
    let start = Instant::now();
    let mut failure = None;
    for _ in 0..count {
        let request = OperationRequest::new(handle, Packet::from_slice(&payload))
            .cipher_range(0, len)
            .hash_result_offset(len);
        let request = if setup.aead {
            request
        } else {
            request.auth_range(0, len)
        };

        match ctx.operate(request) {
            Ok(out) if out.result.ok => progress.inc(1),
            Ok(out) => {
                failure = Some(anyhow::anyhow!("operation failed: {:?}", out.result));
                break;
            }
            Err(e) => {
                failure = Some(e.into());
                break;
            }
        }
    }
    let elapsed = start.elapsed();
    ctx.destroy_session(handle)?;

    if let Some(e) = failure {
        progress.abandon();
        return Err(e);
    }
    progress.finish_with_message(format!("Benchmark complete: {cipher}"));

    let total = count.saturating_mul(size as u64);
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = if secs > 0.0 { count as f64 / secs } else { 0.0 };
    println!("Operations: {count}");
    println!("Payload:    {}", format_bytes(size as u64));
    println!("Elapsed:    {}", format_duration(elapsed));
    println!("Rate:       {ops_per_sec:.0} ops/s");
    println!("Throughput: {}", format_throughput(total, elapsed));
    Ok(())
}
