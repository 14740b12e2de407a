//! Software execution of transform chains.
//!
//! The accelerator contract is mirrored exactly: IVs come from the descriptor
//! slots, the digest lives in the packet digest scratch and AEAD additional
//! data in the packet AAD scratch (at `AES_CCM_AAD_OFFSET` for AES-CCM, after
//! the CCM IV length byte in the IV slot).

use crate::{AES_CCM_AAD_OFFSET, MAX_IV_LENGTH};
use crate::algorithm::{NativeAead, NativeAuth, NativeCipher};
use crate::descriptor::{AUTH_IV_OFFSET, CIPHER_IV_OFFSET, DataRange, OpDescriptor, OpStatus};
use crate::packet::{PACKET_AAD_MAX, PACKET_DIGEST_MAX};
use crate::transform::{
    AeadTransform, AuthOp, AuthTransform, ChainOrder, CipherOp, CipherTransform, TransformChain,
};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{self, AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use chacha20poly1305::ChaCha20Poly1305;
use cmac::Cmac;
use des::TdesEde3;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use std::ops::Range;

type Aes128Ccm = ccm::Ccm<Aes128, U16, U12>;
type Aes256Ccm = ccm::Ccm<Aes256, U16, U12>;

type Exec = Result<(), OpStatus>;

/// Nonce length of every AEAD and GMAC transform the software device runs.
pub(crate) const AEAD_IV_LEN: u16 = 12;

/// Tag length of every AEAD transform the software device runs.
pub(crate) const AEAD_TAG_LEN: u16 = 16;

fn full_digest_len(algo: NativeAuth) -> Option<u16> {
    match algo {
        NativeAuth::Null => Some(0),
        NativeAuth::Md5Hmac => Some(16),
        NativeAuth::Sha1Hmac => Some(20),
        NativeAuth::Sha256Hmac => Some(32),
        NativeAuth::Sha384Hmac => Some(48),
        NativeAuth::Sha512Hmac => Some(64),
        NativeAuth::AesCmac | NativeAuth::AesGmac => Some(16),
        NativeAuth::KasumiF9 | NativeAuth::Snow3gUia2 | NativeAuth::ZucEia3 => None,
    }
}

fn check_cipher(x: &CipherTransform) -> Result<(), String> {
    let key_len = x.key.len();
    let (keys, iv): (&[usize], u16) = match x.algo {
        NativeCipher::Null => return Ok(()),
        NativeCipher::AesCbc | NativeCipher::AesCtr => (&[16, 24, 32], 16),
        NativeCipher::TripleDesCbc => (&[24], 8),
        NativeCipher::KasumiF8 | NativeCipher::Snow3gUea2 | NativeCipher::ZucEea3 => {
            return Err(format!("bit-mode cipher {:?} is not executable in software", x.algo));
        }
    };
    if !keys.contains(&key_len) {
        return Err(format!("{:?} key length {key_len} not supported", x.algo));
    }
    if x.iv_len != iv {
        return Err(format!("{:?} requires a {iv} byte iv, got {}", x.algo, x.iv_len));
    }
    Ok(())
}

fn check_auth(x: &AuthTransform) -> Result<(), String> {
    let Some(full) = full_digest_len(x.algo) else {
        return Err(format!("bit-mode auth {:?} is not executable in software", x.algo));
    };
    if x.digest_len > full {
        return Err(format!(
            "{:?} digest length {} exceeds {full}",
            x.algo, x.digest_len
        ));
    }
    match x.algo {
        NativeAuth::AesCmac | NativeAuth::AesGmac if !matches!(x.key.len(), 16 | 32) => {
            Err(format!("{:?} key length {} not supported", x.algo, x.key.len()))
        }
        NativeAuth::AesGmac if x.iv_len != AEAD_IV_LEN => Err(format!(
            "AES-GMAC requires a {AEAD_IV_LEN} byte iv, got {}",
            x.iv_len
        )),
        _ => Ok(()),
    }
}

fn check_aead(x: &AeadTransform) -> Result<(), String> {
    let key_ok = match x.algo {
        NativeAead::AesGcm | NativeAead::AesCcm => matches!(x.key.len(), 16 | 32),
        NativeAead::Chacha20Poly1305 => x.key.len() == 32,
    };
    if !key_ok {
        return Err(format!("{:?} key length {} not supported", x.algo, x.key.len()));
    }
    if x.iv_len != AEAD_IV_LEN || x.digest_len != AEAD_TAG_LEN {
        return Err(format!(
            "{:?} requires a {AEAD_IV_LEN} byte iv and a {AEAD_TAG_LEN} byte tag",
            x.algo
        ));
    }
    let aad_room = match x.algo {
        NativeAead::AesCcm => PACKET_AAD_MAX - AES_CCM_AAD_OFFSET,
        _ => PACKET_AAD_MAX,
    };
    if usize::from(x.aad_len) > aad_room {
        return Err(format!("{:?} aad length {} exceeds {aad_room}", x.algo, x.aad_len));
    }
    Ok(())
}

/// Check that every transform of `chain` can be executed.
pub(crate) fn check_chain(chain: &TransformChain) -> Result<(), String> {
    match chain {
        TransformChain::CipherOnly(c) => check_cipher(c),
        TransformChain::AuthOnly(a) => check_auth(a),
        TransformChain::Chained { cipher, auth, .. } => {
            check_cipher(cipher)?;
            check_auth(auth)
        }
        TransformChain::Aead(x) => check_aead(x),
    }
}

fn cbc_crypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8], op: CipherOp) -> Exec
where
    C: BlockEncryptMut + BlockDecryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    let done = match op {
        CipherOp::Encrypt => cbc::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| OpStatus::InvalidArgs)?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .is_ok(),
        CipherOp::Decrypt => cbc::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| OpStatus::InvalidArgs)?
            .decrypt_padded_mut::<NoPadding>(buf)
            .is_ok(),
    };
    // Partial blocks are rejected, not padded.
    if done { Ok(()) } else { Err(OpStatus::InvalidArgs) }
}

fn ctr_crypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Exec {
    let bad = |_| OpStatus::InvalidArgs;
    match key.len() {
        16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv).map_err(bad)?.apply_keystream(buf),
        24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv).map_err(bad)?.apply_keystream(buf),
        32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv).map_err(bad)?.apply_keystream(buf),
        _ => return Err(OpStatus::InvalidArgs),
    }
    Ok(())
}

fn run_cipher(x: &CipherTransform, iv_slot: &[u8], buf: &mut [u8]) -> Exec {
    let key = x.key.as_bytes();
    let iv = &iv_slot[..usize::from(x.iv_len)];
    match x.algo {
        NativeCipher::Null => Ok(()),
        NativeCipher::AesCbc => match key.len() {
            16 => cbc_crypt::<Aes128>(key, iv, buf, x.op),
            24 => cbc_crypt::<Aes192>(key, iv, buf, x.op),
            32 => cbc_crypt::<Aes256>(key, iv, buf, x.op),
            _ => Err(OpStatus::InvalidArgs),
        },
        NativeCipher::AesCtr => ctr_crypt(key, iv, buf),
        NativeCipher::TripleDesCbc => cbc_crypt::<TdesEde3>(key, iv, buf, x.op),
        NativeCipher::KasumiF8 | NativeCipher::Snow3gUea2 | NativeCipher::ZucEea3 => {
            Err(OpStatus::Error)
        }
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8], out: &mut [u8; PACKET_DIGEST_MAX]) -> Exec {
    let mut m = <M as Mac>::new_from_slice(key).map_err(|_| OpStatus::InvalidArgs)?;
    m.update(data);
    let tag = m.finalize().into_bytes();
    out[..tag.len()].copy_from_slice(&tag);
    Ok(())
}

fn gmac(key: &[u8], iv: &[u8], data: &[u8], out: &mut [u8; PACKET_DIGEST_MAX]) -> Exec {
    if iv.len() != usize::from(AEAD_IV_LEN) {
        return Err(OpStatus::InvalidArgs);
    }
    let nonce = aead::Nonce::<Aes128Gcm>::from_slice(iv);
    let tag = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| OpStatus::InvalidArgs)?
            .encrypt_in_place_detached(nonce, data, &mut []),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| OpStatus::InvalidArgs)?
            .encrypt_in_place_detached(nonce, data, &mut []),
        _ => return Err(OpStatus::InvalidArgs),
    }
    .map_err(|_| OpStatus::Error)?;
    out[..tag.len()].copy_from_slice(&tag);
    Ok(())
}

fn compute_digest(
    x: &AuthTransform,
    iv_slot: &[u8],
    data: &[u8],
    out: &mut [u8; PACKET_DIGEST_MAX],
) -> Exec {
    let key = x.key.as_bytes();
    match x.algo {
        NativeAuth::Null => Ok(()),
        NativeAuth::Md5Hmac => mac::<Hmac<Md5>>(key, data, out),
        NativeAuth::Sha1Hmac => mac::<Hmac<Sha1>>(key, data, out),
        NativeAuth::Sha256Hmac => mac::<Hmac<Sha256>>(key, data, out),
        NativeAuth::Sha384Hmac => mac::<Hmac<Sha384>>(key, data, out),
        NativeAuth::Sha512Hmac => mac::<Hmac<Sha512>>(key, data, out),
        NativeAuth::AesCmac => match key.len() {
            16 => mac::<Cmac<Aes128>>(key, data, out),
            32 => mac::<Cmac<Aes256>>(key, data, out),
            _ => Err(OpStatus::InvalidArgs),
        },
        NativeAuth::AesGmac => gmac(key, &iv_slot[..usize::from(x.iv_len)], data, out),
        NativeAuth::KasumiF9 | NativeAuth::Snow3gUia2 | NativeAuth::ZucEia3 => {
            Err(OpStatus::Error)
        }
    }
}

fn run_auth(
    x: &AuthTransform,
    iv_slot: &[u8],
    data: &[u8],
    digest: &mut [u8; PACKET_DIGEST_MAX],
    in_scratch: bool,
) -> Exec {
    let len = usize::from(x.digest_len);
    if x.algo == NativeAuth::Null || len == 0 {
        return Ok(());
    }
    if !in_scratch {
        return Err(OpStatus::InvalidArgs);
    }

    let mut computed = [0u8; PACKET_DIGEST_MAX];
    compute_digest(x, iv_slot, data, &mut computed)?;
    match x.op {
        AuthOp::Generate => {
            digest[..len].copy_from_slice(&computed[..len]);
            Ok(())
        }
        AuthOp::Verify if bool::from(computed[..len].ct_eq(&digest[..len])) => Ok(()),
        AuthOp::Verify => Err(OpStatus::AuthFailed),
    }
}

fn aead_apply<A: AeadInPlace>(
    cipher: &A,
    op: CipherOp,
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &mut [u8],
) -> Exec {
    if nonce.len() != A::NonceSize::USIZE || tag.len() != A::TagSize::USIZE {
        return Err(OpStatus::InvalidArgs);
    }
    let nonce = aead::Nonce::<A>::from_slice(nonce);
    match op {
        CipherOp::Encrypt => {
            let computed = cipher
                .encrypt_in_place_detached(nonce, aad, buf)
                .map_err(|_| OpStatus::Error)?;
            tag.copy_from_slice(&computed);
            Ok(())
        }
        CipherOp::Decrypt => cipher
            .decrypt_in_place_detached(nonce, aad, buf, aead::Tag::<A>::from_slice(tag))
            .map_err(|_| OpStatus::AuthFailed),
    }
}

fn run_aead(
    x: &AeadTransform,
    iv_slot: &[u8],
    aad_scratch: &[u8; PACKET_AAD_MAX],
    buf: &mut [u8],
    digest: &mut [u8; PACKET_DIGEST_MAX],
) -> Exec {
    let iv_len = usize::from(x.iv_len);
    let aad_len = usize::from(x.aad_len);
    let (nonce, aad) = match x.algo {
        NativeAead::AesCcm => {
            if usize::from(iv_slot[0]) != iv_len {
                return Err(OpStatus::InvalidArgs);
            }
            (
                &iv_slot[1..=iv_len],
                &aad_scratch[AES_CCM_AAD_OFFSET..AES_CCM_AAD_OFFSET + aad_len],
            )
        }
        NativeAead::AesGcm | NativeAead::Chacha20Poly1305 => {
            (&iv_slot[..iv_len], &aad_scratch[..aad_len])
        }
    };
    let tag = &mut digest[..usize::from(x.digest_len)];
    let key = x.key.as_bytes();
    let bad_key = |_| OpStatus::InvalidArgs;

    match (x.algo, key.len()) {
        (NativeAead::AesGcm, 16) => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(bad_key)?;
            aead_apply(&cipher, x.op, nonce, aad, buf, tag)
        }
        (NativeAead::AesGcm, 32) => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(bad_key)?;
            aead_apply(&cipher, x.op, nonce, aad, buf, tag)
        }
        (NativeAead::AesCcm, 16) => {
            let cipher = Aes128Ccm::new_from_slice(key).map_err(bad_key)?;
            aead_apply(&cipher, x.op, nonce, aad, buf, tag)
        }
        (NativeAead::AesCcm, 32) => {
            let cipher = Aes256Ccm::new_from_slice(key).map_err(bad_key)?;
            aead_apply(&cipher, x.op, nonce, aad, buf, tag)
        }
        (NativeAead::Chacha20Poly1305, 32) => aead_apply(
            &ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?,
            x.op,
            nonce,
            aad,
            buf,
            tag,
        ),
        _ => Err(OpStatus::InvalidArgs),
    }
}

fn span(range: DataRange) -> Range<usize> {
    let start = range.offset as usize;
    start..start + range.length as usize
}

/// Execute `chain` on the descriptor's packet and return the completion
/// status.
pub(crate) fn execute(chain: &TransformChain, desc: &mut OpDescriptor) -> OpStatus {
    let iv = desc.iv;
    let cipher_iv = &iv[CIPHER_IV_OFFSET..CIPHER_IV_OFFSET + MAX_IV_LENGTH];
    let auth_iv = &iv[AUTH_IV_OFFSET..AUTH_IV_OFFSET + MAX_IV_LENGTH];
    let (cipher_range, auth_range) = (desc.cipher_range, desc.auth_range);
    let in_scratch = desc.digest_in_scratch;

    let Some(pkt) = desc.packet.as_mut() else {
        return OpStatus::InvalidArgs;
    };
    if !cipher_range.fits(pkt.len()) || !auth_range.fits(pkt.len()) {
        return OpStatus::InvalidArgs;
    }

    let mut digest = *pkt.digest_buf();
    let aad = *pkt.aad_buf();
    let data = pkt.data_mut();

    let outcome = match chain {
        TransformChain::CipherOnly(c) => run_cipher(c, cipher_iv, &mut data[span(cipher_range)]),
        TransformChain::AuthOnly(a) => {
            run_auth(a, auth_iv, &data[span(auth_range)], &mut digest, in_scratch)
        }
        TransformChain::Chained {
            cipher,
            auth,
            order: ChainOrder::CipherThenAuth,
        } => run_cipher(cipher, cipher_iv, &mut data[span(cipher_range)]).and_then(|()| {
            run_auth(auth, auth_iv, &data[span(auth_range)], &mut digest, in_scratch)
        }),
        TransformChain::Chained {
            cipher,
            auth,
            order: ChainOrder::AuthThenCipher,
        } => run_auth(auth, auth_iv, &data[span(auth_range)], &mut digest, in_scratch)
            .and_then(|()| run_cipher(cipher, cipher_iv, &mut data[span(cipher_range)])),
        TransformChain::Aead(_) if !in_scratch => Err(OpStatus::InvalidArgs),
        TransformChain::Aead(x) => {
            run_aead(x, cipher_iv, &aad, &mut data[span(cipher_range)], &mut digest)
        }
    };

    *pkt.digest_buf_mut() = digest;
    match outcome {
        Ok(()) => OpStatus::Success,
        Err(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorPool;
    use crate::packet::Packet;
    use crate::transform::KeyMaterial;

    fn hmac_sha256(op: AuthOp, key: &[u8], digest_len: u16) -> AuthTransform {
        AuthTransform {
            algo: NativeAuth::Sha256Hmac,
            op,
            key: KeyMaterial::new(key),
            iv_len: 0,
            digest_len,
        }
    }

    fn descriptor(pool: &DescriptorPool, data: &[u8]) -> Box<OpDescriptor> {
        let mut desc = pool.alloc().unwrap();
        desc.packet = Some(Packet::from_slice(data));
        desc.digest_in_scratch = true;
        desc
    }

    #[test]
    fn test_hmac_sha256_known_answer() {
        // RFC 4231 test case 2
        let pool = DescriptorPool::new(1);
        let data = b"what do ya want for nothing?";
        let mut desc = descriptor(&pool, data);
        desc.auth_range = DataRange::new(0, data.len() as u32);

        let chain = TransformChain::AuthOnly(hmac_sha256(AuthOp::Generate, b"Jefe", 32));
        assert_eq!(execute(&chain, &mut desc), OpStatus::Success);
        let pkt = desc.packet.as_ref().unwrap();
        assert_eq!(
            hex::encode(&pkt.digest_buf()[..32]),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_truncated_verify() {
        let pool = DescriptorPool::new(1);
        let data = b"what do ya want for nothing?";
        let mut desc = descriptor(&pool, data);
        desc.auth_range = DataRange::new(0, data.len() as u32);
        let expected = hex::decode("5bdcc146bf60754e6a042426089575c7").unwrap();
        desc.packet.as_mut().unwrap().digest_buf_mut()[..16].copy_from_slice(&expected);

        let chain = TransformChain::AuthOnly(hmac_sha256(AuthOp::Verify, b"Jefe", 16));
        assert_eq!(execute(&chain, &mut desc), OpStatus::Success);

        desc.packet.as_mut().unwrap().digest_buf_mut()[0] ^= 0xff;
        assert_eq!(execute(&chain, &mut desc), OpStatus::AuthFailed);
    }

    #[test]
    fn test_cbc_partial_block_rejected() {
        let pool = DescriptorPool::new(1);
        let mut desc = descriptor(&pool, &[0u8; 20]);
        desc.cipher_range = DataRange::new(0, 20);
        let chain = TransformChain::CipherOnly(CipherTransform {
            algo: NativeCipher::AesCbc,
            op: CipherOp::Encrypt,
            key: KeyMaterial::new(&[1u8; 16]),
            iv_len: 16,
        });
        assert_eq!(execute(&chain, &mut desc), OpStatus::InvalidArgs);
    }

    #[test]
    fn test_ccm_round_trip_uses_offsets() {
        let pool = DescriptorPool::new(1);
        let xform = |op| AeadTransform {
            algo: NativeAead::AesCcm,
            op,
            key: KeyMaterial::new(&[7u8; 16]),
            iv_len: 12,
            aad_len: 8,
            digest_len: 16,
        };

        let mut desc = descriptor(&pool, b"0123456789abcdef");
        desc.cipher_range = DataRange::new(0, 16);
        desc.iv[0] = 12;
        desc.iv[1..13].copy_from_slice(&[9u8; 12]);
        desc.packet
            .as_mut()
            .unwrap()
            .write_aad(AES_CCM_AAD_OFFSET, b"headers!")
            .unwrap();

        let seal = TransformChain::Aead(xform(CipherOp::Encrypt));
        assert_eq!(execute(&seal, &mut desc), OpStatus::Success);
        assert_ne!(desc.packet.as_ref().unwrap().data(), b"0123456789abcdef");

        let open = TransformChain::Aead(xform(CipherOp::Decrypt));
        assert_eq!(execute(&open, &mut desc), OpStatus::Success);
        assert_eq!(desc.packet.as_ref().unwrap().data(), b"0123456789abcdef");

        // Missing IV length byte
        desc.iv[0] = 0;
        assert_eq!(execute(&open, &mut desc), OpStatus::InvalidArgs);
    }

    #[test]
    fn test_check_chain_rejects_bit_mode() {
        let chain = TransformChain::CipherOnly(CipherTransform {
            algo: NativeCipher::Snow3gUea2,
            op: CipherOp::Encrypt,
            key: KeyMaterial::new(&[0u8; 16]),
            iv_len: 16,
        });
        assert!(check_chain(&chain).is_err());

        let chain = TransformChain::AuthOnly(hmac_sha256(AuthOp::Generate, b"k", 33));
        assert!(check_chain(&chain).is_err());
    }

    #[test]
    fn test_range_outside_packet() {
        let pool = DescriptorPool::new(1);
        let mut desc = descriptor(&pool, &[0u8; 8]);
        desc.auth_range = DataRange::new(4, 8);
        let chain = TransformChain::AuthOnly(hmac_sha256(AuthOp::Generate, b"k", 32));
        assert_eq!(execute(&chain, &mut desc), OpStatus::InvalidArgs);
    }
}
