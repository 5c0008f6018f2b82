//! AES-128-ECB 解密与 PKCS#7 去填充
//!
//! NCM 的 key block 与 metadata block 都是 "ECB + PKCS#7" 包装，
//! 这里只提供解密方向。

use aes::Aes128;
use aes::cipher::{BlockDecrypt, KeyInit};

use crate::crypto::keys::KEY_SIZE;
use crate::error::{NcmError, Result};

/// AES 块长度
pub const BLOCK_SIZE: usize = 16;

/// 原地按 16 字节块做 ECB 解密。
///
/// 数据长度必须是块大小的整数倍，否则视为格式错误。
pub fn decrypt_in_place(key: &[u8; KEY_SIZE], data: &mut [u8]) -> Result<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(NcmError::format(format!(
            "ECB input length {} is not a multiple of {BLOCK_SIZE}",
            data.len()
        )));
    }

    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| NcmError::format("invalid AES-128 key length"))?;

    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(aes::Block::from_mut_slice(block));
    }

    Ok(())
}

/// 严格去除 PKCS#7 填充，返回去填充后的有效长度。
///
/// 填充长度必须在 1..=16 内、不超过数据长度，且所有填充字节一致。
pub fn unpad_pkcs7(data: &[u8]) -> Result<usize> {
    let pad = *data
        .last()
        .ok_or_else(|| NcmError::format("PKCS#7: empty input"))? as usize;

    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(NcmError::format(format!("PKCS#7: invalid pad length {pad}")));
    }

    let body = data.len() - pad;
    if data[body..].iter().any(|&b| b as usize != pad) {
        return Err(NcmError::format("PKCS#7: inconsistent padding bytes"));
    }

    Ok(body)
}

/// 解密并去填充，返回明文。
pub fn decrypt_unpad(key: &[u8; KEY_SIZE], mut data: Vec<u8>) -> Result<Vec<u8>> {
    decrypt_in_place(key, &mut data)?;
    let len = unpad_pkcs7(&data)?;
    data.truncate(len);
    Ok(data)
}
