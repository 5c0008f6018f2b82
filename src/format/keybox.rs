//! NCM Key block 解包与 KeyBox 生成
//!
//! Key block 的还原顺序（严格）：
//! 1. 每字节异或 0x64
//! 2. 使用 CORE_KEY 做 AES-128-ECB 解密
//! 3. 去除 PKCS#7 填充
//! 4. 丢弃固定前缀 "neteasecloudmusic"（17 字节）
//!
//! 剩余部分即每个文件独立的密钥材料，用于生成 256 字节的置换表（KeyBox）。

use zeroize::Zeroizing;

use crate::crypto::ecb;
use crate::crypto::keys::CORE_KEY;
use crate::error::{NcmError, Result};

/// Key block 异或掩码
pub const KEY_XOR_MASK: u8 = 0x64;

/// 解包后需要丢弃的文本前缀长度（"neteasecloudmusic"）
pub const KEY_PREFIX_LEN: usize = 17;

/// 从原始 key block 中还原密钥材料。
///
/// 返回值在离开作用域后自动清零。
pub fn unwrap_key(mut block: Vec<u8>) -> Result<Zeroizing<Vec<u8>>> {
    for b in block.iter_mut() {
        *b ^= KEY_XOR_MASK;
    }

    let plain = Zeroizing::new(ecb::decrypt_unpad(&CORE_KEY, block)?);

    if plain.len() <= KEY_PREFIX_LEN {
        return Err(NcmError::format("empty key material"));
    }

    Ok(Zeroizing::new(plain[KEY_PREFIX_LEN..].to_vec()))
}

/// 256 字节置换表
///
/// 构造完成后只读；生成过程只做交换，因此始终是 0..=255 的一个排列。
#[derive(Clone, PartialEq, Eq)]
pub struct KeyBox([u8; 256]);

impl KeyBox {
    /// RC4 风格的密钥调度：以密钥材料打乱恒等排列。
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(NcmError::format("empty key material"));
        }

        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8;
        }

        let mut last: u8 = 0;
        let mut cursor = 0usize;

        for i in 0..256 {
            let swap = table[i];
            let c = swap.wrapping_add(last).wrapping_add(key[cursor]);

            cursor += 1;
            if cursor >= key.len() {
                cursor = 0;
            }

            table[i] = table[c as usize];
            table[c as usize] = swap;
            last = c;
        }

        Ok(Self(table))
    }

    /// 解包 key block 并直接生成 KeyBox。
    pub fn from_key_block(block: Vec<u8>) -> Result<Self> {
        let key = unwrap_key(block)?;
        Self::new(&key)
    }

    pub fn as_bytes(&self) -> &[u8; 256] {
        &self.0
    }

    /// 块内 1 起始位置 `p` 对应的密钥流字节。
    #[inline]
    pub fn keystream_byte(&self, p: usize) -> u8 {
        let t = &self.0;
        let j = p & 0xff;
        let a = t[j] as usize;
        let b = t[(a + j) & 0xff] as usize;
        t[(a + b) & 0xff]
    }

    /// 对一个 chunk 原地异或密钥流。
    ///
    /// 位置在每个 chunk 内从 1 重新计数；同一 KeyBox 作用两次即还原。
    pub fn apply(&self, chunk: &mut [u8]) {
        for (idx, byte) in chunk.iter_mut().enumerate() {
            *byte ^= self.keystream_byte(idx + 1);
        }
    }
}

impl std::fmt::Debug for KeyBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBox(..)")
    }
}
