//! 测试用的 NCM 容器构造工具
//!
//! 按真实布局手工拼装容器：key block / metadata block 使用与解码相反的
//! 方向（加填充 → ECB 加密 → Base64 → 加前缀 → 异或），
//! 音频数据使用独立实现的 RC4 KSA + 密钥流加密。

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use ncmdump::crypto::keys::{CORE_KEY, META_KEY};

pub const CHUNK: usize = 0x8000;

/// 不加填充的 ECB 加密（输入必须按 16 字节对齐）
pub fn encrypt_ecb_raw(key: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    assert_eq!(plain.len() % 16, 0, "raw ECB input must be block aligned");
    let cipher = Aes128::new_from_slice(key).expect("aes key");
    let mut out = plain.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.encrypt_block(aes::Block::from_mut_slice(block));
    }
    out
}

/// PKCS#7 填充后 ECB 加密
pub fn encrypt_ecb(key: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    let pad = 16 - plain.len() % 16;
    let mut padded = plain.to_vec();
    padded.extend(std::iter::repeat_n(pad as u8, pad));
    encrypt_ecb_raw(key, &padded)
}

/// 由已加密的 key 数据生成异或后的 key block
pub fn mask_key_block(mut cipher: Vec<u8>) -> Vec<u8> {
    for b in cipher.iter_mut() {
        *b ^= 0x64;
    }
    cipher
}

pub fn key_block(key_material: &[u8]) -> Vec<u8> {
    let mut plain = b"neteasecloudmusic".to_vec();
    plain.extend_from_slice(key_material);
    mask_key_block(encrypt_ecb(&CORE_KEY, &plain))
}

pub fn meta_block(json: &str) -> Vec<u8> {
    let mut plain = b"music:".to_vec();
    plain.extend_from_slice(json.as_bytes());
    let encoded = STANDARD.encode(encrypt_ecb(&META_KEY, &plain));

    let mut block = b"163 key(Don't modify):".to_vec();
    block.extend_from_slice(encoded.as_bytes());
    for b in block.iter_mut() {
        *b ^= 0x63;
    }
    block
}

/// 经典 RC4 KSA，与库内实现相互独立
pub fn manual_key_box(key: &[u8]) -> [u8; 256] {
    let mut s = [0u8; 256];
    for (i, v) in s.iter_mut().enumerate() {
        *v = i as u8;
    }
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) % 256;
        s.swap(i, j);
    }
    s
}

/// 按 32 KiB 分块、块内位置从 1 开始计算密钥流并异或
pub fn manual_transform(key: &[u8], data: &[u8]) -> Vec<u8> {
    let t = manual_key_box(key);
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(CHUNK) {
        for (i, &b) in chunk.iter().enumerate() {
            let j = (i + 1) % 256;
            let a = t[j] as usize;
            let k = t[(a + t[(a + j) % 256] as usize) % 256];
            out.push(b ^ k);
        }
    }
    out
}

/// 由原始区域拼装容器
pub fn assemble(key_block: &[u8], meta_block: &[u8], cover: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"CTENFDAM");
    out.extend_from_slice(&[0x01, 0x70]);
    out.extend_from_slice(&(key_block.len() as u32).to_le_bytes());
    out.extend_from_slice(key_block);
    out.extend_from_slice(&(meta_block.len() as u32).to_le_bytes());
    out.extend_from_slice(meta_block);
    out.extend_from_slice(&[0xAB; 9]);
    out.extend_from_slice(&(cover.len() as u32).to_le_bytes());
    out.extend_from_slice(cover);
    out.extend_from_slice(payload);
    out
}

/// 返回音频数据之前的字节数
pub fn payload_offset(key_block: &[u8], meta_block: &[u8], cover: &[u8]) -> u64 {
    (10 + 4 + key_block.len() + 4 + meta_block.len() + 9 + 4 + cover.len()) as u64
}

/// 一个完整的合成容器及其明文
pub struct Synthetic {
    pub bytes: Vec<u8>,
    pub plain_audio: Vec<u8>,
    pub payload_offset: u64,
}

pub fn synthetic(key_material: &[u8], format: &str, plain_audio: &[u8]) -> Synthetic {
    let kb = key_block(key_material);
    let json = format!(
        r#"{{"musicId":42,"musicName":"Test Song","artist":[["Tester",7]],"album":"Fixtures","bitrate":320000,"duration":1000,"format":"{format}"}}"#
    );
    let mb = meta_block(&json);
    let cover = b"\xFF\xD8\xFFfake-jpeg-cover".to_vec();
    let payload = manual_transform(key_material, plain_audio);

    Synthetic {
        bytes: assemble(&kb, &mb, &cover, &payload),
        plain_audio: plain_audio.to_vec(),
        payload_offset: payload_offset(&kb, &mb, &cover),
    }
}

/// 写一个合成容器到 `dir/name`
pub fn write_synthetic(dir: &Path, name: &str, format: &str, plain_audio: &[u8]) -> (PathBuf, Synthetic) {
    let syn = synthetic(b"fixture key material 0123456789", format, plain_audio);
    fs::create_dir_all(dir).expect("create fixture dir");
    let path = dir.join(name);
    fs::write(&path, &syn.bytes).expect("write fixture");
    (path, syn)
}

pub fn sample_audio(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(2654435761) >> 7) as u8).collect()
}
