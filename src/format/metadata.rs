//! NCM 元数据块解析
//!
//! 还原顺序：
//! 1. 每字节异或 0x63
//! 2. 丢弃前缀 "163 key(Don't modify):"（22 字节）
//! 3. Base64 解码
//! 4. 使用 META_KEY 做 AES-128-ECB 解密并去除 PKCS#7 填充
//! 5. 丢弃前缀 "music:"（6 字节），剩余为 JSON
//!
//! JSON 中只有 `format` 是必需字段，其余字段宽松解析。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::crypto::ecb;
use crate::crypto::keys::META_KEY;
use crate::error::{NcmError, Result};

/// Metadata block 异或掩码
pub const META_XOR_MASK: u8 = 0x63;

/// 异或后需丢弃的文本前缀长度
pub const META_OUTER_PREFIX_LEN: usize = 22;

/// 解密后需丢弃的文本前缀长度
pub const META_INNER_PREFIX_LEN: usize = 6;

/// 歌曲元数据
///
/// 除 `format` 外的字段类型不符时按缺省处理，不影响解码。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicMetadata {
    /// 真实音频格式，例如 "mp3"、"flac"
    pub format: String,

    #[serde(default, deserialize_with = "lenient")]
    pub music_name: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub album: Option<String>,

    /// 通常形如 `[["歌手", 12345], ...]`，也可能混有纯字符串条目
    #[serde(default, deserialize_with = "lenient_list")]
    pub artist: Vec<Value>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub bitrate: Option<u64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub duration: Option<u64>,
}

impl MusicMetadata {
    /// 歌手名列表（忽略无法识别的条目）
    pub fn artists(&self) -> Vec<&str> {
        self.artist
            .iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(name.as_str()),
                Value::Array(pair) => pair.first().and_then(Value::as_str),
                _ => None,
            })
            .collect()
    }
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_list<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

/// 接受整数与非负浮点数（如 `320000.0`），其余视为缺省。
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    }))
}

/// 从原始 metadata block 中提取元数据。
pub fn extract(mut block: Vec<u8>) -> Result<MusicMetadata> {
    if block.len() < META_OUTER_PREFIX_LEN {
        return Err(NcmError::format(format!(
            "metadata block too short: {} bytes",
            block.len()
        )));
    }

    for b in block.iter_mut() {
        *b ^= META_XOR_MASK;
    }

    let encoded = &block[META_OUTER_PREFIX_LEN..];
    let cipher = STANDARD
        .decode(encoded)
        .map_err(|e| NcmError::format(format!("metadata base64 decode failed: {e}")))?;

    let plain = ecb::decrypt_unpad(&META_KEY, cipher)?;
    if plain.len() < META_INNER_PREFIX_LEN {
        return Err(NcmError::format("metadata payload too short"));
    }

    parse_json(&plain[META_INNER_PREFIX_LEN..])
}

/// 解析元数据 JSON；JSON 非法或缺少 `format` 字段均为格式错误。
pub fn parse_json(json: &[u8]) -> Result<MusicMetadata> {
    serde_json::from_slice(json)
        .map_err(|e| NcmError::format(format!("metadata JSON invalid or missing format field: {e}")))
}
