//! 内置固定密钥
//!
//! 两把密钥只用于解包每个文件自带的秘密，从不由用户输入派生。

/// AES 块大小（字节）
pub const KEY_SIZE: usize = 16;

/// 核心密钥，用于解包 key block（"hzHRAmso5kInbaxW"）
pub const CORE_KEY: [u8; KEY_SIZE] = *b"hzHRAmso5kInbaxW";

/// 元数据密钥，用于解包 metadata block（"#14ljk_!\]&0U<'("）
pub const META_KEY: [u8; KEY_SIZE] = *b"#14ljk_!\\]&0U<'(";
