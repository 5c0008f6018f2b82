//! NCM 容器所用的密码学原语。
//!
//! - `keys`：内置的两把固定 AES-128 密钥
//! - `ecb`：AES-128-ECB 块解密与严格的 PKCS#7 去填充

pub mod ecb;
pub mod keys;
