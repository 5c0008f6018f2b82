//! NCM 容器格式
//!
//! 解析顺序：header → keybox → metadata → stream。

pub mod header;
pub mod keybox;
pub mod metadata;
pub mod stream;
