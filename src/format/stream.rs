//! NCM 音频数据流式解密
//!
//! 职责范围：
//! - 按固定 32 KiB 分块读取音频数据
//! - 对每块原地异或 KeyBox 生成的密钥流
//! - 每块解密后立即写出，内存占用与文件大小无关
//! - 每块结束后回报累计字节数
//!
//! 本模块不负责输出路径、原子写入与终止事件。

use std::io::{self, Read, Write};

use crate::format::keybox::KeyBox;

/// 固定分块大小：32 KiB
///
/// 必须是 256 的整数倍，块内位置才与全局位置的密钥流一致。
pub const CHUNK_SIZE: usize = 0x8000;

/// 流式解密器
pub struct StreamDecryptor<'k> {
    key_box: &'k KeyBox,
}

impl<'k> StreamDecryptor<'k> {
    pub fn new(key_box: &'k KeyBox) -> Self {
        Self { key_box }
    }

    /// 从 reader 读取至 EOF，解密后写入 writer。
    ///
    /// 每写完一块，以累计的音频字节数调用一次 `on_chunk`。
    /// 返回写出的总字节数（等于输入音频字节数）。
    pub fn decrypt<R, W, F>(&self, mut reader: R, mut writer: W, mut on_chunk: F) -> io::Result<u64>
    where
        R: Read,
        W: Write,
        F: FnMut(u64),
    {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut done: u64 = 0;

        loop {
            let read_len = read_chunk(&mut reader, &mut buffer)?;
            if read_len == 0 {
                break;
            }

            let chunk = &mut buffer[..read_len];
            self.key_box.apply(chunk);
            writer.write_all(chunk)?;

            done += read_len as u64;
            on_chunk(done);

            if read_len < CHUNK_SIZE {
                break;
            }
        }

        Ok(done)
    }
}

/// 尽量读满一块；只有 EOF 才会返回不足一块。
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
