//! NCM 容器头部解析
//!
//! 容器由若干固定用途的字节区域按顺序组成，只从前往后读一次：
//!
//! 10 (magic + 2 字节)
//! 4  (key block 长度，小端)
//! K  (key block)
//! 4  (metadata 长度，小端)
//! M  (metadata block)
//! 9  (间隙，不透明)
//! 4  (封面长度，小端)
//! C  (封面图片)
//! .. (音频数据，直到文件末尾)
//!
//! 解析器是一个单向状态机：每一步读取一个区域并推进游标，不回退。
//! 任何区域读不满都视为 I/O 错误。解析器不缓冲音频数据，
//! 停在 `PayloadReady` 并把已定位的输入流交给流式解密器。

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::error::Result;
use crate::format::keybox::KeyBox;
use crate::format::metadata::{self, MusicMetadata};

/// NCM 魔数（ASCII）
pub const MAGIC: &[u8; 8] = b"CTENFDAM";

/// magic + 版本等固定头部大小
pub const HEADER_SIZE: usize = 10;

/// metadata 之后的不透明间隙（疑似 CRC + 版本标记）
pub const GAP_SIZE: usize = 9;

/// 长度前缀字段大小
const LEN_SIZE: usize = 4;

/// 解析状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseStage {
    Start,
    HeaderSkipped,
    KeyRead,
    KeyUnwrapped,
    MetaRead,
    MetaUnwrapped,
    GapSkipped,
    CoverSkipped,
    PayloadReady,
}

/// 头部解析结果
#[derive(Debug, Clone)]
pub struct Container {
    pub key_box: KeyBox,
    pub metadata: MusicMetadata,
    /// 头部前 8 字节是否为 `CTENFDAM`
    pub magic_ok: bool,
    pub cover_len: u32,
    /// 音频数据在文件中的起始偏移
    pub payload_offset: u64,
}

/// 容器头部解析器
pub struct ContainerParser<R> {
    reader: R,
    stage: ParseStage,
    offset: u64,
}

impl<R: Read> ContainerParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            stage: ParseStage::Start,
            offset: 0,
        }
    }

    /// 依次解析全部头部区域，返回解析结果与定位到音频起点的输入流。
    pub fn parse(mut self) -> Result<(Container, R)> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_region(&mut header, "header")?;
        let magic_ok = &header[..MAGIC.len()] == MAGIC;
        if !magic_ok {
            warn!("container header does not start with CTENFDAM");
        }
        self.advance(ParseStage::HeaderSkipped);

        let key_block = self.read_block("key block")?;
        self.advance(ParseStage::KeyRead);

        let key_box = KeyBox::from_key_block(key_block)?;
        self.advance(ParseStage::KeyUnwrapped);

        let meta_block = self.read_block("metadata block")?;
        self.advance(ParseStage::MetaRead);

        let metadata = metadata::extract(meta_block)?;
        self.advance(ParseStage::MetaUnwrapped);

        let mut gap = [0u8; GAP_SIZE];
        self.read_region(&mut gap, "gap")?;
        self.advance(ParseStage::GapSkipped);

        let cover_len = self.read_len("cover length")?;
        self.skip_region(cover_len as u64, "cover image")?;
        self.advance(ParseStage::CoverSkipped);

        let payload_offset = self.offset;
        self.advance(ParseStage::PayloadReady);

        debug!(
            format = %metadata.format,
            cover_len,
            payload_offset,
            "container header parsed"
        );

        Ok((
            Container {
                key_box,
                metadata,
                magic_ok,
                cover_len,
                payload_offset,
            },
            self.reader,
        ))
    }

    fn advance(&mut self, next: ParseStage) {
        debug_assert!(next > self.stage, "parser must only move forward");
        debug!(stage = ?next, offset = self.offset, "container parse");
        self.stage = next;
    }

    fn read_region(&mut self, buf: &mut [u8], what: &str) -> io::Result<()> {
        let want = buf.len() as u64;
        self.reader.read_exact(buf).map_err(|e| short_read(e, what, want))?;
        self.offset += want;
        Ok(())
    }

    fn read_len(&mut self, what: &str) -> io::Result<u32> {
        let mut len_buf = [0u8; LEN_SIZE];
        self.read_region(&mut len_buf, what)?;
        Ok(u32::from_le_bytes(len_buf))
    }

    /// 读取一个长度前缀的区域
    fn read_block(&mut self, what: &str) -> io::Result<Vec<u8>> {
        let len = self.read_len(what)? as usize;

        // 按实际读到的字节增长，声明长度再大也不会预先分配
        let mut data = Vec::new();
        let got = (&mut self.reader).take(len as u64).read_to_end(&mut data)?;
        if got != len {
            return Err(truncated(what, len as u64, got as u64));
        }
        self.offset += len as u64;
        Ok(data)
    }

    fn skip_region(&mut self, len: u64, what: &str) -> io::Result<()> {
        let got = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        if got != len {
            return Err(truncated(what, len, got));
        }
        self.offset += len;
        Ok(())
    }
}

fn short_read(err: io::Error, what: &str, want: u64) -> io::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated container: {what} needs {want} bytes"),
        )
    } else {
        err
    }
}

fn truncated(what: &str, want: u64, got: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("truncated container: {what} declares {want} bytes, only {got} available"),
    )
}
