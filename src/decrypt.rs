//! NCM 单文件解码流程
//!
//! 解码流程（严格顺序）：
//! 1. 打开输入文件，记录总大小，发送初始进度
//! 2. 解析容器头部：KeyBox + 元数据，输入流停在音频起点
//! 3. 根据元数据中的 format 计算输出路径 `<输出目录>/<文件名>.<format>`
//! 4. 经原子写入流式解密音频数据，逐块回报进度
//! 5. 发送唯一一次完成事件
//!
//! 注意：
//! - 任一阶段失败立即返回错误，不会发送完成事件
//! - `decode` 是面向绑定层的入口：不 panic，所有失败都写进 `DecodeOutcome`

use std::any::Any;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ErrorKind, NcmError, Result};
use crate::format::header::{Container, ContainerParser};
use crate::format::metadata::MusicMetadata;
use crate::format::stream::StreamDecryptor;
use crate::fs::atomic::write_atomic;
use crate::progress::{ProgressSink, Reporter};

/// 成功解码的结果
#[derive(Debug, Clone)]
pub struct Decoded {
    pub format: String,
    pub output_path: PathBuf,
    pub metadata: MusicMetadata,
    pub payload_offset: u64,
    pub bytes_written: u64,
}

/// 单个任务的最终结果，每个任务恰好产生一次
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub format: Option<String>,
    pub output_path: Option<PathBuf>,
    pub metadata: Option<MusicMetadata>,
}

impl DecodeOutcome {
    fn succeeded(decoded: Decoded) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            format: Some(decoded.format),
            output_path: Some(decoded.output_path),
            metadata: Some(decoded.metadata),
        }
    }

    fn failed(err: &NcmError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Default::default()
        }
    }
}

/// 解码一个 NCM 文件到输出目录。
pub fn decode_file(
    input_path: &Path,
    output_dir: &Path,
    sink: Option<&dyn ProgressSink>,
) -> Result<Decoded> {
    // ---------- 打开输入 ----------
    let input = File::open(input_path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to open input file {}: {e}", input_path.display()),
        )
    })?;
    let total = input.metadata()?.len();

    let reporter = Reporter::new(input_path.to_string_lossy().into_owned(), total, sink);
    reporter.report(0, false);

    debug!(input = %input_path.display(), total, "decode started");

    // ---------- 解析头部 ----------
    let (container, reader) = ContainerParser::new(BufReader::new(input)).parse()?;
    let Container {
        key_box,
        metadata,
        payload_offset,
        ..
    } = container;

    // ---------- 输出路径 ----------
    let output_path = output_path_for(input_path, output_dir, &metadata.format)?;

    // ---------- Stream 解密 ----------
    let bytes_written = write_atomic(&output_path, |out| -> Result<u64> {
        let mut writer = BufWriter::new(out);
        let written = StreamDecryptor::new(&key_box).decrypt(reader, &mut writer, |done| {
            reporter.report(payload_offset + done, false)
        })?;
        writer.flush()?;
        Ok(written)
    })?;

    reporter.report(reporter.total(), true);

    info!(
        input = %input_path.display(),
        output = %output_path.display(),
        format = %metadata.format,
        bytes_written,
        "decode finished"
    );

    Ok(Decoded {
        format: metadata.format.clone(),
        output_path,
        metadata,
        payload_offset,
        bytes_written,
    })
}

/// 面向绑定层的入口：任何失败（包括 panic）都以结果值返回。
pub fn decode(
    input_path: &Path,
    output_dir: &Path,
    sink: Option<&dyn ProgressSink>,
) -> DecodeOutcome {
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        decode_file(input_path, output_dir, sink)
    }));

    match run {
        Ok(Ok(decoded)) => DecodeOutcome::succeeded(decoded),
        Ok(Err(err)) => {
            warn!(input = %input_path.display(), error = %err, "decode failed");
            DecodeOutcome::failed(&err)
        }
        Err(payload) => panicked(input_path, payload.as_ref()),
    }
}

fn panicked(input_path: &Path, payload: &(dyn Any + Send)) -> DecodeOutcome {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!(input = %input_path.display(), panic = %msg, "decode panicked");
    DecodeOutcome {
        success: false,
        error: Some(format!("internal error: {msg}")),
        error_kind: Some(ErrorKind::Internal),
        ..Default::default()
    }
}

/// 只解析头部，不解密音频数据。
pub fn inspect(input_path: &Path) -> Result<Container> {
    let input = File::open(input_path)?;
    let (container, _) = ContainerParser::new(BufReader::new(input)).parse()?;
    Ok(container)
}

/// 计算输出文件路径：`<output_dir>/<输入文件名去扩展名>.<format>`
pub fn output_path_for(input_path: &Path, output_dir: &Path, format: &str) -> Result<PathBuf> {
    if format.is_empty()
        || format.contains("..")
        || format
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(NcmError::format(format!("unusable format field: {format:?}")));
    }

    let stem = input_path.file_stem().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("input path has no file name: {}", input_path.display()),
        )
    })?;

    let mut name = OsString::from(stem);
    name.push(".");
    name.push(format);
    Ok(output_dir.join(name))
}
