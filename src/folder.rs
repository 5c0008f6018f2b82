//! 目录同步（只新增 / 更新，不删除）
//!
//! 设计要点：
//! - 递归遍历输入目录，输出保持相同的相对路径结构。
//! - `.ncm` 文件交给批量管理器解码到镜像目录；其余文件按需原样复制。
//! - 已解码且未变化的文件、大小与修改时间一致的复制目标都会被跳过。
//! - 严格校验相对路径组件，防止路径穿越写出到目标目录之外。

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::batch::{BatchManager, DecodeJob};
use crate::config::Config;
use crate::error::Result;
use crate::fs::atomic::write_atomic;
use crate::progress::SharedSink;

pub const NCM_EXT: &str = "ncm";

/// 解码输出可能的扩展名，用于预测已解码文件
const DECODED_EXTS: [&str; 5] = ["mp3", "flac", "m4a", "ogg", "wav"];

/// 部分文件系统的时间精度只有 1 秒
const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// 解码到 `output` 目录
    Decode,
    /// 原样复制到 `output` 文件
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub action: SyncAction,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub tasks: Vec<SyncTask>,
    /// 因未变化或被排除而跳过的文件数
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub planned: usize,
    pub skipped: usize,
    pub copied: usize,
    pub decodes_submitted: usize,
}

/// 计算同步任务列表。
pub fn plan_sync(input_root: &Path, output_root: &Path, config: &Config) -> io::Result<SyncPlan> {
    if !input_root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("input path is not a directory: {}", input_root.display()),
        ));
    }

    let mut plan = SyncPlan::default();

    for entry in WalkDir::new(input_root).follow_links(false) {
        let entry = entry.map_err(walkdir_to_io)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let source_path = entry.path();
        let rel = source_path.strip_prefix(input_root).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("cannot compute relative path: {e}"))
        })?;
        let safe_rel = validate_relative_path(rel)?;

        if is_excluded(&safe_rel, &config.exclude_dirs) {
            plan.skipped += 1;
            continue;
        }

        if is_ncm(source_path) {
            let out_dir = match safe_rel.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => safe_join(output_root, parent)?,
                _ => output_root.to_path_buf(),
            };

            if config.skip_existing && already_decoded(source_path, &out_dir) {
                plan.skipped += 1;
                continue;
            }

            plan.tasks.push(SyncTask {
                input: source_path.to_path_buf(),
                output: out_dir,
                action: SyncAction::Decode,
            });
        } else if config.copy_others {
            let target = safe_join(output_root, &safe_rel)?;

            if config.skip_existing && unchanged_copy(source_path, &target) {
                plan.skipped += 1;
                continue;
            }

            plan.tasks.push(SyncTask {
                input: source_path.to_path_buf(),
                output: target,
                action: SyncAction::Copy,
            });
        } else {
            plan.skipped += 1;
        }
    }

    debug!(tasks = plan.tasks.len(), skipped = plan.skipped, "sync planned");
    Ok(plan)
}

/// 执行同步：复制在当前线程完成，解码提交给批量管理器。
///
/// 不等待解码完成，调用方随后应调用 `manager.wait_all()`。
pub fn sync_folder(
    manager: &BatchManager,
    input_root: &Path,
    output_root: &Path,
    config: &Config,
    sink: Option<SharedSink>,
) -> Result<SyncReport> {
    fs::create_dir_all(output_root)?;

    let plan = plan_sync(input_root, output_root, config)?;
    let mut report = SyncReport {
        planned: plan.tasks.len(),
        skipped: plan.skipped,
        ..Default::default()
    };

    for task in plan.tasks {
        match task.action {
            SyncAction::Copy => {
                copy_preserving_mtime(&task.input, &task.output)?;
                report.copied += 1;
            }
            SyncAction::Decode => {
                let mut job = DecodeJob::new(task.input, task.output);
                if let Some(sink) = &sink {
                    job = job.with_sink(sink.clone());
                }
                manager.submit(job)?;
                report.decodes_submitted += 1;
            }
        }
    }

    info!(
        planned = report.planned,
        skipped = report.skipped,
        copied = report.copied,
        decodes = report.decodes_submitted,
        "sync dispatched"
    );
    Ok(report)
}

fn is_ncm(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(NCM_EXT))
}

fn is_excluded(rel: &Path, exclude_dirs: &[String]) -> bool {
    let rel_str = rel.to_string_lossy();
    exclude_dirs
        .iter()
        .any(|pat| !pat.is_empty() && rel_str.starts_with(pat.as_str()))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// 输出目录中存在不早于源文件的 `<stem>.<常见格式>` 即视为已解码。
fn already_decoded(source: &Path, out_dir: &Path) -> bool {
    let (Some(stem), Some(src_time)) = (source.file_stem(), modified(source)) else {
        return false;
    };

    DECODED_EXTS.iter().any(|ext| {
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(ext);
        match modified(&out_dir.join(name)) {
            Some(out_time) => out_time + MTIME_TOLERANCE >= src_time,
            None => false,
        }
    })
}

/// 目标存在且大小相同、修改时间相差不超过 1 秒。
fn unchanged_copy(source: &Path, target: &Path) -> bool {
    let (Ok(src), Ok(dst)) = (fs::metadata(source), fs::metadata(target)) else {
        return false;
    };
    if src.len() != dst.len() {
        return false;
    }
    match (src.modified(), dst.modified()) {
        (Ok(a), Ok(b)) => {
            let diff = a.duration_since(b).or_else(|_| b.duration_since(a));
            diff.is_ok_and(|d| d <= MTIME_TOLERANCE)
        }
        _ => false,
    }
}

fn copy_preserving_mtime(source: &Path, target: &Path) -> io::Result<()> {
    let mtime = fs::metadata(source)?.modified()?;
    write_atomic(target, |out| -> io::Result<()> {
        let mut input = File::open(source)?;
        io::copy(&mut input, out)?;
        out.set_modified(mtime)
    })?;
    debug!(from = %source.display(), to = %target.display(), "copied");
    Ok(())
}

/// 校验相对路径仅包含安全组件，防止 `..`、绝对路径、盘符路径等穿越问题。
fn validate_relative_path(rel: &Path) -> io::Result<PathBuf> {
    let mut safe = PathBuf::new();
    for comp in rel.components() {
        match comp {
            Component::CurDir => {}
            Component::Normal(v) => safe.push(v),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsafe path component: {rel:?}"),
                ));
            }
        }
    }
    Ok(safe)
}

/// 在目标根目录下拼接已校验的相对路径，并再次校验结果不越界。
fn safe_join(root: &Path, rel: &Path) -> io::Result<PathBuf> {
    let joined = root.join(rel);
    if !joined.starts_with(root) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("target path escapes output root: {joined:?}"),
        ));
    }
    Ok(joined)
}

fn walkdir_to_io(err: walkdir::Error) -> io::Error {
    io::Error::other(err.to_string())
}
