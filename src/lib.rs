mod decrypt;

pub mod batch;
pub mod config;
pub mod crypto;
pub mod error;
pub mod folder;
pub mod format;
pub mod fs;
pub mod progress;

pub use batch::{BatchManager, BatchProgress, DecodeJob, FileProgress, JobStatus};
pub use config::Config;
pub use decrypt::{DecodeOutcome, Decoded, output_path_for};
pub use error::{ErrorKind, NcmError, Result};
pub use folder::{SyncAction, SyncPlan, SyncReport, SyncTask, plan_sync, sync_folder};
pub use format::header::Container;
pub use format::keybox::KeyBox;
pub use format::metadata::MusicMetadata;
pub use progress::{ProgressEvent, ProgressSink, SharedSink};

use std::path::Path;

/// 解码单个文件；任何失败都写入返回值，不会 panic。
pub fn decode(
    input: &Path,
    output_dir: &Path,
    sink: Option<&dyn ProgressSink>,
) -> DecodeOutcome {
    decrypt::decode(input, output_dir, sink)
}

/// 解码单个文件，以 `Result` 返回。
pub fn decode_file(
    input: &Path,
    output_dir: &Path,
    sink: Option<&dyn ProgressSink>,
) -> Result<Decoded> {
    decrypt::decode_file(input, output_dir, sink)
}

/// 只解析容器头部（KeyBox + 元数据），不解密音频。
pub fn inspect(input: &Path) -> Result<Container> {
    decrypt::inspect(input)
}
