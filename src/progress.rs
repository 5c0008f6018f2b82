//! 解码进度事件与回调接口
//!
//! 核心只要求"一个可被调用零次或多次、不会无限阻塞的函数"。
//! 跨运行时的引用计数、解释器锁等问题属于绑定层，不在这里处理。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

/// 单个文件的进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 文件标识（输入路径）
    pub file: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub finished: bool,
}

/// 进度回调
///
/// 会在工作线程上被调用，因此要求 `Send + Sync`。
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// 可在线程间共享的回调句柄
pub type SharedSink = Arc<dyn ProgressSink>;

/// 为单个文件发送事件的小工具，回调缺省时什么也不做。
///
/// 回调 panic 只记录日志，解码照常继续。
pub(crate) struct Reporter<'a> {
    file: String,
    total: u64,
    sink: Option<&'a dyn ProgressSink>,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(file: String, total: u64, sink: Option<&'a dyn ProgressSink>) -> Self {
        Self { file, total, sink }
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn report(&self, bytes_done: u64, finished: bool) {
        let Some(sink) = self.sink else {
            return;
        };

        let event = ProgressEvent {
            file: self.file.clone(),
            bytes_done,
            bytes_total: self.total,
            finished,
        };
        if panic::catch_unwind(AssertUnwindSafe(|| sink.on_progress(&event))).is_err() {
            warn!(file = %self.file, bytes_done, finished, "progress sink panicked, ignored");
        }
    }
}
