//! 并发批量解码
//!
//! 设计要点：
//! - 固定大小的 rayon 线程池，每个任务在一个工作线程上完整跑完，任务之间互不影响。
//! - 进度表与提交 / 完成计数是唯一的跨线程共享状态，统一由一把 Mutex 保护；
//!   锁只在读写表时持有，不跨越 I/O，也不在调用进度回调时持有。
//! - `stop()` 只拒绝之后的提交，已调度的任务照常完成。
//! - `wait_all()` 使用条件变量等待，不轮询。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::config::{Config, resolve_threads};
use crate::decrypt::{self, DecodeOutcome};
use crate::error::{NcmError, Result};
use crate::progress::{ProgressEvent, ProgressSink, SharedSink};

/// 一个待解码的文件
#[derive(Clone)]
pub struct DecodeJob {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub sink: Option<SharedSink>,
}

impl DecodeJob {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn file_id(&self) -> String {
        self.input.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// 单个文件的最新进度 / 结果
#[derive(Debug, Clone, PartialEq)]
pub struct FileProgress {
    pub file: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub finished: bool,
    pub status: JobStatus,
    pub error: Option<String>,
    pub format: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl FileProgress {
    fn submitted(file: &str) -> Self {
        Self {
            file: file.to_string(),
            bytes_done: 0,
            bytes_total: 0,
            finished: false,
            status: JobStatus::Submitted,
            error: None,
            format: None,
            output_path: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// `progress()` 返回的快照
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    pub submitted: usize,
    pub completed: usize,
    /// 按首次提交顺序排列
    pub files: Vec<FileProgress>,
}

impl BatchProgress {
    pub fn file(&self, file: &str) -> Option<&FileProgress> {
        self.files.iter().find(|f| f.file == file)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileProgress> {
        self.files.iter().filter(|f| f.status == JobStatus::Failed)
    }
}

#[derive(Default)]
struct BatchState {
    submitted: usize,
    completed: usize,
    stopped: bool,
    files: Vec<FileProgress>,
    index: HashMap<String, usize>,
}

impl BatchState {
    fn entry(&mut self, file: &str) -> &mut FileProgress {
        let idx = match self.index.get(file) {
            Some(&idx) => idx,
            None => {
                self.files.push(FileProgress::submitted(file));
                let idx = self.files.len() - 1;
                self.index.insert(file.to_string(), idx);
                idx
            }
        };
        &mut self.files[idx]
    }
}

struct Shared {
    state: Mutex<BatchState>,
    all_done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 批量解码管理器
///
/// 除 `reset()` 外，所有方法都可以被多个线程同时调用。
pub struct BatchManager {
    pool: ThreadPool,
    shared: Arc<Shared>,
    threads: usize,
}

impl BatchManager {
    /// 创建管理器；`threads` 为 `None` 时使用硬件并行度，为 0 时报错。
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let threads = resolve_threads(threads)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ncm-decode-{i}"))
            .build()
            .map_err(|e| NcmError::InvalidState(format!("failed to build worker pool: {e}")))?;

        debug!(threads, "batch manager created");

        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                state: Mutex::new(BatchState::default()),
                all_done: Condvar::new(),
            }),
            threads,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(Some(config.thread_count()?))
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// 提交一个任务，不阻塞。管理器已停止时返回 `InvalidState`。
    pub fn submit(&self, job: DecodeJob) -> Result<()> {
        let file_id = job.file_id();

        {
            let mut state = self.shared.lock();
            if state.stopped {
                return Err(NcmError::InvalidState(
                    "decoder manager has been stopped".into(),
                ));
            }
            state.submitted += 1;
            *state.entry(&file_id) = FileProgress::submitted(&file_id);
        }

        debug!(file = %file_id, "job submitted");

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || run_job(&shared, job, &file_id));

        Ok(())
    }

    /// 当前进度快照；不等待进行中的任务。
    pub fn progress(&self) -> BatchProgress {
        let state = self.shared.lock();
        BatchProgress {
            submitted: state.submitted,
            completed: state.completed,
            files: state.files.clone(),
        }
    }

    /// 停止接受新任务；已调度的任务不会被取消。
    pub fn stop(&self) {
        self.shared.lock().stopped = true;
        debug!("batch manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    /// 阻塞直到所有已提交任务都进入终态。
    ///
    /// 尚未提交任何任务时立即返回。
    pub fn wait_all(&self) {
        let mut state = self.shared.lock();
        while state.completed < state.submitted {
            state = self
                .shared
                .all_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 清空计数、进度表与停止标记。
    ///
    /// 仍有任务未完成时返回 `InvalidState`，应先调用 `wait_all()`。
    pub fn reset(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.completed < state.submitted {
            return Err(NcmError::InvalidState(format!(
                "cannot reset with {} job(s) in flight",
                state.submitted - state.completed
            )));
        }
        *state = BatchState::default();
        Ok(())
    }
}

fn run_job(shared: &Shared, job: DecodeJob, file_id: &str) {
    shared.lock().entry(file_id).status = JobStatus::Running;

    let recorder = |event: &ProgressEvent| {
        {
            let mut state = shared.lock();
            let entry = state.entry(file_id);
            entry.bytes_done = event.bytes_done;
            entry.bytes_total = event.bytes_total;
        }
        if let Some(sink) = &job.sink {
            sink.on_progress(event);
        }
    };
    let sink: &dyn ProgressSink = &recorder;

    let outcome = decrypt::decode(&job.input, &job.output_dir, Some(sink));
    let success = outcome.success;

    {
        let mut state = shared.lock();
        record_outcome(state.entry(file_id), outcome);
        state.completed += 1;
    }
    shared.all_done.notify_all();

    info!(file = %file_id, success, "job finished");
}

fn record_outcome(entry: &mut FileProgress, outcome: DecodeOutcome) {
    entry.status = if outcome.success {
        JobStatus::Succeeded
    } else {
        JobStatus::Failed
    };
    entry.finished = entry.status.is_terminal();
    entry.error = outcome.error;
    entry.format = outcome.format;
    entry.output_path = outcome.output_path;
}
