//! 运行配置
//!
//! 所有字段都有默认值；命令行入口负责从参数 / 环境变量填充。

use crate::error::{NcmError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// 工作线程数；`None` 表示使用可用的硬件并行度
    pub threads: Option<usize>,
    /// 目录同步时跳过的相对路径前缀
    pub exclude_dirs: Vec<String>,
    /// 目录同步时跳过已解码 / 未变化的文件
    pub skip_existing: bool,
    /// 目录同步时原样复制非 NCM 文件
    pub copy_others: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: None,
            exclude_dirs: Vec::new(),
            skip_existing: true,
            copy_others: true,
        }
    }
}

impl Config {
    /// 解析最终的线程池大小。
    ///
    /// 显式给出 0 视为非法状态。
    pub fn thread_count(&self) -> Result<usize> {
        resolve_threads(self.threads)
    }
}

pub fn resolve_threads(threads: Option<usize>) -> Result<usize> {
    match threads {
        Some(0) => Err(NcmError::InvalidState(
            "number of threads must be greater than 0".into(),
        )),
        Some(n) => Ok(n),
        None => Ok(std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)),
    }
}
