use thiserror::Error;

#[derive(Debug, Error)]
pub enum NcmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// 错误类别，写入解码结果供调用方区分失败原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    InvalidState,
    /// 解码过程中捕获到的 panic
    Internal,
}

impl NcmError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Format(_) => ErrorKind::Format,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }
}

pub type Result<T> = std::result::Result<T, NcmError>;
