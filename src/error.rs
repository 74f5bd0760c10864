//! 错误类型定义
//!
//! 提供存储引擎各层共用的错误类型。

use core::fmt;

/// 存储引擎操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数
    InvalidInput,
    /// 磁盘结构损坏
    Corrupted,
    /// 对象不存在
    NotFound,
    /// 已存在
    AlreadyExists,
    /// 空间不足（块、inode、日志或回收队列）
    NoSpace,
    /// 设备忙
    Busy,
    /// 无效状态（违反锁顺序、引擎已关闭等）
    InvalidState,
    /// 目录非空
    NotEmpty,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 创建带原因的错误
    ///
    /// 原因只写入日志，不保存在错误值里
    pub fn with_cause(kind: ErrorKind, message: &'static str, cause: impl fmt::Debug) -> Self {
        log::debug!("[ERROR] {}: {:?}", message, cause);
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 是否为空间耗尽
    pub fn is_no_space(&self) -> bool {
        self.kind == ErrorKind::NoSpace
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

// Journal error conversion
impl From<crate::journal::JournalError> for Error {
    fn from(err: crate::journal::JournalError) -> Self {
        use crate::journal::JournalError;
        match err {
            JournalError::BadGeometry => Error::new(ErrorKind::Corrupted, "Log header does not match layout"),
            JournalError::TooLarge => Error::new(ErrorKind::NoSpace, "Transaction larger than the log"),
            JournalError::NoSpace => Error::new(ErrorKind::NoSpace, "Log has no space"),
            JournalError::Crashed => Error::new(ErrorKind::InvalidState, "Journal has crashed"),
            JournalError::ShutDown => Error::new(ErrorKind::InvalidState, "Journal is shut down"),
            JournalError::Failed => Error::new(ErrorKind::Io, "Journal failed after an I/O error"),
        }
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
