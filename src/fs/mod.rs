//! 文件系统高级 API
//!
//! - [`FileSystem`] - 挂载、格式化、打开引用、关闭与崩溃
//! - [`Op`] - 一次文件系统操作（事务 + 分配器 + 回收队列）
//! - [`RefTable`] - 打开引用计数
//! - [`FsConfig`] - 配置

mod filesystem;
mod op;
mod refs;
mod types;

pub use filesystem::{FileSystem, FsStats};
pub(crate) use filesystem::FsState;
pub use op::Op;
pub use refs::RefTable;
pub use types::FsConfig;

use std::time::{SystemTime, UNIX_EPOCH};

/// 当前时间（秒）
pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
