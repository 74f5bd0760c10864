//! 文件系统配置

use crate::consts::*;
use core::time::Duration;

/// 文件系统配置
///
/// `log_blocks` 与 `ninodes` 决定磁盘布局，同一块盘每次挂载必须一致；
/// 其余字段只影响运行时行为。
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 日志区块数（不含日志头）
    pub log_blocks: u64,
    /// inode 总数（含保留的 0 和 root）
    pub ninodes: u64,
    /// home 块缓存大小（块数）
    pub cache_blocks: usize,
    /// 后台 flusher 的安装周期
    pub flush_interval: Duration,
    /// 每个回收事务最多释放的块数
    pub shrink_batch: u64,
    /// 回收线程无事可做时的轮询间隔
    pub shrink_poll: Duration,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            log_blocks: DEFAULT_LOG_BLOCKS,
            ninodes: DEFAULT_NINODES,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            flush_interval: Duration::from_millis(10),
            shrink_batch: DEFAULT_SHRINK_BATCH,
            shrink_poll: Duration::from_millis(100),
        }
    }
}
