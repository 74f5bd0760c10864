//! 缓冲区缓存模块
//!
//! 所有磁盘访问都经过这一层：
//!
//! - [`Buffer`] - 事务持有的块或子块缓冲区
//! - [`LockMap`] - 按地址的独占锁，一个地址同一时刻只属于一个事务
//! - [`HomeCache`] - 已安装到 home 位置的干净块的 LRU 缓存
//!
//! 读取最新镜像的顺序是：日志暂存区 → 日志中未安装的批次 → `HomeCache` → 磁盘，
//! 由 [`crate::journal::Journal::read_block`] 串起来。

mod block_cache;
mod buffer;
mod lockmap;

pub use block_cache::{CacheStats, HomeCache};
pub use buffer::{BufFlags, Buffer};
pub use lockmap::LockMap;
