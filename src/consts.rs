//! 磁盘格式常量定义
//!
//! 这个模块包含了存储引擎的所有格式常量，包括：
//! - 块与位图粒度
//! - inode 布局
//! - 日志帧格式
//! - 默认配置

//=============================================================================
// 基础常量
//=============================================================================

/// 逻辑块大小（4096 字节）
pub const BLOCK_SIZE: usize = 4096;

/// 每块的位数（一个位图块覆盖的单元数）
pub const NBITBLOCK: u64 = (BLOCK_SIZE * 8) as u64;

//=============================================================================
// Inode 相关
//=============================================================================

/// inode 记录大小（字节）
pub const INODESZ: u64 = 128;

/// 每块 inode 数
pub const INODEBLK: u64 = BLOCK_SIZE as u64 / INODESZ;

/// 保留的空 inode 编号
pub const NULLINUM: u64 = 0;

/// Root inode 编号
pub const ROOTINUM: u64 = 1;

/// 直接块指针数
pub const NDIRECT: usize = 10;

/// 间接块中的指针数
pub const NINDIRECT: usize = BLOCK_SIZE / 8;

/// 单个文件最多可映射的块数
pub const MAX_FILE_BLOCKS: u64 = (NDIRECT + NINDIRECT) as u64;

//=============================================================================
// 日志格式
//=============================================================================

/// 日志头魔数
pub const LOG_HEADER_MAGIC: u32 = 0x4C4F_4748;

/// 日志帧（descriptor / commit）魔数
pub const LOG_FRAME_MAGIC: u32 = 0x4C46_524D;

/// descriptor 块中 home 块号的起始偏移
pub const DESC_HOMES_OFFSET: usize = 32;

/// 单个批次最多容纳的数据块数
pub const MAX_BATCH_BLOCKS: usize = (BLOCK_SIZE - DESC_HOMES_OFFSET) / 8;

//=============================================================================
// 回收队列
//=============================================================================

/// 队列条目起始偏移（前 8 字节为计数）
pub const QUEUE_ENTRIES_OFFSET: usize = 8;

/// 回收队列容量
pub const QUEUE_CAPACITY: usize = (BLOCK_SIZE - QUEUE_ENTRIES_OFFSET) / 8;

//=============================================================================
// 默认配置
//=============================================================================

/// 默认日志区块数
pub const DEFAULT_LOG_BLOCKS: u64 = 512;

/// 默认 inode 数
pub const DEFAULT_NINODES: u64 = 32768;

/// 默认 home 块缓存大小（块数）
pub const DEFAULT_CACHE_BLOCKS: usize = 256;

/// 默认回收批量（每个回收事务释放的块数）
pub const DEFAULT_SHRINK_BATCH: u64 = 64;
