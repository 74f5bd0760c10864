//! Superblock 布局模块
//!
//! 磁盘布局完全由设备大小和配置算出，不在盘上保存 superblock：
//!
//! ```text
//! | 0      | 1 .. =log_blocks | block bitmap | inode bitmap | queue | inode table | data ... |
//! | 日志头 | 日志区           | size/32768+1 | ninodes/32768| 1 块  | ninodes/32  |          |
//! ```
//!
//! 挂载时计算一次，之后只读。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FsConfig;
use crate::types::{Addr, Bnum, Inum};

/// 块所属的区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// 日志头（块 0）
    LogHeader,
    /// 日志区
    Log,
    /// 块位图
    BlockBitmap,
    /// inode 位图
    InodeBitmap,
    /// 回收队列块
    Queue,
    /// inode 表
    InodeTable,
    /// 数据区
    Data,
    /// 超出设备
    OutOfRange,
}

/// 文件系统布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsSuper {
    /// 设备总块数
    size: u64,
    /// 日志区块数
    log_blocks: u64,
    /// 块位图块数
    nblock_bitmap: u64,
    /// inode 总数
    ninodes: u64,
    /// inode 位图块数
    ninode_bitmap: u64,
    /// inode 表块数
    ninode_blocks: u64,
}

impl FsSuper {
    /// 根据设备大小与配置计算布局
    ///
    /// # 参数
    ///
    /// * `size` - 设备总块数
    /// * `config` - 文件系统配置（只用到布局字段）
    ///
    /// # 错误
    ///
    /// 设备放不下元数据区加至少一个数据块时返回 `InvalidInput`
    pub fn new(size: u64, config: &FsConfig) -> Result<Self> {
        if config.log_blocks < 3 {
            return Err(Error::new(ErrorKind::InvalidInput, "Log needs at least 3 blocks"));
        }
        if config.ninodes <= ROOTINUM + 1 {
            return Err(Error::new(ErrorKind::InvalidInput, "Too few inodes"));
        }

        let sb = Self {
            size,
            log_blocks: config.log_blocks,
            nblock_bitmap: size / NBITBLOCK + 1,
            ninodes: config.ninodes,
            ninode_bitmap: config.ninodes.div_ceil(NBITBLOCK),
            ninode_blocks: config.ninodes.div_ceil(INODEBLK),
        };

        if sb.data_start() >= size {
            log::error!(
                "[SUPER] disk of {} blocks too small, metadata ends at {}",
                size,
                sb.data_start()
            );
            return Err(Error::new(ErrorKind::InvalidInput, "Disk too small for layout"));
        }

        log::debug!(
            "[SUPER] layout: size={} log={} bbitmap={}+{} ibitmap={}+{} queue={} inodes={}+{} data={}",
            size,
            sb.log_blocks,
            sb.bitmap_block_start(),
            sb.nblock_bitmap,
            sb.bitmap_inode_start(),
            sb.ninode_bitmap,
            sb.queue_block(),
            sb.inode_start(),
            sb.ninode_blocks,
            sb.data_start()
        );
        Ok(sb)
    }

    /// 设备总块数
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// 日志头块号
    pub const fn log_header(&self) -> Bnum {
        0
    }

    /// 日志区起始块号
    pub const fn log_start(&self) -> Bnum {
        1
    }

    /// 日志区块数
    pub const fn log_blocks(&self) -> u64 {
        self.log_blocks
    }

    /// 块位图起始块号
    pub const fn bitmap_block_start(&self) -> Bnum {
        self.log_start() + self.log_blocks
    }

    /// 块位图块数
    pub const fn nblock_bitmap(&self) -> u64 {
        self.nblock_bitmap
    }

    /// inode 位图起始块号
    pub const fn bitmap_inode_start(&self) -> Bnum {
        self.bitmap_block_start() + self.nblock_bitmap
    }

    /// inode 位图块数
    pub const fn ninode_bitmap(&self) -> u64 {
        self.ninode_bitmap
    }

    /// 回收队列块号
    pub const fn queue_block(&self) -> Bnum {
        self.bitmap_inode_start() + self.ninode_bitmap
    }

    /// inode 表起始块号
    pub const fn inode_start(&self) -> Bnum {
        self.queue_block() + 1
    }

    /// 数据区起始块号
    pub const fn data_start(&self) -> Bnum {
        self.inode_start() + self.ninode_blocks
    }

    /// 最大块号（不含）
    pub const fn max_bnum(&self) -> Bnum {
        self.size
    }

    /// 最大 inode 编号（不含）
    pub const fn max_inum(&self) -> Inum {
        self.ninodes
    }

    /// inode 编号对应的地址
    pub const fn inum2addr(&self, inum: Inum) -> Addr {
        Addr::new(
            self.inode_start() + inum / INODEBLK,
            (inum % INODEBLK) * INODESZ * 8,
        )
    }

    /// 块号所属区域
    pub fn region(&self, bno: Bnum) -> Region {
        if bno >= self.size {
            Region::OutOfRange
        } else if bno == self.log_header() {
            Region::LogHeader
        } else if bno < self.bitmap_block_start() {
            Region::Log
        } else if bno < self.bitmap_inode_start() {
            Region::BlockBitmap
        } else if bno < self.queue_block() {
            Region::InodeBitmap
        } else if bno == self.queue_block() {
            Region::Queue
        } else if bno < self.data_start() {
            Region::InodeTable
        } else {
            Region::Data
        }
    }
}
