//! Inode 分配模块
//!
//! inode 0 与 root（1）永久保留，分配范围是 `[2, ninodes)`。

use crate::bitmap::BitmapAlloc;
use crate::block::BlockDevice;
use crate::consts::INODESZ;
use crate::error::Result;
use crate::superblock::FsSuper;
use crate::transaction::Transaction;
use crate::types::{Bnum, Inum};

/// 第一个可分配的 inode
pub const FIRST_FREE_INUM: Inum = 2;

/// Inode 分配器
pub struct InodeAllocator {
    bitmap: BitmapAlloc,
    sb: FsSuper,
}

impl InodeAllocator {
    /// 按布局创建
    pub fn new(sb: &FsSuper) -> Self {
        Self {
            bitmap: BitmapAlloc::new(
                "IALLOC",
                sb.bitmap_inode_start(),
                sb.ninode_bitmap(),
                FIRST_FREE_INUM..sb.max_inum(),
            ),
            sb: *sb,
        }
    }

    /// 分配一个 inode 编号
    ///
    /// 对应的 inode 记录在本事务内被认领为 fresh；被其他事务锁住的空闲 inode 会被跳过。
    pub fn alloc_inode<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>) -> Result<Option<Inum>> {
        let sb = &self.sb;
        self.bitmap
            .alloc(tx, |tx, inum| tx.claim_fresh(sb.inum2addr(inum), INODESZ * 8))
    }

    /// 释放 inode 编号
    pub fn free_inode<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, inum: Inum) -> Result<()> {
        self.bitmap.free(tx, inum)
    }

    /// 查询 inode 是否已分配
    pub fn is_allocated<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, inum: Inum) -> Result<bool> {
        self.bitmap.is_allocated(tx, inum)
    }

    /// 可分配的 inode 数
    pub fn capacity(&self) -> u64 {
        let r = self.bitmap.valid_range();
        r.end - r.start
    }

    /// 格式化用的 inode 位图镜像
    pub fn format_images(&self) -> Result<Vec<(Bnum, Vec<u8>)>> {
        self.bitmap.format_images()
    }
}
