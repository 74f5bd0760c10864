//! 物理块分配模块
//!
//! 块位图中数据区之外的位在格式化时全部置 1，这里只在 `[data_start, size)` 内分配。

use crate::bitmap::BitmapAlloc;
use crate::block::BlockDevice;
use crate::consts::NBITBLOCK;
use crate::error::Result;
use crate::superblock::FsSuper;
use crate::transaction::Transaction;
use crate::types::{Addr, Bnum};

/// 块分配器
pub struct BlockAllocator {
    bitmap: BitmapAlloc,
}

impl BlockAllocator {
    /// 按布局创建
    pub fn new(sb: &FsSuper) -> Self {
        Self {
            bitmap: BitmapAlloc::new(
                "BALLOC",
                sb.bitmap_block_start(),
                sb.nblock_bitmap(),
                sb.data_start()..sb.size(),
            ),
        }
    }

    /// 分配一个数据块
    ///
    /// 新块在本事务内视为 fresh：读到的是全零，写入时不受加锁顺序约束。
    ///
    /// # 返回
    ///
    /// 数据区用尽时返回 `None`
    pub fn alloc_block<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>) -> Result<Option<Bnum>> {
        self.bitmap
            .alloc(tx, |tx, bno| tx.claim_fresh(Addr::block(bno), NBITBLOCK))
    }

    /// 释放数据块
    pub fn free_block<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, bno: Bnum) -> Result<()> {
        self.bitmap.free(tx, bno)
    }

    /// 查询块是否已分配
    pub fn is_allocated<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, bno: Bnum) -> Result<bool> {
        self.bitmap.is_allocated(tx, bno)
    }

    /// 格式化用的块位图镜像
    pub fn format_images(&self) -> Result<Vec<(Bnum, Vec<u8>)>> {
        self.bitmap.format_images()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block::MemDisk;
    use crate::consts::BLOCK_SIZE;
    use crate::error::ErrorKind;
    use crate::transaction::tests::manager;
    use crate::transaction::TxnManager;
    use std::sync::Arc;

    /// 写好块位图的事务管理器
    pub(crate) fn formatted(nblocks: u64) -> (Arc<MemDisk>, TxnManager<Arc<MemDisk>>, BlockAllocator) {
        let (disk, mgr) = manager(nblocks);
        let balloc = BlockAllocator::new(mgr.super_block());
        let mut tx = mgr.begin();
        for (bno, img) in balloc.format_images().unwrap() {
            tx.write_block(bno, &img).unwrap();
        }
        tx.commit().unwrap();
        (disk, mgr, balloc)
    }

    #[test]
    fn test_alloc_block_is_fresh_and_in_data_region() {
        let (_disk, mgr, balloc) = formatted(2048);
        let sb = *mgr.super_block();

        // 先在数据区写入旧内容，分配后应看到全零
        {
            let mut tx = mgr.begin();
            tx.write_block(sb.data_start(), &vec![0xEEu8; BLOCK_SIZE]).unwrap();
            tx.commit().unwrap();
        }

        let mut tx = mgr.begin();
        let bno = balloc.alloc_block(&mut tx).unwrap().unwrap();
        assert_eq!(bno, sb.data_start());
        assert!(tx.read_block(bno).unwrap().iter().all(|&b| b == 0));
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert!(balloc.is_allocated(&mut tx, bno).unwrap());
        assert!(balloc.is_allocated(&mut tx, sb.queue_block()).unwrap());
        assert!(balloc.is_allocated(&mut tx, sb.size()).unwrap());
        assert_eq!(
            balloc.free_block(&mut tx, sb.inode_start()).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
