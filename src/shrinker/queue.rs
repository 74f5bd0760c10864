//! 持久化回收队列
//!
//! 队列占一个块：
//!
//! ```text
//!   0  count   u32
//!   8  entries [u64; QUEUE_CAPACITY]
//! ```
//!
//! 入队与 unlink 在同一事务里，出队与释放 inode 在同一事务里，
//! 因此崩溃后每个条目恰好被处理一次。

use crate::block::BlockDevice;
use crate::consts::{BLOCK_SIZE, QUEUE_CAPACITY, QUEUE_ENTRIES_OFFSET};
use crate::error::{Error, ErrorKind, Result};
use crate::transaction::Transaction;
use crate::types::{Bnum, Inum};
use byteorder::{ByteOrder, LittleEndian};

/// 回收队列
#[derive(Debug, Clone, Copy)]
pub struct ShrinkQueue {
    bno: Bnum,
}

fn count(blk: &[u8]) -> usize {
    (LittleEndian::read_u32(&blk[0..4]) as usize).min(QUEUE_CAPACITY)
}

fn entry(blk: &[u8], i: usize) -> Inum {
    let off = QUEUE_ENTRIES_OFFSET + i * 8;
    LittleEndian::read_u64(&blk[off..off + 8])
}

impl ShrinkQueue {
    /// 队列所在的块
    pub fn new(bno: Bnum) -> Self {
        Self { bno }
    }

    /// 入队
    ///
    /// # 错误
    ///
    /// 队列已满返回 `NoSpace`
    pub fn push<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, inum: Inum) -> Result<()> {
        let n = count(tx.read_block(self.bno)?);
        if n == QUEUE_CAPACITY {
            log::warn!("[SHRINK] queue full, cannot defer inode {}", inum);
            return Err(Error::new(ErrorKind::NoSpace, "Shrink queue full"));
        }
        tx.modify_block(self.bno, |blk| {
            let off = QUEUE_ENTRIES_OFFSET + n * 8;
            LittleEndian::write_u64(&mut blk[off..off + 8], inum);
            LittleEndian::write_u32(&mut blk[0..4], n as u32 + 1);
        })?;
        log::debug!("[SHRINK] txn {} queued inode {}", tx.id(), inum);
        Ok(())
    }

    /// 出队指定 inode，返回它是否在队列里
    ///
    /// 最后一项移到空出的位置，队列不保序。
    pub fn remove<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, inum: Inum) -> Result<bool> {
        let blk = tx.read_block(self.bno)?;
        let n = count(blk);
        let Some(i) = (0..n).find(|&i| entry(blk, i) == inum) else {
            return Ok(false);
        };
        let last = entry(blk, n - 1);
        tx.modify_block(self.bno, |blk| {
            let off = QUEUE_ENTRIES_OFFSET + i * 8;
            LittleEndian::write_u64(&mut blk[off..off + 8], last);
            let off = QUEUE_ENTRIES_OFFSET + (n - 1) * 8;
            blk[off..off + 8].fill(0);
            LittleEndian::write_u32(&mut blk[0..4], n as u32 - 1);
        })?;
        Ok(true)
    }

    /// 列出队列中的 inode
    pub fn list<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>) -> Result<Vec<Inum>> {
        let blk = tx.read_block(self.bno)?;
        Ok((0..count(blk)).map(|i| entry(blk, i)).collect())
    }

    /// 格式化用的空队列镜像
    pub fn format_image(&self) -> (Bnum, Vec<u8>) {
        (self.bno, vec![0u8; BLOCK_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::manager;

    #[test]
    fn test_push_remove_list() {
        let (_disk, mgr) = manager(2048);
        let q = ShrinkQueue::new(mgr.super_block().queue_block());

        let mut tx = mgr.begin();
        for inum in [5, 9, 12] {
            q.push(&mut tx, inum).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert!(q.remove(&mut tx, 5).unwrap());
        assert!(!q.remove(&mut tx, 5).unwrap());
        assert_eq!(q.list(&mut tx).unwrap(), vec![12, 9]);
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert_eq!(q.list(&mut tx).unwrap(), vec![12, 9]);
    }

    #[test]
    fn test_push_when_full() {
        let (_disk, mgr) = manager(2048);
        let q = ShrinkQueue::new(mgr.super_block().queue_block());
        let mut tx = mgr.begin();
        for inum in 0..QUEUE_CAPACITY as u64 {
            q.push(&mut tx, inum + 2).unwrap();
        }
        assert_eq!(q.push(&mut tx, 1).unwrap_err().kind(), ErrorKind::NoSpace);
        assert_eq!(q.list(&mut tx).unwrap().len(), QUEUE_CAPACITY);
    }
}
