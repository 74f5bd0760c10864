//! 事务化的位图分配器
//!
//! 块分配与 inode 分配共用这一实现，区别只在位图所在的块和有效范围。
//! 位图块按块号升序扫描（与加锁顺序一致），块内从轮转提示开始查找并回绕，
//! 分散并发分配者的落点。
//!
//! 置位之前先通过 `claim` 拿到候选单元自己的地址锁。拿不到说明别的事务
//! 正持有这个空闲单元（比如经由过期句柄），换下一个候选；持有位图块时从不等待单元锁。

use super::ops::{clear_bit, find_zero_from, set_bit, set_range, test_bit};
use crate::block::BlockDevice;
use crate::consts::{BLOCK_SIZE, NBITBLOCK};
use crate::error::{Error, ErrorKind, Result};
use crate::transaction::Transaction;
use crate::types::Bnum;
use core::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// 位图分配器
pub struct BitmapAlloc {
    /// 日志标签
    tag: &'static str,
    /// 第一个位图块
    start: Bnum,
    /// 位图块数
    nblocks: u64,
    /// 可分配的编号范围
    valid: Range<u64>,
    /// 每个位图块的下一次查找位置
    hints: Vec<AtomicU64>,
}

impl BitmapAlloc {
    /// 创建分配器
    ///
    /// # 参数
    ///
    /// * `tag` - 日志标签
    /// * `start` - 第一个位图块
    /// * `nblocks` - 位图块数
    /// * `valid` - 可分配的编号范围
    pub fn new(tag: &'static str, start: Bnum, nblocks: u64, valid: Range<u64>) -> Self {
        Self {
            tag,
            start,
            nblocks,
            valid,
            hints: (0..nblocks).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// 可分配的编号范围
    pub fn valid_range(&self) -> Range<u64> {
        self.valid.clone()
    }

    /// 编号所在的位图块与块内位置
    fn locate(&self, n: u64) -> (Bnum, u64) {
        (self.start + n / NBITBLOCK, n % NBITBLOCK)
    }

    fn check_range(&self, n: u64) -> Result<()> {
        if !self.valid.contains(&n) {
            log::error!("[{}] number {} outside {:?}", self.tag, n, self.valid);
            return Err(Error::new(ErrorKind::InvalidInput, "Number outside allocatable range"));
        }
        Ok(())
    }

    /// 分配一个编号
    ///
    /// # 参数
    ///
    /// * `claim` - 不阻塞地认领候选单元，返回 `false` 表示该单元被其他事务锁住
    ///
    /// # 返回
    ///
    /// 成功返回编号；全部用尽时返回 `None`
    pub fn alloc<'a, D, F>(&self, tx: &mut Transaction<'a, D>, mut claim: F) -> Result<Option<u64>>
    where
        D: BlockDevice + 'static,
        F: FnMut(&mut Transaction<'a, D>, u64) -> Result<bool>,
    {
        for i in 0..self.nblocks {
            let base = i * NBITBLOCK;
            let lo = self.valid.start.max(base);
            let hi = self.valid.end.min(base + NBITBLOCK);
            if lo >= hi {
                continue;
            }
            let (lo, hi) = (lo - base, hi - base);
            let bno = self.start + i;
            let hint = self.hints[i as usize].load(Ordering::Relaxed);

            let img = tx.read_block(bno)?.to_vec();
            let mut from = hint;
            let mut first_skipped = None;
            while let Some(bit) = find_zero_from(&img, lo, hi, from) {
                if first_skipped == Some(bit) {
                    break;
                }
                if claim(&mut *tx, base + bit)? {
                    tx.modify_block(bno, |data| set_bit(data, bit))??;
                    self.hints[i as usize].store(bit + 1, Ordering::Relaxed);
                    log::debug!("[{}] txn {} allocated {}", self.tag, tx.id(), base + bit);
                    return Ok(Some(base + bit));
                }
                log::debug!("[{}] txn {} skips locked {}", self.tag, tx.id(), base + bit);
                first_skipped.get_or_insert(bit);
                from = bit + 1;
            }
        }
        log::warn!("[{}] exhausted", self.tag);
        Ok(None)
    }

    /// 释放一个编号
    ///
    /// # 错误
    ///
    /// 超出范围返回 `InvalidInput`；该位本来就是空闲的返回 `Corrupted`
    pub fn free<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, n: u64) -> Result<()> {
        self.check_range(n)?;
        let (bno, bit) = self.locate(n);
        if !test_bit(tx.read_block(bno)?, bit) {
            log::error!("[{}] double free of {}", self.tag, n);
            return Err(Error::new(ErrorKind::Corrupted, "Freeing an unallocated unit"));
        }
        tx.modify_block(bno, |data| clear_bit(data, bit))??;
        log::debug!("[{}] txn {} freed {}", self.tag, tx.id(), n);
        Ok(())
    }

    /// 查询编号是否已分配
    pub fn is_allocated<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, n: u64) -> Result<bool> {
        if n >= self.nblocks * NBITBLOCK {
            return Err(Error::new(ErrorKind::InvalidInput, "Number beyond bitmap"));
        }
        let (bno, bit) = self.locate(n);
        Ok(test_bit(tx.read_block(bno)?, bit))
    }

    /// 格式化用的位图镜像
    ///
    /// 有效范围之外的编号全部标记为已分配，返回 `(块号, 镜像)` 列表。
    pub fn format_images(&self) -> Result<Vec<(Bnum, Vec<u8>)>> {
        let mut images = Vec::with_capacity(self.nblocks as usize);
        for i in 0..self.nblocks {
            let base = i * NBITBLOCK;
            let mut img = vec![0u8; BLOCK_SIZE];
            let lo = self.valid.start.clamp(base, base + NBITBLOCK) - base;
            let hi = self.valid.end.clamp(base, base + NBITBLOCK) - base;
            set_range(&mut img, 0, lo)?;
            set_range(&mut img, hi, NBITBLOCK)?;
            images.push((self.start + i, img));
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::ops::count_ones;
    use crate::block::MemDisk;
    use crate::cache::Buffer;
    use crate::consts::INODESZ;
    use crate::transaction::tests::manager;
    use crate::types::Addr;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn claim_block(tx: &mut Transaction<'_, Arc<MemDisk>>, n: u64) -> Result<bool> {
        tx.claim_fresh(Addr::block(n), NBITBLOCK)
    }

    fn formatted(mgr: &crate::transaction::TxnManager<Arc<MemDisk>>, alloc: &BitmapAlloc) {
        for (bno, img) in alloc.format_images().unwrap() {
            let mut buf = Buffer::fresh(Addr::block(bno), NBITBLOCK);
            buf.data = img;
            mgr.write_direct(&buf).unwrap();
        }
    }

    #[test]
    fn test_format_images_reserve_outside_range() {
        let alloc = BitmapAlloc::new("TEST", 500, 2, 70..40000);
        let images = alloc.format_images().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(count_ones(&images[0].1, 0, NBITBLOCK), 70);
        assert!(test_bit(&images[0].1, 69));
        assert!(!test_bit(&images[0].1, 70));
        assert_eq!(count_ones(&images[1].1, 0, NBITBLOCK), NBITBLOCK - (40000 - NBITBLOCK));
    }

    #[test]
    fn test_alloc_until_exhausted() {
        let (_disk, mgr) = manager(2048);
        let sb = *mgr.super_block();
        let alloc = BitmapAlloc::new("TEST", sb.bitmap_inode_start(), 1, 2..10);
        formatted(&mgr, &alloc);

        let mut tx = mgr.begin();
        let mut got = Vec::new();
        while let Some(n) = alloc.alloc(&mut tx, |_, _| Ok(true)).unwrap() {
            got.push(n);
        }
        got.sort_unstable();
        assert_eq!(got, (2..10).collect::<Vec<_>>());
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert_eq!(alloc.alloc(&mut tx, |_, _| Ok(true)).unwrap(), None);
    }

    #[test]
    fn test_free_then_realloc() {
        let (_disk, mgr) = manager(2048);
        let sb = *mgr.super_block();
        let alloc = BitmapAlloc::new("TEST", sb.bitmap_block_start(), 1, sb.data_start()..sb.size());
        formatted(&mgr, &alloc);

        let mut tx = mgr.begin();
        let n = alloc.alloc(&mut tx, claim_block).unwrap().unwrap();
        assert!(n >= sb.data_start());
        assert!(alloc.is_allocated(&mut tx, n).unwrap());
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        alloc.free(&mut tx, n).unwrap();
        assert_eq!(alloc.free(&mut tx, n).unwrap_err().kind(), ErrorKind::Corrupted);
        assert_eq!(alloc.free(&mut tx, 3).unwrap_err().kind(), ErrorKind::InvalidInput);
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert!(!alloc.is_allocated(&mut tx, n).unwrap());
        assert!(alloc.is_allocated(&mut tx, 0).unwrap());
    }

    #[test]
    fn test_concurrent_allocations_are_exclusive() {
        let (_disk, mgr) = manager(2048);
        let sb = *mgr.super_block();
        let alloc = BitmapAlloc::new("TEST", sb.bitmap_block_start(), 1, sb.data_start()..sb.size());
        formatted(&mgr, &alloc);

        let all = Mutex::new(Vec::new());
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..40 {
                        let mut tx = mgr.begin();
                        let n = alloc.alloc(&mut tx, claim_block).unwrap().unwrap();
                        tx.commit().unwrap();
                        all.lock().unwrap().push(n);
                    }
                });
            }
        });

        let all = all.into_inner().unwrap();
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 160);
        assert_eq!(unique.len(), 160);

        let mut tx = mgr.begin();
        for n in unique {
            assert!(alloc.is_allocated(&mut tx, n).unwrap());
        }
    }

    #[test]
    fn test_alloc_skips_units_locked_elsewhere() {
        let (_disk, mgr) = manager(2048);
        let sb = *mgr.super_block();
        let alloc = BitmapAlloc::new("TEST", sb.bitmap_block_start(), 1, sb.data_start()..sb.size());
        formatted(&mgr, &alloc);

        let first = sb.data_start();
        let mut holder = mgr.begin();
        holder.read_block(first).unwrap();

        let mut tx = mgr.begin();
        assert_eq!(alloc.alloc(&mut tx, claim_block).unwrap(), Some(first + 1));
        tx.commit().unwrap();
        holder.abort();

        // 只剩被锁住的单元时视为用尽，而不是等待
        let small = BitmapAlloc::new("TEST", sb.bitmap_inode_start(), 1, 2..4);
        formatted(&mgr, &small);
        let mut holder = mgr.begin();
        holder.read(sb.inum2addr(2), INODESZ * 8).unwrap();
        holder.read(sb.inum2addr(3), INODESZ * 8).unwrap();
        let mut tx = mgr.begin();
        let got = small
            .alloc(&mut tx, |tx, n| tx.claim_fresh(sb.inum2addr(n), INODESZ * 8))
            .unwrap();
        assert_eq!(got, None);
    }
}
