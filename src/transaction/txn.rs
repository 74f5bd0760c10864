//! 单个事务
//!
//! 事务按地址获取缓冲区并独占持有，直到提交或放弃。
//! 为避免死锁，事务内的加锁顺序按 `(LockRank, 展平地址)` 单调递增，两类例外：
//!
//! - 本事务新分配的单元（fresh）：分配器用 [`Transaction::claim_fresh`] 不阻塞地拿到它的锁，
//!   被别人持有的单元直接跳过
//! - 数据块：只能经由 inode 到达，而事务已经持有那个 inode
//!
//! 违反顺序是调用方的编程错误，返回 `InvalidState` 而不是等待。

use super::TxnManager;
use crate::block::BlockDevice;
use crate::cache::Buffer;
use crate::consts::{INODESZ, NBITBLOCK};
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::Region;
use crate::types::{Addr, Bnum, TxnId};
use std::collections::BTreeMap;

/// 加锁等级，数值小的先加锁
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockRank {
    /// inode 记录
    Inode = 0,
    /// 文件与目录数据块
    Data = 1,
    /// 回收队列块
    Queue = 2,
    /// inode 位图块
    InodeBitmap = 3,
    /// 块位图块
    BlockBitmap = 4,
}

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    /// 事务活跃，可以进行修改
    Active,
    /// 事务已提交
    Committed,
    /// 事务已放弃
    Aborted,
}

/// 事务
///
/// 丢弃未提交的事务等同于 `abort`。
pub struct Transaction<'a, D: BlockDevice + 'static> {
    mgr: &'a TxnManager<D>,
    id: TxnId,
    /// 持有的缓冲区
    bufs: BTreeMap<Addr, Buffer>,
    /// 持有的锁键（展平地址）
    held: Vec<u64>,
    /// 已持有的最大有序键（不含认领的单元与数据块）
    max_key: Option<(LockRank, u64)>,
    state: TransactionState,
}

impl<'a, D: BlockDevice + 'static> Transaction<'a, D> {
    pub(super) fn new(mgr: &'a TxnManager<D>, id: TxnId) -> Self {
        log::trace!("[TXN] begin txn {}", id);
        Self {
            mgr,
            id,
            bufs: BTreeMap::new(),
            held: Vec::new(),
            max_key: None,
            state: TransactionState::Active,
        }
    }

    /// 事务 ID
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// 所属的事务管理器
    pub fn manager(&self) -> &'a TxnManager<D> {
        self.mgr
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::new(ErrorKind::InvalidState, "Transaction not active"));
        }
        Ok(())
    }

    /// 根据区域确定加锁等级，并检查缓冲区形状
    fn rank_for(&self, addr: Addr, sz: u64) -> Result<LockRank> {
        let region = self.mgr.super_block().region(addr.blkno);
        if region == Region::InodeTable {
            if sz != INODESZ * 8 || addr.off % (INODESZ * 8) != 0 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "Inode table is accessed one inode at a time",
                ));
            }
            return Ok(LockRank::Inode);
        }
        if addr.off != 0 || sz != NBITBLOCK {
            return Err(Error::new(ErrorKind::InvalidInput, "Region is accessed in whole blocks"));
        }
        match region {
            Region::Data => Ok(LockRank::Data),
            Region::Queue => Ok(LockRank::Queue),
            Region::InodeBitmap => Ok(LockRank::InodeBitmap),
            Region::BlockBitmap => Ok(LockRank::BlockBitmap),
            _ => {
                log::error!("[TXN] txn {} touched reserved block {}", self.id, addr.blkno);
                Err(Error::new(ErrorKind::InvalidInput, "Address outside transactional regions"))
            }
        }
    }

    /// 获取缓冲区（必要时阻塞等待地址锁）
    fn acquire(&mut self, addr: Addr, sz: u64) -> Result<&mut Buffer> {
        self.check_active()?;
        if self.bufs.contains_key(&addr) {
            return match self.bufs.get_mut(&addr) {
                Some(buf) if buf.sz == sz => Ok(buf),
                _ => Err(Error::new(ErrorKind::InvalidInput, "Buffer shape mismatch")),
            };
        }

        Buffer::validate(addr, sz)?;
        let rank = self.rank_for(addr, sz)?;
        let key = (rank, addr.flatten());
        let ordered = rank != LockRank::Data;
        if ordered {
            if let Some(max) = self.max_key {
                if key < max {
                    log::error!(
                        "[TXN] txn {} lock order violation: {:?} {} after {:?} {:#x}",
                        self.id,
                        rank,
                        addr,
                        max.0,
                        max.1
                    );
                    return Err(Error::new(ErrorKind::InvalidState, "Lock order violation"));
                }
            }
        }

        let flat = addr.flatten();
        self.mgr.locks().acquire(flat, self.id);
        let buf = match self.mgr.journal().read_block(addr.blkno) {
            Ok(img) => Buffer::from_block(addr, sz, &img),
            Err(e) => {
                self.mgr.locks().release(flat, self.id);
                return Err(e);
            }
        };
        self.held.push(flat);
        if ordered {
            self.max_key = Some(key);
        }
        log::trace!("[TXN] txn {} acquired {} ({:?})", self.id, addr, rank);
        Ok(self.bufs.entry(addr).or_insert(buf))
    }

    /// 读取地址内容
    ///
    /// # 参数
    ///
    /// * `addr` - 起始地址
    /// * `sz` - 长度（位）
    pub fn read(&mut self, addr: Addr, sz: u64) -> Result<&[u8]> {
        Ok(&self.acquire(addr, sz)?.data)
    }

    /// 读取整块
    pub fn read_block(&mut self, bno: Bnum) -> Result<&[u8]> {
        self.read(Addr::block(bno), NBITBLOCK)
    }

    /// 覆盖地址内容
    pub fn write(&mut self, addr: Addr, sz: u64, data: &[u8]) -> Result<()> {
        if data.len() as u64 * 8 != sz {
            return Err(Error::new(ErrorKind::InvalidInput, "Write length does not match buffer"));
        }
        let buf = self.acquire(addr, sz)?;
        buf.data.copy_from_slice(data);
        buf.set_dirty();
        Ok(())
    }

    /// 覆盖整块
    pub fn write_block(&mut self, bno: Bnum, data: &[u8]) -> Result<()> {
        self.write(Addr::block(bno), NBITBLOCK, data)
    }

    /// 原地修改地址内容并标记为脏
    pub fn modify<R>(&mut self, addr: Addr, sz: u64, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let buf = self.acquire(addr, sz)?;
        let r = f(&mut buf.data);
        buf.set_dirty();
        Ok(r)
    }

    /// 原地修改整块
    pub fn modify_block<R>(&mut self, bno: Bnum, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.modify(Addr::block(bno), NBITBLOCK, f)
    }

    /// 认领本事务正在分配的单元
    ///
    /// 不阻塞：地址锁被其他事务持有时返回 `false`，由分配器换下一个候选。
    /// 认领成功后缓冲区零初始化且为脏，不读盘，也不计入加锁顺序。
    pub fn claim_fresh(&mut self, addr: Addr, sz: u64) -> Result<bool> {
        self.check_active()?;
        if let Some(buf) = self.bufs.get_mut(&addr) {
            if buf.sz != sz {
                return Err(Error::new(ErrorKind::InvalidInput, "Buffer shape mismatch"));
            }
            buf.reset_fresh();
            return Ok(true);
        }

        Buffer::validate(addr, sz)?;
        let rank = self.rank_for(addr, sz)?;
        let flat = addr.flatten();
        if !self.mgr.locks().try_acquire(flat, self.id) {
            log::trace!("[TXN] txn {} skips {} ({:?}), held elsewhere", self.id, addr, rank);
            return Ok(false);
        }
        self.held.push(flat);
        self.bufs.insert(addr, Buffer::fresh(addr, sz));
        log::trace!("[TXN] txn {} claimed fresh {} ({:?})", self.id, addr, rank);
        Ok(true)
    }

    /// 脏缓冲区数
    pub fn dirty_count(&self) -> usize {
        self.bufs.values().filter(|b| b.is_dirty()).count()
    }

    /// 提交事务
    ///
    /// # 返回
    ///
    /// 返回 `Ok(())` 时所有改动已持久化；日志容量不足时返回 `NoSpace`，没有任何改动生效。
    /// 无论成功与否，事务持有的锁都会释放。
    pub fn commit(self) -> Result<()> {
        self.finish_commit(true)
    }

    /// 不稳定提交：改动对其他事务立即可见，但不等待落盘
    ///
    /// 崩溃可能丢失这些改动，直到 [`TxnManager::flush`] 返回或之后的某次普通提交返回。
    pub fn commit_unstable(self) -> Result<()> {
        self.finish_commit(false)
    }

    fn finish_commit(mut self, stable: bool) -> Result<()> {
        self.check_active()?;
        let bufs = core::mem::take(&mut self.bufs);
        let dirty: Vec<Buffer> = bufs.into_values().filter(|b| b.is_dirty()).collect();
        let n = dirty.len();
        let res = if stable {
            self.mgr.journal().commit(dirty)
        } else {
            self.mgr.journal().commit_unstable(dirty)
        };
        match &res {
            Ok(()) => {
                log::trace!(
                    "[TXN] txn {} committed {} buffers{}",
                    self.id,
                    n,
                    if stable { "" } else { " (unstable)" }
                );
                self.finish(TransactionState::Committed);
            }
            Err(e) => {
                log::debug!("[TXN] txn {} commit failed: {}", self.id, e);
                self.finish(TransactionState::Aborted);
            }
        }
        res
    }

    /// 放弃事务
    pub fn abort(mut self) {
        log::trace!("[TXN] txn {} aborted", self.id);
        self.finish(TransactionState::Aborted);
    }

    fn finish(&mut self, state: TransactionState) {
        for key in self.held.drain(..) {
            self.mgr.locks().release(key, self.id);
        }
        self.bufs.clear();
        self.state = state;
        self.mgr.txn_done();
    }
}

impl<D: BlockDevice + 'static> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            log::trace!("[TXN] txn {} dropped without commit", self.id);
            self.finish(TransactionState::Aborted);
        }
    }
}
