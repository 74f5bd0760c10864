//! Transaction 系统
//!
//! 提供多块原子更新：begin → read/write → commit 或 abort。
//!
//! ## 模块结构
//!
//! - `txn` - 单个事务（地址锁、加锁顺序、缓冲区）
//! - 本文件 - 事务管理器：恢复、后台 flusher、活跃事务计数与关闭
//!
//! ## 使用说明
//!
//! ```rust,ignore
//! let mut tx = mgr.begin();
//! tx.modify_block(bno, |data| {
//!     data[0] = 0x42;
//! })?;
//! tx.commit()?;  // 返回时已持久化
//! ```

mod txn;

pub use txn::{LockRank, Transaction};

use crate::block::{BlockDev, BlockDevice};
use crate::cache::{Buffer, LockMap};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FsConfig;
use crate::journal::{flusher_loop, recover, Journal, RecoveryReport};
use crate::superblock::FsSuper;
use crate::utils::{lock, wait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// 事务管理器
pub struct TxnManager<D: BlockDevice + 'static> {
    journal: Arc<Journal<D>>,
    locks: LockMap,
    sb: FsSuper,
    next_id: AtomicU64,
    /// 活跃事务数
    active: Mutex<usize>,
    idle: Condvar,
    flusher: Mutex<Option<JoinHandle<()>>>,
    report: RecoveryReport,
}

impl<D: BlockDevice + 'static> TxnManager<D> {
    /// 恢复日志并启动后台 flusher
    ///
    /// # 参数
    ///
    /// * `dev` - 块设备
    /// * `sb` - 布局
    /// * `config` - 配置（缓存大小、安装周期）
    pub fn open(dev: Arc<BlockDev<D>>, sb: FsSuper, config: &FsConfig) -> Result<Self> {
        let report = recover(&dev, &sb)?;
        let journal = Arc::new(Journal::new(dev, sb, config.cache_blocks, &report));

        let handle = {
            let journal = journal.clone();
            let interval = config.flush_interval;
            thread::Builder::new()
                .name("txnfs-flusher".into())
                .spawn(move || flusher_loop(journal, interval))
                .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to spawn flusher", e))?
        };

        Ok(Self {
            journal,
            locks: LockMap::new(),
            sb,
            next_id: AtomicU64::new(1),
            active: Mutex::new(0),
            idle: Condvar::new(),
            flusher: Mutex::new(Some(handle)),
            report,
        })
    }

    /// 开始事务（无磁盘 I/O）
    pub fn begin(&self) -> Transaction<'_, D> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *lock(&self.active) += 1;
        Transaction::new(self, id)
    }

    pub(crate) fn txn_done(&self) {
        let mut active = lock(&self.active);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    /// 活跃事务数
    pub fn active_count(&self) -> usize {
        *lock(&self.active)
    }

    /// 绕过日志直接写 home 位置（只用于格式化）
    pub fn write_direct(&self, buf: &Buffer) -> Result<()> {
        self.journal.write_direct(buf)
    }

    /// 直接写入后的写屏障
    pub fn barrier(&self) -> Result<()> {
        self.journal.device().flush()
    }

    /// 等待之前的不稳定提交全部落盘
    pub fn flush(&self) -> Result<()> {
        self.journal.flush()
    }

    /// 立即安装所有已落盘批次
    pub fn install(&self) -> Result<usize> {
        self.journal.install()
    }

    /// 布局
    pub fn super_block(&self) -> &FsSuper {
        &self.sb
    }

    /// 日志
    pub fn journal(&self) -> &Journal<D> {
        &self.journal
    }

    /// 挂载时的恢复结果
    pub fn recovery_report(&self) -> RecoveryReport {
        self.report
    }

    pub(crate) fn locks(&self) -> &LockMap {
        &self.locks
    }

    /// 正常关闭
    ///
    /// 等待所有活跃事务结束，写出暂存的不稳定提交，再让 flusher 安装剩余批次后退出。
    /// 调用线程自己不能持有未结束的事务。
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut active = lock(&self.active);
            while *active > 0 {
                log::debug!("[TXN] shutdown waits for {} transactions", *active);
                active = wait(&self.idle, active);
            }
        }
        if let Err(e) = self.journal.flush() {
            log::error!("[TXN] flushing staged commits at shutdown failed: {}", e);
        }
        self.journal.stop();
        self.join_flusher();
        if self.journal.is_failed() {
            return Err(Error::new(ErrorKind::Io, "Journal failed before shutdown"));
        }
        log::info!("[TXN] shut down, {} batches left pending", self.journal.pending_batches());
        Ok(())
    }

    /// 模拟崩溃：不等待事务，不安装
    pub fn crash(&self) {
        self.journal.crash();
        self.join_flusher();
    }

    fn join_flusher(&self) {
        let handle = lock(&self.flusher).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                log::error!("[TXN] flusher thread panicked");
            }
        }
    }
}

impl<D: BlockDevice + 'static> Drop for TxnManager<D> {
    fn drop(&mut self) {
        if lock(&self.flusher).is_some() {
            self.journal.stop();
            self.join_flusher();
        }
    }
}
