//! 预写日志（WAL）实现
//!
//! 这个模块提供崩溃一致性：事务的改动先以批次形式写进环形日志区，
//! 落盘后才算提交成功；后台 flusher 再把日志中的块安装到 home 位置并推进日志头。
//!
//! # 架构概述
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Transaction Layer                         │
//! │        Transaction::commit() → Journal::commit()          │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │ 合并进暂存区（group commit）
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Journal Core                            │
//! │  staged ──(committer 写出)──▶ logged ──(flusher 安装)──▶  │
//! │  暂存批次                      已落盘未安装                │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │           Block Layer: BlockDev / HomeCache               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # 核心组件
//!
//! - [`types`] - 日志磁盘格式
//! - [`checksum`] - 批次校验和
//! - `commit` - group commit 与批次写出
//! - `checkpoint` - 安装（checkpoint）与后台 flusher
//! - `recovery` - 挂载时的重放
//!
//! # 顺序保证
//!
//! 批次按 id 顺序写出并落盘；日志头只在安装完成后由安装线程改写，
//! 提交路径从不写日志头。

mod checkpoint;
pub mod checksum;
mod commit;
mod recovery;
pub mod types;

pub(crate) use checkpoint::flusher_loop;
pub use recovery::{recover, RecoveryReport};

use crate::block::{BlockDev, BlockDevice};
use crate::cache::{Buffer, HomeCache};
use crate::consts::BLOCK_SIZE;
use crate::error::Result;
use crate::superblock::FsSuper;
use crate::types::Bnum;
use crate::utils::lock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// 日志错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalError {
    /// 日志头记录的几何参数与当前布局不符
    BadGeometry,
    /// 事务大到任何情况下都放不进日志
    TooLarge,
    /// 强制安装后日志仍无空间
    NoSpace,
    /// 已模拟崩溃
    Crashed,
    /// 已关闭
    ShutDown,
    /// 之前的 I/O 错误使日志不可用
    Failed,
}

impl core::fmt::Display for JournalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            JournalError::BadGeometry => write!(f, "Log header does not match layout"),
            JournalError::TooLarge => write!(f, "Transaction larger than the log"),
            JournalError::NoSpace => write!(f, "Log has no space"),
            JournalError::Crashed => write!(f, "Journal has crashed"),
            JournalError::ShutDown => write!(f, "Journal is shut down"),
            JournalError::Failed => write!(f, "Journal failed after an I/O error"),
        }
    }
}

/// 已写入（或正在写入）日志、尚未安装的批次
pub(crate) struct LoggedBatch {
    /// 批次 id（决定落盘顺序）
    pub id: u64,
    /// 磁盘上的序号
    pub seq: u64,
    /// 起始日志位置
    pub pos: u64,
    /// home 块号 → 块镜像
    pub blocks: BTreeMap<Bnum, Vec<u8>>,
}

impl LoggedBatch {
    /// 占用的日志块数（descriptor + 数据 + commit）
    pub fn len(&self) -> u64 {
        self.blocks.len() as u64 + 2
    }

    /// 之后第一个空闲位置
    pub fn end(&self) -> u64 {
        self.pos + self.len()
    }
}

/// 日志的共享状态，受 `Journal::state` 保护
pub(crate) struct LogState {
    /// 正在收集的批次
    staged: BTreeMap<Bnum, Vec<u8>>,
    /// 暂存批次的 id
    staged_id: u64,
    /// 已落盘的最大批次 id
    durable_id: u64,
    /// 有线程正在写出批次
    committing: bool,
    /// 有线程正在安装
    installing: bool,
    /// 已分配日志位置、尚未安装的批次，旧的在前
    logged: VecDeque<Arc<LoggedBatch>>,
    /// 下一个空闲日志位置
    next_pos: u64,
    /// 最早未安装批次的位置
    head_pos: u64,
    /// 下一个批次的序号
    next_seq: u64,
    stopping: bool,
    crashed: bool,
    failed: bool,
}

impl LogState {
    /// 块的最新已提交镜像（暂存区优先，其次最新的日志批次）
    fn latest(&self, bno: Bnum) -> Option<&Vec<u8>> {
        self.staged
            .get(&bno)
            .or_else(|| self.logged.iter().rev().find_map(|b| b.blocks.get(&bno)))
    }

    /// 已占用的日志块数
    fn used(&self) -> u64 {
        self.next_pos - self.head_pos
    }

    fn check_live(&self) -> core::result::Result<(), JournalError> {
        if self.crashed {
            Err(JournalError::Crashed)
        } else if self.failed {
            Err(JournalError::Failed)
        } else if self.stopping {
            Err(JournalError::ShutDown)
        } else {
            Ok(())
        }
    }
}

/// 日志统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// 提交的事务数（不含无脏块的事务）
    pub commits: u64,
    /// 写出的批次数
    pub batches: u64,
    /// 写进日志的数据块数
    pub blocks: u64,
    /// 安装的批次数
    pub installs: u64,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    batches: AtomicU64,
    blocks: AtomicU64,
    installs: AtomicU64,
}

/// 预写日志
pub struct Journal<D> {
    dev: Arc<BlockDev<D>>,
    sb: FsSuper,
    cache: HomeCache,
    state: Mutex<LogState>,
    cond: Condvar,
    counters: Counters,
}

impl<D: BlockDevice> Journal<D> {
    /// 在恢复完成后创建日志
    ///
    /// # 参数
    ///
    /// * `dev` - 块设备
    /// * `sb` - 布局
    /// * `cache_blocks` - home 块缓存大小
    /// * `report` - 恢复结果，提供初始的日志头位置与序号
    pub fn new(dev: Arc<BlockDev<D>>, sb: FsSuper, cache_blocks: usize, report: &RecoveryReport) -> Self {
        Self {
            dev,
            sb,
            cache: HomeCache::new(cache_blocks),
            state: Mutex::new(LogState {
                staged: BTreeMap::new(),
                staged_id: 1,
                durable_id: 0,
                committing: false,
                installing: false,
                logged: VecDeque::new(),
                next_pos: report.head,
                head_pos: report.head,
                next_seq: report.seq,
                stopping: false,
                crashed: false,
                failed: false,
            }),
            cond: Condvar::new(),
            counters: Counters::default(),
        }
    }

    /// 读取块的最新已提交镜像
    ///
    /// 调用者必须持有该块（或块内某条记录）的地址锁。
    pub fn read_block(&self, bno: Bnum) -> Result<Vec<u8>> {
        let generation = self.cache.generation();
        {
            let st = lock(&self.state);
            if let Some(img) = st.latest(bno) {
                return Ok(img.clone());
            }
        }
        if let Some(img) = self.cache.get(bno) {
            return Ok(img);
        }
        let mut img = vec![0u8; BLOCK_SIZE];
        self.dev.read_block(bno, &mut img)?;
        self.cache.insert_if(bno, img.clone(), generation);
        Ok(img)
    }

    /// 子块缓冲区合并时的底图（持有状态锁时调用）
    fn base_image(&self, st: &LogState, bno: Bnum) -> Result<Vec<u8>> {
        if let Some(img) = st.latest(bno) {
            return Ok(img.clone());
        }
        if let Some(img) = self.cache.get(bno) {
            return Ok(img);
        }
        let mut img = vec![0u8; BLOCK_SIZE];
        self.dev.read_block(bno, &mut img)?;
        Ok(img)
    }

    /// 绕过日志直接写 home 位置
    ///
    /// 只在格式化时使用，此时没有并发事务。调用者负责随后的写屏障。
    pub fn write_direct(&self, buf: &Buffer) -> Result<()> {
        let bno = buf.addr.blkno;
        let mut img = if buf.is_whole_block() {
            vec![0u8; BLOCK_SIZE]
        } else {
            self.read_block(bno)?
        };
        buf.install(&mut img);
        self.dev.write_block(bno, &img)?;
        self.cache.update(bno, img);
        log::trace!("[JOURNAL] write_direct block {}", bno);
        Ok(())
    }

    /// 日志位置对应的磁盘块
    fn log_block(&self, pos: u64) -> Bnum {
        self.sb.log_start() + pos % self.sb.log_blocks()
    }

    /// 块设备
    pub fn device(&self) -> &BlockDev<D> {
        &self.dev
    }

    /// home 块缓存
    pub fn cache(&self) -> &HomeCache {
        &self.cache
    }

    /// 尚未安装的批次数
    pub fn pending_batches(&self) -> usize {
        lock(&self.state).logged.len()
    }

    /// 已占用的日志块数
    pub fn used_blocks(&self) -> u64 {
        lock(&self.state).used()
    }

    /// 统计
    pub fn stats(&self) -> JournalStats {
        JournalStats {
            commits: self.counters.commits.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            blocks: self.counters.blocks.load(Ordering::Relaxed),
            installs: self.counters.installs.load(Ordering::Relaxed),
        }
    }

    /// 停止接受提交；flusher 安装完剩余批次后退出
    pub fn stop(&self) {
        lock(&self.state).stopping = true;
        self.cond.notify_all();
        log::debug!("[JOURNAL] stopping");
    }

    /// 模拟崩溃：拒绝后续提交，flusher 不再安装直接退出
    pub fn crash(&self) {
        lock(&self.state).crashed = true;
        self.cond.notify_all();
        log::warn!("[JOURNAL] crashed, pending batches left in the log");
    }

    /// 是否因 I/O 错误失效
    pub fn is_failed(&self) -> bool {
        lock(&self.state).failed
    }
}
