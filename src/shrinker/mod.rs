//! 后台回收
//!
//! 链接数降到 0 时仍被打开的文件不能立刻释放，unlink 把它放进持久化队列。
//! 回收线程在引用计数归零后分多个事务释放它的块，最后一个事务同时出队、
//! 释放 inode 位并清空记录。
//!
//! 每个 inode 的状态：`queued → reclaiming → freed`。中途崩溃时队列条目还在，
//! 下次挂载后从剩下的块继续。
//!
//! 回收失败的条目暂时跳过，先处理排在后面的；没有别的可做时再重试它们。

mod queue;

pub use queue::ShrinkQueue;

use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FsState;
use crate::inode::{mapped_blocks, truncate_blocks, Inode};
use crate::types::Inum;
use crate::utils::{lock, wait_timeout};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Stop,
    Crash,
}

#[derive(Debug)]
struct SignalState {
    kicks: u64,
    mode: Mode,
}

/// 唤醒回收线程的信号
///
/// `close` 让引用计数归零、unlink 入队时都会 `kick`。
#[derive(Debug)]
pub struct ShrinkSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Default for ShrinkSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShrinkSignal {
    /// 创建信号
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState { kicks: 0, mode: Mode::Run }),
            cond: Condvar::new(),
        }
    }

    /// 通知有新工作
    pub fn kick(&self) {
        lock(&self.state).kicks += 1;
        self.cond.notify_all();
    }

    fn set_mode(&self, mode: Mode) {
        lock(&self.state).mode = mode;
        self.cond.notify_all();
    }

    /// 回收线程是否应继续运行
    pub fn is_running(&self) -> bool {
        lock(&self.state).mode == Mode::Run
    }

    fn is_crashed(&self) -> bool {
        lock(&self.state).mode == Mode::Crash
    }

    fn kicks(&self) -> u64 {
        lock(&self.state).kicks
    }

    /// 等到 kick 计数不同于 `seen`、停止或超时
    fn wait(&self, seen: u64, timeout: Duration) {
        let mut st = lock(&self.state);
        while st.kicks == seen && st.mode == Mode::Run {
            let (guard, timed_out) = wait_timeout(&self.cond, st, timeout);
            st = guard;
            if timed_out {
                break;
            }
        }
    }
}

/// 回收线程句柄
pub struct Shrinker {
    signal: Arc<ShrinkSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Shrinker {
    /// 启动回收线程
    pub(crate) fn spawn<D: BlockDevice + 'static>(fs: Arc<FsState<D>>) -> Result<Self> {
        let signal = fs.signal.clone();
        let handle = thread::Builder::new()
            .name("txnfs-shrinker".into())
            .spawn(move || shrinker_loop(fs))
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to spawn shrinker", e))?;
        Ok(Self {
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// 正常停止：当前事务做完，不再开始新事务
    pub fn shutdown(&self) {
        self.signal.set_mode(Mode::Stop);
        self.join();
    }

    /// 崩溃停止：未提交的步骤直接放弃
    pub fn crash(&self) {
        self.signal.set_mode(Mode::Crash);
        self.join();
    }

    fn join(&self) {
        let handle = lock(&self.handle).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                log::error!("[SHRINK] shrinker thread panicked");
            }
        }
    }
}

fn shrinker_loop<D: BlockDevice + 'static>(fs: Arc<FsState<D>>) {
    log::debug!("[SHRINK] started");
    let poll = fs.config.shrink_poll;
    let mut failed: HashSet<Inum> = HashSet::new();
    while fs.signal.is_running() {
        let seen = fs.signal.kicks();
        match next_candidate(&fs, &failed) {
            Ok(Some(inum)) => {
                if let Err(e) = reclaim(&fs, inum) {
                    log::error!("[SHRINK] reclaiming inode {} failed, moving on: {}", inum, e);
                    failed.insert(inum);
                }
            }
            Ok(None) => {
                fs.signal.wait(seen, poll);
                failed.clear();
            }
            Err(e) => {
                log::error!("[SHRINK] reading queue failed: {}", e);
                fs.signal.wait(seen, poll);
            }
        }
    }
    log::debug!("[SHRINK] stopped");
}

/// 队列中第一个没有打开引用、本轮也没失败过的 inode
fn next_candidate<D: BlockDevice + 'static>(fs: &FsState<D>, failed: &HashSet<Inum>) -> Result<Option<Inum>> {
    let mut tx = fs.txn.begin();
    let queued = fs.queue.list(&mut tx)?;
    tx.abort();
    Ok(queued
        .into_iter()
        .find(|inum| !failed.contains(inum) && fs.refs.count(*inum) == 0))
}

/// 分步回收一个 inode
fn reclaim<D: BlockDevice + 'static>(fs: &FsState<D>, inum: Inum) -> Result<()> {
    let batch = fs.config.shrink_batch.max(1);
    loop {
        if !fs.signal.is_running() {
            return Ok(());
        }
        let mut tx = fs.txn.begin();
        let mut ino = Inode::load(&mut tx, &fs.sb, inum)?;
        if fs.refs.count(inum) > 0 {
            log::debug!("[SHRINK] inode {} reopened, skipping", inum);
            return Ok(());
        }

        let last = mapped_blocks(&mut tx, &ino)? <= batch;
        if last {
            // 加锁顺序：队列 → inode 位图 → 块位图
            fs.queue.remove(&mut tx, inum)?;
            if !ino.is_free() {
                fs.ialloc.free_inode(&mut tx, inum)?;
            }
            truncate_blocks(&mut tx, &fs.balloc, &mut ino, 0, u64::MAX)?;
            Inode::empty(inum).store(&mut tx, &fs.sb)?;
        } else {
            truncate_blocks(&mut tx, &fs.balloc, &mut ino, 0, batch)?;
            ino.store(&mut tx, &fs.sb)?;
        }

        if fs.signal.is_crashed() {
            log::warn!("[SHRINK] crash requested, abandoning step on inode {}", inum);
            tx.abort();
            return Ok(());
        }
        tx.commit()?;
        if last {
            log::info!("[SHRINK] inode {} reclaimed", inum);
            return Ok(());
        }
    }
}
