//! Group commit 与批次写出
//!
//! 提交的事务把脏缓冲区合并进共享暂存区，然后等待所在批次落盘。
//! 没有批次在写时，第一个需要落盘的线程成为 committer，把整个暂存区作为一个批次写出；
//! 写出期间到达的事务进入下一个批次，由之后醒来的某个等待者写出。
//!
//! 不稳定提交（`commit_unstable`）只进暂存区、不等待；之后的 `flush`
//! 或任何一次普通提交都会把它带进日志。

use super::checksum::BatchChecksum;
use super::types::{encode_commit, encode_descriptor};
use super::{Journal, JournalError, LogState, LoggedBatch};
use crate::block::BlockDevice;
use crate::cache::Buffer;
use crate::consts::{BLOCK_SIZE, MAX_BATCH_BLOCKS};
use crate::error::{Error, ErrorKind, Result};
use crate::types::Bnum;
use crate::utils::{lock, wait};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

impl<D: BlockDevice> Journal<D> {
    /// 持久化一个事务的脏缓冲区
    ///
    /// # 参数
    ///
    /// * `bufs` - 事务的全部脏缓冲区
    ///
    /// # 返回
    ///
    /// 返回 `Ok(())` 时改动已经落盘。强制安装后仍放不下时返回 `NoSpace`，
    /// 此时没有任何改动进入日志。
    pub fn commit(&self, bufs: Vec<Buffer>) -> Result<()> {
        match self.stage(bufs)? {
            Some(id) => self.wait_durable(id),
            None => Ok(()),
        }
    }

    /// 合并进暂存批次后立即返回，不等待落盘
    ///
    /// 崩溃时可能丢失，直到之后的 [`Journal::flush`] 返回。
    pub fn commit_unstable(&self, bufs: Vec<Buffer>) -> Result<()> {
        if let Some(id) = self.stage(bufs)? {
            log::trace!("[JOURNAL] unstable commit staged into batch {}", id);
        }
        Ok(())
    }

    /// 等待此刻已暂存的全部改动落盘
    pub fn flush(&self) -> Result<()> {
        let target = {
            let st = lock(&self.state);
            if st.staged.is_empty() {
                st.staged_id - 1
            } else {
                st.staged_id
            }
        };
        self.wait_durable(target)
    }

    /// 合并进暂存区，返回所在批次的 id；没有脏缓冲区时返回 `None`
    fn stage(&self, bufs: Vec<Buffer>) -> Result<Option<u64>> {
        if bufs.is_empty() {
            return Ok(None);
        }

        let homes: BTreeSet<Bnum> = bufs.iter().map(|b| b.addr.blkno).collect();
        let n = homes.len();
        if n > MAX_BATCH_BLOCKS || n as u64 + 2 > self.sb.log_blocks() {
            log::warn!("[JOURNAL] transaction of {} blocks can never fit the log", n);
            return Err(JournalError::TooLarge.into());
        }

        let mut st = lock(&self.state);
        loop {
            st.check_live()?;
            let extra = homes.iter().filter(|b| !st.staged.contains_key(*b)).count();
            let projected = st.staged.len() + extra;
            if projected <= MAX_BATCH_BLOCKS && st.used() + projected as u64 + 2 <= self.sb.log_blocks() {
                break;
            }

            // 放不下：先把暂存批次推出去，再强制安装已落盘的批次
            if !st.staged.is_empty() {
                st = if st.committing {
                    wait(&self.cond, st)
                } else {
                    self.write_staged(st)?
                };
                continue;
            }
            if st.committing || st.installing {
                st = wait(&self.cond, st);
                continue;
            }
            if st.logged.iter().any(|b| b.id <= st.durable_id) {
                log::debug!("[JOURNAL] log full ({} blocks used), forcing install", st.used());
                drop(st);
                self.install()?;
                st = lock(&self.state);
                continue;
            }
            log::warn!("[JOURNAL] no log space for {} blocks", n);
            return Err(JournalError::NoSpace.into());
        }

        // 先在副本上合并，出错时暂存区保持不变
        let mut images: BTreeMap<Bnum, Vec<u8>> = BTreeMap::new();
        for buf in &bufs {
            let bno = buf.addr.blkno;
            let img = match images.entry(bno) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let base = match st.staged.get(&bno) {
                        Some(img) => img.clone(),
                        None if buf.is_whole_block() => vec![0u8; BLOCK_SIZE],
                        None => self.base_image(&st, bno)?,
                    };
                    e.insert(base)
                }
            };
            buf.install(img);
        }
        let my_id = st.staged_id;
        st.staged.extend(images);
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        log::trace!("[JOURNAL] staged {} blocks into batch {}", n, my_id);
        Ok(Some(my_id))
    }

    /// 等到批次 `id` 落盘；没有批次在写时自己成为 committer
    fn wait_durable(&self, id: u64) -> Result<()> {
        let mut st = lock(&self.state);
        loop {
            if st.durable_id >= id {
                return Ok(());
            }
            if st.crashed {
                return Err(JournalError::Crashed.into());
            }
            if st.failed {
                return Err(JournalError::Failed.into());
            }
            if !st.committing {
                if st.staged.is_empty() {
                    log::error!("[JOURNAL] batch {} vanished before it was written", id);
                    return Err(Error::new(ErrorKind::InvalidState, "Staged batch lost"));
                }
                st = self.write_staged(st)?;
                continue;
            }
            st = wait(&self.cond, st);
        }
    }

    /// 把暂存区作为一个批次写出（调用者成为 committer）
    fn write_staged<'a>(&'a self, mut st: MutexGuard<'a, LogState>) -> Result<MutexGuard<'a, LogState>> {
        let blocks = core::mem::take(&mut st.staged);
        let batch = Arc::new(LoggedBatch {
            id: st.staged_id,
            seq: st.next_seq,
            pos: st.next_pos,
            blocks,
        });
        st.staged_id += 1;
        st.next_seq += 1;
        st.next_pos += batch.len();
        st.logged.push_back(batch.clone());
        st.committing = true;
        drop(st);

        let res = self.write_batch(&batch);

        let mut st = lock(&self.state);
        st.committing = false;
        let out = match res {
            Ok(()) => {
                st.durable_id = batch.id;
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .blocks
                    .fetch_add(batch.blocks.len() as u64, Ordering::Relaxed);
                Ok(st)
            }
            Err(e) => {
                log::error!("[JOURNAL] writing batch seq={} failed: {}", batch.seq, e);
                st.failed = true;
                Err(e)
            }
        };
        self.cond.notify_all();
        out
    }

    /// 写出一个批次：descriptor 与数据块，屏障，commit 块，屏障
    fn write_batch(&self, batch: &LoggedBatch) -> Result<()> {
        let homes: Vec<Bnum> = batch.blocks.keys().copied().collect();
        let count = homes.len() as u64;
        let desc = encode_descriptor(batch.seq, batch.pos, &homes);

        let mut csum = BatchChecksum::new();
        csum.update(&desc);
        self.dev.write_block(self.log_block(batch.pos), &desc)?;
        for (i, img) in batch.blocks.values().enumerate() {
            csum.update(img);
            self.dev.write_block(self.log_block(batch.pos + 1 + i as u64), img)?;
        }
        self.dev.flush()?;

        let commit = encode_commit(batch.seq, batch.pos, count as u32, csum.finalize());
        self.dev.write_block(self.log_block(batch.pos + count + 1), &commit)?;
        self.dev.flush()?;

        log::debug!(
            "[JOURNAL] batch seq={} pos={} blocks={} durable",
            batch.seq,
            batch.pos,
            count
        );
        Ok(())
    }
}
