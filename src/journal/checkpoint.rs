//! 安装（checkpoint）与后台 flusher
//!
//! 安装把已落盘批次中的块写到 home 位置，屏障后再改写日志头，
//! 之后这些批次占用的日志空间才能复用。安装中途崩溃没有关系：
//! 日志头仍指向旧位置，恢复时会把这些批次再重放一遍。

use super::types::LogHeader;
use super::{Journal, JournalError, LoggedBatch};
use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::types::Bnum;
use crate::utils::{lock, wait, wait_timeout};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

impl<D: BlockDevice> Journal<D> {
    /// 安装所有已落盘的批次
    ///
    /// # 返回
    ///
    /// 安装的批次数。已有安装在进行时先等它结束。
    pub fn install(&self) -> Result<usize> {
        let mut st = lock(&self.state);
        while st.installing {
            st = wait(&self.cond, st);
        }
        if st.crashed {
            return Ok(0);
        }
        if st.failed {
            return Err(JournalError::Failed.into());
        }

        let durable = st.durable_id;
        let batches: Vec<Arc<LoggedBatch>> = st
            .logged
            .iter()
            .take_while(|b| b.id <= durable)
            .cloned()
            .collect();
        if batches.is_empty() {
            return Ok(0);
        }
        st.installing = true;
        drop(st);

        let res = self.install_batches(&batches);

        let mut st = lock(&self.state);
        st.installing = false;
        let out = match res {
            Ok(head) => {
                for _ in 0..batches.len() {
                    st.logged.pop_front();
                }
                st.head_pos = head;
                self.counters
                    .installs
                    .fetch_add(batches.len() as u64, Ordering::Relaxed);
                Ok(batches.len())
            }
            Err(e) => {
                log::error!("[JOURNAL] install failed: {}", e);
                st.failed = true;
                Err(e)
            }
        };
        self.cond.notify_all();
        out
    }

    fn install_batches(&self, batches: &[Arc<LoggedBatch>]) -> Result<u64> {
        let last = match batches.last() {
            Some(b) => b,
            None => return Err(Error::new(ErrorKind::InvalidInput, "Nothing to install")),
        };

        // 同一块在多个批次中出现时只写最新的镜像
        let mut latest: BTreeMap<Bnum, &Vec<u8>> = BTreeMap::new();
        for batch in batches {
            for (bno, img) in &batch.blocks {
                latest.insert(*bno, img);
            }
        }
        for (bno, img) in &latest {
            self.dev.write_block(*bno, img)?;
        }
        self.dev.flush()?;

        let header = LogHeader {
            head: last.end(),
            seq: last.seq + 1,
            log_blocks: self.sb.log_blocks(),
        };
        self.dev.write_block(self.sb.log_header(), &header.encode())?;
        self.dev.flush()?;

        for (bno, img) in latest.iter() {
            self.cache.update(*bno, (*img).clone());
        }
        log::debug!(
            "[JOURNAL] installed {} batches ({} blocks), head -> {}",
            batches.len(),
            latest.len(),
            header.head
        );
        Ok(header.head)
    }
}

/// 后台 flusher 主循环
///
/// 每隔 `interval` 安装一次；提交路径的唤醒不会缩短周期。
/// 收到停止请求时安装剩余批次后退出，崩溃时直接退出。
pub(crate) fn flusher_loop<D: BlockDevice>(journal: Arc<Journal<D>>, interval: Duration) {
    log::debug!("[FLUSHER] started, interval {:?}", interval);
    loop {
        let deadline = Instant::now().checked_add(interval);
        let stopping = {
            let mut st = lock(&journal.state);
            loop {
                if st.crashed {
                    log::debug!("[FLUSHER] exit on crash");
                    return;
                }
                if st.stopping {
                    break true;
                }
                let now = Instant::now();
                match deadline {
                    Some(d) if now < d => st = wait_timeout(&journal.cond, st, d - now).0,
                    Some(_) => break false,
                    None => st = wait(&journal.cond, st),
                }
            }
        };

        if let Err(e) = journal.install() {
            log::error!("[FLUSHER] giving up: {}", e);
            return;
        }
        if stopping {
            log::debug!("[FLUSHER] drained, exit");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{block_buf, setup};
    use super::super::types::LogHeader;
    use super::super::{recover, Journal};
    use super::*;
    use std::thread;

    #[test]
    fn test_install_moves_blocks_home_and_advances_head() {
        let (disk, dev, sb) = setup(256, 16);
        let report = recover(&dev, &sb).unwrap();
        let journal = Journal::new(dev, sb, 8, &report);

        journal.commit(vec![block_buf(100, 1)]).unwrap();
        journal.commit(vec![block_buf(100, 2), block_buf(101, 2)]).unwrap();
        assert_eq!(journal.install().unwrap(), 2);

        assert_eq!(disk.block(100)[0], 2);
        assert_eq!(disk.block(101)[0], 2);
        let header = LogHeader::decode(&disk.block(0)).unwrap();
        assert_eq!(header.head, 7);
        assert_eq!(header.seq, 3);
        assert_eq!(journal.used_blocks(), 0);
        assert_eq!(journal.install().unwrap(), 0);
        assert_eq!(journal.read_block(100).unwrap()[0], 2);
    }

    #[test]
    fn test_flusher_drains_on_stop() {
        let (disk, dev, sb) = setup(256, 16);
        let report = recover(&dev, &sb).unwrap();
        let journal = Arc::new(Journal::new(dev, sb, 8, &report));
        let flusher = {
            let j = journal.clone();
            thread::spawn(move || flusher_loop(j, Duration::from_secs(3600)))
        };

        journal.commit(vec![block_buf(120, 9)]).unwrap();
        journal.stop();
        flusher.join().unwrap();
        assert_eq!(disk.block(120)[0], 9);
        assert_eq!(journal.pending_batches(), 0);
    }

    #[test]
    fn test_flusher_skips_install_on_crash() {
        let (disk, dev, sb) = setup(256, 16);
        let report = recover(&dev, &sb).unwrap();
        let journal = Arc::new(Journal::new(dev, sb, 8, &report));
        let flusher = {
            let j = journal.clone();
            thread::spawn(move || flusher_loop(j, Duration::from_secs(3600)))
        };

        journal.commit(vec![block_buf(120, 9)]).unwrap();
        journal.crash();
        flusher.join().unwrap();
        assert_eq!(disk.block(120)[0], 0);
        assert_eq!(journal.pending_batches(), 1);
    }
}
