//! 内存块设备
//!
//! 测试用设备。`fail_after(n)` 让之后第 n 次以后的写入被静默丢弃，
//! 模拟写到一半时掉电：已经完成的写入保留，之后的写入全部丢失。

use super::BlockDevice;
use crate::consts::BLOCK_SIZE;
use crate::error::{Error, ErrorKind, Result};
use crate::utils::lock;
use std::sync::Mutex;

struct MemDiskInner {
    data: Vec<u8>,
    /// 剩余可成功写入的次数，None 表示不限
    budget: Option<u64>,
    dropped: u64,
}

/// 内存块设备
pub struct MemDisk {
    nblocks: u64,
    inner: Mutex<MemDiskInner>,
}

impl MemDisk {
    /// 创建全零的内存设备
    pub fn new(nblocks: u64) -> Self {
        Self {
            nblocks,
            inner: Mutex::new(MemDiskInner {
                data: vec![0u8; nblocks as usize * BLOCK_SIZE],
                budget: None,
                dropped: 0,
            }),
        }
    }

    /// 再成功写入 `n` 次后丢弃所有写入
    pub fn fail_after(&self, n: u64) {
        lock(&self.inner).budget = Some(n);
    }

    /// 恢复正常写入
    pub fn reset_faults(&self) {
        let mut inner = lock(&self.inner);
        inner.budget = None;
        inner.dropped = 0;
    }

    /// 被丢弃的写入次数
    pub fn dropped_writes(&self) -> u64 {
        lock(&self.inner).dropped
    }

    /// 整盘内容快照
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.inner).data.clone()
    }

    /// 读取单个块（绕过引擎，用于检查）
    pub fn block(&self, bno: u64) -> Vec<u8> {
        let inner = lock(&self.inner);
        let start = bno as usize * BLOCK_SIZE;
        inner.data[start..start + BLOCK_SIZE].to_vec()
    }
}

impl BlockDevice for MemDisk {
    fn total_blocks(&self) -> u64 {
        self.nblocks
    }

    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        if bno >= self.nblocks {
            return Err(Error::new(ErrorKind::Io, "MemDisk read beyond end"));
        }
        let inner = lock(&self.inner);
        let start = bno as usize * BLOCK_SIZE;
        buf.copy_from_slice(&inner.data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()> {
        if bno >= self.nblocks {
            return Err(Error::new(ErrorKind::Io, "MemDisk write beyond end"));
        }
        let mut inner = lock(&self.inner);
        match inner.budget {
            Some(0) => {
                inner.dropped += 1;
                log::trace!("[MEMDISK] dropped write to block {}", bno);
                return Ok(());
            }
            Some(n) => inner.budget = Some(n - 1),
            None => {}
        }
        let start = bno as usize * BLOCK_SIZE;
        inner.data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}
