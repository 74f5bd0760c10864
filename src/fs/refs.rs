//! 打开引用表
//!
//! 记录每个 inode 当前被打开的次数。表本身不落盘：崩溃后所有引用自然消失，
//! 回收队列里的 inode 在下次挂载后都会被回收。

use crate::error::{Error, ErrorKind, Result};
use crate::types::Inum;
use crate::utils::lock;
use std::collections::HashMap;
use std::sync::Mutex;

/// 打开引用表
#[derive(Debug, Default)]
pub struct RefTable {
    counts: Mutex<HashMap<Inum, u64>>,
}

impl RefTable {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 引用加一，返回新的计数
    pub fn inc(&self, inum: Inum) -> u64 {
        let mut counts = lock(&self.counts);
        let n = counts.entry(inum).or_insert(0);
        *n += 1;
        *n
    }

    /// 引用减一，返回剩余计数
    ///
    /// # 错误
    ///
    /// 没有打开引用时返回 `InvalidState`
    pub fn dec(&self, inum: Inum) -> Result<u64> {
        let mut counts = lock(&self.counts);
        let Some(n) = counts.get_mut(&inum) else {
            log::error!("[FS] close of inode {} without open", inum);
            return Err(Error::new(ErrorKind::InvalidState, "Inode is not open"));
        };
        *n -= 1;
        let left = *n;
        if left == 0 {
            counts.remove(&inum);
        }
        Ok(left)
    }

    /// 当前引用数
    pub fn count(&self, inum: Inum) -> u64 {
        lock(&self.counts).get(&inum).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_dec() {
        let refs = RefTable::new();
        assert_eq!(refs.inc(4), 1);
        assert_eq!(refs.inc(4), 2);
        assert_eq!(refs.dec(4).unwrap(), 1);
        assert_eq!(refs.count(4), 1);
        assert_eq!(refs.dec(4).unwrap(), 0);
        assert_eq!(refs.count(4), 0);
        assert_eq!(refs.dec(4).unwrap_err().kind(), ErrorKind::InvalidState);
    }
}
