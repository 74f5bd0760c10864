//! 基础数据类型
//!
//! 块号、inode 编号和磁盘地址。

use crate::consts::NBITBLOCK;
use core::fmt;

/// 块号
pub type Bnum = u64;

/// inode 编号
pub type Inum = u64;

/// 事务 ID
pub type TxnId = u64;

/// 磁盘地址：块号 + 块内位偏移
///
/// 按 `(blkno, off)` 全序排列，这也是事务内加锁的顺序基础。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr {
    /// 块号
    pub blkno: Bnum,
    /// 块内位偏移
    pub off: u64,
}

impl Addr {
    /// 创建地址
    pub const fn new(blkno: Bnum, off: u64) -> Self {
        Self { blkno, off }
    }

    /// 整块地址
    pub const fn block(blkno: Bnum) -> Self {
        Self { blkno, off: 0 }
    }

    /// 展平成单个整数，用作锁表的键
    pub const fn flatten(&self) -> u64 {
        self.blkno * NBITBLOCK + self.off
    }

    /// 块内字节偏移
    pub const fn byte_off(&self) -> usize {
        (self.off / 8) as usize
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.blkno, self.off)
    }
}
