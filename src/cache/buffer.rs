//! 事务缓冲区
//!
//! 一个缓冲区覆盖某个块内按字节对齐的一段位区间：整块（位图、队列、数据块）
//! 或一条 inode 记录。同一物理块只会以一种形状被访问。

use crate::consts::{BLOCK_SIZE, NBITBLOCK};
use crate::error::{Error, ErrorKind, Result};
use crate::types::Addr;
use bitflags::bitflags;

bitflags! {
    /// 缓冲区标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u8 {
        /// 内容已被事务修改
        const DIRTY = 0x01;
        /// 本事务新分配的单元，零初始化且不读盘
        const FRESH = 0x02;
    }
}

/// 事务缓冲区
#[derive(Debug, Clone)]
pub struct Buffer {
    /// 起始地址
    pub addr: Addr,
    /// 长度（位）
    pub sz: u64,
    /// 数据
    pub data: Vec<u8>,
    /// 状态标志
    pub flags: BufFlags,
}

impl Buffer {
    /// 检查地址与长度能否构成缓冲区
    pub fn validate(addr: Addr, sz: u64) -> Result<()> {
        if sz == 0 || sz % 8 != 0 || addr.off % 8 != 0 || addr.off + sz > NBITBLOCK {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer range not byte aligned"));
        }
        Ok(())
    }

    /// 零初始化的新单元
    pub fn fresh(addr: Addr, sz: u64) -> Self {
        Self {
            addr,
            sz,
            data: vec![0u8; (sz / 8) as usize],
            flags: BufFlags::DIRTY | BufFlags::FRESH,
        }
    }

    /// 从块镜像中截取
    pub fn from_block(addr: Addr, sz: u64, block: &[u8]) -> Self {
        let start = addr.byte_off();
        let end = start + (sz / 8) as usize;
        Self {
            addr,
            sz,
            data: block[start..end].to_vec(),
            flags: BufFlags::empty(),
        }
    }

    /// 把内容合并回块镜像
    pub fn install(&self, block: &mut [u8]) {
        let start = self.addr.byte_off();
        block[start..start + self.data.len()].copy_from_slice(&self.data);
    }

    /// 是否覆盖整块
    pub fn is_whole_block(&self) -> bool {
        self.addr.off == 0 && self.sz == NBITBLOCK && self.data.len() == BLOCK_SIZE
    }

    /// 是否已修改
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(BufFlags::DIRTY)
    }

    /// 是否为新分配单元
    pub fn is_fresh(&self) -> bool {
        self.flags.contains(BufFlags::FRESH)
    }

    /// 标记为已修改
    pub fn set_dirty(&mut self) {
        self.flags.insert(BufFlags::DIRTY);
    }

    /// 重置为零初始化的新单元
    pub fn reset_fresh(&mut self) {
        self.data.fill(0);
        self.flags = BufFlags::DIRTY | BufFlags::FRESH;
    }
}
