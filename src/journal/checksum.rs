//! 日志批次校验和
//!
//! commit 块里的 CRC32 覆盖 descriptor 块与全部数据块，
//! 任何一块没有完整落盘都会让校验失败，恢复时据此识别撕裂的批次。

use crc32fast::Hasher;

/// 批次校验和计算器
pub struct BatchChecksum {
    hasher: Hasher,
}

impl Default for BatchChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchChecksum {
    /// 新建
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    /// 追加一个块
    #[inline]
    pub fn update(&mut self, block: &[u8]) {
        self.hasher.update(block);
    }

    /// 结束计算
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}
