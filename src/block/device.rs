//! 块设备核心类型

use crate::consts::BLOCK_SIZE;
use crate::error::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。引擎会从多个线程同时访问设备，
/// 因此所有方法都只取 `&self`，实现需要自行保证单块写入的原子性。
///
/// # 示例
///
/// ```rust,ignore
/// use txnfs_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn total_blocks(&self) -> u64 {
///         1 << 20
///     }
///
///     fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
///         // 实现块读取
///         Ok(())
///     }
///
///     fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()> {
///         // 实现块写入
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice: Send + Sync {
    /// 逻辑块大小（必须为 4096）
    fn block_size(&self) -> u32 {
        BLOCK_SIZE as u32
    }

    /// 总块数
    fn total_blocks(&self) -> u64;

    /// 读取一个块
    ///
    /// # 参数
    ///
    /// * `bno` - 块号
    /// * `buf` - 目标缓冲区（长度为一个块）
    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()>;

    /// 写入一个块
    ///
    /// # 参数
    ///
    /// * `bno` - 块号
    /// * `buf` - 源缓冲区（长度为一个块）
    fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()>;

    /// 写屏障：之前的所有写入落盘后才返回
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn total_blocks(&self) -> u64 {
        (**self).total_blocks()
    }

    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_block(bno, buf)
    }

    fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()> {
        (**self).write_block(bno, buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// 设备 I/O 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevStats {
    /// 物理读取次数
    pub reads: u64,
    /// 物理写入次数
    pub writes: u64,
    /// 写屏障次数
    pub flushes: u64,
}

/// 块设备包装器
///
/// 检查块号与缓冲区长度，并统计物理 I/O 次数。
/// 引擎内部通过 `Arc<BlockDev<D>>` 在日志、缓存与后台线程间共享。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 总块数
    total_blocks: u64,
    /// 物理读取次数
    read_count: AtomicU64,
    /// 物理写入次数
    write_count: AtomicU64,
    /// 写屏障次数
    flush_count: AtomicU64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器
    pub fn new(device: D) -> Result<Self> {
        if device.block_size() as usize != BLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device block size must be 4096",
            ));
        }

        let total_blocks = device.total_blocks();
        Ok(Self {
            device,
            total_blocks,
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        })
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取总块数
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// 读取一个块
    pub fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        self.check(bno, buf.len())?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.device.read_block(bno, buf)
    }

    /// 写入一个块
    pub fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()> {
        self.check(bno, buf.len())?;
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.device.write_block(bno, buf)
    }

    /// 写屏障
    pub fn flush(&self) -> Result<()> {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        self.device.flush()
    }

    /// 获取 I/O 统计
    pub fn stats(&self) -> DevStats {
        DevStats {
            reads: self.read_count.load(Ordering::Relaxed),
            writes: self.write_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
        }
    }

    fn check(&self, bno: u64, len: usize) -> Result<()> {
        if bno >= self.total_blocks {
            log::error!("[BLOCK] block {} beyond device end {}", bno, self.total_blocks);
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        if len != BLOCK_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer is not one block"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;

    #[test]
    fn test_block_dev_counts_io() {
        let dev = BlockDev::new(MemDisk::new(16)).unwrap();
        let data = vec![7u8; BLOCK_SIZE];
        dev.write_block(3, &data).unwrap();
        dev.flush().unwrap();

        let mut buf = vec![0u8; BLOCK_SIZE];
        dev.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(dev.stats(), DevStats { reads: 1, writes: 1, flushes: 1 });
    }

    #[test]
    fn test_block_dev_rejects_bad_requests() {
        let dev = BlockDev::new(MemDisk::new(4)).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        assert_eq!(dev.read_block(4, &mut buf).unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut short = vec![0u8; 512];
        assert_eq!(dev.read_block(0, &mut short).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_arc_device_shares_contents() {
        let disk = Arc::new(MemDisk::new(4));
        let dev = BlockDev::new(disk.clone()).unwrap();
        dev.write_block(1, &vec![9u8; BLOCK_SIZE]).unwrap();
        assert_eq!(disk.snapshot()[BLOCK_SIZE], 9);
    }
}
