//! 文件块设备
//!
//! 用普通文件（或磁盘镜像）充当块设备，写屏障映射到 `sync_data`。

use super::BlockDevice;
use crate::consts::BLOCK_SIZE;
use crate::error::{Error, ErrorKind, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// 文件块设备
pub struct FileDisk {
    file: File,
    nblocks: u64,
}

impl FileDisk {
    /// 打开（必要时创建并扩展）镜像文件
    ///
    /// # 参数
    ///
    /// * `path` - 镜像路径
    /// * `nblocks` - 设备块数
    pub fn open<P: AsRef<Path>>(path: P, nblocks: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to open disk image", e))?;

        let want = nblocks * BLOCK_SIZE as u64;
        let len = file
            .metadata()
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to stat disk image", e))?
            .len();
        if len < want {
            file.set_len(want)
                .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to extend disk image", e))?;
        }

        log::info!("[FILEDISK] opened image with {} blocks", nblocks);
        Ok(Self { file, nblocks })
    }
}

impl BlockDevice for FileDisk {
    fn total_blocks(&self) -> u64 {
        self.nblocks
    }

    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, bno * BLOCK_SIZE as u64)
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Disk image read failed", e))
    }

    fn write_block(&self, bno: u64, buf: &[u8]) -> Result<()> {
        self.file
            .write_all_at(buf, bno * BLOCK_SIZE as u64)
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Disk image write failed", e))
    }

    fn flush(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Disk image sync failed", e))
    }
}
