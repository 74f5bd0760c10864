//! 块设备抽象
//!
//! 提供块设备接口和块级 I/O 操作。
//! block/device.rs 定义 `BlockDevice` trait 和带统计的 `BlockDev` 包装器；
//! block/mem.rs 是可注入掉电故障的内存设备；block/file.rs 用镜像文件做设备。

mod device;
mod file;
mod mem;

pub use device::{BlockDev, BlockDevice, DevStats};
pub use file::FileDisk;
pub use mem::MemDisk;
