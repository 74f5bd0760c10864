//! txnfs_core: 事务化、可崩溃恢复的并发存储引擎
//!
//! 为网络文件共享服务提供底层存储：预写日志（组提交 + 恢复）、
//! 缓冲区与地址锁、事务、位图分配器，以及回收已删除但仍被打开的文件的后台线程。
//!
//! # 示例
//!
//! ```rust,ignore
//! use txnfs_core::{FileSystem, FsConfig, InodeKind, MemDisk, ROOTINUM};
//!
//! fn main() -> txnfs_core::Result<()> {
//!     let fs = FileSystem::mount(MemDisk::new(8192), FsConfig::default())?;
//!
//!     let mut op = fs.begin();
//!     let mut root = op.get_inode(ROOTINUM)?;
//!     if let Some(mut file) = op.alloc_inode(InodeKind::File)? {
//!         op.dir_link(&mut root, "hello", &mut file)?;
//!         op.write_at(&mut file, 0, b"world")?;
//!     }
//!     op.commit()?; // 返回时已持久化
//!
//!     fs.shutdown()
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象（含内存设备与文件设备）
//! - [`superblock`] - 磁盘布局
//! - [`cache`] - 缓冲区、地址锁、home 块缓存
//! - [`journal`] - 预写日志、组提交、安装与恢复
//! - [`transaction`] - 事务与事务管理器
//! - [`bitmap`] / [`balloc`] / [`ialloc`] - 位图分配
//! - [`inode`] / [`dir`] - inode 记录、文件数据与最小目录
//! - [`shrinker`] - 持久化回收队列与后台回收
//! - [`fs`] - 挂载、格式化、操作入口

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 基础类型
pub mod types;

/// 磁盘布局
pub mod superblock;

/// 缓冲区与锁
pub mod cache;

/// 预写日志
pub mod journal;

/// Transaction 系统
pub mod transaction;

/// 位图操作
pub mod bitmap;

/// 块分配
pub mod balloc;

/// Inode 分配
pub mod ialloc;

/// Inode 操作
pub mod inode;

/// 目录操作
pub mod dir;

/// 后台回收
pub mod shrinker;

/// 文件系统高级 API
pub mod fs;

pub(crate) mod utils;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDev, BlockDevice, FileDisk, MemDisk};

// 布局与常量
pub use consts::{BLOCK_SIZE, ROOTINUM};
pub use superblock::FsSuper;
pub use types::{Addr, Bnum, Inum, TxnId};

// 日志与事务
pub use journal::{JournalError, RecoveryReport};
pub use transaction::{Transaction, TxnManager};

// 分配
pub use balloc::BlockAllocator;
pub use ialloc::InodeAllocator;

// Inode 与目录
pub use dir::DirEntry;
pub use inode::{Inode, InodeKind};

// 文件系统
pub use fs::{FileSystem, FsConfig, FsStats, Op};
