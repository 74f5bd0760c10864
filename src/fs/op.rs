//! 文件系统操作事务
//!
//! [`Op`] 把一个事务和分配器、回收队列、引用表绑在一起，是协议层的入口：
//!
//! ```rust,ignore
//! let mut op = fs.begin();
//! let mut dir = op.get_inode(ROOTINUM)?;
//! let mut file = op.alloc_inode(InodeKind::File)?.ok_or(...)?;
//! op.dir_link(&mut dir, "hello", &mut file)?;
//! op.write_at(&mut file, 0, b"world")?;
//! op.commit()?;
//! ```
//!
//! inode 必须按编号升序获取；新分配的 inode 不受此限制。

use super::FsState;
use crate::block::BlockDevice;
use crate::dir::{self, DirEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::inode::{self, Inode, InodeKind};
use crate::transaction::Transaction;
use crate::types::{Bnum, Inum, TxnId};

/// 文件系统操作
pub struct Op<'a, D: BlockDevice + 'static> {
    fs: &'a FsState<D>,
    tx: Transaction<'a, D>,
    /// 本操作往回收队列里放了东西
    queued: bool,
}

impl<'a, D: BlockDevice + 'static> Op<'a, D> {
    pub(super) fn new(fs: &'a FsState<D>) -> Self {
        Self {
            fs,
            tx: fs.txn.begin(),
            queued: false,
        }
    }

    /// 事务 ID
    pub fn id(&self) -> TxnId {
        self.tx.id()
    }

    /// 底层事务
    pub fn txn(&mut self) -> &mut Transaction<'a, D> {
        &mut self.tx
    }

    /// 读取并锁住 inode
    pub fn get_inode(&mut self, inum: Inum) -> Result<Inode> {
        Inode::load(&mut self.tx, &self.fs.sb, inum)
    }

    /// 写回 inode
    pub fn put_inode(&mut self, inode: &Inode) -> Result<()> {
        inode.store(&mut self.tx, &self.fs.sb)
    }

    /// 分配并初始化一个 inode（链接数为 0，由 `dir_link` 增加）
    ///
    /// # 返回
    ///
    /// inode 用尽时返回 `None`
    pub fn alloc_inode(&mut self, kind: InodeKind) -> Result<Option<Inode>> {
        if kind == InodeKind::Free {
            return Err(Error::new(ErrorKind::InvalidInput, "Cannot allocate a free inode"));
        }
        let Some(inum) = self.fs.ialloc.alloc_inode(&mut self.tx)? else {
            return Ok(None);
        };
        let mut ino = Inode::empty(inum);
        ino.kind = kind;
        ino.gen = self.fs.next_gen();
        ino.mtime = super::now();
        self.put_inode(&ino)?;
        log::debug!("[IALLOC] txn {} allocated inode {} ({:?})", self.id(), inum, kind);
        Ok(Some(ino))
    }

    /// 读取文件内容
    pub fn read_at(&mut self, inode: &Inode, off: u64, len: usize) -> Result<Vec<u8>> {
        inode::read_at(&mut self.tx, inode, off, len)
    }

    /// 写入文件内容并写回 inode
    pub fn write_at(&mut self, inode: &mut Inode, off: u64, data: &[u8]) -> Result<usize> {
        let n = inode::write_at(&mut self.tx, &self.fs.balloc, inode, off, data)?;
        inode.mtime = super::now();
        self.put_inode(inode)?;
        Ok(n)
    }

    /// 调整文件大小并写回 inode
    pub fn truncate(&mut self, inode: &mut Inode, size: u64) -> Result<()> {
        inode::truncate(&mut self.tx, &self.fs.balloc, inode, size)?;
        inode.mtime = super::now();
        self.put_inode(inode)
    }

    /// 在目录中查找
    pub fn dir_lookup(&mut self, dir: &Inode, name: &str) -> Result<Option<Inum>> {
        dir::lookup(&mut self.tx, dir, name)
    }

    /// 列出目录
    pub fn dir_entries(&mut self, dir: &Inode) -> Result<Vec<DirEntry>> {
        dir::entries(&mut self.tx, dir)
    }

    /// 添加目录项，链接数加一，写回两个 inode
    pub fn dir_link(&mut self, dir: &mut Inode, name: &str, child: &mut Inode) -> Result<()> {
        dir::add_entry(&mut self.tx, &self.fs.balloc, dir, name, child.inum)?;
        child.nlink += 1;
        dir.mtime = super::now();
        self.put_inode(child)?;
        self.put_inode(dir)
    }

    /// 删除目录项并写回目录 inode，返回被删项指向的 inode
    ///
    /// 目标 inode 的链接数由随后的 [`Op::unlink`] 处理。
    pub fn dir_unlink(&mut self, dir: &mut Inode, name: &str) -> Result<Inum> {
        let inum = dir::remove_entry(&mut self.tx, dir, name)?;
        dir.mtime = super::now();
        self.put_inode(dir)?;
        Ok(inum)
    }

    /// 链接数减一；降到 0 时释放 inode
    ///
    /// 仍被打开，或者有间接块需要分多步释放时，inode 进入回收队列，
    /// 提交后唤醒回收线程；否则在本事务内直接释放。
    pub fn unlink(&mut self, inode: &mut Inode) -> Result<()> {
        if inode.nlink == 0 {
            log::error!("[FS] unlink of inode {} with no links", inode.inum);
            return Err(Error::new(ErrorKind::Corrupted, "Inode has no links"));
        }
        if inode.is_dir() {
            if !dir::is_empty(&mut self.tx, inode)? {
                return Err(Error::new(ErrorKind::NotEmpty, "Directory not empty"));
            }
            inode.nlink = 0;
        } else {
            inode.nlink -= 1;
        }
        if inode.nlink > 0 {
            return self.put_inode(inode);
        }

        let inum = inode.inum;
        if self.fs.refs.count(inum) > 0 || inode.indirect != 0 {
            self.put_inode(inode)?;
            self.fs.queue.push(&mut self.tx, inum)?;
            self.queued = true;
            return Ok(());
        }

        // 加锁顺序：inode 位图 → 块位图
        self.fs.ialloc.free_inode(&mut self.tx, inum)?;
        inode::truncate_blocks(&mut self.tx, &self.fs.balloc, inode, 0, u64::MAX)?;
        *inode = Inode::empty(inum);
        self.put_inode(inode)?;
        log::debug!("[FS] txn {} freed inode {} inline", self.id(), inum);
        Ok(())
    }

    /// 块是否已分配
    pub fn is_block_allocated(&mut self, bno: Bnum) -> Result<bool> {
        self.fs.balloc.is_allocated(&mut self.tx, bno)
    }

    /// inode 是否已分配
    pub fn is_inode_allocated(&mut self, inum: Inum) -> Result<bool> {
        self.fs.ialloc.is_allocated(&mut self.tx, inum)
    }

    /// 回收队列内容
    pub fn queued_inodes(&mut self) -> Result<Vec<Inum>> {
        self.fs.queue.list(&mut self.tx)
    }

    /// 提交；返回 `Ok` 时已持久化
    pub fn commit(self) -> Result<()> {
        let Self { fs, tx, queued } = self;
        tx.commit()?;
        if queued {
            fs.signal.kick();
        }
        Ok(())
    }

    /// 不稳定提交：其他操作立即可见，落盘要等 [`FileSystem::flush`](super::FileSystem::flush)
    pub fn commit_unstable(self) -> Result<()> {
        let Self { fs, tx, queued } = self;
        tx.commit_unstable()?;
        if queued {
            fs.signal.kick();
        }
        Ok(())
    }

    /// 放弃
    pub fn abort(self) {
        self.tx.abort();
    }
}
