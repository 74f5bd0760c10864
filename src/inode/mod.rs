//! Inode 模块
//!
//! 128 字节的 inode 记录（小端）：
//!
//! ```text
//!   0  kind     u32    0 空闲 / 1 普通文件 / 2 目录
//!   4  nlink    u32
//!   8  gen      u64
//!   16 size     u64
//!   24 mtime    u64
//!   32 direct   [u64; 10]
//!   112 indirect u64
//! ```
//!
//! 记录总是通过事务读写，事务持有该记录的锁期间内容不会被他人修改。

mod data;

pub use data::{bmap, mapped_blocks, read_at, truncate, truncate_blocks, write_at};

use crate::block::BlockDevice;
use crate::consts::{INODESZ, NDIRECT, NULLINUM};
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::FsSuper;
use crate::transaction::Transaction;
use crate::types::{Bnum, Inum};
use byteorder::{ByteOrder, LittleEndian};

/// Inode 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InodeKind {
    /// 空闲槽位
    Free = 0,
    /// 普通文件
    File = 1,
    /// 目录
    Dir = 2,
}

impl InodeKind {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Self::Free),
            1 => Ok(Self::File),
            2 => Ok(Self::Dir),
            _ => Err(Error::new(ErrorKind::Corrupted, "Unknown inode kind")),
        }
    }
}

/// 内存中的 inode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// inode 编号
    pub inum: Inum,
    /// 类型
    pub kind: InodeKind,
    /// 链接数
    pub nlink: u32,
    /// 代号，编号复用时区分新旧文件
    pub gen: u64,
    /// 文件大小（字节）
    pub size: u64,
    /// 修改时间
    pub mtime: u64,
    /// 直接块指针，0 表示空洞
    pub direct: [Bnum; NDIRECT],
    /// 一级间接块，0 表示没有
    pub indirect: Bnum,
}

impl Inode {
    /// 空闲的 inode
    pub fn empty(inum: Inum) -> Self {
        Self {
            inum,
            kind: InodeKind::Free,
            nlink: 0,
            gen: 0,
            size: 0,
            mtime: 0,
            direct: [0; NDIRECT],
            indirect: 0,
        }
    }

    /// 解码记录
    pub fn decode(inum: Inum, buf: &[u8]) -> Result<Self> {
        if buf.len() != INODESZ as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "Inode record size mismatch"));
        }
        let mut direct = [0; NDIRECT];
        LittleEndian::read_u64_into(&buf[32..32 + NDIRECT * 8], &mut direct);
        Ok(Self {
            inum,
            kind: InodeKind::from_u32(LittleEndian::read_u32(&buf[0..4]))?,
            nlink: LittleEndian::read_u32(&buf[4..8]),
            gen: LittleEndian::read_u64(&buf[8..16]),
            size: LittleEndian::read_u64(&buf[16..24]),
            mtime: LittleEndian::read_u64(&buf[24..32]),
            direct,
            indirect: LittleEndian::read_u64(&buf[112..120]),
        })
    }

    /// 编码成记录
    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        LittleEndian::write_u32(&mut buf[0..4], self.kind as u32);
        LittleEndian::write_u32(&mut buf[4..8], self.nlink);
        LittleEndian::write_u64(&mut buf[8..16], self.gen);
        LittleEndian::write_u64(&mut buf[16..24], self.size);
        LittleEndian::write_u64(&mut buf[24..32], self.mtime);
        LittleEndian::write_u64_into(&self.direct, &mut buf[32..32 + NDIRECT * 8]);
        LittleEndian::write_u64(&mut buf[112..120], self.indirect);
    }

    /// 通过事务加载（同时获得该 inode 的锁）
    pub fn load<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, sb: &FsSuper, inum: Inum) -> Result<Self> {
        check_inum(sb, inum)?;
        let buf = tx.read(sb.inum2addr(inum), INODESZ * 8)?;
        Self::decode(inum, buf)
    }

    /// 通过事务写回
    pub fn store<D: BlockDevice + 'static>(&self, tx: &mut Transaction<'_, D>, sb: &FsSuper) -> Result<()> {
        check_inum(sb, self.inum)?;
        tx.modify(sb.inum2addr(self.inum), INODESZ * 8, |buf| self.encode(buf))
    }

    /// 是否空闲
    pub fn is_free(&self) -> bool {
        self.kind == InodeKind::Free
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Dir
    }
}

fn check_inum(sb: &FsSuper, inum: Inum) -> Result<()> {
    if inum == NULLINUM || inum >= sb.max_inum() {
        log::error!("[INODE] invalid inode number {}", inum);
        return Err(Error::new(ErrorKind::InvalidInput, "Invalid inode number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::manager;

    #[test]
    fn test_encode_decode_layout() {
        let mut ino = Inode::empty(7);
        ino.kind = InodeKind::File;
        ino.nlink = 2;
        ino.size = 5000;
        ino.direct[1] = 99;
        ino.indirect = 123;

        let mut buf = vec![0xFFu8; INODESZ as usize];
        ino.encode(&mut buf);
        assert_eq!(LittleEndian::read_u32(&buf[0..4]), 1);
        assert_eq!(LittleEndian::read_u64(&buf[40..48]), 99);
        assert_eq!(&buf[120..], &[0u8; 8]);
        assert_eq!(Inode::decode(7, &buf).unwrap(), ino);

        buf[0] = 9;
        assert_eq!(Inode::decode(7, &buf).unwrap_err().kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_load_store_through_transaction() {
        let (_disk, mgr) = manager(2048);
        let sb = *mgr.super_block();

        let mut tx = mgr.begin();
        let mut ino = Inode::load(&mut tx, &sb, 33).unwrap();
        assert!(ino.is_free());
        ino.kind = InodeKind::Dir;
        ino.store(&mut tx, &sb).unwrap();
        // 同一块里的另一个 inode 互不影响
        let mut other = Inode::load(&mut tx, &sb, 34).unwrap();
        other.kind = InodeKind::File;
        other.store(&mut tx, &sb).unwrap();
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        assert!(Inode::load(&mut tx, &sb, 33).unwrap().is_dir());
        assert_eq!(Inode::load(&mut tx, &sb, 34).unwrap().kind, InodeKind::File);
        assert_eq!(Inode::load(&mut tx, &sb, 0).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(Inode::load(&mut tx, &sb, 64).unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
