//! 目录操作模块
//!
//! 目录数据是定长目录项的数组，每项 64 字节：
//!
//! ```text
//!   0  inum     u64   0 表示空槽
//!   8  name_len u8
//!   9  name     [u8; 55]
//! ```
//!
//! "." 与 ".." 不落盘，查找时直接合成；".." 一律指向根目录。

use crate::balloc::BlockAllocator;
use crate::block::BlockDevice;
use crate::consts::{BLOCK_SIZE, ROOTINUM};
use crate::error::{Error, ErrorKind, Result};
use crate::inode::{bmap, read_at, write_at, Inode, InodeKind};
use crate::superblock::FsSuper;
use crate::transaction::Transaction;
use crate::types::Inum;
use byteorder::{ByteOrder, LittleEndian};

/// 目录项大小（字节）
pub const DIRENT_SIZE: usize = 64;

/// 文件名最大长度（字节）
pub const MAX_NAME_LEN: usize = DIRENT_SIZE - 9;

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// inode 编号
    pub inum: Inum,
    /// 文件名
    pub name: String,
}

pub(crate) fn check_dir(dir: &Inode) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::new(ErrorKind::InvalidInput, "Not a directory"));
    }
    Ok(())
}

pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::new(ErrorKind::InvalidInput, "Bad file name length"));
    }
    if name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(Error::new(ErrorKind::InvalidInput, "Reserved file name"));
    }
    Ok(())
}

fn decode(slot: &[u8]) -> Option<DirEntry> {
    let inum = LittleEndian::read_u64(&slot[0..8]);
    if inum == 0 {
        return None;
    }
    let len = (slot[8] as usize).min(MAX_NAME_LEN);
    Some(DirEntry {
        inum,
        name: String::from_utf8_lossy(&slot[9..9 + len]).into_owned(),
    })
}

fn encode(inum: Inum, name: &str) -> [u8; DIRENT_SIZE] {
    let mut slot = [0u8; DIRENT_SIZE];
    LittleEndian::write_u64(&mut slot[0..8], inum);
    slot[8] = name.len() as u8;
    slot[9..9 + name.len()].copy_from_slice(name.as_bytes());
    slot
}

/// 读出全部槽位：`(偏移, 目录项)`
fn scan<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    dir: &Inode,
) -> Result<Vec<(u64, Option<DirEntry>)>> {
    let data = read_at(tx, dir, 0, dir.size as usize)?;
    Ok(data
        .chunks_exact(DIRENT_SIZE)
        .enumerate()
        .map(|(i, slot)| ((i * DIRENT_SIZE) as u64, decode(slot)))
        .collect())
}

/// 在目录中查找名字
pub fn lookup<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, dir: &Inode, name: &str) -> Result<Option<Inum>> {
    check_dir(dir)?;
    match name {
        "." => return Ok(Some(dir.inum)),
        ".." => return Ok(Some(ROOTINUM)),
        _ => {}
    }
    Ok(scan(tx, dir)?
        .into_iter()
        .find_map(|(_, e)| e.filter(|e| e.name == name).map(|e| e.inum)))
}

/// 添加目录项
///
/// 优先复用空槽，没有空槽时追加到目录末尾。调用方负责写回 `dir`。
pub fn add_entry<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    balloc: &BlockAllocator,
    dir: &mut Inode,
    name: &str,
    inum: Inum,
) -> Result<()> {
    check_dir(dir)?;
    check_name(name)?;
    let slots = scan(tx, dir)?;
    if slots.iter().any(|(_, e)| e.as_ref().is_some_and(|e| e.name == name)) {
        return Err(Error::new(ErrorKind::AlreadyExists, "Name already exists"));
    }
    let off = slots
        .iter()
        .find(|(_, e)| e.is_none())
        .map_or(dir.size, |(off, _)| *off);
    write_at(tx, balloc, dir, off, &encode(inum, name))?;
    log::debug!("[DIR] txn {} linked {:?} -> {} in dir {}", tx.id(), name, inum, dir.inum);
    Ok(())
}

/// 删除目录项，返回它指向的 inode
pub fn remove_entry<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, dir: &Inode, name: &str) -> Result<Inum> {
    check_dir(dir)?;
    check_name(name)?;
    let (off, entry) = scan(tx, dir)?
        .into_iter()
        .find_map(|(off, e)| e.filter(|e| e.name == name).map(|e| (off, e)))
        .ok_or(Error::new(ErrorKind::NotFound, "No such entry"))?;

    let bs = BLOCK_SIZE as u64;
    let bno = bmap(tx, dir, off / bs)?.ok_or(Error::new(ErrorKind::Corrupted, "Directory entry in a hole"))?;
    let boff = (off % bs) as usize;
    tx.modify_block(bno, |blk| blk[boff..boff + DIRENT_SIZE].fill(0))?;
    log::debug!("[DIR] txn {} unlinked {:?} from dir {}", tx.id(), name, dir.inum);
    Ok(entry.inum)
}

/// 列出目录项（含合成的 "." 与 ".."）
pub fn entries<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, dir: &Inode) -> Result<Vec<DirEntry>> {
    check_dir(dir)?;
    let mut out = vec![
        DirEntry { inum: dir.inum, name: ".".into() },
        DirEntry { inum: ROOTINUM, name: "..".into() },
    ];
    out.extend(scan(tx, dir)?.into_iter().filter_map(|(_, e)| e));
    Ok(out)
}

/// 目录中是否只剩 "." 与 ".."
pub fn is_empty<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, dir: &Inode) -> Result<bool> {
    check_dir(dir)?;
    Ok(scan(tx, dir)?.iter().all(|(_, e)| e.is_none()))
}

/// 把根 inode 初始化为空目录
pub fn mk_root_dir<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, sb: &FsSuper, gen: u64) -> Result<Inode> {
    let mut root = Inode::load(tx, sb, ROOTINUM)?;
    if !root.is_free() {
        log::error!("[DIR] root inode already in use");
        return Err(Error::new(ErrorKind::AlreadyExists, "Root inode already in use"));
    }
    root.kind = InodeKind::Dir;
    root.nlink = 2;
    root.gen = gen;
    root.store(tx, sb)?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balloc::tests::formatted;

    #[test]
    fn test_root_dir_lookup_dots() {
        let (_disk, mgr, _balloc) = formatted(2048);
        let sb = *mgr.super_block();
        let mut tx = mgr.begin();
        let root = mk_root_dir(&mut tx, &sb, 7).unwrap();
        assert_eq!(root.nlink, 2);
        assert_eq!(lookup(&mut tx, &root, ".").unwrap(), Some(ROOTINUM));
        assert_eq!(lookup(&mut tx, &root, "..").unwrap(), Some(ROOTINUM));
        assert_eq!(lookup(&mut tx, &root, "missing").unwrap(), None);
        assert!(is_empty(&mut tx, &root).unwrap());
        assert_eq!(
            mk_root_dir(&mut tx, &sb, 8).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_add_remove_and_reuse_slot() {
        let (_disk, mgr, balloc) = formatted(2048);
        let sb = *mgr.super_block();
        let mut tx = mgr.begin();
        let mut root = mk_root_dir(&mut tx, &sb, 1).unwrap();

        add_entry(&mut tx, &balloc, &mut root, "a", 5).unwrap();
        add_entry(&mut tx, &balloc, &mut root, "b", 6).unwrap();
        assert_eq!(root.size, 2 * DIRENT_SIZE as u64);
        assert_eq!(
            add_entry(&mut tx, &balloc, &mut root, "a", 9).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );

        assert_eq!(remove_entry(&mut tx, &root, "a").unwrap(), 5);
        assert_eq!(lookup(&mut tx, &root, "a").unwrap(), None);
        assert_eq!(remove_entry(&mut tx, &root, "a").unwrap_err().kind(), ErrorKind::NotFound);

        add_entry(&mut tx, &balloc, &mut root, "c", 7).unwrap();
        assert_eq!(root.size, 2 * DIRENT_SIZE as u64);
        let names: Vec<_> = entries(&mut tx, &root).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", "..", "c", "b"]);
        root.store(&mut tx, &sb).unwrap();
        tx.commit().unwrap();

        let mut tx = mgr.begin();
        let root = Inode::load(&mut tx, &sb, ROOTINUM).unwrap();
        assert_eq!(lookup(&mut tx, &root, "c").unwrap(), Some(7));
        assert!(!is_empty(&mut tx, &root).unwrap());
    }

    #[test]
    fn test_name_validation() {
        let (_disk, mgr, balloc) = formatted(2048);
        let sb = *mgr.super_block();
        let mut tx = mgr.begin();
        let mut root = mk_root_dir(&mut tx, &sb, 1).unwrap();
        let long = "x".repeat(MAX_NAME_LEN + 1);
        for bad in ["", ".", "..", "a/b", long.as_str()] {
            assert_eq!(
                add_entry(&mut tx, &balloc, &mut root, bad, 5).unwrap_err().kind(),
                ErrorKind::InvalidInput
            );
        }
        add_entry(&mut tx, &balloc, &mut root, &"y".repeat(MAX_NAME_LEN), 5).unwrap();

        let file = Inode::empty(9);
        assert_eq!(lookup(&mut tx, &file, "a").unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
