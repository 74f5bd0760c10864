//! 文件数据块映射
//!
//! 逻辑块 `0..NDIRECT` 存在直接指针里，其余 `NINDIRECT` 个存在一级间接块里。
//! 这里的函数只修改内存中的 [`Inode`]，由调用方负责写回。

use super::Inode;
use crate::balloc::BlockAllocator;
use crate::block::BlockDevice;
use crate::consts::{BLOCK_SIZE, MAX_FILE_BLOCKS, NDIRECT, NINDIRECT};
use crate::error::{Error, ErrorKind, Result};
use crate::transaction::Transaction;
use crate::types::Bnum;
use byteorder::{ByteOrder, LittleEndian};

const BS: u64 = BLOCK_SIZE as u64;

/// 将逻辑块号映射到物理块号
///
/// # 返回
///
/// - `Ok(Some(bno))`: 已映射
/// - `Ok(None)`: 空洞
/// - `Err(InvalidInput)`: 超出最大文件大小
pub fn bmap<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, inode: &Inode, lbn: u64) -> Result<Option<Bnum>> {
    if lbn < NDIRECT as u64 {
        return Ok(nonzero(inode.direct[lbn as usize]));
    }
    if lbn >= MAX_FILE_BLOCKS {
        return Err(Error::new(ErrorKind::InvalidInput, "Logical block beyond maximum file size"));
    }
    if inode.indirect == 0 {
        return Ok(None);
    }
    let idx = (lbn - NDIRECT as u64) as usize * 8;
    let blk = tx.read_block(inode.indirect)?;
    Ok(nonzero(LittleEndian::read_u64(&blk[idx..idx + 8])))
}

fn nonzero(bno: Bnum) -> Option<Bnum> {
    (bno != 0).then_some(bno)
}

/// 映射逻辑块，空洞时分配新块
fn bmap_alloc<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    balloc: &BlockAllocator,
    inode: &mut Inode,
    lbn: u64,
) -> Result<Bnum> {
    if let Some(bno) = bmap(tx, inode, lbn)? {
        return Ok(bno);
    }
    if lbn < NDIRECT as u64 {
        let bno = alloc_or_nospace(tx, balloc)?;
        inode.direct[lbn as usize] = bno;
        return Ok(bno);
    }
    if inode.indirect == 0 {
        inode.indirect = alloc_or_nospace(tx, balloc)?;
        log::trace!("[INODE] inode {} indirect block {}", inode.inum, inode.indirect);
    }
    let bno = alloc_or_nospace(tx, balloc)?;
    let idx = (lbn - NDIRECT as u64) as usize * 8;
    tx.modify_block(inode.indirect, |blk| LittleEndian::write_u64(&mut blk[idx..idx + 8], bno))?;
    Ok(bno)
}

fn alloc_or_nospace<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, balloc: &BlockAllocator) -> Result<Bnum> {
    balloc
        .alloc_block(tx)?
        .ok_or(Error::new(ErrorKind::NoSpace, "No free data block"))
}

/// 读取 `[off, off + len)`，超过文件大小的部分被截掉，空洞读出 0
pub fn read_at<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    inode: &Inode,
    off: u64,
    len: usize,
) -> Result<Vec<u8>> {
    if off >= inode.size {
        return Ok(Vec::new());
    }
    let end = inode.size.min(off.saturating_add(len as u64));
    let mut out = Vec::with_capacity((end - off) as usize);
    let mut pos = off;
    while pos < end {
        let boff = (pos % BS) as usize;
        let n = (BS - pos % BS).min(end - pos) as usize;
        match bmap(tx, inode, pos / BS)? {
            Some(bno) => out.extend_from_slice(&tx.read_block(bno)?[boff..boff + n]),
            None => out.resize(out.len() + n, 0),
        }
        pos += n as u64;
    }
    Ok(out)
}

/// 在 `off` 处写入 `data`，必要时分配块并扩展文件大小
///
/// # 错误
///
/// 数据区用尽返回 `NoSpace`，此时事务应当放弃
pub fn write_at<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    balloc: &BlockAllocator,
    inode: &mut Inode,
    off: u64,
    data: &[u8],
) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let end = off
        .checked_add(data.len() as u64)
        .filter(|&end| end <= MAX_FILE_BLOCKS * BS)
        .ok_or(Error::new(ErrorKind::InvalidInput, "Write beyond maximum file size"))?;

    let mut pos = off;
    let mut src = data;
    while pos < end {
        let boff = (pos % BS) as usize;
        let n = (BS - pos % BS).min(end - pos) as usize;
        let bno = bmap_alloc(tx, balloc, inode, pos / BS)?;
        let (head, rest) = src.split_at(n);
        tx.modify_block(bno, |blk| blk[boff..boff + n].copy_from_slice(head))?;
        src = rest;
        pos += n as u64;
    }
    inode.size = inode.size.max(end);
    log::trace!("[INODE] txn {} wrote {} bytes at {} of inode {}", tx.id(), data.len(), off, inode.inum);
    Ok(data.len())
}

/// 已映射的块数（含间接块本身）
pub fn mapped_blocks<D: BlockDevice + 'static>(tx: &mut Transaction<'_, D>, inode: &Inode) -> Result<u64> {
    let mut n = inode.direct.iter().filter(|&&b| b != 0).count() as u64;
    if inode.indirect != 0 {
        let blk = tx.read_block(inode.indirect)?;
        n += 1 + blk.chunks_exact(8).filter(|p| LittleEndian::read_u64(p) != 0).count() as u64;
    }
    Ok(n)
}

/// 释放逻辑块号不小于 `keep` 的块，最多释放 `budget` 个
///
/// 先释放间接块里的指针（从高到低），再释放直接块，最后释放空了的间接块。
///
/// # 返回
///
/// 本次释放的块数；小于 `budget` 说明 `keep` 之后已经没有块
pub fn truncate_blocks<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    balloc: &BlockAllocator,
    inode: &mut Inode,
    keep: u64,
    budget: u64,
) -> Result<u64> {
    let mut freed = 0;

    if inode.indirect != 0 {
        let ind = inode.indirect;
        let mut ptrs = [0u64; NINDIRECT];
        LittleEndian::read_u64_into(tx.read_block(ind)?, &mut ptrs);

        let first = keep.saturating_sub(NDIRECT as u64).min(NINDIRECT as u64) as usize;
        let mut changed = false;
        for slot in ptrs[first..].iter_mut().rev() {
            if *slot == 0 {
                continue;
            }
            if freed == budget {
                break;
            }
            balloc.free_block(tx, *slot)?;
            *slot = 0;
            freed += 1;
            changed = true;
        }

        let empty = first == 0 && ptrs.iter().all(|&p| p == 0);
        if empty && freed < budget {
            balloc.free_block(tx, ind)?;
            inode.indirect = 0;
            freed += 1;
        } else if changed {
            tx.modify_block(ind, |blk| LittleEndian::write_u64_into(&ptrs, blk))?;
        }
    }

    let first = keep.min(NDIRECT as u64) as usize;
    for slot in inode.direct[first..].iter_mut().rev() {
        if *slot == 0 {
            continue;
        }
        if freed == budget {
            break;
        }
        balloc.free_block(tx, *slot)?;
        *slot = 0;
        freed += 1;
    }

    if freed > 0 {
        log::debug!("[INODE] txn {} freed {} blocks of inode {}", tx.id(), freed, inode.inum);
    }
    Ok(freed)
}

/// 调整文件大小
///
/// 缩小时释放多余的块，并把最后一个部分块的尾部清零，之后再扩展时读到的是 0。
pub fn truncate<D: BlockDevice + 'static>(
    tx: &mut Transaction<'_, D>,
    balloc: &BlockAllocator,
    inode: &mut Inode,
    size: u64,
) -> Result<()> {
    if size > MAX_FILE_BLOCKS * BS {
        return Err(Error::new(ErrorKind::InvalidInput, "Size beyond maximum file size"));
    }
    if size < inode.size {
        truncate_blocks(tx, balloc, inode, size.div_ceil(BS), u64::MAX)?;
        let tail = (size % BS) as usize;
        if tail != 0 {
            if let Some(bno) = bmap(tx, inode, size / BS)? {
                tx.modify_block(bno, |blk| blk[tail..].fill(0))?;
            }
        }
    }
    inode.size = size;
    Ok(())
}
