//! 日志恢复逻辑
//!
//! 从日志头记录的位置开始扫描，逐个校验批次并重放到 home 位置，
//! 遇到第一个无效批次即停止（最后一次写可能被撕裂）。
//! 只有真正重放了批次才改写日志头，所以对一个干净的日志重复恢复不会产生任何写入。

use super::checksum::BatchChecksum;
use super::types::*;
use super::JournalError;
use crate::block::{BlockDev, BlockDevice};
use crate::consts::{BLOCK_SIZE, MAX_BATCH_BLOCKS};
use crate::error::Result;
use crate::superblock::FsSuper;
use crate::types::Bnum;

/// 恢复结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 日志头不存在，新初始化了空日志
    pub fresh: bool,
    /// 重放的批次数
    pub batches: u64,
    /// 重放的块数
    pub blocks: u64,
    /// 恢复后的日志头位置
    pub head: u64,
    /// 恢复后的下一个批次序号
    pub seq: u64,
}

/// 扫描到的完整批次
struct ScannedBatch {
    homes: Vec<Bnum>,
    blocks: Vec<Vec<u8>>,
}

/// 执行日志恢复
///
/// # 参数
///
/// * `dev` - 块设备
/// * `sb` - 布局
///
/// # 恢复流程
///
/// 1. 读取日志头；魔数不对说明是新盘，写入空日志头后返回
/// 2. 从 head 开始逐个读取批次，校验 descriptor、commit 与校验和
/// 3. 把有效批次按顺序写回 home 位置
/// 4. 有重放时，屏障后把日志头推进到最后一个有效批次之后
pub fn recover<D: BlockDevice>(dev: &BlockDev<D>, sb: &FsSuper) -> Result<RecoveryReport> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    dev.read_block(sb.log_header(), &mut buf)?;

    let header = match LogHeader::decode(&buf) {
        Some(h) => h,
        None => {
            let header = LogHeader {
                head: 0,
                seq: 1,
                log_blocks: sb.log_blocks(),
            };
            dev.write_block(sb.log_header(), &header.encode())?;
            dev.flush()?;
            log::info!("[RECOVERY] no log header, initialized empty log");
            return Ok(RecoveryReport {
                fresh: true,
                head: header.head,
                seq: header.seq,
                ..RecoveryReport::default()
            });
        }
    };

    if header.log_blocks != sb.log_blocks() {
        log::error!(
            "[RECOVERY] log header says {} blocks, layout has {}",
            header.log_blocks,
            sb.log_blocks()
        );
        return Err(JournalError::BadGeometry.into());
    }

    let mut report = RecoveryReport {
        fresh: false,
        batches: 0,
        blocks: 0,
        head: header.head,
        seq: header.seq,
    };
    let mut pos = header.head;
    let mut seq = header.seq;

    while let Some(batch) = read_batch(dev, sb, header.head, pos, seq)? {
        for (home, img) in batch.homes.iter().zip(batch.blocks.iter()) {
            dev.write_block(*home, img)?;
        }
        let count = batch.homes.len() as u64;
        log::debug!("[RECOVERY] replayed batch seq={} pos={} blocks={}", seq, pos, count);
        report.batches += 1;
        report.blocks += count;
        pos += count + 2;
        seq += 1;
    }

    if report.batches > 0 {
        dev.flush()?;
        let header = LogHeader {
            head: pos,
            seq,
            log_blocks: sb.log_blocks(),
        };
        dev.write_block(sb.log_header(), &header.encode())?;
        dev.flush()?;
        log::info!(
            "[RECOVERY] replayed {} batches ({} blocks), head {} -> {}",
            report.batches,
            report.blocks,
            report.head,
            pos
        );
    } else {
        log::debug!("[RECOVERY] log clean at head {}", pos);
    }

    report.head = pos;
    report.seq = seq;
    Ok(report)
}

fn read_log<D: BlockDevice>(dev: &BlockDev<D>, sb: &FsSuper, pos: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    dev.read_block(sb.log_start() + pos % sb.log_blocks(), &mut buf)?;
    Ok(buf)
}

/// 读取并校验 `pos` 处的批次；无效时返回 None
fn read_batch<D: BlockDevice>(
    dev: &BlockDev<D>,
    sb: &FsSuper,
    head: u64,
    pos: u64,
    seq: u64,
) -> Result<Option<ScannedBatch>> {
    let span_left = sb.log_blocks() - (pos - head);
    if span_left < 3 {
        return Ok(None);
    }

    let desc = read_log(dev, sb, pos)?;
    let hdr = match FrameHeader::read(&desc) {
        Some(h) if h.matches(KIND_DESCRIPTOR, seq, pos) => h,
        _ => return Ok(None),
    };
    let count = hdr.count as u64;
    if count == 0 || count as usize > MAX_BATCH_BLOCKS || count + 2 > span_left {
        log::warn!("[RECOVERY] descriptor at pos {} has bad count {}", pos, count);
        return Ok(None);
    }

    let homes = decode_homes(&desc, count as usize);
    if homes
        .iter()
        .any(|&h| h < sb.bitmap_block_start() || h >= sb.size())
    {
        log::warn!("[RECOVERY] descriptor at pos {} targets the log region", pos);
        return Ok(None);
    }

    let mut csum = BatchChecksum::new();
    csum.update(&desc);
    let mut blocks = Vec::with_capacity(count as usize);
    for i in 0..count {
        let b = read_log(dev, sb, pos + 1 + i)?;
        csum.update(&b);
        blocks.push(b);
    }

    let commit = read_log(dev, sb, pos + count + 1)?;
    match FrameHeader::read(&commit) {
        Some(c) if c.matches(KIND_COMMIT, seq, pos) && c.count == hdr.count => {}
        _ => {
            log::info!("[RECOVERY] batch seq={} at pos {} has no commit block", seq, pos);
            return Ok(None);
        }
    }
    if commit_checksum(&commit) != csum.finalize() {
        log::warn!("[RECOVERY] batch seq={} at pos {} is torn (checksum mismatch)", seq, pos);
        return Ok(None);
    }

    Ok(Some(ScannedBatch { homes, blocks }))
}
