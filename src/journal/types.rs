//! 日志磁盘格式定义
//!
//! 所有字段小端存放。日志位置 `pos` 是单调递增的 u64，
//! 对应的磁盘块为 `log_start + pos % log_blocks`。
//!
//! ```text
//! 日志头（块 0）
//!   0  magic      u32
//!   8  head       u64   最早未安装批次的位置
//!   16 seq        u64   head 处批次的序号
//!   24 log_blocks u64
//!
//! descriptor 块                     commit 块
//!   0  magic u32                       0  magic    u32
//!   4  kind  u32 = 1                   4  kind     u32 = 2
//!   8  seq   u64                       8  seq      u64
//!   16 pos   u64                       16 pos      u64
//!   24 count u32                       24 count    u32
//!   32 homes [u64; count]              28 checksum u32
//! ```

use crate::consts::*;
use crate::types::Bnum;
use byteorder::{ByteOrder, LittleEndian};

/// descriptor 帧类型
pub const KIND_DESCRIPTOR: u32 = 1;

/// commit 帧类型
pub const KIND_COMMIT: u32 = 2;

/// 日志头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// 最早未安装批次的位置
    pub head: u64,
    /// head 处批次的序号
    pub seq: u64,
    /// 日志区块数
    pub log_blocks: u64,
}

impl LogHeader {
    /// 编码成一个块
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], LOG_HEADER_MAGIC);
        LittleEndian::write_u64(&mut buf[8..16], self.head);
        LittleEndian::write_u64(&mut buf[16..24], self.seq);
        LittleEndian::write_u64(&mut buf[24..32], self.log_blocks);
        buf
    }

    /// 解码；魔数不对时返回 None（未格式化的日志）
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if LittleEndian::read_u32(&buf[0..4]) != LOG_HEADER_MAGIC {
            return None;
        }
        Some(Self {
            head: LittleEndian::read_u64(&buf[8..16]),
            seq: LittleEndian::read_u64(&buf[16..24]),
            log_blocks: LittleEndian::read_u64(&buf[24..32]),
        })
    }
}

/// 帧公共头（descriptor 和 commit 共用前 28 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 帧类型
    pub kind: u32,
    /// 批次序号
    pub seq: u64,
    /// 批次起始位置
    pub pos: u64,
    /// 数据块数
    pub count: u32,
}

impl FrameHeader {
    fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], LOG_FRAME_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.kind);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
        LittleEndian::write_u64(&mut buf[16..24], self.pos);
        LittleEndian::write_u32(&mut buf[24..28], self.count);
    }

    /// 解码；魔数不对时返回 None
    pub fn read(buf: &[u8]) -> Option<Self> {
        if LittleEndian::read_u32(&buf[0..4]) != LOG_FRAME_MAGIC {
            return None;
        }
        Some(Self {
            kind: LittleEndian::read_u32(&buf[4..8]),
            seq: LittleEndian::read_u64(&buf[8..16]),
            pos: LittleEndian::read_u64(&buf[16..24]),
            count: LittleEndian::read_u32(&buf[24..28]),
        })
    }

    /// 是否与期望的批次一致
    pub fn matches(&self, kind: u32, seq: u64, pos: u64) -> bool {
        self.kind == kind && self.seq == seq && self.pos == pos
    }
}

/// 编码 descriptor 块
pub fn encode_descriptor(seq: u64, pos: u64, homes: &[Bnum]) -> Vec<u8> {
    debug_assert!(homes.len() <= MAX_BATCH_BLOCKS);
    let mut buf = vec![0u8; BLOCK_SIZE];
    FrameHeader {
        kind: KIND_DESCRIPTOR,
        seq,
        pos,
        count: homes.len() as u32,
    }
    .write(&mut buf);
    for (i, home) in homes.iter().enumerate() {
        let off = DESC_HOMES_OFFSET + i * 8;
        LittleEndian::write_u64(&mut buf[off..off + 8], *home);
    }
    buf
}

/// 读取 descriptor 中的 home 块号
pub fn decode_homes(buf: &[u8], count: usize) -> Vec<Bnum> {
    (0..count)
        .map(|i| {
            let off = DESC_HOMES_OFFSET + i * 8;
            LittleEndian::read_u64(&buf[off..off + 8])
        })
        .collect()
}

/// 编码 commit 块
pub fn encode_commit(seq: u64, pos: u64, count: u32, checksum: u32) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    FrameHeader {
        kind: KIND_COMMIT,
        seq,
        pos,
        count,
    }
    .write(&mut buf);
    LittleEndian::write_u32(&mut buf[28..32], checksum);
    buf
}

/// 读取 commit 块中的校验和
pub fn commit_checksum(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(&buf[28..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_requires_magic() {
        assert!(LogHeader::decode(&vec![0u8; BLOCK_SIZE]).is_none());
        let hdr = LogHeader { head: 77, seq: 5, log_blocks: 64 };
        assert_eq!(LogHeader::decode(&hdr.encode()), Some(hdr));
    }

    #[test]
    fn test_descriptor_layout() {
        let buf = encode_descriptor(3, 130, &[70, 71, 900]);
        let hdr = FrameHeader::read(&buf).unwrap();
        assert!(hdr.matches(KIND_DESCRIPTOR, 3, 130));
        assert!(!hdr.matches(KIND_COMMIT, 3, 130));
        assert_eq!(hdr.count, 3);
        assert_eq!(decode_homes(&buf, 3), vec![70, 71, 900]);
        assert_eq!(MAX_BATCH_BLOCKS, 508);
    }

    #[test]
    fn test_commit_carries_checksum() {
        let buf = encode_commit(3, 130, 2, 0xDEAD_BEEF);
        let hdr = FrameHeader::read(&buf).unwrap();
        assert!(hdr.matches(KIND_COMMIT, 3, 130));
        assert_eq!(commit_checksum(&buf), 0xDEAD_BEEF);
    }
}
