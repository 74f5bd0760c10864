//! Bitmap 位操作
//!
//! 位 `i` 存放在第 `i / 8` 字节的第 `i % 8` 位，1 表示已分配。

use crate::error::{Error, ErrorKind, Result};

/// 测试位图中某一位是否被设置
///
/// # 参数
///
/// * `bitmap` - 位图数据
/// * `index` - 位索引（从 0 开始）
///
/// # 返回
///
/// 如果位被设置返回 true；索引超出范围视为未设置
pub fn test_bit(bitmap: &[u8], index: u64) -> bool {
    let byte_index = (index / 8) as usize;
    let bit_offset = (index % 8) as u8;

    match bitmap.get(byte_index) {
        Some(b) => b & (1 << bit_offset) != 0,
        None => false,
    }
}

/// 设置位图中的某一位
pub fn set_bit(bitmap: &mut [u8], index: u64) -> Result<()> {
    let byte = byte_mut(bitmap, index)?;
    *byte |= 1 << (index % 8);
    Ok(())
}

/// 清除位图中的某一位
pub fn clear_bit(bitmap: &mut [u8], index: u64) -> Result<()> {
    let byte = byte_mut(bitmap, index)?;
    *byte &= !(1 << (index % 8));
    Ok(())
}

fn byte_mut(bitmap: &mut [u8], index: u64) -> Result<&mut u8> {
    bitmap
        .get_mut((index / 8) as usize)
        .ok_or(Error::new(ErrorKind::InvalidInput, "Bitmap index out of range"))
}

/// 设置 `[start, end)` 内的所有位
pub fn set_range(bitmap: &mut [u8], start: u64, end: u64) -> Result<()> {
    for i in start..end {
        set_bit(bitmap, i)?;
    }
    Ok(())
}

/// 在 `[start, end)` 内查找第一个空闲位
///
/// 整字节已满（0xFF）时一次跳过 8 位。
pub fn find_first_zero(bitmap: &[u8], start: u64, end: u64) -> Option<u64> {
    let end = end.min(bitmap.len() as u64 * 8);
    let mut i = start;
    while i < end {
        if i % 8 == 0 && i + 8 <= end && bitmap[(i / 8) as usize] == 0xFF {
            i += 8;
            continue;
        }
        if !test_bit(bitmap, i) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// 从 `hint` 开始在 `[lo, hi)` 内查找空闲位，到达 `hi` 后回绕到 `lo`
pub fn find_zero_from(bitmap: &[u8], lo: u64, hi: u64, hint: u64) -> Option<u64> {
    let hint = if hint < lo || hint >= hi { lo } else { hint };
    find_first_zero(bitmap, hint, hi).or_else(|| find_first_zero(bitmap, lo, hint))
}

/// 统计 `[start, end)` 内被设置的位数
pub fn count_ones(bitmap: &[u8], start: u64, end: u64) -> u64 {
    (start..end).filter(|&i| test_bit(bitmap, i)).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_operations() {
        let mut bitmap = [0u8; 4];

        set_bit(&mut bitmap, 0).unwrap();
        set_bit(&mut bitmap, 15).unwrap();
        assert!(test_bit(&bitmap, 0));
        assert!(test_bit(&bitmap, 15));
        assert_eq!(bitmap[1], 0x80);

        clear_bit(&mut bitmap, 0).unwrap();
        assert!(!test_bit(&bitmap, 0));
        assert!(set_bit(&mut bitmap, 32).is_err());
        assert!(!test_bit(&bitmap, 1000));
    }

    #[test]
    fn test_find_first_zero_skips_full_bytes() {
        let mut bitmap = [0xFFu8; 4];
        clear_bit(&mut bitmap, 26).unwrap();
        assert_eq!(find_first_zero(&bitmap, 0, 32), Some(26));
        assert_eq!(find_first_zero(&bitmap, 27, 32), None);
        assert_eq!(find_first_zero(&bitmap, 3, 100), Some(26));
    }

    #[test]
    fn test_find_zero_from_wraps() {
        let mut bitmap = [0u8; 4];
        set_range(&mut bitmap, 10, 32).unwrap();
        assert_eq!(find_zero_from(&bitmap, 4, 32, 20), Some(4));
        assert_eq!(find_zero_from(&bitmap, 4, 32, 6), Some(6));
        // 越界的提示从 lo 开始
        assert_eq!(find_zero_from(&bitmap, 4, 32, 99), Some(4));

        set_range(&mut bitmap, 0, 10).unwrap();
        assert_eq!(find_zero_from(&bitmap, 4, 32, 20), None);
    }

    #[test]
    fn test_count_ones() {
        let mut bitmap = [0u8; 4];
        set_range(&mut bitmap, 5, 12).unwrap();
        assert_eq!(count_ones(&bitmap, 0, 32), 7);
        assert_eq!(count_ones(&bitmap, 8, 32), 4);
    }
}
