//! 位图模块
//!
//! - [`ops`] - 纯位操作
//! - [`BitmapAlloc`] - 通过事务读写位图块的分配器，供 `balloc` 与 `ialloc` 使用

mod alloc;
pub mod ops;

pub use alloc::BitmapAlloc;
pub use ops::*;
