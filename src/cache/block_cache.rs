//! Home 块缓存（使用 lru crate）
//!
//! 只缓存已经安装到 home 位置的干净块镜像。尚在日志中的块由日志自己提供，
//! 所以这里永远不会有脏块，淘汰时也不需要写回。
//!
//! 冷读与安装可能并发：读者在读盘前记下 `generation()`，
//! 插入时代数已变化就放弃插入，避免旧镜像覆盖安装线程刚写入的新镜像。

use crate::consts::BLOCK_SIZE;
use crate::types::Bnum;
use crate::utils::lock;
use core::num::NonZeroUsize;
use lru::LruCache;
use std::sync::Mutex;

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 安装更新次数
    pub updates: u64,
}

struct Inner {
    cache: LruCache<Bnum, Vec<u8>>,
    generation: u64,
    stats: CacheStats,
}

/// Home 块缓存
pub struct HomeCache {
    inner: Mutex<Inner>,
}

impl HomeCache {
    /// 创建缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 最多缓存的块数（0 按 1 处理）
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(cap),
                generation: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// 当前代数
    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    /// 查找块镜像
    pub fn get(&self, bno: Bnum) -> Option<Vec<u8>> {
        let mut inner = lock(&self.inner);
        match inner.cache.get(&bno).cloned() {
            Some(data) => {
                inner.stats.hits += 1;
                log::trace!("[CACHE] block {} HIT", bno);
                Some(data)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// 冷读后插入；代数已变化时放弃
    pub fn insert_if(&self, bno: Bnum, data: Vec<u8>, generation: u64) -> bool {
        debug_assert_eq!(data.len(), BLOCK_SIZE);
        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            log::trace!("[CACHE] block {} insert skipped, generation moved", bno);
            return false;
        }
        inner.cache.put(bno, data);
        true
    }

    /// 安装线程写入 home 位置后更新镜像
    pub fn update(&self, bno: Bnum, data: Vec<u8>) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.stats.updates += 1;
        inner.cache.put(bno, data);
    }

    /// 缓存块数
    pub fn len(&self) -> usize {
        lock(&self.inner).cache.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        lock(&self.inner).stats
    }
}
