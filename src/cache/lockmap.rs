//! 按地址加锁的锁表
//!
//! 每个地址（展平后的 `Addr`）至多被一个事务持有。锁表分成若干分片，
//! 每个分片一把互斥锁加一个条件变量，等待者只会被同分片的释放唤醒。

use crate::types::TxnId;
use crate::utils::{lock, wait};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

/// 分片数
const NSHARD: usize = 43;

struct Shard {
    owners: Mutex<HashMap<u64, TxnId>>,
    cond: Condvar,
}

/// 地址锁表
pub struct LockMap {
    shards: Vec<Shard>,
}

impl Default for LockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LockMap {
    /// 创建锁表
    pub fn new() -> Self {
        let shards = (0..NSHARD)
            .map(|_| Shard {
                owners: Mutex::new(HashMap::new()),
                cond: Condvar::new(),
            })
            .collect();
        Self { shards }
    }

    fn shard(&self, key: u64) -> &Shard {
        &self.shards[(key % NSHARD as u64) as usize]
    }

    /// 获取锁，被其他事务持有时阻塞
    pub fn acquire(&self, key: u64, owner: TxnId) {
        let shard = self.shard(key);
        let mut owners = lock(&shard.owners);
        loop {
            match owners.get(&key) {
                None => {
                    owners.insert(key, owner);
                    return;
                }
                Some(&o) if o == owner => return,
                Some(&o) => {
                    log::trace!("[LOCK] txn {} waits for key {:#x} held by txn {}", owner, key, o);
                    owners = wait(&shard.cond, owners);
                }
            }
        }
    }

    /// 尝试获取锁，不阻塞
    pub fn try_acquire(&self, key: u64, owner: TxnId) -> bool {
        let mut owners = lock(&self.shard(key).owners);
        match owners.get(&key) {
            None => {
                owners.insert(key, owner);
                true
            }
            Some(&o) => o == owner,
        }
    }

    /// 释放锁
    pub fn release(&self, key: u64, owner: TxnId) {
        let shard = self.shard(key);
        let mut owners = lock(&shard.owners);
        if owners.get(&key) == Some(&owner) {
            owners.remove(&key);
            shard.cond.notify_all();
        } else {
            log::error!("[LOCK] txn {} released key {:#x} it does not hold", owner, key);
        }
    }

    #[cfg(test)]
    fn owner(&self, key: u64) -> Option<TxnId> {
        lock(&self.shard(key).owners).get(&key).copied()
    }
}
