//! 文件系统核心结构

use super::op::Op;
use super::refs::RefTable;
use super::types::FsConfig;
use crate::balloc::BlockAllocator;
use crate::bitmap::count_ones;
use crate::block::{BlockDev, BlockDevice};
use crate::cache::Buffer;
use crate::consts::{INODESZ, NBITBLOCK, ROOTINUM};
use crate::dir::{check_dir, check_name, mk_root_dir};
use crate::error::{Error, ErrorKind, Result};
use crate::ialloc::InodeAllocator;
use crate::inode::{Inode, InodeKind};
use crate::shrinker::{ShrinkQueue, ShrinkSignal, Shrinker};
use crate::superblock::FsSuper;
use crate::transaction::TxnManager;
use crate::types::{Addr, Inum};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// 文件系统统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// 总块数
    pub blocks_total: u64,
    /// 空闲数据块数
    pub blocks_free: u64,
    /// inode 总数
    pub inodes_total: u64,
    /// 空闲 inode 数
    pub inodes_free: u64,
    /// 等待回收的 inode 数
    pub queued: u64,
}

/// 引擎共享状态，回收线程也持有一份
pub(crate) struct FsState<D: BlockDevice + 'static> {
    pub(crate) txn: TxnManager<D>,
    pub(crate) sb: FsSuper,
    pub(crate) config: FsConfig,
    pub(crate) balloc: BlockAllocator,
    pub(crate) ialloc: InodeAllocator,
    pub(crate) queue: ShrinkQueue,
    pub(crate) refs: RefTable,
    pub(crate) signal: Arc<ShrinkSignal>,
    next_gen: AtomicU64,
}

impl<D: BlockDevice + 'static> FsState<D> {
    /// 新 inode 的代号
    pub(crate) fn next_gen(&self) -> u64 {
        self.next_gen.fetch_add(1, Ordering::Relaxed)
    }

    /// 格式化：位图、回收队列、根 inode 直接写盘，根目录走一个事务
    fn format(&self) -> Result<()> {
        log::info!(
            "[FS] formatting {} blocks, {} inodes, data starts at {}",
            self.sb.size(),
            self.sb.max_inum(),
            self.sb.data_start()
        );
        let mut images = self.balloc.format_images()?;
        images.extend(self.ialloc.format_images()?);
        images.push(self.queue.format_image());
        for (bno, img) in images {
            let mut buf = Buffer::fresh(Addr::block(bno), NBITBLOCK);
            buf.data = img;
            self.txn.write_direct(&buf)?;
        }
        self.txn.write_direct(&Buffer::fresh(self.sb.inum2addr(ROOTINUM), INODESZ * 8))?;
        self.txn.barrier()?;

        let mut tx = self.txn.begin();
        mk_root_dir(&mut tx, &self.sb, self.next_gen())?;
        tx.commit().map_err(|e| {
            log::error!("[FS] creating root directory failed: {}", e);
            e
        })
    }
}

/// 文件系统
///
/// # 示例
///
/// ```rust,ignore
/// use txnfs_core::{FileSystem, FsConfig, MemDisk, InodeKind, ROOTINUM};
///
/// let fs = FileSystem::mount(MemDisk::new(4096), FsConfig::default())?;
/// let inum = fs.create(ROOTINUM, "hello", InodeKind::File)?.expect("inodes left");
/// fs.write(inum, 0, b"world")?;
/// fs.shutdown()?;
/// ```
pub struct FileSystem<D: BlockDevice + 'static> {
    state: Arc<FsState<D>>,
    shrinker: Shrinker,
    stopped: bool,
}

impl<D: BlockDevice + 'static> FileSystem<D> {
    /// 挂载文件系统
    ///
    /// 计算布局，恢复日志，读取根 inode；根 inode 空闲时格式化。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 设备太小或配置不合理
    /// - `ErrorKind::Corrupted` - 日志几何与配置不符
    /// - `ErrorKind::Io` - 设备读写失败
    pub fn mount(device: D, config: FsConfig) -> Result<Self> {
        let dev = Arc::new(BlockDev::new(device)?);
        let sb = FsSuper::new(dev.total_blocks(), &config)?;
        let txn = TxnManager::open(dev, sb, &config)?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        let state = Arc::new(FsState {
            txn,
            sb,
            config,
            balloc: BlockAllocator::new(&sb),
            ialloc: InodeAllocator::new(&sb),
            queue: ShrinkQueue::new(sb.queue_block()),
            refs: RefTable::new(),
            signal: Arc::new(ShrinkSignal::new()),
            next_gen: AtomicU64::new(seed),
        });

        let mut tx = state.txn.begin();
        let root = Inode::load(&mut tx, &sb, ROOTINUM)?;
        tx.abort();
        if root.is_free() {
            state.format()?;
        } else if !root.is_dir() {
            log::error!("[FS] root inode is not a directory");
            return Err(Error::new(ErrorKind::Corrupted, "Root inode is not a directory"));
        }

        let shrinker = Shrinker::spawn(state.clone())?;
        log::info!(
            "[FS] mounted: {} blocks, {} inodes, replayed {} log batches",
            sb.size(),
            sb.max_inum(),
            state.txn.recovery_report().batches
        );
        Ok(Self {
            state,
            shrinker,
            stopped: false,
        })
    }

    /// 开始一次操作
    pub fn begin(&self) -> Op<'_, D> {
        Op::new(&self.state)
    }

    /// 布局
    pub fn super_block(&self) -> &FsSuper {
        &self.state.sb
    }

    /// 配置
    pub fn config(&self) -> &FsConfig {
        &self.state.config
    }

    /// 事务管理器
    pub fn txn(&self) -> &TxnManager<D> {
        &self.state.txn
    }

    /// 打开 inode（引用计数加一）
    ///
    /// 持有 inode 锁检查链接数，因此不会与 unlink 交错。
    pub fn open(&self, inum: Inum) -> Result<()> {
        let mut op = self.begin();
        let ino = op.get_inode(inum)?;
        if ino.is_free() || ino.nlink == 0 {
            return Err(Error::new(ErrorKind::NotFound, "Inode not linked"));
        }
        let n = self.state.refs.inc(inum);
        op.abort();
        log::trace!("[FS] open inode {} (refs {})", inum, n);
        Ok(())
    }

    /// 关闭 inode；引用归零时唤醒回收线程
    pub fn close(&self, inum: Inum) -> Result<()> {
        let left = self.state.refs.dec(inum)?;
        log::trace!("[FS] close inode {} (refs {})", inum, left);
        if left == 0 {
            self.state.signal.kick();
        }
        Ok(())
    }

    /// 在目录中创建文件或子目录
    ///
    /// # 返回
    ///
    /// 新 inode 编号；inode 用尽时返回 `None`
    pub fn create(&self, dir: Inum, name: &str, kind: InodeKind) -> Result<Option<Inum>> {
        check_name(name)?;
        let mut op = self.begin();
        let mut parent = op.get_inode(dir)?;
        check_dir(&parent)?;
        let Some(mut child) = op.alloc_inode(kind)? else {
            op.abort();
            return Ok(None);
        };
        op.dir_link(&mut parent, name, &mut child)?;
        op.commit()?;
        Ok(Some(child.inum))
    }

    /// 查找目录项
    pub fn lookup(&self, dir: Inum, name: &str) -> Result<Option<Inum>> {
        let mut op = self.begin();
        let parent = op.get_inode(dir)?;
        op.dir_lookup(&parent, name)
    }

    /// 删除目录项并减少链接数
    ///
    /// inode 按编号升序加锁：目标编号比目录小时放弃重来，
    /// 先锁目标再锁目录，期间目录项被改动过就再试一次。
    pub fn remove(&self, dir: Inum, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Error::new(ErrorKind::InvalidInput, "Cannot remove dot entries"));
        }
        loop {
            let mut op = self.begin();
            let mut parent = op.get_inode(dir)?;
            let inum = op
                .dir_lookup(&parent, name)?
                .ok_or(Error::new(ErrorKind::NotFound, "No such entry"))?;

            if inum > dir {
                let mut child = op.get_inode(inum)?;
                op.dir_unlink(&mut parent, name)?;
                op.unlink(&mut child)?;
                return op.commit();
            }

            op.abort();
            let mut op = self.begin();
            let mut child = op.get_inode(inum)?;
            let mut parent = op.get_inode(dir)?;
            if op.dir_lookup(&parent, name)? != Some(inum) {
                log::debug!("[FS] entry {:?} changed during remove, retrying", name);
                continue;
            }
            op.dir_unlink(&mut parent, name)?;
            op.unlink(&mut child)?;
            return op.commit();
        }
    }

    /// 读取文件内容
    pub fn read(&self, inum: Inum, off: u64, len: usize) -> Result<Vec<u8>> {
        let mut op = self.begin();
        let ino = op.get_inode(inum)?;
        if ino.is_free() {
            return Err(Error::new(ErrorKind::NotFound, "Inode is free"));
        }
        op.read_at(&ino, off, len)
    }

    /// 写入文件内容
    pub fn write(&self, inum: Inum, off: u64, data: &[u8]) -> Result<usize> {
        let mut op = self.begin();
        let mut ino = op.get_inode(inum)?;
        if ino.kind != InodeKind::File {
            return Err(Error::new(ErrorKind::InvalidInput, "Not a regular file"));
        }
        let n = op.write_at(&mut ino, off, data)?;
        op.commit()?;
        Ok(n)
    }

    /// 等待之前的不稳定提交全部落盘
    pub fn flush(&self) -> Result<()> {
        self.state.txn.flush()
    }

    /// 统计信息
    pub fn stats(&self) -> Result<FsStats> {
        let sb = self.state.sb;
        let mut op = self.begin();
        let queued = op.queued_inodes()?.len() as u64;
        let tx = op.txn();

        let mut used_inodes = 0;
        for i in 0..sb.ninode_bitmap() {
            used_inodes += count_ones(tx.read_block(sb.bitmap_inode_start() + i)?, 0, NBITBLOCK);
        }
        let mut used_blocks = 0;
        for i in 0..sb.nblock_bitmap() {
            used_blocks += count_ones(tx.read_block(sb.bitmap_block_start() + i)?, 0, NBITBLOCK);
        }
        Ok(FsStats {
            blocks_total: sb.size(),
            blocks_free: sb.nblock_bitmap() * NBITBLOCK - used_blocks,
            inodes_total: sb.max_inum(),
            inodes_free: sb.ninode_bitmap() * NBITBLOCK - used_inodes,
            queued,
        })
    }

    /// 等待回收队列清空
    ///
    /// # 返回
    ///
    /// 超时前清空返回 `true`
    pub fn wait_shrinker_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let empty = self.begin().queued_inodes()?.is_empty();
            if empty {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// 正常关闭：先停回收线程，再关闭事务管理器
    pub fn shutdown(mut self) -> Result<()> {
        self.stopped = true;
        self.shrinker.shutdown();
        self.state.txn.shutdown()?;
        log::info!("[FS] shut down");
        Ok(())
    }

    /// 模拟崩溃：回收线程放弃当前步骤，日志不再安装
    pub fn crash(mut self) {
        self.stopped = true;
        log::warn!("[FS] crash requested");
        self.shrinker.crash();
        self.state.txn.crash();
    }
}

impl<D: BlockDevice + 'static> Drop for FileSystem<D> {
    fn drop(&mut self) {
        if !self.stopped {
            self.shrinker.shutdown();
            if let Err(e) = self.state.txn.shutdown() {
                log::error!("[FS] shutdown on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use crate::consts::BLOCK_SIZE;
    use std::collections::HashSet;
    use std::sync::{mpsc, Mutex};

    const NBLOCKS: u64 = 2048;

    fn config() -> FsConfig {
        FsConfig {
            log_blocks: 64,
            ninodes: 64,
            flush_interval: Duration::from_millis(5),
            shrink_batch: 4,
            shrink_poll: Duration::from_millis(20),
            ..FsConfig::default()
        }
    }

    /// 后台不安装日志，崩溃后只能靠恢复
    fn lazy_config() -> FsConfig {
        FsConfig {
            flush_interval: Duration::from_secs(3600),
            ..config()
        }
    }

    fn mount(disk: &Arc<MemDisk>, config: FsConfig) -> FileSystem<Arc<MemDisk>> {
        FileSystem::mount(disk.clone(), config).unwrap()
    }

    #[test]
    fn test_format_marks_only_metadata() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());
        let sb = *fs.super_block();

        assert_eq!(fs.lookup(ROOTINUM, ".").unwrap(), Some(ROOTINUM));
        let stats = fs.stats().unwrap();
        assert_eq!(stats.blocks_free, sb.size() - sb.data_start());
        assert_eq!(stats.inodes_free, 62);
        assert_eq!(stats.queued, 0);

        let mut op = fs.begin();
        let root = op.get_inode(ROOTINUM).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert!(op.is_block_allocated(sb.data_start() - 1).unwrap());
        assert!(!op.is_block_allocated(sb.data_start()).unwrap());
        assert!(op.is_inode_allocated(0).unwrap());
        assert!(op.is_inode_allocated(1).unwrap());
        assert!(!op.is_inode_allocated(2).unwrap());
        op.abort();
        fs.shutdown().unwrap();

        // 再次挂载不会重新格式化
        let fs = mount(&disk, config());
        assert_eq!(fs.txn().recovery_report().batches, 0);
        assert_eq!(fs.stats().unwrap().inodes_free, 62);
    }

    #[test]
    fn test_committed_data_survives_crash() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, lazy_config());
        let sb = *fs.super_block();
        let (b5, b6) = (sb.data_start() + 5, sb.data_start() + 6);

        let inum = fs.create(ROOTINUM, "f", InodeKind::File).unwrap().unwrap();
        let payload = vec![0x5Au8; 2 * BLOCK_SIZE];
        fs.write(inum, 0, &payload).unwrap();
        let mut op = fs.begin();
        op.txn().write_block(b5, &vec![5u8; BLOCK_SIZE]).unwrap();
        op.txn().write_block(b6, &vec![6u8; BLOCK_SIZE]).unwrap();
        op.commit().unwrap();
        fs.crash();

        let fs = mount(&disk, config());
        assert!(fs.txn().recovery_report().batches > 0);
        assert_eq!(disk.block(b5), vec![5u8; BLOCK_SIZE]);
        assert_eq!(disk.block(b6), vec![6u8; BLOCK_SIZE]);
        assert_eq!(fs.lookup(ROOTINUM, "f").unwrap(), Some(inum));
        assert_eq!(fs.read(inum, 0, payload.len()).unwrap(), payload);
    }

    #[test]
    fn test_inode_exhaustion() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());

        let mut created = HashSet::new();
        for i in 0.. {
            match fs.create(ROOTINUM, &format!("f{}", i), InodeKind::File).unwrap() {
                Some(inum) => assert!(created.insert(inum)),
                None => break,
            }
        }
        assert_eq!(created.len(), 62);
        assert_eq!(fs.create(ROOTINUM, "more", InodeKind::File).unwrap(), None);
        assert_eq!(fs.lookup(ROOTINUM, "more").unwrap(), None);

        // 释放一个后又能分配
        fs.remove(ROOTINUM, "f7").unwrap();
        assert!(fs.create(ROOTINUM, "more", InodeKind::File).unwrap().is_some());
        assert_eq!(fs.stats().unwrap().inodes_free, 0);
    }

    #[test]
    fn test_unlink_while_open_then_shrink() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());
        // 根目录先有一个数据块，之后的统计只反映被删文件
        fs.create(ROOTINUM, "keep", InodeKind::File).unwrap().unwrap();
        let before = fs.stats().unwrap();

        let inum = fs.create(ROOTINUM, "open", InodeKind::File).unwrap().unwrap();
        let payload: Vec<u8> = (0..3 * BLOCK_SIZE).map(|i| i as u8).collect();
        fs.write(inum, 0, &payload).unwrap();
        fs.open(inum).unwrap();

        fs.remove(ROOTINUM, "open").unwrap();
        assert_eq!(fs.lookup(ROOTINUM, "open").unwrap(), None);
        assert_eq!(fs.begin().queued_inodes().unwrap(), vec![inum]);
        assert_eq!(fs.read(inum, 0, payload.len()).unwrap(), payload);
        assert_eq!(fs.open(inum).unwrap_err().kind(), ErrorKind::NotFound);

        // 引用还在时不会被回收
        thread::sleep(Duration::from_millis(60));
        assert!(!fs.wait_shrinker_idle(Duration::ZERO).unwrap());

        fs.close(inum).unwrap();
        assert!(fs.wait_shrinker_idle(Duration::from_secs(5)).unwrap());
        assert_eq!(fs.stats().unwrap(), before);
        let mut op = fs.begin();
        assert!(!op.is_inode_allocated(inum).unwrap());
        assert!(op.get_inode(inum).unwrap().is_free());
    }

    #[test]
    fn test_large_unlink_shrinks_in_steps() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());
        // 根目录先有一个数据块，之后的统计只反映被删文件
        fs.create(ROOTINUM, "keep", InodeKind::File).unwrap().unwrap();
        let before = fs.stats().unwrap();

        let inum = fs.create(ROOTINUM, "big", InodeKind::File).unwrap().unwrap();
        fs.write(inum, 0, &vec![9u8; 30 * BLOCK_SIZE]).unwrap();
        assert_eq!(fs.stats().unwrap().blocks_free, before.blocks_free - 31);

        let commits = fs.txn().journal().stats().commits;
        fs.remove(ROOTINUM, "big").unwrap();
        assert!(fs.wait_shrinker_idle(Duration::from_secs(5)).unwrap());
        assert_eq!(fs.stats().unwrap(), before);
        // 31 个块、每步最多 4 个，至少 8 个回收事务
        assert!(fs.txn().journal().stats().commits - commits >= 8);
    }

    #[test]
    fn test_interrupted_shrink_resumes_after_remount() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, lazy_config());
        // 根目录先有一个数据块，之后的统计只反映被删文件
        fs.create(ROOTINUM, "keep", InodeKind::File).unwrap().unwrap();
        let before = fs.stats().unwrap();

        let inum = fs.create(ROOTINUM, "big", InodeKind::File).unwrap().unwrap();
        fs.write(inum, 0, &vec![1u8; 20 * BLOCK_SIZE]).unwrap();
        fs.open(inum).unwrap();
        fs.remove(ROOTINUM, "big").unwrap();
        fs.crash();

        // 引用随崩溃消失，重新挂载后回收线程接着处理队列
        let fs = mount(&disk, config());
        assert!(fs.wait_shrinker_idle(Duration::from_secs(5)).unwrap());
        assert_eq!(fs.stats().unwrap(), before);
    }

    #[test]
    fn test_torn_batch_is_all_or_nothing() {
        for budget in 0..8 {
            let disk = Arc::new(MemDisk::new(NBLOCKS));
            let fs = mount(&disk, lazy_config());
            let inum = fs.create(ROOTINUM, "a", InodeKind::File).unwrap().unwrap();
            fs.write(inum, 0, &vec![1u8; 2 * BLOCK_SIZE]).unwrap();
            fs.shutdown().unwrap();

            let fs = mount(&disk, lazy_config());
            let before = fs.stats().unwrap();
            disk.fail_after(budget);
            // descriptor + 两个数据块 + inode 块 + commit
            fs.write(inum, 0, &vec![2u8; 2 * BLOCK_SIZE]).unwrap();
            fs.crash();
            disk.reset_faults();

            let fs = mount(&disk, config());
            let data = fs.read(inum, 0, 2 * BLOCK_SIZE).unwrap();
            let expect = if budget >= 5 { 2u8 } else { 1u8 };
            assert!(data.iter().all(|&b| b == expect), "budget {}", budget);
            assert_eq!(fs.stats().unwrap(), before);
            fs.shutdown().unwrap();
        }
    }

    #[test]
    fn test_concurrent_creates_and_writes() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());
        let before = fs.stats().unwrap();
        let inums = Mutex::new(Vec::new());

        thread::scope(|s| {
            for t in 0..4 {
                let fs = &fs;
                let inums = &inums;
                s.spawn(move || {
                    for i in 0..5 {
                        let name = format!("t{}-{}", t, i);
                        let inum = fs.create(ROOTINUM, &name, InodeKind::File).unwrap().unwrap();
                        fs.write(inum, 0, &vec![t as u8 + 1; BLOCK_SIZE + 10]).unwrap();
                        inums.lock().unwrap().push((name, inum, t as u8 + 1));
                    }
                });
            }
        });

        let inums = inums.into_inner().unwrap();
        let unique: HashSet<_> = inums.iter().map(|(_, inum, _)| *inum).collect();
        assert_eq!(unique.len(), 20);
        for (name, inum, fill) in &inums {
            assert_eq!(fs.lookup(ROOTINUM, name).unwrap(), Some(*inum));
            assert!(fs.read(*inum, 0, BLOCK_SIZE + 10).unwrap().iter().all(|b| b == fill));
        }
        let stats = fs.stats().unwrap();
        assert_eq!(stats.inodes_free, before.inodes_free - 20);
        // 每个文件 2 个块，根目录 20 * 64 字节占 1 个块
        assert_eq!(stats.blocks_free, before.blocks_free - 41);
    }

    #[test]
    fn test_remove_orders_inode_locks() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());

        // 先建文件，再建目录，文件编号小于目录
        let file = fs.create(ROOTINUM, "x", InodeKind::File).unwrap().unwrap();
        let sub = fs.create(ROOTINUM, "sub", InodeKind::Dir).unwrap().unwrap();
        assert!(file < sub);
        {
            let mut op = fs.begin();
            let mut f = op.get_inode(file).unwrap();
            let mut d = op.get_inode(sub).unwrap();
            op.dir_link(&mut d, "x2", &mut f).unwrap();
            op.commit().unwrap();
        }

        assert_eq!(fs.remove(ROOTINUM, "sub").unwrap_err().kind(), ErrorKind::NotEmpty);
        fs.remove(sub, "x2").unwrap();
        assert_eq!(fs.remove(sub, "x2").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(fs.lookup(ROOTINUM, "x").unwrap(), Some(file));
        assert_eq!(fs.begin().get_inode(file).unwrap().nlink, 1);

        fs.remove(ROOTINUM, "sub").unwrap();
        assert_eq!(fs.lookup(ROOTINUM, "sub").unwrap(), None);
        assert_eq!(fs.remove(ROOTINUM, "..").unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_create_skips_free_inode_held_by_stale_handle() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());

        // 过期的文件句柄锁住了一个空闲 inode，随后又要分配 inode
        let mut stale = fs.begin();
        assert!(stale.get_inode(2).unwrap().is_free());

        let (done_tx, done_rx) = mpsc::channel();
        thread::scope(|s| {
            let fs = &fs;
            s.spawn(move || {
                let res = fs.create(ROOTINUM, "f", InodeKind::File);
                done_tx.send(res.map_err(|e| e.kind())).unwrap();
            });
            let created = match done_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(res) => res,
                Err(_) => {
                    drop(stale);
                    panic!("create waited on an inode lock held by another operation");
                }
            };
            let inum = created.unwrap().unwrap();
            assert_ne!(inum, 2);

            let file = stale.alloc_inode(InodeKind::File).unwrap().unwrap();
            assert_ne!(file.inum, inum);
            stale.abort();
        });
        assert!(fs.lookup(ROOTINUM, "f").unwrap().is_some());

        // 父目录不是目录时不会消耗 inode
        let file = fs.lookup(ROOTINUM, "f").unwrap().unwrap();
        let free = fs.stats().unwrap().inodes_free;
        let err = fs.create(file, "child", InodeKind::File).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(fs.stats().unwrap().inodes_free, free);
    }

    #[test]
    fn test_unstable_write_needs_flush() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, lazy_config());
        let inum = fs.create(ROOTINUM, "u", InodeKind::File).unwrap().unwrap();

        let mut op = fs.begin();
        let mut ino = op.get_inode(inum).unwrap();
        op.write_at(&mut ino, 0, &[1u8; 100]).unwrap();
        op.commit_unstable().unwrap();
        assert_eq!(fs.read(inum, 0, 100).unwrap(), vec![1u8; 100]);
        fs.crash();

        // 没有 flush 的不稳定写入随崩溃丢失
        let fs = mount(&disk, lazy_config());
        assert!(fs.read(inum, 0, 100).unwrap().is_empty());

        let mut op = fs.begin();
        let mut ino = op.get_inode(inum).unwrap();
        op.write_at(&mut ino, 0, &[2u8; 100]).unwrap();
        op.commit_unstable().unwrap();
        fs.flush().unwrap();
        fs.crash();

        let fs = mount(&disk, config());
        assert_eq!(fs.read(inum, 0, 100).unwrap(), vec![2u8; 100]);
    }

    #[test]
    fn test_failing_reclaim_does_not_block_queue() {
        let disk = Arc::new(MemDisk::new(NBLOCKS));
        let fs = mount(&disk, config());

        // 记录标成文件但位图里是空闲的 inode：回收它时会重复释放
        let bad = 40;
        {
            let mut op = fs.begin();
            let mut ino = op.get_inode(bad).unwrap();
            ino.kind = InodeKind::File;
            op.put_inode(&ino).unwrap();
            fs.state.queue.push(op.txn(), bad).unwrap();
            op.commit().unwrap();
        }

        let inum = fs.create(ROOTINUM, "f", InodeKind::File).unwrap().unwrap();
        fs.write(inum, 0, &vec![3u8; 2 * BLOCK_SIZE]).unwrap();
        fs.open(inum).unwrap();
        fs.remove(ROOTINUM, "f").unwrap();
        assert_eq!(fs.begin().queued_inodes().unwrap(), vec![bad, inum]);
        fs.close(inum).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while fs.begin().queued_inodes().unwrap() != vec![bad] {
            assert!(Instant::now() < deadline, "entry behind a failing one was not reclaimed");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!fs.begin().is_inode_allocated(inum).unwrap());
    }
}
