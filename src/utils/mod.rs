//! 同步辅助函数
//!
//! 锁中毒只说明持锁线程 panic 过，状态本身仍由各模块的不变量保护，
//! 因此这里直接取回内部 guard。

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// 获取互斥锁
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 在条件变量上等待
pub(crate) fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// 带超时的等待，返回 (guard, 是否超时)
pub(crate) fn wait_timeout<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> (MutexGuard<'a, T>, bool) {
    match cv.wait_timeout(guard, timeout) {
        Ok((g, r)) => (g, r.timed_out()),
        Err(e) => {
            let (g, r) = e.into_inner();
            (g, r.timed_out())
        }
    }
}
