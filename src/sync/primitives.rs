//! 同步原语封装
//!
//! 基于 embassy-sync 提供的同步原语，统一使用 CriticalSectionRawMutex
//! 以确保在 ESP32-S3 单核/双核环境下的正确性

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex as BlockingMutex},
    mutex::Mutex,
};

// ===== 类型别名: 简化使用 =====

/// 临界区互斥锁 - 异步互斥访问
///
/// 卷锁使用此类型: 等待者无限期挂起直到获得锁，不同实例之间互不影响。
///
/// # Example
/// ```ignore
/// let state: CriticalMutex<State> = CriticalMutex::new(State::new());
///
/// {
///     let mut guard = state.lock().await;
///     guard.value += 1;
/// } // 自动释放锁
/// ```
pub type CriticalMutex<T> = Mutex<CriticalSectionRawMutex, T>;

/// 临界区阻塞互斥锁 - 闭包内独占访问
///
/// 只适合极短的操作 (单次 Flash 读/写/擦除)，闭包执行期间持有临界区。
pub type CriticalBlockingMutex<T> = BlockingMutex<CriticalSectionRawMutex, T>;
