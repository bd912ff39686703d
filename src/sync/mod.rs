//! 同步原语模块
//!
//! 提供线程安全的同步原语，基于 embassy-sync 封装:
//! - `CriticalMutex`: 异步互斥锁 (卷锁、注册表锁)
//! - `CriticalBlockingMutex`: 阻塞互斥锁 (共享 Flash 设备)

pub mod primitives;

pub use primitives::{CriticalBlockingMutex, CriticalMutex};
