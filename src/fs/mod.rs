//! 文件系统模块
//!
//! 把 littlefs 以 POSIX 风格的接口暴露在 Flash 分区上，特性:
//! - 掉电安全、磨损均衡的日志结构文件系统 (littlefs)
//! - 支持 ESP32 分区表
//! - 整数描述符与目录句柄，最小空闲下标优先分配
//! - 每卷一把锁，挂载失败可自动格式化

pub mod block_device;
pub mod dir;
pub mod error;
pub mod file;
pub mod handle;
pub mod littlefs;
pub mod partition;
pub mod registry;
pub mod storage;
pub mod volume;

pub use dir::DirEntry;
pub use error::{Errno, LfsError, VolumeError};
pub use file::{OpenOptions, Stat};
pub use littlefs::{EntryType, FsConfig};
pub use partition::{DataSubType, Partition, PartitionError, PartitionTable, PartitionType};
pub use registry::Registry;
pub use storage::{FlashPartition, RamFlash, SharedFlash, StorageError};
pub use volume::{DirHandle, Fd, MountConfig, Volume, VolumeInfo};
