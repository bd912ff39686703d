//! RustRTOS LittleFS - ESP32-S3 Flash 分区上的 POSIX 风格文件系统
//!
//! 本库提供以下核心功能:
//! - 基于 littlefs 的掉电安全、磨损均衡文件系统卷
//! - 整数文件描述符 / 目录句柄的 POSIX 风格 API
//! - 每个卷一把互斥锁，串行化对 littlefs 状态的访问
//! - 挂载失败时自动格式化并重试
//! - 条件编译日志系统

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fs;
pub mod sync;
pub mod util;

// ===== 重导出常用类型 =====
pub use fs::{
    DirEntry, DirHandle, EntryType, Errno, Fd, FsConfig, MountConfig, OpenOptions, Registry,
    SharedFlash, Stat, Volume, VolumeError, VolumeInfo,
};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 系统配置常量
pub mod config {
    /// 同时挂载的最大卷数
    pub const MAX_VOLUMES: usize = 3;

    /// 挂载点路径最大长度 (不含结尾 NUL)
    pub const MOUNT_POINT_MAX: usize = 15;

    /// 分区标签最大长度
    pub const PARTITION_LABEL_MAX: usize = 16;

    /// 目录项名称缓冲区容量 (与 newlib `d_name[256]` 对应)
    pub const NAME_CAPACITY: usize = 255;

    /// 分区表在 Flash 中的偏移量
    pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;

    /// 分区表区域大小
    pub const PARTITION_TABLE_SIZE: usize = 0xC00;
}
