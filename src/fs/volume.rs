//! 卷生命周期管理
//!
//! 一个 [`Volume`] 对应一个已挂载的 littlefs 实例。卷的全部可变状态
//! (littlefs 状态、文件句柄表、目录游标表) 放在一把异步互斥锁内，
//! 每个文件/目录操作在整个调用期间持有该锁，不同卷之间互不影响。

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::MutexGuard;
use embedded_storage::nor_flash::NorFlash;

use super::block_device::BlockDevice;
use super::dir::DirCursor;
use super::error::{Errno, VolumeError};
use super::file::OpenFile;
use super::handle::HandleTable;
use super::littlefs::{Filesystem, FsConfig};
use super::partition::Partition;
use super::storage::{FlashPartition, SharedFlash};
use crate::config::{MOUNT_POINT_MAX, PARTITION_LABEL_MAX};
use crate::sync::CriticalMutex;

/// 文件描述符 (卷内句柄表下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(usize);

impl Fd {
    /// 从调度层传入的原始描述符构造
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// 原始描述符
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// 目录句柄 (卷内目录游标表下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirHandle(usize);

impl DirHandle {
    /// 从原始值构造
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// 原始值
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// 挂载请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountConfig<'a> {
    /// 挂载点前缀，例如 "/littlefs"
    pub mount_point: &'a str,
    /// 分区标签；None 表示使用第一个 littlefs 子类型分区
    pub label: Option<&'a str>,
    /// 同时打开的文件数上限
    pub max_files: usize,
    /// 挂载失败时格式化后重试
    pub format_if_mount_failed: bool,
}

impl<'a> MountConfig<'a> {
    /// 默认: 无标签、5 个文件、挂载失败不格式化
    pub const fn new(mount_point: &'a str) -> Self {
        Self {
            mount_point,
            label: None,
            max_files: 5,
            format_if_mount_failed: false,
        }
    }

    /// 设置分区标签
    pub const fn label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    /// 设置文件数上限
    pub const fn max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// 设置挂载失败时是否格式化
    pub const fn format_if_mount_failed(mut self, format: bool) -> Self {
        self.format_if_mount_failed = format;
        self
    }

    fn mount_point_valid(&self) -> bool {
        !self.mount_point.is_empty()
            && self.mount_point.starts_with('/')
            && self.mount_point.len() <= MOUNT_POINT_MAX
    }
}

/// 卷容量信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    /// 分区总字节数
    pub total_bytes: u64,
    /// 已使用字节数 (使用中的块数 × 块大小)
    pub used_bytes: u64,
}

/// 锁内的卷状态
pub(crate) struct VolumeState<F: NorFlash> {
    pub(crate) fs: Filesystem<F>,
    pub(crate) files: HandleTable<OpenFile>,
    pub(crate) dirs: HandleTable<DirCursor>,
}

impl<F: NorFlash> VolumeState<F> {
    /// 关闭所有打开的文件和目录
    fn close_all(&mut self) {
        for (fd, file) in self.files.drain() {
            if let Err(e) = self.fs.file_close(file.state) {
                crate::log_warn!("close fd {} failed: {}", fd, e.code());
            }
        }
        for (_, cursor) in self.dirs.drain() {
            if let Err(e) = self.fs.dir_close(cursor.state) {
                crate::log_warn!("closedir failed: {}", e.code());
            }
        }
    }
}

impl<F: NorFlash> Drop for VolumeState<F> {
    fn drop(&mut self) {
        // 之后 Filesystem 的 Drop 负责卸载
        self.close_all();
    }
}

pub(crate) type StateGuard<'a, F> = MutexGuard<'a, CriticalSectionRawMutex, VolumeState<F>>;

/// 已挂载的卷
pub struct Volume<F: NorFlash> {
    label: Option<heapless::String<PARTITION_LABEL_MAX>>,
    partition: Partition,
    mount_point: heapless::String<MOUNT_POINT_MAX>,
    geometry: FsConfig,
    state: CriticalMutex<VolumeState<F>>,
}

impl<F: NorFlash> Volume<F> {
    /// 在分区上创建并挂载卷
    ///
    /// 挂载失败且 `format_if_mount_failed` 时，清空状态、格式化并再挂载一次。
    /// 任一步失败都会释放已分配的资源。
    pub fn mount(
        flash: SharedFlash<F>,
        partition: Partition,
        config: &MountConfig<'_>,
    ) -> Result<Self, VolumeError> {
        if !config.mount_point_valid() {
            crate::log_error!("invalid mount point");
            return Err(VolumeError::InvalidState);
        }
        if partition.flags.encrypted {
            crate::log_error!("littlefs can not run on encrypted partition");
            return Err(VolumeError::InvalidState);
        }

        let mut mount_point = heapless::String::new();
        mount_point
            .push_str(config.mount_point)
            .map_err(|_| VolumeError::InvalidState)?;
        let label = match config.label {
            Some(l) => {
                let mut s = heapless::String::new();
                s.push_str(l).map_err(|_| VolumeError::InvalidState)?;
                Some(s)
            }
            None => None,
        };

        let window = FlashPartition::new(flash, partition.clone()).map_err(|_| {
            crate::log_error!("partition does not fit in flash");
            VolumeError::InvalidState
        })?;
        let mut fs = Filesystem::new(BlockDevice::new(window)).map_err(|_| {
            crate::log_error!("failed to allocate littlefs buffers");
            VolumeError::NoMem
        })?;
        let files = HandleTable::with_capacity(config.max_files).map_err(|_| {
            crate::log_error!("failed to allocate handle table");
            VolumeError::NoMem
        })?;

        if let Err(e) = fs.mount() {
            if !config.format_if_mount_failed {
                crate::log_error!("mount failed: {}", e.code());
                return Err(VolumeError::Fail);
            }
            crate::log_warn!("mount failed ({}), formatting", e.code());
            fs.format().map_err(|e| {
                crate::log_error!("format failed: {}", e.code());
                VolumeError::Fail
            })?;
            fs.mount().map_err(|e| {
                crate::log_error!("mount after format failed: {}", e.code());
                VolumeError::Fail
            })?;
        }

        let geometry = *fs.geometry();
        crate::log_info!(
            "mounted {} at {} ({} blocks of {})",
            partition.label.as_str(),
            mount_point.as_str(),
            geometry.block_count,
            geometry.block_size
        );

        Ok(Self {
            label,
            partition,
            mount_point,
            geometry,
            state: CriticalMutex::new(VolumeState {
                fs,
                files,
                dirs: HandleTable::unbounded(),
            }),
        })
    }

    /// 注册时使用的标签 (None 表示无标签挂载)
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// 底层分区
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// 挂载点
    pub fn mount_point(&self) -> &str {
        self.mount_point.as_str()
    }

    /// 几何参数
    pub fn geometry(&self) -> &FsConfig {
        &self.geometry
    }

    /// 是否已挂载
    pub async fn is_mounted(&self) -> bool {
        self.state.lock().await.fs.is_mounted()
    }

    /// 加锁；卷未挂载时返回 ENODEV
    pub(crate) async fn lock_mounted(&self) -> Result<StateGuard<'_, F>, Errno> {
        let guard = self.state.lock().await;
        if !guard.fs.is_mounted() {
            return Err(Errno::NoDev);
        }
        Ok(guard)
    }

    /// 关闭所有句柄并卸载
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.close_all();
        if let Err(e) = state.fs.unmount() {
            crate::log_warn!("unmount failed: {}", e.code());
        }
        crate::log_info!("unmounted {}", self.mount_point.as_str());
    }

    /// 关闭所有句柄，卸载、格式化并重新挂载
    ///
    /// 格式化或重新挂载失败时卷保持未挂载状态
    pub async fn format(&self) -> Result<(), VolumeError> {
        let mut state = self.state.lock().await;
        state.close_all();
        if let Err(e) = state.fs.unmount() {
            crate::log_warn!("unmount before format failed: {}", e.code());
        }
        state.fs.format().map_err(|e| {
            crate::log_error!("format failed: {}", e.code());
            VolumeError::Fail
        })?;
        state.fs.mount().map_err(|e| {
            crate::log_error!("remount after format failed: {}", e.code());
            VolumeError::Fail
        })?;
        Ok(())
    }

    /// 容量信息；未挂载返回 InvalidState
    pub async fn info(&self) -> Result<VolumeInfo, VolumeError> {
        let mut state = self.state.lock().await;
        if !state.fs.is_mounted() {
            return Err(VolumeError::InvalidState);
        }
        let used = state.fs.used_blocks().map_err(|_| VolumeError::Fail)?;
        Ok(VolumeInfo {
            total_bytes: self.partition.size as u64,
            used_bytes: used as u64 * self.geometry.block_size as u64,
        })
    }

    /// 当前打开的文件数
    pub async fn open_files(&self) -> usize {
        self.state.lock().await.files.len()
    }
}
