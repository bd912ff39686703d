//! 卷注册表与管理接口
//!
//! 固定数量的槽位，每个槽位最多放一个已挂载的卷。注册表由调用者显式创建并传递，
//! 不使用全局变量；挂载/卸载由注册表级别的异步锁串行化。
//!
//! 管理操作返回 [`VolumeError`] (对应 `esp_err_t`)，与文件操作的 [`Errno`](super::Errno) 相互独立。

use alloc::sync::Arc;

use embedded_storage::nor_flash::NorFlash;

use super::error::VolumeError;
use super::partition::{Partition, PartitionTable};
use super::storage::SharedFlash;
use super::volume::{MountConfig, Volume, VolumeInfo};
use crate::config::MAX_VOLUMES;
use crate::sync::CriticalMutex;

type Slots<F, const N: usize> = [Option<Arc<Volume<F>>>; N];

/// 按标签查找槽位；`None` 匹配无标签挂载的卷
fn find_by_label<F: NorFlash, const N: usize>(slots: &Slots<F, N>, label: Option<&str>) -> Option<usize> {
    slots
        .iter()
        .position(|slot| matches!(slot, Some(v) if v.label() == label))
}

/// 最小的空槽位
fn find_empty_slot<F: NorFlash, const N: usize>(slots: &Slots<F, N>) -> Option<usize> {
    slots.iter().position(Option::is_none)
}

/// 分区是否已被某个卷使用
fn partition_in_use<F: NorFlash, const N: usize>(slots: &Slots<F, N>, partition: &Partition) -> bool {
    slots.iter().flatten().any(|v| v.partition().overlaps(partition))
}

/// 卷注册表
pub struct Registry<F: NorFlash, const N: usize = { MAX_VOLUMES }> {
    flash: SharedFlash<F>,
    partitions: PartitionTable,
    slots: CriticalMutex<Slots<F, N>>,
}

impl<F: NorFlash, const N: usize> Registry<F, N> {
    /// 使用给定的分区表创建注册表
    pub fn new(flash: SharedFlash<F>, partitions: PartitionTable) -> Self {
        Self {
            flash,
            partitions,
            slots: CriticalMutex::new(core::array::from_fn(|_| None)),
        }
    }

    /// 从 Flash 读取分区表后创建注册表
    pub fn from_flash(flash: SharedFlash<F>) -> Result<Self, VolumeError> {
        let partitions = PartitionTable::read_from(&flash).map_err(|_| {
            crate::log_error!("failed to read partition table");
            VolumeError::NotFound
        })?;
        Ok(Self::new(flash, partitions))
    }

    /// 分区表
    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }

    /// 挂载并注册一个卷
    pub async fn register(&self, config: &MountConfig<'_>) -> Result<(), VolumeError> {
        let mut slots = self.slots.lock().await;

        if find_by_label(&slots, config.label).is_some() {
            crate::log_error!("partition already mounted");
            return Err(VolumeError::InvalidState);
        }
        let index = find_empty_slot(&slots).ok_or_else(|| {
            crate::log_error!("max mounted partitions reached");
            VolumeError::InvalidState
        })?;

        let partition = match config.label {
            Some(label) => self.partitions.find_by_label(label),
            None => self.partitions.find_littlefs(),
        }
        .ok_or_else(|| {
            crate::log_error!("partition not found");
            VolumeError::NotFound
        })?;

        if partition_in_use(&slots, partition) {
            crate::log_error!("partition {} is used by another volume", partition.label.as_str());
            return Err(VolumeError::InvalidState);
        }

        let volume = Volume::mount(self.flash.clone(), partition.clone(), config)?;
        slots[index] = Some(Arc::new(volume));
        Ok(())
    }

    /// 关闭所有句柄、卸载并移出注册表
    pub async fn unregister(&self, label: Option<&str>) -> Result<(), VolumeError> {
        let mut slots = self.slots.lock().await;
        let index = find_by_label(&slots, label).ok_or(VolumeError::InvalidState)?;
        if let Some(volume) = slots[index].take() {
            volume.shutdown().await;
        }
        Ok(())
    }

    /// 是否已挂载
    pub async fn mounted(&self, label: Option<&str>) -> bool {
        match self.volume(label).await {
            Some(volume) => volume.is_mounted().await,
            None => false,
        }
    }

    /// 格式化已注册的卷并重新挂载
    pub async fn format(&self, label: Option<&str>) -> Result<(), VolumeError> {
        let volume = self.volume(label).await.ok_or_else(|| {
            crate::log_error!("volume not registered");
            VolumeError::NotFound
        })?;
        volume.format().await
    }

    /// 容量信息
    pub async fn info(&self, label: Option<&str>) -> Result<VolumeInfo, VolumeError> {
        let volume = self.volume(label).await.ok_or(VolumeError::InvalidState)?;
        volume.info().await
    }

    /// 取得卷的共享句柄，供调度层执行文件/目录操作
    pub async fn volume(&self, label: Option<&str>) -> Option<Arc<Volume<F>>> {
        let slots = self.slots.lock().await;
        find_by_label(&slots, label).and_then(|index| slots[index].clone())
    }
}
