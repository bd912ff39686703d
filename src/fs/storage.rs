//! Flash 存储抽象层
//!
//! 物理存储通过 `embedded_storage::nor_flash::NorFlash` 接入:
//! - [`SharedFlash`]: 多个卷共享同一颗 Flash，每次原始读/写/擦除期间独占
//! - [`FlashPartition`]: 按分区偏移/大小开窗，提供分区内字节地址的读写擦除
//! - [`RamFlash`]: 内存模拟的 NOR Flash (主机测试与仿真)

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use super::partition::Partition;
use crate::sync::CriticalBlockingMutex;

/// 存储操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// 读取失败
    ReadError,
    /// 写入失败
    WriteError,
    /// 擦除失败
    EraseError,
    /// 地址越界
    OutOfBounds,
    /// 对齐错误
    AlignmentError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadError => write!(f, "Flash read error"),
            Self::WriteError => write!(f, "Flash write error"),
            Self::EraseError => write!(f, "Flash erase error"),
            Self::OutOfBounds => write!(f, "Address out of bounds"),
            Self::AlignmentError => write!(f, "Address alignment error"),
        }
    }
}

impl NorFlashError for StorageError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::AlignmentError => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// 把底层驱动的错误归类为存储错误
fn classify<E: NorFlashError>(e: E, fallback: StorageError) -> StorageError {
    match e.kind() {
        NorFlashErrorKind::OutOfBounds => StorageError::OutOfBounds,
        NorFlashErrorKind::NotAligned => StorageError::AlignmentError,
        _ => fallback,
    }
}

/// 多个卷共享的 Flash 设备
///
/// 卷锁只保护各自的 littlefs 状态，物理 Flash 仍然是同一颗芯片，
/// 因此每次原始操作都在临界区内独占设备。
pub struct SharedFlash<F> {
    inner: Arc<CriticalBlockingMutex<RefCell<F>>>,
}

impl<F> SharedFlash<F> {
    /// 包装 Flash 驱动
    pub fn new(flash: F) -> Self {
        Self {
            inner: Arc::new(CriticalBlockingMutex::new(RefCell::new(flash))),
        }
    }

    /// 独占访问底层驱动
    pub fn with<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<F> Clone for SharedFlash<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: NorFlash> SharedFlash<F> {
    /// 设备总容量 (字节)
    pub fn capacity(&self) -> usize {
        self.with(|flash| flash.capacity())
    }

    /// 扇区大小 (擦除粒度)
    pub fn sector_size(&self) -> u32 {
        F::ERASE_SIZE as u32
    }
}

/// Flash 上的一个分区窗口
///
/// 所有地址均为分区内偏移，内部加上分区起始偏移后访问设备。
pub struct FlashPartition<F> {
    flash: SharedFlash<F>,
    partition: Partition,
}

impl<F: NorFlash> FlashPartition<F> {
    /// 在共享 Flash 上打开分区，分区必须完整落在设备容量内
    pub fn new(flash: SharedFlash<F>, partition: Partition) -> Result<Self, StorageError> {
        if partition.end_offset() > flash.capacity() as u64 {
            return Err(StorageError::OutOfBounds);
        }
        Ok(Self { flash, partition })
    }

    /// 分区描述
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// 分区大小 (字节)
    pub fn size(&self) -> u32 {
        self.partition.size
    }

    /// 扇区大小
    pub fn sector_size(&self) -> u32 {
        self.flash.sector_size()
    }

    /// 分区标签
    pub fn label(&self) -> &str {
        self.partition.label.as_str()
    }

    /// 是否加密
    pub fn is_encrypted(&self) -> bool {
        self.partition.flags.encrypted
    }

    /// 分区内偏移转换为设备绝对地址
    fn absolute(&self, address: u32, len: usize) -> Result<u32, StorageError> {
        let end = (address as u64) + (len as u64);
        if end > self.partition.size as u64 {
            return Err(StorageError::OutOfBounds);
        }
        Ok(self.partition.offset + address)
    }

    /// 读取
    pub fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        let abs = self.absolute(address, buffer.len())?;
        self.flash
            .with(|flash| flash.read(abs, buffer))
            .map_err(|e| classify(e, StorageError::ReadError))
    }

    /// 写入 (目标区域须已擦除)
    pub fn write(&self, address: u32, data: &[u8]) -> Result<(), StorageError> {
        let abs = self.absolute(address, data.len())?;
        self.flash
            .with(|flash| flash.write(abs, data))
            .map_err(|e| classify(e, StorageError::WriteError))
    }

    /// 擦除 `[address, address + len)`，须按扇区对齐
    pub fn erase_range(&self, address: u32, len: u32) -> Result<(), StorageError> {
        let abs = self.absolute(address, len as usize)?;
        self.flash
            .with(|flash| flash.erase(abs, abs + len))
            .map_err(|e| classify(e, StorageError::EraseError))
    }
}

/// 内存模拟的 NOR Flash
///
/// 擦除值 0xFF，编程只能把位从 1 清为 0。可以注入读/写/擦除故障。
pub struct RamFlash {
    data: Vec<u8>,
    fail_read: bool,
    fail_write: bool,
    fail_erase: bool,
    erase_count: u32,
}

impl RamFlash {
    /// 扇区大小 (与 ESP32 SPI Flash 一致)
    pub const SECTOR_SIZE: usize = 4096;

    /// 创建全擦除状态的 Flash，大小向上取整到扇区
    pub fn new(size: usize) -> Self {
        let size = size.div_ceil(Self::SECTOR_SIZE) * Self::SECTOR_SIZE;
        Self {
            data: vec![0xFF; size],
            fail_read: false,
            fail_write: false,
            fail_erase: false,
            erase_count: 0,
        }
    }

    /// 原始内容
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 原始内容 (可写，绕过 NOR 语义)
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 注入读故障
    pub fn set_fail_read(&mut self, fail: bool) {
        self.fail_read = fail;
    }

    /// 注入写故障
    pub fn set_fail_write(&mut self, fail: bool) {
        self.fail_write = fail;
    }

    /// 注入擦除故障
    pub fn set_fail_erase(&mut self, fail: bool) {
        self.fail_erase = fail;
    }

    /// 已执行的扇区擦除次数
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(StorageError::OutOfBounds)?;
        if end > self.data.len() {
            return Err(StorageError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl ErrorType for RamFlash {
    type Error = StorageError;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_read {
            return Err(StorageError::ReadError);
        }
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = Self::SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if self.fail_erase {
            return Err(StorageError::EraseError);
        }
        if from > to {
            return Err(StorageError::OutOfBounds);
        }
        if from as usize % Self::SECTOR_SIZE != 0 || to as usize % Self::SECTOR_SIZE != 0 {
            return Err(StorageError::AlignmentError);
        }
        let range = self.range(from, (to - from) as usize)?;
        self.erase_count += ((to - from) as usize / Self::SECTOR_SIZE) as u32;
        self.data[range].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_write {
            return Err(StorageError::WriteError);
        }
        let range = self.range(offset, bytes.len())?;
        for (dst, src) in self.data[range].iter_mut().zip(bytes) {
            *dst &= *src;
        }
        Ok(())
    }
}
