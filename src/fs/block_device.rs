//! littlefs 块设备适配
//!
//! 把 littlefs 的 (块号, 块内偏移, 长度) 寻址转换为分区内字节地址:
//! `address = block * block_size + off`。任何分区访问失败都报告为 `LFS_ERR_IO`，不重试。
//!
//! 回调在 littlefs 调用内部执行，而 littlefs 调用总是在卷锁内发起，
//! 因此回调本身不加卷锁。

use core::ffi::{c_int, c_void};

use embedded_storage::nor_flash::NorFlash;
use littlefs2_sys as ll;

use super::error::LfsError;
use super::storage::FlashPartition;

/// 分区上的 littlefs 块设备
pub struct BlockDevice<F> {
    partition: FlashPartition<F>,
    block_size: u32,
    block_count: u32,
}

impl<F: NorFlash> BlockDevice<F> {
    /// 块大小取 Flash 扇区大小，块数 = 分区大小 / 扇区大小
    pub fn new(partition: FlashPartition<F>) -> Self {
        let block_size = partition.sector_size();
        let block_count = partition.size() / block_size;
        Self {
            partition,
            block_size,
            block_count,
        }
    }

    /// 块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 块数
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// 底层分区
    pub fn partition(&self) -> &FlashPartition<F> {
        &self.partition
    }

    fn address(&self, block: u32, off: u32) -> Result<u32, LfsError> {
        block
            .checked_mul(self.block_size)
            .and_then(|base| base.checked_add(off))
            .ok_or(LfsError::IO)
    }

    /// 读取 `buffer.len()` 字节
    pub fn read(&self, block: u32, off: u32, buffer: &mut [u8]) -> Result<(), LfsError> {
        crate::log_debug!("read: block={} off={} size={}", block, off, buffer.len());
        let address = self.address(block, off)?;
        self.partition.read(address, buffer).map_err(|_| {
            crate::log_error!("failed to read block {} off {}", block, off);
            LfsError::IO
        })
    }

    /// 编程 (写入)；对齐由 littlefs 保证，这里不检查
    pub fn prog(&self, block: u32, off: u32, data: &[u8]) -> Result<(), LfsError> {
        crate::log_debug!("prog: block={} off={} size={}", block, off, data.len());
        let address = self.address(block, off)?;
        self.partition.write(address, data).map_err(|_| {
            crate::log_error!("failed to prog block {} off {}", block, off);
            LfsError::IO
        })
    }

    /// 擦除整个块
    pub fn erase(&self, block: u32) -> Result<(), LfsError> {
        crate::log_debug!("erase: block={}", block);
        let address = self.address(block, 0)?;
        self.partition
            .erase_range(address, self.block_size)
            .map_err(|_| {
                crate::log_error!("failed to erase block {}", block);
                LfsError::IO
            })
    }

    /// 分区写入即落盘，无需同步
    pub fn sync(&self) -> Result<(), LfsError> {
        Ok(())
    }
}

fn status(result: Result<(), LfsError>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// 从 `lfs_config.context` 取回块设备
///
/// # Safety
/// `c` 必须是由 `Filesystem` 构建的配置，其 context 指向存活的 `BlockDevice<F>`
unsafe fn device<'a, F>(c: *const ll::lfs_config) -> &'a BlockDevice<F> {
    &*((*c).context as *const BlockDevice<F>)
}

pub(crate) unsafe extern "C" fn lfs_read<F: NorFlash>(
    c: *const ll::lfs_config,
    block: ll::lfs_block_t,
    off: ll::lfs_off_t,
    buffer: *mut c_void,
    size: ll::lfs_size_t,
) -> c_int {
    let buf = core::slice::from_raw_parts_mut(buffer as *mut u8, size as usize);
    status(device::<F>(c).read(block, off, buf))
}

pub(crate) unsafe extern "C" fn lfs_prog<F: NorFlash>(
    c: *const ll::lfs_config,
    block: ll::lfs_block_t,
    off: ll::lfs_off_t,
    buffer: *const c_void,
    size: ll::lfs_size_t,
) -> c_int {
    let data = core::slice::from_raw_parts(buffer as *const u8, size as usize);
    status(device::<F>(c).prog(block, off, data))
}

pub(crate) unsafe extern "C" fn lfs_erase<F: NorFlash>(
    c: *const ll::lfs_config,
    block: ll::lfs_block_t,
) -> c_int {
    status(device::<F>(c).erase(block))
}

pub(crate) unsafe extern "C" fn lfs_sync<F: NorFlash>(c: *const ll::lfs_config) -> c_int {
    status(device::<F>(c).sync())
}
