//! LittleFS 文件系统绑定
//!
//! 直接基于 `littlefs2-sys` 的 C API 封装一个 littlefs 实例:
//! - [`FsConfig`]: 块设备几何与缓存参数
//! - [`Filesystem`]: 拥有 `lfs_t`、`lfs_config`、读/写/lookahead 缓冲区和块设备
//! - [`FileState`] / [`DirState`]: 打开的文件/目录状态，由句柄表持有
//!
//! littlefs 会保存 `lfs_config`、块设备上下文以及打开的文件/目录状态的指针，
//! 这些对象全部放在堆上 (Box / Vec)，移动外层结构不会使指针失效。
//! 打开的文件/目录必须在卸载、格式化或释放 `Filesystem` 之前关闭。

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ffi::{c_int, c_void, CStr};
use core::mem;

use embedded_storage::nor_flash::NorFlash;
use littlefs2_sys as ll;

use super::block_device::{self, BlockDevice};
use super::error::LfsError;

/// 名称最大长度 (LFS_NAME_MAX)
pub const NAME_MAX: usize = 255;

/// 文件系统配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// 块大小 (= Flash 扇区大小)
    pub block_size: u32,
    /// 总块数
    pub block_count: u32,
    /// 最小读取单位
    pub read_size: u32,
    /// 最小编程单位
    pub prog_size: u32,
    /// 块缓存大小 (每个打开的文件各有一份)
    pub cache_size: u32,
    /// lookahead 缓冲区大小
    pub lookahead_size: u32,
    /// 块周期 (磨损均衡)
    pub block_cycles: i32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            block_count: 0, // 从分区推导
            read_size: 256,
            prog_size: 256,
            cache_size: 1024,
            lookahead_size: 256,
            block_cycles: 500,
        }
    }
}

impl FsConfig {
    /// 由分区大小与扇区大小推导
    pub fn for_partition(partition_size: u32, sector_size: u32) -> Self {
        Self {
            block_size: sector_size,
            block_count: partition_size / sector_size,
            ..Self::default()
        }
    }
}

/// 目录项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// 普通文件
    File,
    /// 目录
    Directory,
    /// 未知
    Unknown,
}

impl EntryType {
    fn from_raw(raw: u8) -> Self {
        if raw as u32 == ll::lfs_type_LFS_TYPE_REG as u32 {
            Self::File
        } else if raw as u32 == ll::lfs_type_LFS_TYPE_DIR as u32 {
            Self::Directory
        } else {
            Self::Unknown
        }
    }
}

/// littlefs 返回的条目信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// 条目类型
    pub entry_type: EntryType,
    /// 文件大小 (目录为 0)
    pub size: u32,
    name: [u8; NAME_MAX + 1],
    name_len: usize,
}

impl Info {
    fn from_raw(raw: &ll::lfs_info) -> Self {
        let mut name = [0u8; NAME_MAX + 1];
        let mut name_len = 0;
        for (dst, src) in name.iter_mut().zip(raw.name.iter()) {
            if *src == 0 {
                break;
            }
            *dst = *src as u8;
            name_len += 1;
        }
        Self {
            entry_type: EntryType::from_raw(raw.type_),
            size: raw.size,
            name,
            name_len,
        }
    }

    /// 名称 (原始字节)
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

fn zeroed_info() -> ll::lfs_info {
    // SAFETY: lfs_info 是纯数据结构，全零是合法值
    unsafe { mem::zeroed() }
}

/// 单次读写长度；littlefs 用 i32 返回字节数，超长缓冲区按 i32::MAX 截断
fn io_len(len: usize) -> ll::lfs_size_t {
    len.min(i32::MAX as usize) as ll::lfs_size_t
}

fn alloc_words(bytes: u32) -> Result<Vec<u32>, LfsError> {
    let words = (bytes as usize).div_ceil(4);
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(words).map_err(|_| LfsError::NOMEM)?;
    buffer.resize(words, 0);
    Ok(buffer)
}

/// 打开的文件状态
pub struct FileState {
    file: Box<ll::lfs_file_t>,
    // 以下两项被 `file` 通过指针引用
    _config: Box<ll::lfs_file_config>,
    _cache: Vec<u32>,
}

// SAFETY: 文件状态只在持有卷锁时被访问，内部指针只指向本结构自己的堆内存
// 或同一卷的 lfs_t
unsafe impl Send for FileState {}

/// 打开的目录状态
pub struct DirState {
    dir: Box<ll::lfs_dir_t>,
}

// SAFETY: 同 FileState
unsafe impl Send for DirState {}

/// 一个 littlefs 实例
pub struct Filesystem<F: NorFlash> {
    lfs: Box<ll::lfs_t>,
    config: Box<ll::lfs_config>,
    // `config.context` 指向此处
    _device: Box<BlockDevice<F>>,
    _read_buffer: Vec<u32>,
    _prog_buffer: Vec<u32>,
    _lookahead_buffer: Vec<u32>,
    geometry: FsConfig,
    mounted: bool,
}

// SAFETY: lfs_t / lfs_config 中的裸指针只指向本结构拥有的堆内存；
// 所有访问都在卷锁内串行进行。块设备通过 SharedFlash 访问 Flash，需要 F: Send。
unsafe impl<F: NorFlash + Send> Send for Filesystem<F> {}

impl<F: NorFlash> Filesystem<F> {
    /// 为块设备分配缓冲区并构建 `lfs_config`，不挂载
    pub fn new(device: BlockDevice<F>) -> Result<Self, LfsError> {
        let geometry = FsConfig::for_partition(
            device.block_count() * device.block_size(),
            device.block_size(),
        );

        let mut read_buffer = alloc_words(geometry.cache_size)?;
        let mut prog_buffer = alloc_words(geometry.cache_size)?;
        let mut lookahead_buffer = alloc_words(geometry.lookahead_size)?;
        let device = Box::new(device);

        // SAFETY: lfs_config / lfs_t 是 C 结构体，全零表示所有可选字段取默认值
        let mut config: Box<ll::lfs_config> = Box::new(unsafe { mem::zeroed() });
        config.context = &*device as *const BlockDevice<F> as *mut c_void;
        config.read = Some(block_device::lfs_read::<F>);
        config.prog = Some(block_device::lfs_prog::<F>);
        config.erase = Some(block_device::lfs_erase::<F>);
        config.sync = Some(block_device::lfs_sync::<F>);
        config.read_size = geometry.read_size;
        config.prog_size = geometry.prog_size;
        config.block_size = geometry.block_size;
        config.block_count = geometry.block_count;
        config.block_cycles = geometry.block_cycles;
        config.cache_size = geometry.cache_size;
        config.lookahead_size = geometry.lookahead_size;
        config.read_buffer = read_buffer.as_mut_ptr().cast();
        config.prog_buffer = prog_buffer.as_mut_ptr().cast();
        config.lookahead_buffer = lookahead_buffer.as_mut_ptr().cast();

        Ok(Self {
            lfs: Box::new(unsafe { mem::zeroed() }),
            config,
            _device: device,
            _read_buffer: read_buffer,
            _prog_buffer: prog_buffer,
            _lookahead_buffer: lookahead_buffer,
            geometry,
            mounted: false,
        })
    }

    /// 几何参数
    pub fn geometry(&self) -> &FsConfig {
        &self.geometry
    }

    /// 是否已挂载
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn lfs(&mut self) -> *mut ll::lfs_t {
        &mut *self.lfs
    }

    /// 挂载
    pub fn mount(&mut self) -> Result<(), LfsError> {
        if self.mounted {
            return Ok(());
        }
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_mount(lfs, &*self.config) })?;
        self.mounted = true;
        Ok(())
    }

    /// 卸载 (调用者须先关闭所有打开的文件/目录)
    pub fn unmount(&mut self) -> Result<(), LfsError> {
        if !self.mounted {
            return Ok(());
        }
        self.mounted = false;
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_unmount(lfs) }).map(|_| ())
    }

    /// 清空 littlefs 状态后格式化，格式化后处于未挂载状态
    pub fn format(&mut self) -> Result<(), LfsError> {
        if self.mounted {
            self.unmount()?;
        }
        // SAFETY: 未挂载且没有打开的文件/目录，lfs_t 中没有需要保留的指针
        *self.lfs = unsafe { mem::zeroed() };
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_format(lfs, &*self.config) }).map(|_| ())
    }

    /// 已使用的块数
    pub fn used_blocks(&mut self) -> Result<u32, LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_fs_size(lfs) }).map(|n| n as u32)
    }

    /// 打开文件 (使用自带缓存的 opencfg)
    pub fn file_open(&mut self, path: &CStr, flags: c_int) -> Result<FileState, LfsError> {
        let mut cache = alloc_words(self.geometry.cache_size)?;
        // SAFETY: 全零的 lfs_file_config 表示没有自定义属性
        let mut config: Box<ll::lfs_file_config> = Box::new(unsafe { mem::zeroed() });
        config.buffer = cache.as_mut_ptr().cast();
        let mut file: Box<ll::lfs_file_t> = Box::new(unsafe { mem::zeroed() });

        let lfs = self.lfs();
        // 失败时 littlefs 已把文件从打开列表移除，状态可以直接释放
        LfsError::check(unsafe {
            ll::lfs_file_opencfg(lfs, &mut *file, path.as_ptr().cast(), flags, &*config)
        })?;

        Ok(FileState {
            file,
            _config: config,
            _cache: cache,
        })
    }

    /// 关闭文件；无论结果如何文件都已从打开列表移除
    pub fn file_close(&mut self, mut state: FileState) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_file_close(lfs, &mut *state.file) }).map(|_| ())
    }

    /// 读取，返回读取的字节数
    pub fn file_read(&mut self, state: &mut FileState, buf: &mut [u8]) -> Result<usize, LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe {
            ll::lfs_file_read(lfs, &mut *state.file, buf.as_mut_ptr().cast(), io_len(buf.len()))
        })
        .map(|n| n as usize)
    }

    /// 写入，返回写入的字节数
    pub fn file_write(&mut self, state: &mut FileState, data: &[u8]) -> Result<usize, LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe {
            ll::lfs_file_write(lfs, &mut *state.file, data.as_ptr().cast(), io_len(data.len()))
        })
        .map(|n| n as usize)
    }

    /// 移动文件位置
    pub fn file_seek(&mut self, state: &mut FileState, offset: i32, whence: c_int) -> Result<u32, LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_file_seek(lfs, &mut *state.file, offset, whence) })
            .map(|n| n as u32)
    }

    /// 当前位置
    pub fn file_tell(&mut self, state: &mut FileState) -> Result<u32, LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_file_tell(lfs, &mut *state.file) }).map(|n| n as u32)
    }

    /// 把缓存的写入落盘
    pub fn file_sync(&mut self, state: &mut FileState) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_file_sync(lfs, &mut *state.file) }).map(|_| ())
    }

    /// 打开目录
    pub fn dir_open(&mut self, path: &CStr) -> Result<DirState, LfsError> {
        let mut dir: Box<ll::lfs_dir_t> = Box::new(unsafe { mem::zeroed() });
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_dir_open(lfs, &mut *dir, path.as_ptr().cast()) })?;
        Ok(DirState { dir })
    }

    /// 读取下一个目录项，到达末尾返回 None
    pub fn dir_read(&mut self, state: &mut DirState) -> Result<Option<Info>, LfsError> {
        let mut raw = zeroed_info();
        let lfs = self.lfs();
        let ret = LfsError::check(unsafe { ll::lfs_dir_read(lfs, &mut *state.dir, &mut raw) })?;
        if ret == 0 {
            return Ok(None);
        }
        Ok(Some(Info::from_raw(&raw)))
    }

    /// 回到目录开头
    pub fn dir_rewind(&mut self, state: &mut DirState) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_dir_rewind(lfs, &mut *state.dir) }).map(|_| ())
    }

    /// 关闭目录；无论结果如何目录都已从打开列表移除
    pub fn dir_close(&mut self, mut state: DirState) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_dir_close(lfs, &mut *state.dir) }).map(|_| ())
    }

    /// 删除文件或空目录
    pub fn remove(&mut self, path: &CStr) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_remove(lfs, path.as_ptr().cast()) }).map(|_| ())
    }

    /// 重命名
    pub fn rename(&mut self, from: &CStr, to: &CStr) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_rename(lfs, from.as_ptr().cast(), to.as_ptr().cast()) })
            .map(|_| ())
    }

    /// 创建目录
    pub fn mkdir(&mut self, path: &CStr) -> Result<(), LfsError> {
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_mkdir(lfs, path.as_ptr().cast()) }).map(|_| ())
    }

    /// 查询路径信息
    pub fn stat(&mut self, path: &CStr) -> Result<Info, LfsError> {
        let mut raw = zeroed_info();
        let lfs = self.lfs();
        LfsError::check(unsafe { ll::lfs_stat(lfs, path.as_ptr().cast(), &mut raw) })?;
        Ok(Info::from_raw(&raw))
    }
}

impl<F: NorFlash> Drop for Filesystem<F> {
    fn drop(&mut self) {
        if self.mounted {
            if let Err(e) = self.unmount() {
                crate::log_warn!("unmount on drop failed: {}", e.code());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::partition::{DataSubType, PartitionTable, PartitionType};
    use crate::fs::storage::{FlashPartition, RamFlash, SharedFlash};

    fn filesystem(flash: &SharedFlash<RamFlash>) -> Filesystem<RamFlash> {
        let mut table = PartitionTable::new();
        table
            .add_partition("storage", PartitionType::Data, DataSubType::LittleFs.as_u8(), 0, 0x10000)
            .unwrap();
        let partition = table.find_by_label("storage").unwrap().clone();
        let device = BlockDevice::new(FlashPartition::new(flash.clone(), partition).unwrap());
        Filesystem::new(device).unwrap()
    }

    #[test]
    fn test_default_geometry() {
        let cfg = FsConfig::for_partition(0x10000, 4096);
        assert_eq!(cfg.block_count, 16);
        assert_eq!(cfg.read_size, 256);
        assert_eq!(cfg.prog_size, 256);
        assert_eq!(cfg.cache_size, 1024);
        assert_eq!(cfg.lookahead_size, 256);
        assert_eq!(cfg.block_cycles, 500);
    }

    #[test]
    fn test_io_len_clamped() {
        assert_eq!(io_len(0), 0);
        assert_eq!(io_len(4096), 4096);
        assert_eq!(io_len(i32::MAX as usize), i32::MAX as ll::lfs_size_t);
        assert_eq!(io_len(usize::MAX), i32::MAX as ll::lfs_size_t);
    }

    #[test]
    fn test_blank_flash_does_not_mount() {
        let flash = SharedFlash::new(RamFlash::new(0x10000));
        let mut fs = filesystem(&flash);
        assert!(fs.mount().is_err());
        assert!(!fs.is_mounted());

        fs.format().unwrap();
        fs.mount().unwrap();
        assert!(fs.is_mounted());
        assert!(fs.used_blocks().unwrap() >= 2);
    }

    #[test]
    fn test_file_roundtrip_through_ffi() {
        let flash = SharedFlash::new(RamFlash::new(0x10000));
        let mut fs = filesystem(&flash);
        fs.format().unwrap();
        fs.mount().unwrap();

        let create = ll::lfs_open_flags_LFS_O_RDWR as c_int | ll::lfs_open_flags_LFS_O_CREAT as c_int;
        let mut file = fs.file_open(c"/a.txt", create).unwrap();
        assert_eq!(fs.file_write(&mut file, b"littlefs").unwrap(), 8);
        assert_eq!(
            fs.file_seek(&mut file, 0, ll::lfs_whence_flags_LFS_SEEK_SET as c_int).unwrap(),
            0
        );
        let mut buf = [0u8; 8];
        assert_eq!(fs.file_read(&mut file, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"littlefs");
        assert_eq!(fs.file_tell(&mut file).unwrap(), 8);
        fs.file_close(file).unwrap();

        let info = fs.stat(c"/a.txt").unwrap();
        assert_eq!(info.entry_type, EntryType::File);
        assert_eq!(info.size, 8);
        assert_eq!(info.name_bytes(), b"a.txt");
    }

    #[test]
    fn test_directory_listing() {
        let flash = SharedFlash::new(RamFlash::new(0x10000));
        let mut fs = filesystem(&flash);
        fs.format().unwrap();
        fs.mount().unwrap();
        fs.mkdir(c"/d").unwrap();

        let mut dir = fs.dir_open(c"/").unwrap();
        let mut names = Vec::new();
        while let Some(info) = fs.dir_read(&mut dir).unwrap() {
            names.push((info.name_bytes().to_vec(), info.entry_type));
        }
        fs.dir_close(dir).unwrap();

        // littlefs 会列出 "." 和 ".."
        assert!(names.contains(&(b"d".to_vec(), EntryType::Directory)));
        assert!(names.contains(&(b".".to_vec(), EntryType::Directory)));
    }

    #[test]
    fn test_remount_keeps_data() {
        let flash = SharedFlash::new(RamFlash::new(0x10000));
        {
            let mut fs = filesystem(&flash);
            fs.format().unwrap();
            fs.mount().unwrap();
            fs.mkdir(c"/keep").unwrap();
        } // Drop 时卸载

        let mut fs = filesystem(&flash);
        fs.mount().unwrap();
        assert!(fs.stat(c"/keep").unwrap().is_dir());
        fs.remove(c"/keep").unwrap();
        assert!(fs.stat(c"/keep").is_err());
    }
}
