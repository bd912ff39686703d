//! 文件操作适配
//!
//! 把 POSIX 风格的调用 (整数描述符、扁平的标志位) 转换为 littlefs 的有状态句柄 API。
//! 同一卷上的所有操作 (包括不同描述符上的) 都由卷锁串行化。

use alloc::ffi::CString;
use alloc::vec::Vec;
use core::ffi::c_int;

use embedded_storage::nor_flash::NorFlash;
use littlefs2_sys as ll;

use super::error::Errno;
use super::handle::HandleError;
use super::littlefs::{FileState, Info};
use super::volume::{Fd, Volume};

// ===== POSIX 常量 (newlib 数值) =====

/// 只读
pub const O_RDONLY: i32 = 0;
/// 只写
pub const O_WRONLY: i32 = 1;
/// 读写
pub const O_RDWR: i32 = 2;
/// 访问模式掩码
pub const O_ACCMODE: i32 = 3;
/// 追加
pub const O_APPEND: i32 = 0x0008;
/// 不存在时创建
pub const O_CREAT: i32 = 0x0200;
/// 截断
pub const O_TRUNC: i32 = 0x0400;
/// 与 O_CREAT 一起使用: 已存在时失败
pub const O_EXCL: i32 = 0x0800;

/// 从文件开头
pub const SEEK_SET: i32 = 0;
/// 从当前位置
pub const SEEK_CUR: i32 = 1;
/// 从文件末尾
pub const SEEK_END: i32 = 2;

/// 目录
pub const S_IFDIR: u32 = 0o040000;
/// 普通文件
pub const S_IFREG: u32 = 0o100000;
/// 所有权限位
pub const S_IRWXUGO: u32 = 0o777;

/// 文件打开选项，生成 POSIX 标志位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    create: bool,
    create_new: bool,
    append: bool,
    truncate: bool,
}

impl OpenOptions {
    /// 创建新的打开选项
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            create: false,
            create_new: false,
            append: false,
            truncate: false,
        }
    }

    /// 设置读取权限
    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// 设置写入权限
    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// 不存在时创建
    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// 创建新文件，已存在则失败
    pub const fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// 追加模式
    pub const fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// 截断文件
    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// 只读打开
    pub const fn read_only() -> Self {
        Self::new().read(true)
    }

    /// 只写打开 (创建或截断)
    pub const fn write_only() -> Self {
        Self::new().write(true).create(true).truncate(true)
    }

    /// 追加模式打开
    pub const fn append_mode() -> Self {
        Self::new().write(true).create(true).append(true)
    }

    /// 转换为 POSIX 标志位
    pub const fn flags(&self) -> i32 {
        let mut flags = match (self.read, self.write || self.append) {
            (_, false) => O_RDONLY,
            (false, true) => O_WRONLY,
            (true, true) => O_RDWR,
        };
        if self.create || self.create_new {
            flags |= O_CREAT;
        }
        if self.create_new {
            flags |= O_EXCL;
        }
        if self.truncate {
            flags |= O_TRUNC;
        }
        if self.append {
            flags |= O_APPEND;
        }
        flags
    }
}

/// POSIX 标志位转换为 littlefs 标志位
fn lfs_flags(flags: i32) -> Result<c_int, Errno> {
    let mut out = match flags & O_ACCMODE {
        O_RDONLY => ll::lfs_open_flags_LFS_O_RDONLY as c_int,
        O_WRONLY => ll::lfs_open_flags_LFS_O_WRONLY as c_int,
        O_RDWR => ll::lfs_open_flags_LFS_O_RDWR as c_int,
        _ => return Err(Errno::Inval),
    };
    if flags & O_CREAT != 0 {
        out |= ll::lfs_open_flags_LFS_O_CREAT as c_int;
    }
    if flags & O_EXCL != 0 {
        out |= ll::lfs_open_flags_LFS_O_EXCL as c_int;
    }
    if flags & O_TRUNC != 0 {
        out |= ll::lfs_open_flags_LFS_O_TRUNC as c_int;
    }
    if flags & O_APPEND != 0 {
        out |= ll::lfs_open_flags_LFS_O_APPEND as c_int;
    }
    Ok(out)
}

fn lfs_whence(whence: i32) -> Result<c_int, Errno> {
    match whence {
        SEEK_SET => Ok(ll::lfs_whence_flags_LFS_SEEK_SET as c_int),
        SEEK_CUR => Ok(ll::lfs_whence_flags_LFS_SEEK_CUR as c_int),
        SEEK_END => Ok(ll::lfs_whence_flags_LFS_SEEK_END as c_int),
        _ => Err(Errno::Inval),
    }
}

/// 复制路径为 C 字符串；分配失败为 ENOMEM，内含 NUL 为 EINVAL
pub(crate) fn c_path(path: &str) -> Result<CString, Errno> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(path.len() + 1)
        .map_err(|_| Errno::NoMem)?;
    bytes.extend_from_slice(path.as_bytes());
    bytes.push(0);
    CString::from_vec_with_nul(bytes).map_err(|_| Errno::Inval)
}

/// 文件状态信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// 文件大小 (字节)
    pub size: u32,
    /// 类型位 | 0o777
    pub mode: u32,
}

impl Stat {
    fn from_info(info: &Info) -> Self {
        let kind = if info.is_dir() { S_IFDIR } else { S_IFREG };
        Self {
            size: info.size,
            mode: kind | S_IRWXUGO,
        }
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    /// 是否为普通文件
    pub fn is_file(&self) -> bool {
        self.mode & S_IFREG != 0
    }
}

/// 句柄表中的打开文件
pub(crate) struct OpenFile {
    pub(crate) state: FileState,
    /// 打开时的路径，fstat 据此重新查询
    pub(crate) path: CString,
}

impl<F: NorFlash> Volume<F> {
    /// 打开文件；`mode` 被忽略
    pub async fn open(&self, path: &str, flags: i32, _mode: u32) -> Result<Fd, Errno> {
        let lfs_flags = lfs_flags(flags)?;
        let c_path = c_path(path)?;

        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let index = state.files.reserve().map_err(|e| match e {
            HandleError::Full => {
                crate::log_warn!("no free file descriptor");
                Errno::NFile
            }
            HandleError::NoMem => Errno::NoMem,
        })?;
        let file = state.fs.file_open(&c_path, lfs_flags)?;
        state.files.fill(index, OpenFile { state: file, path: c_path });
        crate::log_trace!("open {} -> fd {}", path, index);
        Ok(Fd::new(index))
    }

    /// 以 [`OpenOptions`] 打开文件
    pub async fn open_with(&self, path: &str, options: OpenOptions) -> Result<Fd, Errno> {
        self.open(path, options.flags(), 0).await
    }

    /// 关闭描述符；littlefs 关闭失败时槽位仍然被释放，错误照常返回
    pub async fn close(&self, fd: Fd) -> Result<(), Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.remove(fd.raw()).ok_or(Errno::BadF)?;
        crate::log_trace!("close fd {}", fd.raw());
        state.fs.file_close(file.state).map_err(Errno::from)
    }

    /// 读取，返回读取的字节数 (0 表示文件末尾)
    pub async fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.get_mut(fd.raw()).ok_or(Errno::BadF)?;
        Ok(state.fs.file_read(&mut file.state, buf)?)
    }

    /// 写入，返回写入的字节数
    pub async fn write(&self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.get_mut(fd.raw()).ok_or(Errno::BadF)?;
        Ok(state.fs.file_write(&mut file.state, data)?)
    }

    /// 移动文件位置，返回新的绝对位置
    ///
    /// `whence` 无效时在加锁前返回 EINVAL，位置不变
    pub async fn lseek(&self, fd: Fd, offset: i32, whence: i32) -> Result<u32, Errno> {
        let whence = lfs_whence(whence)?;
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.get_mut(fd.raw()).ok_or(Errno::BadF)?;
        state.fs.file_seek(&mut file.state, offset, whence)?;
        Ok(state.fs.file_tell(&mut file.state)?)
    }

    /// 把描述符上缓存的写入落盘
    pub async fn fsync(&self, fd: Fd) -> Result<(), Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.get_mut(fd.raw()).ok_or(Errno::BadF)?;
        Ok(state.fs.file_sync(&mut file.state)?)
    }

    /// 按打开时记录的路径查询
    ///
    /// 结果反映已落盘的状态: 尚未 fsync 的写入不会计入大小
    pub async fn fstat(&self, fd: Fd) -> Result<Stat, Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let file = state.files.get(fd.raw()).ok_or(Errno::BadF)?;
        let info = state.fs.stat(&file.path)?;
        Ok(Stat::from_info(&info))
    }

    /// 按路径查询
    pub async fn stat(&self, path: &str) -> Result<Stat, Errno> {
        let c_path = c_path(path)?;
        let mut guard = self.lock_mounted().await?;
        let info = guard.fs.stat(&c_path)?;
        Ok(Stat::from_info(&info))
    }

    /// 删除文件
    pub async fn unlink(&self, path: &str) -> Result<(), Errno> {
        let c_path = c_path(path)?;
        let mut guard = self.lock_mounted().await?;
        Ok(guard.fs.remove(&c_path)?)
    }

    /// 删除空目录
    pub async fn rmdir(&self, path: &str) -> Result<(), Errno> {
        let c_path = c_path(path)?;
        let mut guard = self.lock_mounted().await?;
        Ok(guard.fs.remove(&c_path)?)
    }

    /// 重命名
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), Errno> {
        let from = c_path(from)?;
        let to = c_path(to)?;
        let mut guard = self.lock_mounted().await?;
        Ok(guard.fs.rename(&from, &to)?)
    }

    /// 创建目录；`mode` 被忽略
    pub async fn mkdir(&self, path: &str, _mode: u32) -> Result<(), Errno> {
        let c_path = c_path(path)?;
        let mut guard = self.lock_mounted().await?;
        Ok(guard.fs.mkdir(&c_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::volume::tests::fresh_volume;
    use embassy_futures::block_on;

    #[test]
    fn test_open_options_flags() {
        assert_eq!(OpenOptions::read_only().flags(), O_RDONLY);
        assert_eq!(OpenOptions::write_only().flags(), O_WRONLY | O_CREAT | O_TRUNC);
        assert_eq!(OpenOptions::append_mode().flags(), O_WRONLY | O_CREAT | O_APPEND);
        assert_eq!(
            OpenOptions::new().read(true).write(true).create_new(true).flags(),
            O_RDWR | O_CREAT | O_EXCL
        );
    }

    #[test]
    fn test_flag_translation() {
        assert_eq!(lfs_flags(O_RDONLY), Ok(ll::lfs_open_flags_LFS_O_RDONLY as c_int));
        assert_eq!(
            lfs_flags(O_RDWR | O_CREAT),
            Ok(ll::lfs_open_flags_LFS_O_RDWR as c_int | ll::lfs_open_flags_LFS_O_CREAT as c_int)
        );
        assert_eq!(lfs_flags(O_ACCMODE), Err(Errno::Inval));
        assert_eq!(lfs_whence(3), Err(Errno::Inval));
    }

    #[test]
    fn test_path_with_nul_rejected() {
        assert_eq!(c_path("/a\0b").err(), Some(Errno::Inval));
        assert_eq!(c_path("/ok").unwrap().as_bytes(), b"/ok");
    }

    #[test]
    fn test_write_sync_stat() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            let fd = volume.open("/data.bin", O_RDWR | O_CREAT, 0).await.unwrap();
            assert_eq!(volume.write(fd, &[0xA5; 300]).await, Ok(300));
            volume.fsync(fd).await.unwrap();

            let st = volume.stat("/data.bin").await.unwrap();
            assert_eq!(st.size, 300);
            assert!(st.is_file());
            assert_eq!(st.mode, S_IFREG | 0o777);
            assert_eq!(volume.fstat(fd).await, Ok(st));

            // 原位覆盖不增长
            assert_eq!(volume.lseek(fd, 10, SEEK_SET).await, Ok(10));
            volume.write(fd, b"abc").await.unwrap();
            volume.fsync(fd).await.unwrap();
            assert_eq!(volume.fstat(fd).await.unwrap().size, 300);

            volume.close(fd).await.unwrap();

            let dir = volume.stat("/").await.unwrap();
            assert!(dir.is_dir());
            assert_eq!(dir.mode, S_IFDIR | 0o777);
        });
    }

    #[test]
    fn test_fstat_reflects_persisted_state() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            let fd = volume.open("/log", O_WRONLY | O_CREAT, 0).await.unwrap();
            volume.write(fd, b"0123456789").await.unwrap();
            // 未 fsync 的写入不可见
            assert_eq!(volume.fstat(fd).await.unwrap().size, 0);
            volume.fsync(fd).await.unwrap();
            assert_eq!(volume.fstat(fd).await.unwrap().size, 10);
            volume.close(fd).await.unwrap();
        });
    }

    #[test]
    fn test_lowest_descriptor_reused() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            let a = volume.open("/a", O_WRONLY | O_CREAT, 0).await.unwrap();
            let b = volume.open("/b", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!((a.raw(), b.raw()), (0, 1));

            volume.close(a).await.unwrap();
            let c = volume.open("/c", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(c.raw(), 0);
            let d = volume.open("/d", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(d.raw(), 2);

            for fd in [b, c, d] {
                volume.close(fd).await.unwrap();
            }
            assert_eq!(volume.open_files().await, 0);
        });
    }

    #[test]
    fn test_invalid_whence_keeps_position() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            let fd = volume.open("/seek", O_RDWR | O_CREAT, 0).await.unwrap();
            volume.write(fd, b"abcdef").await.unwrap();
            assert_eq!(volume.lseek(fd, 2, SEEK_SET).await, Ok(2));

            assert_eq!(volume.lseek(fd, 1, 42).await, Err(Errno::Inval));
            assert_eq!(volume.lseek(fd, 0, SEEK_CUR).await, Ok(2));

            let mut buf = [0u8; 2];
            assert_eq!(volume.read(fd, &mut buf).await, Ok(2));
            assert_eq!(&buf, b"cd");

            assert_eq!(volume.lseek(fd, -1, SEEK_END).await, Ok(5));
            assert_eq!(volume.lseek(fd, -10, SEEK_SET).await, Err(Errno::Inval));
            volume.close(fd).await.unwrap();
        });
    }

    #[test]
    fn test_bad_descriptors() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            let mut buf = [0u8; 4];
            for fd in [Fd::new(0), Fd::new(1), Fd::new(99)] {
                assert_eq!(volume.read(fd, &mut buf).await, Err(Errno::BadF));
                assert_eq!(volume.write(fd, b"x").await, Err(Errno::BadF));
                assert_eq!(volume.lseek(fd, 0, SEEK_SET).await, Err(Errno::BadF));
                assert_eq!(volume.fsync(fd).await, Err(Errno::BadF));
                assert_eq!(volume.fstat(fd).await, Err(Errno::BadF));
                assert_eq!(volume.close(fd).await, Err(Errno::BadF));
            }
        });
    }

    #[test]
    fn test_failed_open_does_not_leak() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            assert_eq!(volume.open("/nope", O_RDONLY, 0).await, Err(Errno::NoEnt));
            assert_eq!(volume.open("/bad\0name", O_RDONLY, 0).await, Err(Errno::Inval));
            assert_eq!(volume.open("/x", O_ACCMODE, 0).await, Err(Errno::Inval));

            let fd = volume.open("/x", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(fd.raw(), 0);
            volume.close(fd).await.unwrap();

            assert_eq!(
                volume.open("/x", O_WRONLY | O_CREAT | O_EXCL, 0).await,
                Err(Errno::Exist)
            );
            assert_eq!(volume.open_files().await, 0);
        });
    }

    #[test]
    fn test_failed_close_frees_descriptor() {
        let (flash, volume) = fresh_volume(2);
        block_on(async {
            let fd = volume.open("/pending", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(fd.raw(), 0);
            // 数据还在文件缓存中，关闭时才写入 Flash
            volume.write(fd, b"buffered").await.unwrap();

            flash.with(|f| f.set_fail_write(true));
            assert_eq!(volume.close(fd).await, Err(Errno::Io));
            flash.with(|f| f.set_fail_write(false));

            assert_eq!(volume.open_files().await, 0);
            assert_eq!(volume.close(fd).await, Err(Errno::BadF));

            let again = volume.open("/pending", O_RDONLY, 0).await.unwrap();
            assert_eq!(again.raw(), 0);
            volume.close(again).await.unwrap();
        });
    }

    #[test]
    fn test_rename_scenario_and_enfile() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            let fd = volume.open("/a", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(volume.write(fd, b"hi").await, Ok(2));
            volume.close(fd).await.unwrap();

            volume.rename("/a", "/b").await.unwrap();
            assert_eq!(volume.stat("/a").await, Err(Errno::NoEnt));

            let r = volume.open("/b", O_RDONLY, 0).await.unwrap();
            let mut buf = [0u8; 8];
            assert_eq!(volume.read(r, &mut buf).await, Ok(2));
            assert_eq!(&buf[..2], b"hi");

            let second = volume.open("/c", O_WRONLY | O_CREAT, 0).await.unwrap();
            assert_eq!(volume.open("/d", O_WRONLY | O_CREAT, 0).await, Err(Errno::NFile));

            volume.close(r).await.unwrap();
            volume.close(second).await.unwrap();
        });
    }

    #[test]
    fn test_directories_and_removal() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            volume.mkdir("/dir", 0o755).await.unwrap();
            assert_eq!(volume.mkdir("/dir", 0).await, Err(Errno::Exist));

            let fd = volume.open("/dir/f", O_WRONLY | O_CREAT, 0).await.unwrap();
            volume.close(fd).await.unwrap();

            assert_eq!(volume.rmdir("/dir").await, Err(Errno::NotEmpty));
            assert_eq!(volume.open("/dir", O_RDONLY, 0).await, Err(Errno::IsDir));
            assert_eq!(volume.mkdir("/dir/f/g", 0).await, Err(Errno::NotDir));

            volume.unlink("/dir/f").await.unwrap();
            volume.rmdir("/dir").await.unwrap();
            assert_eq!(volume.stat("/dir").await, Err(Errno::NoEnt));
            assert_eq!(volume.unlink("/dir").await, Err(Errno::NoEnt));
        });
    }

    #[test]
    fn test_append_and_open_with() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            let fd = volume.open_with("/log", OpenOptions::write_only()).await.unwrap();
            volume.write(fd, b"one").await.unwrap();
            volume.close(fd).await.unwrap();

            let fd = volume.open_with("/log", OpenOptions::append_mode()).await.unwrap();
            volume.write(fd, b"two").await.unwrap();
            volume.close(fd).await.unwrap();

            let fd = volume.open_with("/log", OpenOptions::read_only()).await.unwrap();
            let mut buf = [0u8; 16];
            assert_eq!(volume.read(fd, &mut buf).await, Ok(6));
            assert_eq!(&buf[..6], b"onetwo");
            volume.close(fd).await.unwrap();
        });
    }

    #[test]
    fn test_operations_after_shutdown() {
        let (_flash, volume) = fresh_volume(2);
        block_on(async {
            let fd = volume.open("/f", O_WRONLY | O_CREAT, 0).await.unwrap();
            volume.shutdown().await;
            assert_eq!(volume.write(fd, b"x").await, Err(Errno::NoDev));
            assert_eq!(volume.open("/f", O_RDONLY, 0).await, Err(Errno::NoDev));
            assert_eq!(volume.stat("/f").await, Err(Errno::NoDev));
            assert_eq!(volume.opendir("/").await, Err(Errno::NoDev));
        });
    }
}
