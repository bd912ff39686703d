//! 目录遍历适配
//!
//! 每次 opendir 创建一个目录游标，游标记录从 0 开始、连续的偏移量，
//! 只有成功读到条目时才加一。littlefs 的目录位置不是连续整数，
//! 因此 seekdir 通过回到开头再读取 `offset` 次来实现 (O(offset))。

use embedded_storage::nor_flash::NorFlash;

use super::error::Errno;
use super::file::c_path;
use super::handle::HandleError;
use super::littlefs::{DirState, EntryType, Filesystem};
use super::volume::{DirHandle, Volume};
use crate::config::NAME_CAPACITY;

/// 目录项
///
/// 名称容量 `N` 固定，读到的名称放不下时返回 ENAMETOOLONG。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry<const N: usize = { NAME_CAPACITY }> {
    name: heapless::Vec<u8, N>,
    entry_type: EntryType,
}

impl<const N: usize> DirEntry<N> {
    /// 空目录项
    pub const fn new() -> Self {
        Self {
            name: heapless::Vec::new(),
            entry_type: EntryType::Unknown,
        }
    }

    /// 名称 (原始字节)
    pub fn name_bytes(&self) -> &[u8] {
        &self.name
    }

    /// 名称 (非 UTF-8 时为 None)
    pub fn name(&self) -> Option<&str> {
        core::str::from_utf8(&self.name).ok()
    }

    /// 条目类型
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// 放不下时保持原内容不变
    fn set(&mut self, name: &[u8], entry_type: EntryType) -> Result<(), Errno> {
        if name.len() > N {
            return Err(Errno::NameTooLong);
        }
        self.name.clear();
        self.name
            .extend_from_slice(name)
            .map_err(|_| Errno::NameTooLong)?;
        self.entry_type = entry_type;
        Ok(())
    }
}

impl<const N: usize> Default for DirEntry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// 目录游标表中的条目
pub(crate) struct DirCursor {
    pub(crate) state: DirState,
    entry: DirEntry,
    offset: u32,
}

/// 读取下一个条目到 `entry`；到达末尾返回 false
fn read_into<F: NorFlash, const N: usize>(
    fs: &mut Filesystem<F>,
    state: &mut DirState,
    offset: &mut u32,
    entry: &mut DirEntry<N>,
) -> Result<bool, Errno> {
    let info = match fs.dir_read(state)? {
        Some(info) => info,
        None => return Ok(false),
    };
    entry.set(info.name_bytes(), info.entry_type)?;
    *offset += 1;
    Ok(true)
}

impl<F: NorFlash> Volume<F> {
    /// 打开目录
    pub async fn opendir(&self, path: &str) -> Result<DirHandle, Errno> {
        let c_path = c_path(path)?;
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let index = state.dirs.reserve().map_err(|e| match e {
            HandleError::Full | HandleError::NoMem => Errno::NoMem,
        })?;
        let dir = state.fs.dir_open(&c_path)?;
        state.dirs.fill(
            index,
            DirCursor {
                state: dir,
                entry: DirEntry::new(),
                offset: 0,
            },
        );
        Ok(DirHandle::new(index))
    }

    /// 读取下一个条目；到达末尾返回 `Ok(None)`
    ///
    /// 返回的是游标内可复用目录项的副本
    pub async fn readdir(&self, dir: DirHandle) -> Result<Option<DirEntry>, Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let cursor = state.dirs.get_mut(dir.raw()).ok_or(Errno::BadF)?;
        if read_into(&mut state.fs, &mut cursor.state, &mut cursor.offset, &mut cursor.entry)? {
            Ok(Some(cursor.entry.clone()))
        } else {
            Ok(None)
        }
    }

    /// 读取下一个条目到调用者提供的目录项；到达末尾返回 `Ok(false)`
    pub async fn readdir_r<const N: usize>(
        &self,
        dir: DirHandle,
        entry: &mut DirEntry<N>,
    ) -> Result<bool, Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let cursor = state.dirs.get_mut(dir.raw()).ok_or(Errno::BadF)?;
        read_into(&mut state.fs, &mut cursor.state, &mut cursor.offset, entry)
    }

    /// 当前偏移量
    pub async fn telldir(&self, dir: DirHandle) -> Result<u32, Errno> {
        let mut guard = self.lock_mounted().await?;
        let cursor = guard.dirs.get_mut(dir.raw()).ok_or(Errno::BadF)?;
        Ok(cursor.offset)
    }

    /// 回到开头后读取 `offset` 次
    ///
    /// 出错或 `offset` 超出条目数时游标位置不确定，调用者应重新打开目录
    pub async fn seekdir(&self, dir: DirHandle, offset: u32) -> Result<(), Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let cursor = state.dirs.get_mut(dir.raw()).ok_or(Errno::BadF)?;
        state.fs.dir_rewind(&mut cursor.state)?;
        cursor.offset = 0;
        while cursor.offset < offset {
            state.fs.dir_read(&mut cursor.state)?;
            cursor.offset += 1;
        }
        Ok(())
    }

    /// 关闭目录；littlefs 关闭失败时游标仍然被释放
    pub async fn closedir(&self, dir: DirHandle) -> Result<(), Errno> {
        let mut guard = self.lock_mounted().await?;
        let state = &mut *guard;
        let cursor = state.dirs.remove(dir.raw()).ok_or(Errno::BadF)?;
        Ok(state.fs.dir_close(cursor.state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::{O_CREAT, O_WRONLY};
    use crate::fs::storage::{RamFlash, SharedFlash};
    use crate::fs::volume::tests::fresh_volume;
    use alloc::string::String;
    use alloc::vec::Vec;
    use embassy_futures::block_on;

    /// 创建 /d 以及其中的两个文件和一个子目录
    fn populated() -> (SharedFlash<RamFlash>, Volume<RamFlash>) {
        let (flash, volume) = fresh_volume(4);
        block_on(async {
            volume.mkdir("/d", 0).await.unwrap();
            for name in ["/d/one", "/d/two"] {
                let fd = volume.open(name, O_WRONLY | O_CREAT, 0).await.unwrap();
                volume.write(fd, b"x").await.unwrap();
                volume.close(fd).await.unwrap();
            }
            volume.mkdir("/d/sub", 0).await.unwrap();
        });
        (flash, volume)
    }

    fn read_all(volume: &Volume<RamFlash>, dir: DirHandle) -> Vec<String> {
        block_on(async {
            let mut names = Vec::new();
            while let Some(entry) = volume.readdir(dir).await.unwrap() {
                names.push(String::from(entry.name().unwrap()));
            }
            names
        })
    }

    #[test]
    fn test_dense_offsets_and_end() {
        let (_flash, volume) = populated();
        block_on(async {
            let dir = volume.opendir("/d").await.unwrap();
            assert_eq!(volume.telldir(dir).await, Ok(0));

            let mut count = 0;
            while volume.readdir(dir).await.unwrap().is_some() {
                count += 1;
                assert_eq!(volume.telldir(dir).await, Ok(count));
            }
            // ".", "..", one, sub, two
            assert_eq!(count, 5);

            // 末尾不增加偏移
            assert_eq!(volume.readdir(dir).await, Ok(None));
            assert_eq!(volume.telldir(dir).await, Ok(5));
            volume.closedir(dir).await.unwrap();
        });
    }

    #[test]
    fn test_entry_types() {
        let (_flash, volume) = populated();
        block_on(async {
            let dir = volume.opendir("/d").await.unwrap();
            let mut entry: DirEntry = DirEntry::new();
            let mut seen = Vec::new();
            while volume.readdir_r(dir, &mut entry).await.unwrap() {
                seen.push((String::from(entry.name().unwrap()), entry.entry_type()));
            }
            volume.closedir(dir).await.unwrap();

            assert!(seen.contains(&(String::from("one"), EntryType::File)));
            assert!(seen.contains(&(String::from("sub"), EntryType::Directory)));
        });
    }

    #[test]
    fn test_seekdir_matches_sequential_reads() {
        let (_flash, volume) = populated();
        let dir = block_on(volume.opendir("/d")).unwrap();
        let all = read_all(&volume, dir);
        block_on(volume.closedir(dir)).unwrap();

        for k in 0..all.len() {
            block_on(async {
                let dir = volume.opendir("/d").await.unwrap();
                // 先读几次，确认 seekdir 会回到开头
                volume.readdir(dir).await.unwrap();
                volume.seekdir(dir, k as u32).await.unwrap();
                assert_eq!(volume.telldir(dir).await, Ok(k as u32));
                let entry = volume.readdir(dir).await.unwrap().unwrap();
                assert_eq!(entry.name().unwrap(), all[k]);
                volume.closedir(dir).await.unwrap();
            });
        }
    }

    #[test]
    fn test_name_too_long_for_entry() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            volume.mkdir("/n", 0).await.unwrap();
            volume.mkdir("/n/long-directory-name", 0).await.unwrap();

            let dir = volume.opendir("/n").await.unwrap();
            let mut small: DirEntry<4> = DirEntry::new();
            // "." 和 ".." 放得下
            assert_eq!(volume.readdir_r(dir, &mut small).await, Ok(true));
            assert_eq!(volume.readdir_r(dir, &mut small).await, Ok(true));
            assert_eq!(
                volume.readdir_r(dir, &mut small).await,
                Err(Errno::NameTooLong)
            );
            // 失败的读取不计入偏移，目录项保留上一次的内容
            assert_eq!(volume.telldir(dir).await, Ok(2));
            assert_eq!(small.name(), Some(".."));
            volume.closedir(dir).await.unwrap();
        });
    }

    #[test]
    fn test_entry_kept_when_name_does_not_fit() {
        let mut entry: DirEntry<4> = DirEntry::new();
        entry.set(b"abc", EntryType::File).unwrap();
        assert_eq!(entry.set(b"too-long", EntryType::Directory), Err(Errno::NameTooLong));
        assert_eq!(entry.name(), Some("abc"));
        assert_eq!(entry.entry_type(), EntryType::File);

        entry.set(b"abcd", EntryType::Directory).unwrap();
        assert_eq!(entry.name_bytes(), b"abcd");
    }

    #[test]
    fn test_seekdir_read_failure_reported() {
        let (flash, volume) = populated();
        block_on(async {
            let dir = volume.opendir("/d").await.unwrap();
            volume.readdir(dir).await.unwrap();

            flash.with(|f| f.set_fail_read(true));
            assert_eq!(volume.seekdir(dir, 3).await, Err(Errno::Io));
            flash.with(|f| f.set_fail_read(false));

            // 出错后的位置不确定，但游标仍可关闭
            volume.closedir(dir).await.unwrap();
            assert_eq!(volume.telldir(dir).await, Err(Errno::BadF));
        });
    }

    #[test]
    fn test_closedir_frees_cursor_while_flash_fails() {
        let (flash, volume) = populated();
        block_on(async {
            let first = volume.opendir("/d").await.unwrap();
            let second = volume.opendir("/").await.unwrap();
            assert_eq!(second, DirHandle::new(1));

            flash.with(|f| {
                f.set_fail_read(true);
                f.set_fail_write(true);
                f.set_fail_erase(true);
            });
            assert_eq!(volume.closedir(first).await, Ok(()));
            flash.with(|f| {
                f.set_fail_read(false);
                f.set_fail_write(false);
                f.set_fail_erase(false);
            });

            assert_eq!(volume.closedir(first).await, Err(Errno::BadF));
            assert_eq!(volume.opendir("/").await, Ok(DirHandle::new(0)));
            volume.closedir(second).await.unwrap();
        });
    }

    #[test]
    fn test_invalid_handles() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            let bogus = DirHandle::new(7);
            assert_eq!(volume.telldir(bogus).await, Err(Errno::BadF));
            assert_eq!(volume.readdir(bogus).await, Err(Errno::BadF));
            assert_eq!(volume.seekdir(bogus, 0).await, Err(Errno::BadF));
            assert_eq!(volume.closedir(bogus).await, Err(Errno::BadF));

            let dir = volume.opendir("/").await.unwrap();
            volume.closedir(dir).await.unwrap();
            assert_eq!(volume.closedir(dir).await, Err(Errno::BadF));
        });
    }

    #[test]
    fn test_opendir_failures_free_cursor() {
        let (_flash, volume) = fresh_volume(4);
        block_on(async {
            assert_eq!(volume.opendir("/missing").await, Err(Errno::NoEnt));

            let fd = volume.open("/file", O_WRONLY | O_CREAT, 0).await.unwrap();
            volume.close(fd).await.unwrap();
            assert_eq!(volume.opendir("/file").await, Err(Errno::NotDir));

            // 失败的 opendir 没有占用游标
            let dir = volume.opendir("/").await.unwrap();
            assert_eq!(dir, DirHandle::new(0));
            volume.closedir(dir).await.unwrap();
        });
    }

    #[test]
    fn test_format_closes_cursors() {
        let (_flash, volume) = populated();
        block_on(async {
            let dir = volume.opendir("/d").await.unwrap();
            volume.format().await.unwrap();
            assert_eq!(volume.telldir(dir).await, Err(Errno::BadF));
            assert_eq!(volume.stat("/d").await, Err(Errno::NoEnt));
        });
    }
}
