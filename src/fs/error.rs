//! 错误类型与错误码转换
//!
//! 两套并行的错误体系:
//! - [`Errno`]: 文件/目录操作返回的 POSIX 风格错误 (newlib 数值)
//! - [`VolumeError`]: 挂载、卸载、格式化等管理操作返回的状态 (`esp_err_t` 数值)
//!
//! littlefs 返回的负数错误码由 [`LfsError`] 承载，通过 `From<LfsError> for Errno`
//! 逐一映射；未识别的错误码原样透传。

use core::ffi::c_int;
use core::fmt;

use littlefs2_sys as ll;

const LFS_ERR_IO: c_int = ll::lfs_error_LFS_ERR_IO as c_int;
const LFS_ERR_CORRUPT: c_int = ll::lfs_error_LFS_ERR_CORRUPT as c_int;
const LFS_ERR_NOENT: c_int = ll::lfs_error_LFS_ERR_NOENT as c_int;
const LFS_ERR_EXIST: c_int = ll::lfs_error_LFS_ERR_EXIST as c_int;
const LFS_ERR_NOTDIR: c_int = ll::lfs_error_LFS_ERR_NOTDIR as c_int;
const LFS_ERR_ISDIR: c_int = ll::lfs_error_LFS_ERR_ISDIR as c_int;
const LFS_ERR_NOTEMPTY: c_int = ll::lfs_error_LFS_ERR_NOTEMPTY as c_int;
const LFS_ERR_BADF: c_int = ll::lfs_error_LFS_ERR_BADF as c_int;
const LFS_ERR_NOMEM: c_int = ll::lfs_error_LFS_ERR_NOMEM as c_int;
const LFS_ERR_NOSPC: c_int = ll::lfs_error_LFS_ERR_NOSPC as c_int;
const LFS_ERR_INVAL: c_int = ll::lfs_error_LFS_ERR_INVAL as c_int;

/// littlefs 库返回的原始错误码 (负数)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfsError(c_int);

impl LfsError {
    /// I/O 错误 (块设备回调失败)
    pub const IO: Self = Self(LFS_ERR_IO);
    /// 元数据损坏
    pub const CORRUPT: Self = Self(LFS_ERR_CORRUPT);
    /// 内存不足
    pub const NOMEM: Self = Self(LFS_ERR_NOMEM);
    /// 无效参数
    pub const INVAL: Self = Self(LFS_ERR_INVAL);

    /// 从原始返回值构造
    pub const fn from_code(code: c_int) -> Self {
        Self(code)
    }

    /// 原始错误码
    pub const fn code(&self) -> c_int {
        self.0
    }

    /// 检查 littlefs 返回值: 负数为错误，非负数原样返回
    #[inline]
    pub(crate) fn check(ret: c_int) -> Result<c_int, Self> {
        if ret < 0 {
            Err(Self(ret))
        } else {
            Ok(ret)
        }
    }
}

impl fmt::Display for LfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "littlefs error {}", self.0)
    }
}

/// POSIX 风格错误码 (ESP-IDF newlib 数值)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// 文件/目录不存在 (ENOENT)
    NoEnt,
    /// I/O 错误或文件系统损坏 (EIO)
    Io,
    /// 无效的描述符 (EBADF)
    BadF,
    /// 内存不足 (ENOMEM)
    NoMem,
    /// 已存在 (EEXIST)
    Exist,
    /// 卷未挂载 (ENODEV)
    NoDev,
    /// 不是目录 (ENOTDIR)
    NotDir,
    /// 是目录 (EISDIR)
    IsDir,
    /// 无效参数 (EINVAL)
    Inval,
    /// 打开的文件过多 (ENFILE)
    NFile,
    /// 空间不足 (ENOSPC)
    NoSpc,
    /// 目录非空 (ENOTEMPTY)
    NotEmpty,
    /// 名称过长 (ENAMETOOLONG)
    NameTooLong,
    /// 未识别的 littlefs 错误码，原样透传
    Other(i32),
}

impl Errno {
    /// 数值错误码
    pub const fn code(&self) -> i32 {
        match self {
            Self::NoEnt => 2,
            Self::Io => 5,
            Self::BadF => 9,
            Self::NoMem => 12,
            Self::Exist => 17,
            Self::NoDev => 19,
            Self::NotDir => 20,
            Self::IsDir => 21,
            Self::Inval => 22,
            Self::NFile => 23,
            Self::NoSpc => 28,
            Self::NotEmpty => 90,
            Self::NameTooLong => 91,
            Self::Other(code) => *code,
        }
    }
}

impl From<LfsError> for Errno {
    fn from(e: LfsError) -> Self {
        match e.0 {
            LFS_ERR_IO | LFS_ERR_CORRUPT => Self::Io,
            LFS_ERR_NOENT => Self::NoEnt,
            LFS_ERR_EXIST => Self::Exist,
            LFS_ERR_NOTDIR => Self::NotDir,
            LFS_ERR_ISDIR => Self::IsDir,
            LFS_ERR_NOTEMPTY => Self::NotEmpty,
            LFS_ERR_BADF => Self::BadF,
            LFS_ERR_NOMEM => Self::NoMem,
            LFS_ERR_NOSPC => Self::NoSpc,
            LFS_ERR_INVAL => Self::Inval,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEnt => write!(f, "No such file or directory"),
            Self::Io => write!(f, "I/O error"),
            Self::BadF => write!(f, "Bad file descriptor"),
            Self::NoMem => write!(f, "Out of memory"),
            Self::Exist => write!(f, "File exists"),
            Self::NoDev => write!(f, "Volume not mounted"),
            Self::NotDir => write!(f, "Not a directory"),
            Self::IsDir => write!(f, "Is a directory"),
            Self::Inval => write!(f, "Invalid argument"),
            Self::NFile => write!(f, "Too many open files"),
            Self::NoSpc => write!(f, "No space left on device"),
            Self::NotEmpty => write!(f, "Directory not empty"),
            Self::NameTooLong => write!(f, "File name too long"),
            Self::Other(code) => write!(f, "Unknown error {}", code),
        }
    }
}

/// 卷管理操作错误 (对应 `esp_err_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// 内存分配失败 (ESP_ERR_NO_MEM)
    NoMem,
    /// 状态无效: 已挂载 / 未挂载 / 分区加密 / 注册表已满 (ESP_ERR_INVALID_STATE)
    InvalidState,
    /// 找不到分区或卷 (ESP_ERR_NOT_FOUND)
    NotFound,
    /// 挂载或格式化失败 (ESP_FAIL)
    Fail,
}

impl VolumeError {
    /// 对应的 `esp_err_t` 数值
    pub const fn code(&self) -> i32 {
        match self {
            Self::NoMem => 0x101,
            Self::InvalidState => 0x103,
            Self::NotFound => 0x105,
            Self::Fail => -1,
        }
    }
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMem => write!(f, "Out of memory"),
            Self::InvalidState => write!(f, "Invalid state"),
            Self::NotFound => write!(f, "Not found"),
            Self::Fail => write!(f, "Mount or format failed"),
        }
    }
}
