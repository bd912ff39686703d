//! ESP32 分区表支持
//!
//! 解析和管理 ESP32 分区表，为卷挂载定位数据分区:
//! - 按标签查找 (仅数据分区)
//! - 未指定标签时查找第一个 LittleFS 子类型分区
//! - 从 Flash 的 0x8000 偏移读取二进制分区表

use core::fmt;

use embedded_storage::nor_flash::NorFlash;

use super::storage::{SharedFlash, StorageError};
use crate::config::{PARTITION_LABEL_MAX, PARTITION_TABLE_OFFSET, PARTITION_TABLE_SIZE};

/// 分区表魔数 (ESP-IDF 格式)
const PARTITION_TABLE_MAGIC: u16 = 0xAA50;

/// 分区表最大条目数
const MAX_PARTITION_ENTRIES: usize = 95;

/// 单个分区条目大小
const PARTITION_ENTRY_SIZE: usize = 32;

/// 分区表错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// 分区表已满
    TableFull,
    /// 标签过长
    LabelTooLong,
    /// 分区表不存在或格式无效
    InvalidTable,
    /// 分区结束地址超出 32 位地址空间
    OutOfRange,
    /// 读取 Flash 失败
    Storage(StorageError),
}

impl From<StorageError> for PartitionError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "Partition table full"),
            Self::LabelTooLong => write!(f, "Partition label too long"),
            Self::InvalidTable => write!(f, "Invalid partition table"),
            Self::OutOfRange => write!(f, "Partition exceeds address space"),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

/// 分区类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartitionType {
    /// 应用程序分区
    App = 0x00,
    /// 数据分区
    Data = 0x01,
    /// 未知类型
    Unknown(u8),
}

impl From<u8> for PartitionType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::App,
            0x01 => Self::Data,
            other => Self::Unknown(other),
        }
    }
}

/// 数据分区子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataSubType {
    /// OTA 数据
    Ota = 0x00,
    /// PHY 初始化数据
    Phy = 0x01,
    /// NVS (Non-Volatile Storage)
    Nvs = 0x02,
    /// FAT 文件系统
    Fat = 0x81,
    /// SPIFFS 文件系统
    Spiffs = 0x82,
    /// LittleFS 文件系统
    LittleFs = 0x83,
    /// 未知子类型
    Unknown(u8),
}

impl From<u8> for DataSubType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Ota,
            0x01 => Self::Phy,
            0x02 => Self::Nvs,
            0x81 => Self::Fat,
            0x82 => Self::Spiffs,
            0x83 => Self::LittleFs,
            other => Self::Unknown(other),
        }
    }
}

impl DataSubType {
    /// 转换为 u8 值
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Ota => 0x00,
            Self::Phy => 0x01,
            Self::Nvs => 0x02,
            Self::Fat => 0x81,
            Self::Spiffs => 0x82,
            Self::LittleFs => 0x83,
            Self::Unknown(v) => *v,
        }
    }
}

/// 分区标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionFlags {
    /// 分区已加密 (littlefs 需要原始块访问，不能挂载)
    pub encrypted: bool,
    /// 分区只读
    pub readonly: bool,
}

impl From<u32> for PartitionFlags {
    fn from(value: u32) -> Self {
        Self {
            encrypted: (value & 0x01) != 0,
            readonly: (value & 0x02) != 0,
        }
    }
}

/// 单个分区描述
#[derive(Clone, PartialEq, Eq)]
pub struct Partition {
    /// 分区标签
    pub label: heapless::String<PARTITION_LABEL_MAX>,
    /// 分区类型
    pub partition_type: PartitionType,
    /// 子类型 (原始值)
    pub subtype: u8,
    /// 分区在 Flash 中的偏移量
    pub offset: u32,
    /// 分区大小 (字节)
    pub size: u32,
    /// 分区标志
    pub flags: PartitionFlags,
}

impl Partition {
    /// 从原始字节解析分区条目
    pub fn from_bytes(data: &[u8; PARTITION_ENTRY_SIZE]) -> Option<Self> {
        // 检查魔数
        let magic = u16::from_le_bytes([data[0], data[1]]);
        if magic != PARTITION_TABLE_MAGIC {
            return None;
        }

        let partition_type = PartitionType::from(data[2]);
        let subtype = data[3];
        let offset = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        offset.checked_add(size)?;

        // 解析标签 (12-27 字节，null 结尾)
        let label_bytes = &data[12..28];
        let label_len = label_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let label_str = core::str::from_utf8(&label_bytes[..label_len]).ok()?;
        let mut label = heapless::String::new();
        label.push_str(label_str).ok()?;

        let flags = PartitionFlags::from(u32::from_le_bytes([data[28], data[29], data[30], data[31]]));

        Some(Self {
            label,
            partition_type,
            subtype,
            offset,
            size,
            flags,
        })
    }

    /// 检查是否为数据分区
    pub fn is_data(&self) -> bool {
        matches!(self.partition_type, PartitionType::Data)
    }

    /// 检查是否为 LittleFS 分区
    pub fn is_littlefs(&self) -> bool {
        self.is_data() && self.subtype == DataSubType::LittleFs.as_u8()
    }

    /// 获取分区结束地址 (不含)
    pub fn end_offset(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// 两个分区的地址范围是否重叠
    pub fn overlaps(&self, other: &Partition) -> bool {
        (self.offset as u64) < other.end_offset() && (other.offset as u64) < self.end_offset()
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("label", &self.label.as_str())
            .field("type", &self.partition_type)
            .field("subtype", &self.subtype)
            .field("offset", &format_args!("0x{:08X}", self.offset))
            .field("size", &format_args!("0x{:08X} ({}KB)", self.size, self.size / 1024))
            .field("flags", &self.flags)
            .finish()
    }
}

/// 分区表
#[derive(Clone)]
pub struct PartitionTable {
    /// 分区列表
    partitions: heapless::Vec<Partition, MAX_PARTITION_ENTRIES>,
}

impl PartitionTable {
    /// 创建空分区表
    pub const fn new() -> Self {
        Self {
            partitions: heapless::Vec::new(),
        }
    }

    /// 从 Flash 数据解析分区表
    ///
    /// # 参数
    /// - `data`: 从 PARTITION_TABLE_OFFSET 读取的原始数据
    ///
    /// # 返回
    /// 解析后的分区表，如果解析失败返回 None
    pub fn from_flash_data(data: &[u8]) -> Option<Self> {
        let mut table = Self::new();

        // 分区表数据应该至少包含一个条目
        if data.len() < PARTITION_ENTRY_SIZE {
            return None;
        }

        // 解析每个分区条目
        for chunk in data.chunks_exact(PARTITION_ENTRY_SIZE) {
            let entry_data: &[u8; PARTITION_ENTRY_SIZE] = chunk.try_into().ok()?;

            // 结束标记 (全 0xFF) 或 MD5 校验条目 (魔数不匹配)
            if entry_data[0] == 0xFF && entry_data[1] == 0xFF {
                break;
            }

            // MD5 校验条目的魔数不同，表示条目结束
            if u16::from_le_bytes([entry_data[0], entry_data[1]]) != PARTITION_TABLE_MAGIC {
                break;
            }

            // 魔数正确但条目无效 (标签非 UTF-8、地址溢出) 时整张表无效
            let partition = Partition::from_bytes(entry_data)?;
            table.partitions.push(partition).ok()?;
        }

        if table.partitions.is_empty() {
            None
        } else {
            Some(table)
        }
    }

    /// 从 Flash 的默认偏移读取并解析分区表
    pub fn read_from<F: NorFlash>(flash: &SharedFlash<F>) -> Result<Self, PartitionError> {
        let mut data = [0u8; PARTITION_TABLE_SIZE];
        flash
            .with(|f| f.read(PARTITION_TABLE_OFFSET, &mut data))
            .map_err(|_| PartitionError::Storage(StorageError::ReadError))?;
        Self::from_flash_data(&data).ok_or(PartitionError::InvalidTable)
    }

    /// 手动创建分区 (用于已知分区布局)
    ///
    /// # 参数
    /// - `label`: 分区标签
    /// - `partition_type`: 分区类型
    /// - `subtype`: 子类型
    /// - `offset`: Flash 偏移量
    /// - `size`: 分区大小
    ///
    /// 返回新分区的可变引用，可用于设置标志
    pub fn add_partition(
        &mut self,
        label: &str,
        partition_type: PartitionType,
        subtype: u8,
        offset: u32,
        size: u32,
    ) -> Result<&mut Partition, PartitionError> {
        offset.checked_add(size).ok_or(PartitionError::OutOfRange)?;

        let mut label_str = heapless::String::new();
        label_str
            .push_str(label)
            .map_err(|_| PartitionError::LabelTooLong)?;

        self.partitions
            .push(Partition {
                label: label_str,
                partition_type,
                subtype,
                offset,
                size,
                flags: PartitionFlags::default(),
            })
            .map_err(|_| PartitionError::TableFull)?;

        let last = self.partitions.len() - 1;
        Ok(&mut self.partitions[last])
    }

    /// 按标签查找数据分区
    pub fn find_by_label(&self, label: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.is_data() && p.label.as_str() == label)
    }

    /// 查找第一个 LittleFS 分区
    pub fn find_littlefs(&self) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.is_littlefs())
    }

    /// 获取所有分区
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// 获取分区数量
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// 检查分区表是否为空
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl Default for PartitionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTable")
            .field("count", &self.partitions.len())
            .field("partitions", &self.partitions.as_slice())
            .finish()
    }
}
