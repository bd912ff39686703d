//! 句柄表
//!
//! 描述符即槽位下标: 分配总是取最小的空闲下标 (位图扫描)，关闭后下标可复用。
//! 句柄表只在卷锁内访问，因此位图不需要原子操作。

use alloc::vec::Vec;

/// 句柄表错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// 没有空闲槽位
    Full,
    /// 内存分配失败
    NoMem,
}

/// 占用位图 (每个 u64 记录 64 个槽位)
struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// 最小的空闲下标 (可能超出已有的字)
    fn first_free(&self) -> usize {
        for (word_idx, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                return word_idx * 64 + (!*word).trailing_zeros() as usize;
            }
        }
        self.words.len() * 64
    }

    /// 保证覆盖 `index` 的字已存在
    fn ensure(&mut self, index: usize) -> Result<(), HandleError> {
        let words = index / 64 + 1;
        if words > self.words.len() {
            let extra = words - self.words.len();
            self.words.try_reserve(extra).map_err(|_| HandleError::NoMem)?;
            self.words.resize(words, 0);
        }
        Ok(())
    }

    fn set(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word |= 1u64 << (index % 64);
        }
    }

    fn clear(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// 句柄表
///
/// `capacity` 为 `None` 时不限制槽位数 (目录游标)，否则为固定容量 (`max_files`)。
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    bitmap: Bitmap,
    capacity: Option<usize>,
}

impl<T> HandleTable<T> {
    /// 创建固定容量的句柄表，槽位一次性预分配
    pub fn with_capacity(capacity: usize) -> Result<Self, HandleError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| HandleError::NoMem)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            bitmap: Bitmap::new(),
            capacity: Some(capacity),
        })
    }

    /// 创建按需增长的句柄表
    pub const fn unbounded() -> Self {
        Self {
            slots: Vec::new(),
            bitmap: Bitmap::new(),
            capacity: None,
        }
    }

    /// 下一次插入将使用的下标
    pub fn first_free(&self) -> Option<usize> {
        let index = self.bitmap.first_free();
        match self.capacity {
            Some(cap) if index >= cap => None,
            _ => Some(index),
        }
    }

    /// 为最小的空闲下标准备存储但不占用，返回该下标
    ///
    /// 之后的 [`fill`](Self::fill) 不会再分配内存，调用者可以先创建资源再放入槽位。
    pub fn reserve(&mut self) -> Result<usize, HandleError> {
        let index = self.first_free().ok_or(HandleError::Full)?;
        if index >= self.slots.len() {
            self.slots
                .try_reserve(index + 1 - self.slots.len())
                .map_err(|_| HandleError::NoMem)?;
            self.slots.resize_with(index + 1, || None);
        }
        self.bitmap.ensure(index)?;
        Ok(index)
    }

    /// 放入 [`reserve`](Self::reserve) 返回的槽位
    pub fn fill(&mut self, index: usize, value: T) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value);
            self.bitmap.set(index);
        }
    }

    /// 查询槽位，越界或空闲均返回 None
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// 查询槽位 (可变)
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// 取出并释放槽位
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.bitmap.clear(index);
        Some(value)
    }

    /// 已占用的槽位数
    pub fn len(&self) -> usize {
        self.bitmap.count()
    }

    /// 是否没有任何占用
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 依次取出所有占用的槽位
    pub fn drain(&mut self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.bitmap.words.iter_mut().for_each(|w| *w = 0);
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.take().map(|v| (i, v)))
    }
}
