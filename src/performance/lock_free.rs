use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// 无锁 f32
///
/// 以位模式存放在 `AtomicU32` 中，累加通过 CAS 循环完成。
/// 各通道之间由 rayon 的同步点保证可见性，因此内部使用 `Relaxed`。
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    /// 获取当前值
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// 设置值
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// 原子累加，返回旧值
    pub fn fetch_add(&self, delta: f32) -> f32 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(previous) => return f32::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

/// 无锁标志
#[derive(Debug, Default)]
pub struct LockFreeFlag {
    value: AtomicBool,
}

impl LockFreeFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            value: AtomicBool::new(initial),
        }
    }

    /// 设置标志
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// 获取标志
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// 读取并清除标志
    pub fn take(&self) -> bool {
        self.value.swap(false, Ordering::SeqCst)
    }
}
