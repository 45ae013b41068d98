//! 双缓冲细粒子池
//!
//! 两个固定容量的缓冲区加一个"当前"选择器。压缩把存活粒子写入另一个
//! 缓冲区，随后翻转选择器，避免原地压缩的读写冲突。

use super::types::FineParticle;
use bytemuck::Zeroable;
use rayon::prelude::*;

/// 双缓冲细粒子池
#[derive(Debug)]
pub struct FineParticlePool {
    buffers: [Vec<FineParticle>; 2],
    current: usize,
    capacity: usize,
    max_capacity: usize,
    growth_requested: bool,
}

impl FineParticlePool {
    /// 创建细粒子池
    ///
    /// # 参数
    ///
    /// * `capacity` - 初始容量
    /// * `max_capacity` - 倍增扩容的上限
    pub fn new(capacity: usize, max_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffers: [Vec::with_capacity(capacity), Vec::with_capacity(capacity)],
            current: 0,
            capacity,
            max_capacity: max_capacity.max(capacity),
            growth_requested: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// 当前缓冲区编号（0 或 1）
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// 存活粒子数
    pub fn len(&self) -> usize {
        self.buffers[self.current].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前缓冲区中的粒子
    pub fn particles(&self) -> &[FineParticle] {
        &self.buffers[self.current]
    }

    pub fn particles_mut(&mut self) -> &mut [FineParticle] {
        &mut self.buffers[self.current]
    }

    /// 把未过期的粒子按原顺序并行压缩到交换缓冲区
    ///
    /// 当前缓冲区保持不变，直到调用 [`swap_buffers`](Self::swap_buffers)。
    ///
    /// # 返回
    ///
    /// 返回被移除的粒子数。
    pub fn compact(&mut self) -> usize {
        let [first, second] = &mut self.buffers;
        let (active, swap) = if self.current == 0 {
            (first, second)
        } else {
            (second, first)
        };

        swap.clear();
        swap.par_extend(active.par_iter().filter(|p| !p.is_expired()).copied());
        active.len() - swap.len()
    }

    /// 压缩后的缓冲区
    pub fn swap_particles(&self) -> &[FineParticle] {
        &self.buffers[1 - self.current]
    }

    /// 翻转当前缓冲区
    pub fn swap_buffers(&mut self) {
        self.current = 1 - self.current;
    }

    /// 在当前缓冲区末尾预留 `requested` 个新粒子的位置
    ///
    /// 容量不足时只预留剩余部分，并记录扩容请求。
    ///
    /// # 返回
    ///
    /// 返回新预留的槽位（已清零），长度可能小于 `requested`。
    pub fn reserve_tail(&mut self, requested: usize) -> &mut [FineParticle] {
        let len = self.len();
        let granted = requested.min(self.capacity.saturating_sub(len));
        if granted < requested {
            self.growth_requested = true;
        }

        let active = &mut self.buffers[self.current];
        active.resize(len + granted, FineParticle::zeroed());
        &mut active[len..]
    }

    /// 读取并清除扩容请求
    pub fn take_growth_request(&mut self) -> bool {
        std::mem::take(&mut self.growth_requested)
    }

    /// 容量翻倍（不超过上限）
    ///
    /// # 返回
    ///
    /// 已经达到上限时返回`false`。
    pub fn grow(&mut self) -> bool {
        if self.capacity >= self.max_capacity {
            return false;
        }
        let old_capacity = self.capacity;
        self.capacity = self.capacity.saturating_mul(2).min(self.max_capacity);
        for buffer in &mut self.buffers {
            buffer.reserve(self.capacity - buffer.len());
        }
        tracing::info!(
            target: "upsampling.pool",
            "Fine particle pool grown from {} to {}",
            old_capacity,
            self.capacity
        );
        true
    }

    /// 把所有粒子标记为消失，让它们按动画淡出
    pub fn retire_all(&mut self) -> usize {
        self.particles_mut()
            .par_iter_mut()
            .filter(|particle| !particle.is_despawning())
            .map(|particle| {
                particle.mark_despawning();
                1
            })
            .sum()
    }

    /// 重新计算所有粒子的归属体素（体素尺寸变化后使用）
    pub fn revalidate_owners(&mut self, voxel_size: f32) {
        self.particles_mut()
            .par_iter_mut()
            .for_each(|particle| particle.revalidate_owner(voxel_size));
    }

    /// 丢弃所有粒子
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.current = 0;
        self.growth_requested = false;
    }
}
