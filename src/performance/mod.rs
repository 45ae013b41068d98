//! 性能相关工具
//!
//! 并行通道共用的无锁原语，以及每步的统计信息。

pub mod lock_free;

pub use lock_free::{AtomicF32, LockFreeFlag};

/// 单步统计信息
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepStats {
    /// 步数（从1开始）
    pub step: u64,
    /// 本步粗粒子数
    pub coarse_particles: usize,
    /// 活动体素数
    pub active_voxels: usize,
    /// 哈希表容量
    pub table_capacity: usize,
    /// 本步新生成的细粒子数
    pub spawned: usize,
    /// 本步被标记为消失的细粒子数
    pub despawned: usize,
    /// 本步压缩时移除的细粒子数
    pub removed: usize,
    /// 步末存活细粒子数
    pub live_particles: usize,
    /// 因细粒子池已满而未能生成的数量
    pub truncated_spawns: usize,
    /// 因哈希表已满而丢弃的质量沉积次数
    pub dropped_deposits: usize,
    /// 处理时间（微秒）
    pub elapsed_us: u64,
}

impl StepStats {
    /// 计算吞吐量（细粒子/秒）
    pub fn throughput(&self) -> f64 {
        if self.elapsed_us == 0 {
            return 0.0;
        }
        (self.live_particles as f64) / (self.elapsed_us as f64 / 1_000_000.0)
    }

    /// 本步是否发生了容量退化
    pub fn degraded(&self) -> bool {
        self.truncated_spawns > 0 || self.dropped_deposits > 0
    }
}
