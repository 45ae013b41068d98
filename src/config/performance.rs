use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 缓冲区配置
///
/// 所有缓冲区按倍增增长，初始值只影响前几步的重新分配次数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// 活动体素缓冲区初始大小（哈希表容量为其两倍）
    pub initial_voxel_buffer_size: usize,

    /// 粗粒子缓冲区初始大小
    pub initial_coarse_buffer_size: usize,

    /// 细粒子池初始容量
    pub initial_fine_capacity: usize,

    /// 细粒子池容量上限
    pub max_fine_capacity: usize,
}

impl_default!(BufferConfig {
    initial_voxel_buffer_size: 128,
    initial_coarse_buffer_size: 1024,
    initial_fine_capacity: 65_536,
    max_fine_capacity: 8_388_608 * 8,
});

impl BufferConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_voxel_buffer_size == 0 || self.initial_coarse_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "Voxel and coarse buffer sizes must be non-zero".to_string(),
            ));
        }
        if self.initial_fine_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Fine particle capacity must be non-zero".to_string(),
            ));
        }
        if self.max_fine_capacity < self.initial_fine_capacity {
            return Err(ConfigError::ValidationError(format!(
                "max_fine_capacity ({}) is below initial_fine_capacity ({})",
                self.max_fine_capacity, self.initial_fine_capacity
            )));
        }
        Ok(())
    }
}

/// 多线程配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// 工作线程数（0表示自动）
    pub worker_threads: usize,
}

impl_default!(ThreadingConfig {
    worker_threads: 0, // 自动
});

impl ThreadingConfig {
    /// 获取实际使用的线程数
    pub fn resolved_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads > 1024 {
            return Err(ConfigError::ValidationError(format!(
                "Unreasonable worker thread count: {}",
                self.worker_threads
            )));
        }
        Ok(())
    }
}
