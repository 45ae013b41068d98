//! 粗粒子数据来源

use super::types::CoarseParticle;

/// 粗粒子提供者（通常是地形/颗粒求解器）
///
/// 每步调用一次 [`fill_particles`](Self::fill_particles)。
pub trait ParticleProvider {
    /// 把本步的粗粒子写入 `out`（调用前已清空）
    ///
    /// 没有可用数据时返回 `false`，该步会被完整跳过；
    /// 返回 `true` 但不写入任何粒子表示场景中确实没有粗粒子。
    fn fill_particles(&self, out: &mut Vec<CoarseParticle>) -> bool;

    /// 地形单元尺寸
    fn element_size(&self) -> f32;

    /// 颗粒密度
    fn particle_density(&self) -> f32;
}

/// 固定粗粒子集合，测试和演示使用
#[derive(Debug, Clone, Default)]
pub struct StaticParticleSource {
    pub particles: Vec<CoarseParticle>,
    pub element_size: f32,
    pub particle_density: f32,
    /// 为 `false` 时模拟求解器尚未产生数据
    pub available: bool,
}

impl StaticParticleSource {
    pub fn new(particles: Vec<CoarseParticle>, element_size: f32, particle_density: f32) -> Self {
        Self {
            particles,
            element_size,
            particle_density,
            available: true,
        }
    }
}

impl ParticleProvider for StaticParticleSource {
    fn fill_particles(&self, out: &mut Vec<CoarseParticle>) -> bool {
        if !self.available {
            return false;
        }
        out.extend_from_slice(&self.particles);
        true
    }

    fn element_size(&self) -> f32 {
        self.element_size
    }

    fn particle_density(&self) -> f32 {
        self.particle_density
    }
}
