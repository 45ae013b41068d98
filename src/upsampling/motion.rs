//! 细粒子运动积分

use super::hash_table::SpatialHashTable;
use super::types::FineParticle;
use rayon::prelude::*;

/// 运动积分器
///
/// 细粒子没有自己的动力学，只跟随归属体素的质量加权平均速度移动，
/// 同时推进出现/消失动画。
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionIntegrator;

impl MotionIntegrator {
    /// 移动所有粒子、推进出现动画并重新计算归属体素
    ///
    /// 归属体素本步不存在时粒子原地不动。消失动画已在 ApplyParticleMass
    /// 中推进，这里不再处理。
    pub fn integrate(particles: &mut [FineParticle], table: &SpatialHashTable, dt: f32, ease_step: f32) {
        let voxel_size = table.geometry().voxel_size;
        particles.par_iter_mut().for_each(|particle| {
            if let Some(velocity) = table.velocity(particle.owner_voxel) {
                particle.position += velocity * dt;
            }
            if !particle.is_despawning() {
                particle.advance_phase(ease_step);
            }
            particle.revalidate_owner(voxel_size);
        });
    }
}
