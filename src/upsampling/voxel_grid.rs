//! 活动体素生成
//!
//! 把每个粗粒子的影响球光栅化到体素网格上，得到去重后的活动体素集合。

use super::properties::FineParticleProperties;
use super::types::{Aabb, CoarseParticle, VoxelGeometry, VoxelIndex};
use glam::Vec3;
use rayon::prelude::*;
use std::collections::HashSet;

/// 影响半径最多覆盖的体素数（每个方向）
///
/// 更大的影响球被截断，单个粒子最多检查 `(2 × 8 + 1)³` 个体素。
pub const MAX_INFLUENCE_VOXELS: f32 = 8.0;

/// 活动体素生成器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGridGenerator {
    influence_scale: f32,
}

impl Default for VoxelGridGenerator {
    fn default() -> Self {
        Self {
            influence_scale: FineParticleProperties::influence_scale(),
        }
    }
}

impl VoxelGridGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用自定义的影响球放大系数
    pub fn with_influence_scale(influence_scale: f32) -> Self {
        Self {
            influence_scale: influence_scale.max(0.0),
        }
    }

    /// 粗粒子影响球半径（半径加堆积余量）
    pub fn influence_radius(&self, particle: &CoarseParticle) -> f32 {
        particle.radius.max(0.0) * self.influence_scale
    }

    /// 影响半径是否超过 [`MAX_INFLUENCE_VOXELS`] 个体素而被截断
    pub fn is_oversized(&self, particle: &CoarseParticle, voxel_size: f32) -> bool {
        self.influence_radius(particle) > MAX_INFLUENCE_VOXELS * voxel_size
    }

    /// 遍历与粒子影响球相交的每个体素
    ///
    /// 回调参数为体素索引和该体素的立方体。非法粒子不产生任何体素；
    /// 影响半径被截断到 `MAX_INFLUENCE_VOXELS × voxel_size`。
    pub fn for_each_touched_voxel<F>(&self, particle: &CoarseParticle, voxel_size: f32, mut visit: F)
    where
        F: FnMut(VoxelIndex, Aabb),
    {
        if !particle.is_valid() {
            return;
        }

        let geometry = VoxelGeometry::new(voxel_size, 0.0);
        let center = particle.position;
        let radius = self
            .influence_radius(particle)
            .min(MAX_INFLUENCE_VOXELS * voxel_size);
        let radius_sq = radius * radius;
        let lo = VoxelIndex::from_position(center - Vec3::splat(radius), voxel_size).0;
        let hi = VoxelIndex::from_position(center + Vec3::splat(radius), voxel_size).0;

        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    let index = VoxelIndex::new(x, y, z);
                    let bounds = geometry.outer_bounds(index);
                    let closest = center.clamp(bounds.min, bounds.max);
                    if closest.distance_squared(center) <= radius_sq {
                        visit(index, bounds);
                    }
                }
            }
        }
    }

    /// 生成活动体素集合
    ///
    /// 最多写入 `out.len()` 个索引，返回集合的实际大小。返回值大于
    /// `out.len()` 时调用方应扩大缓冲区后重新调用；函数本身没有副作用。
    /// 集合按 (x, y, z) 排序，相同输入总是得到相同输出。
    pub fn generate_into(
        &self,
        particles: &[CoarseParticle],
        voxel_size: f32,
        out: &mut [VoxelIndex],
    ) -> usize {
        let voxels = self.generate(particles, voxel_size);
        let written = voxels.len().min(out.len());
        out[..written].copy_from_slice(&voxels[..written]);
        voxels.len()
    }

    /// 生成活动体素集合（排序后的数组）
    pub fn generate(&self, particles: &[CoarseParticle], voxel_size: f32) -> Vec<VoxelIndex> {
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Vec::new();
        }

        let set = particles
            .par_iter()
            .fold(HashSet::new, |mut set, particle| {
                self.for_each_touched_voxel(particle, voxel_size, |index, _| {
                    set.insert(index);
                });
                set
            })
            .reduce(HashSet::new, |a, b| {
                if a.len() < b.len() {
                    return merge(b, a);
                }
                merge(a, b)
            });

        let oversized = particles
            .par_iter()
            .filter(|particle| particle.is_valid() && self.is_oversized(particle, voxel_size))
            .count();
        if oversized > 0 {
            tracing::warn!(
                target: "upsampling.grid",
                "{} coarse particles have an influence radius above {} voxels and were truncated",
                oversized,
                MAX_INFLUENCE_VOXELS
            );
        }

        let mut voxels: Vec<VoxelIndex> = set.into_iter().collect();
        voxels.par_sort_unstable_by_key(|index| index.sort_key());
        voxels
    }
}

fn merge(mut into: HashSet<VoxelIndex>, from: HashSet<VoxelIndex>) -> HashSet<VoxelIndex> {
    into.extend(from);
    into
}
