//! 每步的通道序列
//!
//! ```text
//! ClearTable → UpdateGrid → ApplyParticleMass → CompactFineParticles
//!            → SwapParticleBuffers → SpawnParticles
//! ```
//!
//! 每个通道内部用 rayon 并行，通道之间严格串行。运动积分见 [`super::motion`]。
//! 消失动画在 ApplyParticleMass 中推进，出现动画在运动积分中推进。

use super::hash_table::{RoomClaim, SpatialHashTable};
use super::pool::FineParticlePool;
use super::properties::FineParticleProperties;
use super::types::{CoarseParticle, FineParticle, VoxelIndex};
use super::voxel_grid::VoxelGridGenerator;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 一次通道序列的计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// 因表满被丢弃的沉积
    pub dropped_deposits: usize,
    /// 新标记为消失的细粒子
    pub despawned: usize,
    /// 压缩时移除的细粒子
    pub removed: usize,
    /// 新生成的细粒子
    pub spawned: usize,
    /// 因池满未能生成的细粒子
    pub truncated_spawns: usize,
}

/// 一步的输入
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    pub coarse: &'a [CoarseParticle],
    /// 排序后的活动体素
    pub active_voxels: &'a [VoxelIndex],
    pub properties: &'a FineParticleProperties,
    /// 本步生成位置的随机数种子
    pub seed: u64,
    /// 每步动画相位变化量
    pub ease_step: f32,
}

/// 上采样通道序列
#[derive(Debug, Clone, Default)]
pub struct UpsamplingPipeline {
    generator: VoxelGridGenerator,
}

impl UpsamplingPipeline {
    pub fn new(generator: VoxelGridGenerator) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &VoxelGridGenerator {
        &self.generator
    }

    /// 按顺序执行全部六个通道
    pub fn run(
        &self,
        table: &SpatialHashTable,
        pool: &mut FineParticlePool,
        inputs: StepInputs<'_>,
    ) -> PassReport {
        self.clear_table(table);
        let dropped_deposits =
            self.update_grid(table, inputs.coarse, inputs.active_voxels, inputs.properties);
        let despawned = self.apply_particle_mass(pool, table, inputs.ease_step);
        let removed = self.compact_fine_particles(pool);
        self.swap_particle_buffers(pool);
        let (spawned, truncated_spawns) = self.spawn_particles(
            pool,
            table,
            inputs.active_voxels,
            inputs.properties,
            inputs.seed,
        );

        PassReport {
            dropped_deposits,
            despawned,
            removed,
            spawned,
            truncated_spawns,
        }
    }

    /// ClearTable：清空哈希表
    pub fn clear_table(&self, table: &SpatialHashTable) {
        table.clear();
    }

    /// UpdateGrid：插入活动体素，沉积粗粒子质量，设置每个体素的余量
    ///
    /// 粗粒子的全部质量计入包含其中心的体素，一个孤立粗粒子因此恰好
    /// 对应 `fine_count_for(mass)` 个细粒子。影响球接触的其他体素只按
    /// 邻近权重 `mass × max(0, 1 - d / r)` 累加位置与速度，`d` 是粒子
    /// 中心到体素立方体的距离。
    ///
    /// # 返回
    ///
    /// 返回因表满被丢弃的沉积次数。
    pub fn update_grid(
        &self,
        table: &SpatialHashTable,
        coarse: &[CoarseParticle],
        active_voxels: &[VoxelIndex],
        properties: &FineParticleProperties,
    ) -> usize {
        let voxel_size = table.geometry().voxel_size;
        active_voxels.par_iter().for_each(|index| {
            table.insert(*index);
        });

        let dropped = AtomicUsize::new(0);
        coarse.par_iter().for_each(|particle| {
            if !particle.is_valid() {
                return;
            }

            let home = VoxelIndex::from_position(particle.position, voxel_size);
            let radius = self.generator.influence_radius(particle);
            let mut failed = 0;
            if !table.deposit(home, particle.mass, particle.position, particle.velocity) {
                failed += 1;
            }

            self.generator
                .for_each_touched_voxel(particle, voxel_size, |index, bounds| {
                    if index == home || radius <= 0.0 {
                        return;
                    }
                    let weight = (1.0 - bounds.distance_to(particle.position) / radius).max(0.0);
                    if weight > 0.0
                        && !table.deposit_motion(
                            index,
                            particle.mass * weight,
                            particle.position,
                            particle.velocity,
                        )
                    {
                        failed += 1;
                    }
                });

            if failed > 0 {
                dropped.fetch_add(failed, Ordering::Relaxed);
            }
        });

        active_voxels.par_iter().for_each(|index| {
            if let Some(entry) = table.lookup(*index) {
                table.set_room(*index, properties.fine_count_for(entry.original_mass));
            }
        });

        let dropped = dropped.into_inner();
        if dropped > 0 {
            tracing::warn!(
                target: "upsampling.table",
                "Hash table full: {} deposits dropped (capacity {})",
                dropped,
                table.capacity()
            );
        }
        dropped
    }

    /// ApplyParticleMass：每个存活细粒子在归属体素中认领一个名额
    ///
    /// 体素不存在或名额已用完时粒子被标记为消失。消失中的粒子在这里
    /// 减小相位，相位归零的粒子在紧随其后的压缩中被移除。
    ///
    /// # 返回
    ///
    /// 返回本通道新标记为消失的粒子数。
    pub fn apply_particle_mass(
        &self,
        pool: &mut FineParticlePool,
        table: &SpatialHashTable,
        ease_step: f32,
    ) -> usize {
        pool.particles_mut()
            .par_iter_mut()
            .map(|particle| {
                let mut marked = 0;
                if !particle.is_despawning() {
                    match table.claim_room(particle.owner_voxel) {
                        RoomClaim::Claimed => {}
                        RoomClaim::Missing | RoomClaim::Exhausted => {
                            particle.mark_despawning();
                            marked = 1;
                        }
                    }
                }
                if particle.is_despawning() {
                    particle.advance_phase(ease_step);
                }
                marked
            })
            .sum()
    }

    /// CompactFineParticles：把未过期的粒子压缩到交换缓冲区
    pub fn compact_fine_particles(&self, pool: &mut FineParticlePool) -> usize {
        pool.compact()
    }

    /// SwapParticleBuffers：翻转当前缓冲区
    pub fn swap_particle_buffers(&self, pool: &mut FineParticlePool) {
        pool.swap_buffers();
    }

    /// SpawnParticles：在有余量的体素内部区域均匀生成新粒子
    ///
    /// 每个体素使用由 `seed` 和体素索引派生的独立随机数流，因此
    /// 结果与线程调度无关。池满时截断并记录扩容请求。
    ///
    /// # 返回
    ///
    /// 返回 `(生成数, 截断数)`。
    pub fn spawn_particles(
        &self,
        pool: &mut FineParticlePool,
        table: &SpatialHashTable,
        active_voxels: &[VoxelIndex],
        properties: &FineParticleProperties,
        seed: u64,
    ) -> (usize, usize) {
        let requests: Vec<(VoxelIndex, usize)> = active_voxels
            .par_iter()
            .filter_map(|index| {
                let room = table.take_room(*index);
                (room > 0).then_some((*index, room))
            })
            .collect();
        let requested: usize = requests.iter().map(|(_, room)| room).sum();
        if requested == 0 {
            return (0, 0);
        }

        let region = pool.reserve_tail(requested);
        let granted = region.len();

        // 按体素顺序把新区域切成互不重叠的片段
        let mut rest = region;
        let mut jobs = Vec::with_capacity(requests.len());
        for (index, room) in requests {
            if rest.is_empty() {
                break;
            }
            let count = room.min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(count);
            jobs.push((index, head));
            rest = tail;
        }

        let geometry = table.geometry();
        let fine_mass = properties.fine_mass;
        jobs.into_par_iter().for_each(|(index, slots)| {
            let inner = geometry.inner_bounds(index);
            let mut rng = StdRng::seed_from_u64(voxel_seed(seed, index));
            for slot in slots.iter_mut() {
                let t = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
                let position = inner.min + (inner.max - inner.min) * t;
                *slot = FineParticle::spawn(position, fine_mass, geometry.voxel_size);
            }
        });

        let truncated = requested - granted;
        if truncated > 0 {
            tracing::warn!(
                target: "upsampling.pool",
                "Fine particle pool full: {} of {} spawns truncated (capacity {})",
                truncated,
                requested,
                pool.capacity()
            );
        }
        (granted, truncated)
    }
}

fn voxel_seed(seed: u64, index: VoxelIndex) -> u64 {
    seed ^ index.pack().wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upsampling::types::VoxelGeometry;

    /// 名义质量为8、放大倍数为8，细粒子质量恰好为1
    fn unit_properties() -> FineParticleProperties {
        let density = FineParticleProperties::density_for_nominal_mass(1.0, 8.0);
        FineParticleProperties::new(1.0, density, 8.0).unwrap()
    }

    fn setup(voxel_size: f32) -> (UpsamplingPipeline, SpatialHashTable, FineParticlePool) {
        let props = unit_properties();
        (
            UpsamplingPipeline::default(),
            SpatialHashTable::new(64, VoxelGeometry::new(voxel_size, props.fine_radius)),
            FineParticlePool::new(256, 1024),
        )
    }

    fn inputs<'a>(
        coarse: &'a [CoarseParticle],
        active_voxels: &'a [VoxelIndex],
        properties: &'a FineParticleProperties,
        seed: u64,
    ) -> StepInputs<'a> {
        StepInputs {
            coarse,
            active_voxels,
            properties,
            seed,
            ease_step: 0.25,
        }
    }

    fn coarse_at(position: Vec3, mass: f32) -> CoarseParticle {
        CoarseParticle::new(position, 0.1, Vec3::ZERO, mass)
    }

    /// 半径为名义半径的粗粒子，影响球会伸进相邻体素
    fn nominal_grain(position: Vec3) -> CoarseParticle {
        CoarseParticle::new(
            position,
            FineParticleProperties::nominal_radius_for(1.0),
            Vec3::ZERO,
            8.0,
        )
    }

    #[test]
    fn test_update_grid_sets_room() {
        let (pipeline, table, _) = setup(4.0);
        let props = unit_properties();
        let coarse = [coarse_at(Vec3::splat(2.0), 8.0)];
        let voxels = pipeline.generator().generate(&coarse, 4.0);

        assert_eq!(pipeline.update_grid(&table, &coarse, &voxels, &props), 0);
        let entry = table.lookup(VoxelIndex::new(0, 0, 0)).unwrap();
        assert!((entry.original_mass - 8.0).abs() < 1e-5);
        assert_eq!(entry.room, 8);
    }

    #[test]
    fn test_mass_stays_in_home_voxel() {
        let (pipeline, table, _) = setup(1.0);
        let props = unit_properties();
        let coarse = [CoarseParticle::new(Vec3::new(0.95, 0.5, 0.5), 0.3, Vec3::X, 4.0)];
        let voxels = pipeline.generator().generate(&coarse, 1.0);
        assert_eq!(voxels.len(), 2);

        pipeline.update_grid(&table, &coarse, &voxels, &props);
        let home = table.lookup(VoxelIndex::new(0, 0, 0)).unwrap();
        let neighbour = table.lookup(VoxelIndex::new(1, 0, 0)).unwrap();
        assert_eq!(home.original_mass, 4.0);
        assert_eq!(home.room, 4);
        assert_eq!(neighbour.original_mass, 0.0);
        assert_eq!(neighbour.room, 0);
        // 相邻体素仍然带着粗粒子的速度
        assert_eq!(table.velocity(VoxelIndex::new(0, 0, 0)), Some(Vec3::X));
        assert_eq!(table.velocity(VoxelIndex::new(1, 0, 0)), Some(Vec3::X));
    }

    #[test]
    fn test_nominal_grain_gives_exact_count() {
        let (pipeline, table, mut pool) = setup(1.0);
        let props = unit_properties();
        let coarse = [nominal_grain(Vec3::splat(0.5))];
        let voxels = pipeline.generator().generate(&coarse, 1.0);
        // 中心体素加6个面相邻体素
        assert_eq!(voxels.len(), 7);

        for seed in 0..5 {
            let report = pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, seed));
            assert_eq!(report.despawned, 0);
            assert_eq!(pool.len(), 8);
        }
        assert!(pool
            .particles()
            .iter()
            .all(|p| p.owner_voxel == VoxelIndex::new(0, 0, 0)));
    }

    #[test]
    fn test_boundary_grain_gives_exact_count() {
        let (pipeline, table, mut pool) = setup(1.0);
        let props = unit_properties();
        let coarse = [nominal_grain(Vec3::new(1.0, 0.5, 0.5))];
        let voxels = pipeline.generator().generate(&coarse, 1.0);
        assert!(voxels.contains(&VoxelIndex::new(0, 0, 0)));
        assert!(voxels.contains(&VoxelIndex::new(1, 0, 0)));

        let report = pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, 3));
        assert_eq!(report.spawned, 8);
        assert!(pool
            .particles()
            .iter()
            .all(|p| p.owner_voxel == VoxelIndex::new(1, 0, 0)));
    }

    #[test]
    fn test_spawn_exact_count() {
        let (pipeline, table, mut pool) = setup(4.0);
        let props = unit_properties();
        let coarse = [coarse_at(Vec3::splat(2.0), 8.0)];
        let voxels = pipeline.generator().generate(&coarse, 4.0);

        let report = pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, 7));
        assert_eq!(report.spawned, 8);
        assert_eq!(pool.len(), 8);

        let inner = table.geometry().inner_bounds(VoxelIndex::new(0, 0, 0));
        for particle in pool.particles() {
            assert!(inner.contains(particle.position));
            assert_eq!(particle.owner_voxel, VoxelIndex::new(0, 0, 0));
            assert_eq!(particle.animation_phase, 0.0);
        }

        // 第二步：已有粒子占满名额，不再生成
        let report = pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, 8));
        assert_eq!(report.spawned, 0);
        assert_eq!(report.despawned, 0);
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_missing_voxel_despawns() {
        let (pipeline, table, mut pool) = setup(4.0);
        let props = unit_properties();
        let coarse = [coarse_at(Vec3::splat(2.0), 8.0)];
        let voxels = pipeline.generator().generate(&coarse, 4.0);
        pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, 1));

        let report = pipeline.run(&table, &mut pool, inputs(&[], &[], &props, 2));
        assert_eq!(report.despawned, 8);
        assert_eq!(report.spawned, 0);
        // 没有经过运动积分，相位仍为0，同一步的压缩就会移除
        assert_eq!(report.removed, 8);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_fading_particle_removed_in_step_it_reaches_zero() {
        let (pipeline, table, mut pool) = setup(4.0);
        let props = unit_properties();
        let slots = pool.reserve_tail(1);
        slots[0] = FineParticle::spawn(Vec3::splat(2.0), 1.0, 4.0);
        slots[0].animation_phase = 0.5;
        slots[0].mark_despawning();

        // 0.5 → 0.25，仍然可见
        let report = pipeline.run(&table, &mut pool, inputs(&[], &[], &props, 1));
        assert_eq!(report.despawned, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(pool.particles()[0].animation_phase, 0.25);

        // 0.25 → 0，同一步被移除
        let report = pipeline.run(&table, &mut pool, inputs(&[], &[], &props, 2));
        assert_eq!(report.despawned, 0);
        assert_eq!(report.removed, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_reduced_mass_despawns_surplus() {
        let (pipeline, table, mut pool) = setup(4.0);
        let props = unit_properties();
        let heavy = [coarse_at(Vec3::splat(2.0), 8.0)];
        let voxels = pipeline.generator().generate(&heavy, 4.0);
        pipeline.run(&table, &mut pool, inputs(&heavy, &voxels, &props, 1));

        let light = [coarse_at(Vec3::splat(2.0), 5.0)];
        let report = pipeline.run(&table, &mut pool, inputs(&light, &voxels, &props, 2));
        assert_eq!(report.despawned, 3);
        assert_eq!(report.spawned, 0);
        let alive = pool.particles().iter().filter(|p| !p.is_despawning()).count();
        assert_eq!(alive, 5);
    }

    #[test]
    fn test_spawn_truncates_at_capacity() {
        let props = unit_properties();
        let pipeline = UpsamplingPipeline::default();
        let table = SpatialHashTable::new(64, VoxelGeometry::new(4.0, props.fine_radius));
        let mut pool = FineParticlePool::new(5, 64);
        let coarse = [coarse_at(Vec3::splat(2.0), 8.0)];
        let voxels = pipeline.generator().generate(&coarse, 4.0);

        let report = pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, 1));
        assert_eq!(report.spawned, 5);
        assert_eq!(report.truncated_spawns, 3);
        assert!(pool.take_growth_request());
    }

    #[test]
    fn test_spawn_is_deterministic_for_seed() {
        let props = unit_properties();
        let coarse = [
            coarse_at(Vec3::splat(2.0), 8.0),
            coarse_at(Vec3::new(6.0, 2.0, 2.0), 8.0),
        ];

        let positions = |seed: u64| {
            let (pipeline, table, mut pool) = setup(4.0);
            let voxels = pipeline.generator().generate(&coarse, 4.0);
            pipeline.run(&table, &mut pool, inputs(&coarse, &voxels, &props, seed));
            pool.particles().iter().map(|p| p.position).collect::<Vec<_>>()
        };

        assert_eq!(positions(42), positions(42));
        assert_ne!(positions(42), positions(43));
    }

    #[test]
    fn test_full_table_reports_dropped_deposits() {
        let props = unit_properties();
        let pipeline = UpsamplingPipeline::default();
        let table = SpatialHashTable::new(1, VoxelGeometry::new(1.0, 0.0));
        let coarse = [
            coarse_at(Vec3::splat(0.5), 1.0),
            coarse_at(Vec3::new(5.5, 0.5, 0.5), 1.0),
        ];
        let voxels = pipeline.generator().generate(&coarse, 1.0);

        assert!(pipeline.update_grid(&table, &coarse, &voxels, &props) > 0);
        assert!(table.needs_growth());
    }
}
