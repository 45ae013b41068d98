//! 上采样器：拥有全部缓冲区，负责两步之间的扩容与每步的调度

use super::hash_table::SpatialHashTable;
use super::motion::MotionIntegrator;
use super::pipeline::{StepInputs, UpsamplingPipeline};
use super::pool::FineParticlePool;
use super::properties::FineParticleProperties;
use super::provider::ParticleProvider;
use super::snapshot::FineParticleSnapshot;
use super::types::{Aabb, CoarseParticle, FineParticle, VoxelGeometry, VoxelIndex};
use crate::config::UpsamplingConfig;
use crate::core::error::ensure_positive;
use crate::core::{UpsamplingError, UpsamplingResult};
use crate::performance::StepStats;
use rayon::prelude::*;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// 粒子上采样器
///
/// 每步从 [`ParticleProvider`] 拉取粗粒子，在专用 rayon 线程池上执行
/// 通道序列和运动积分，结果通过 [`snapshot`](Self::snapshot) 借给渲染端。
///
/// 所有缓冲区都按倍增增长，扩容只在两步之间发生：
/// - 粗粒子缓冲区：从 `initial_coarse_buffer_size` 开始，填充时由 `Vec` 倍增
/// - 活动体素缓冲区：生成器报告的数量超过缓冲区时扩大后重新生成
/// - 哈希表：容量始终不少于活动体素数的两倍
/// - 细粒子池：上一步生成被截断时扩大，最多到 `max_fine_capacity`
pub struct ParticleUpsampler {
    config: UpsamplingConfig,
    thread_pool: rayon::ThreadPool,
    pipeline: UpsamplingPipeline,
    table: SpatialHashTable,
    pool: FineParticlePool,
    coarse: Vec<CoarseParticle>,
    voxel_buffer: Vec<VoxelIndex>,
    active_count: usize,
    properties: Option<FineParticleProperties>,
    bounds: Option<Aabb>,
    fine_demand: usize,
    base_seed: u64,
    step: u64,
    last_stats: StepStats,
}

impl ParticleUpsampler {
    /// 创建上采样器
    ///
    /// # 错误
    ///
    /// 配置验证失败或线程池无法创建时返回错误。
    pub fn new(config: UpsamplingConfig) -> UpsamplingResult<Self> {
        config.validate()?;

        let threads = config.threading.resolved_threads();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("upsampling-worker-{}", i))
            .build()?;

        let buffers = &config.buffers;
        let base_seed = config.seed.unwrap_or_else(clock_seed);
        tracing::info!(
            target: "upsampling",
            "Upsampler created: upscaling={}, {} worker threads, fine capacity {}",
            config.upscaling,
            threads,
            buffers.initial_fine_capacity
        );

        Ok(Self {
            thread_pool,
            pipeline: UpsamplingPipeline::default(),
            table: SpatialHashTable::new(
                2 * buffers.initial_voxel_buffer_size,
                VoxelGeometry::default(),
            ),
            pool: FineParticlePool::new(buffers.initial_fine_capacity, buffers.max_fine_capacity),
            coarse: Vec::with_capacity(buffers.initial_coarse_buffer_size),
            voxel_buffer: vec![VoxelIndex::default(); buffers.initial_voxel_buffer_size],
            active_count: 0,
            properties: None,
            bounds: None,
            fine_demand: 0,
            base_seed,
            step: 0,
            last_stats: StepStats::default(),
            config,
        })
    }

    /// 使用提供者的数据执行一步
    ///
    /// # 返回
    ///
    /// 提供者没有数据时跳过该步，返回 `Ok(None)`，细粒子保持不变。
    pub fn step<P: ParticleProvider + ?Sized>(
        &mut self,
        provider: &P,
        dt: f32,
    ) -> UpsamplingResult<Option<StepStats>> {
        check_dt(dt)?;

        if !self.fill_coarse(|buffer| provider.fill_particles(buffer)) {
            tracing::debug!(target: "upsampling", "No coarse particle data, step skipped");
            return Ok(None);
        }

        self.advance(provider.element_size(), provider.particle_density(), dt)
            .map(Some)
    }

    /// 直接使用给定的粗粒子执行一步
    pub fn step_particles(
        &mut self,
        coarse: &[CoarseParticle],
        element_size: f32,
        particle_density: f32,
        dt: f32,
    ) -> UpsamplingResult<StepStats> {
        check_dt(dt)?;

        self.fill_coarse(|buffer| {
            buffer.extend_from_slice(coarse);
            true
        });
        self.advance(element_size, particle_density, dt)
    }

    fn advance(&mut self, element_size: f32, particle_density: f32, dt: f32) -> UpsamplingResult<StepStats> {
        let start = Instant::now();
        let properties = self.refresh_properties(element_size, particle_density)?;
        self.step += 1;

        self.generate_active_voxels();
        self.grow_table();
        self.grow_pool();

        let seed = step_seed(self.base_seed, self.step);
        let ease_step = self.config.ease_step;
        let active = &self.voxel_buffer[..self.active_count];
        let (pipeline, table, pool, coarse) =
            (&self.pipeline, &self.table, &mut self.pool, self.coarse.as_slice());

        let (report, bounds) = self.thread_pool.install(|| {
            let inputs = StepInputs {
                coarse,
                active_voxels: active,
                properties: &properties,
                seed,
                ease_step,
            };
            let report = pipeline.run(table, pool, inputs);
            MotionIntegrator::integrate(pool.particles_mut(), table, dt, ease_step);
            (report, particle_bounds(pool.particles(), properties.fine_radius))
        });

        self.bounds = bounds;
        self.fine_demand = self.pool.len() + report.truncated_spawns;

        let stats = StepStats {
            step: self.step,
            coarse_particles: self.coarse.len(),
            active_voxels: self.active_count,
            table_capacity: self.table.capacity(),
            spawned: report.spawned,
            despawned: report.despawned,
            removed: report.removed,
            live_particles: self.pool.len(),
            truncated_spawns: report.truncated_spawns,
            dropped_deposits: report.dropped_deposits,
            elapsed_us: start.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            target: "upsampling",
            "Step {}: {} coarse, {} voxels, +{} / -{} fine, {} live",
            stats.step,
            stats.coarse_particles,
            stats.active_voxels,
            stats.spawned,
            stats.removed,
            stats.live_particles
        );

        self.last_stats = stats.clone();
        Ok(stats)
    }

    /// 材料或放大倍数变化时重新计算细粒子属性，并让旧粒子淡出
    fn refresh_properties(
        &mut self,
        element_size: f32,
        particle_density: f32,
    ) -> UpsamplingResult<FineParticleProperties> {
        let upscaling = self.config.upscaling;
        if let Some(current) = self.properties {
            if current.matches(element_size, particle_density, upscaling) {
                return Ok(current);
            }
        }

        let properties = FineParticleProperties::new(element_size, particle_density, upscaling)?;
        let voxel_size = self.config.voxel_size.unwrap_or(element_size);
        let voxel_size_changed = self.table.geometry().voxel_size != voxel_size;
        self.table
            .set_geometry(VoxelGeometry::new(voxel_size, properties.fine_radius));

        if self.properties.is_some() {
            let retired = self.pool.retire_all();
            tracing::info!(
                target: "upsampling",
                "Fine particle properties changed (element size {}, density {}, upscaling {}), retiring {} particles",
                element_size,
                particle_density,
                upscaling,
                retired
            );
        }
        if voxel_size_changed {
            self.pool.revalidate_owners(voxel_size);
        }

        self.properties = Some(properties);
        Ok(properties)
    }

    /// 清空粗粒子缓冲区后填充，缓冲区实际扩大时记录日志
    fn fill_coarse<F>(&mut self, fill: F) -> bool
    where
        F: FnOnce(&mut Vec<CoarseParticle>) -> bool,
    {
        let old_capacity = self.coarse.capacity();
        self.coarse.clear();
        let filled = fill(&mut self.coarse);
        let new_capacity = self.coarse.capacity();
        if new_capacity > old_capacity {
            tracing::info!(
                target: "upsampling",
                "Coarse particle buffer grown from {} to {}",
                old_capacity,
                new_capacity
            );
        }
        filled
    }

    fn generate_active_voxels(&mut self) {
        let voxel_size = self.table.geometry().voxel_size;
        loop {
            let count = self.thread_pool.install(|| {
                self.pipeline
                    .generator()
                    .generate_into(&self.coarse, voxel_size, &mut self.voxel_buffer)
            });
            if count <= self.voxel_buffer.len() {
                self.active_count = count;
                return;
            }

            let old_len = self.voxel_buffer.len();
            let mut new_len = old_len.max(1);
            while new_len < count {
                new_len *= 2;
            }
            self.voxel_buffer.resize(new_len, VoxelIndex::default());
            tracing::info!(
                target: "upsampling.grid",
                "Active voxel buffer grown from {} to {}",
                old_len,
                new_len
            );
        }
    }

    fn grow_table(&mut self) {
        if self.table.needs_growth() {
            self.table.grow();
        }
        self.table.reserve_for(self.active_count);
    }

    fn grow_pool(&mut self) {
        if !self.pool.take_growth_request() {
            return;
        }
        while self.pool.capacity() < self.fine_demand {
            if !self.pool.grow() {
                tracing::warn!(
                    target: "upsampling.pool",
                    "Fine particle pool at its maximum capacity {}",
                    self.pool.max_capacity()
                );
                break;
            }
        }
    }

    /// 当前细粒子的只读快照
    pub fn snapshot(&self) -> FineParticleSnapshot<'_> {
        FineParticleSnapshot::new(
            self.pool.particles(),
            self.properties.map_or(0.0, |p| p.fine_radius),
            self.bounds,
            &self.config.render,
            self.step,
        )
    }

    /// 上一步的统计信息
    pub fn stats(&self) -> &StepStats {
        &self.last_stats
    }

    pub fn table(&self) -> &SpatialHashTable {
        &self.table
    }

    pub fn pool(&self) -> &FineParticlePool {
        &self.pool
    }

    /// 粗粒子缓冲区当前容量
    pub fn coarse_capacity(&self) -> usize {
        self.coarse.capacity()
    }

    /// 上一步的活动体素（按 x, y, z 排序）
    pub fn active_voxels(&self) -> &[VoxelIndex] {
        &self.voxel_buffer[..self.active_count]
    }

    pub fn properties(&self) -> Option<&FineParticleProperties> {
        self.properties.as_ref()
    }

    pub fn config(&self) -> &UpsamplingConfig {
        &self.config
    }

    /// 已执行的步数（跳过的步不计）
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// 修改放大倍数，下一步生效，现有细粒子淡出
    pub fn set_upscaling(&mut self, upscaling: f32) -> UpsamplingResult<()> {
        self.config.upscaling = ensure_positive("upscaling", upscaling)?;
        Ok(())
    }

    /// 修改动画步长，必须在 (0, 1] 内
    pub fn set_ease_step(&mut self, ease_step: f32) -> UpsamplingResult<()> {
        if !(ease_step.is_finite() && ease_step > 0.0 && ease_step <= 1.0) {
            return Err(UpsamplingError::InvalidConfig(format!(
                "ease_step must be in (0, 1], got {}",
                ease_step
            )));
        }
        self.config.ease_step = ease_step;
        Ok(())
    }

    /// 修改体素尺寸覆盖值（`None` 表示使用地形单元尺寸），下一步生效
    pub fn set_voxel_size(&mut self, voxel_size: Option<f32>) -> UpsamplingResult<()> {
        if let Some(size) = voxel_size {
            ensure_positive("voxel_size", size)?;
        }
        if self.config.voxel_size != voxel_size {
            self.config.voxel_size = voxel_size;
            // 下一步强制重新计算几何
            self.properties = None;
            self.pool.retire_all();
        }
        Ok(())
    }

    /// 丢弃所有细粒子和体素数据
    pub fn reset(&mut self) {
        self.pool.clear();
        self.table.clear();
        self.active_count = 0;
        self.bounds = None;
        self.fine_demand = 0;
        self.last_stats = StepStats::default();
        tracing::info!(target: "upsampling", "Upsampler reset");
    }
}

fn check_dt(dt: f32) -> UpsamplingResult<()> {
    if dt.is_finite() && dt >= 0.0 {
        Ok(())
    } else {
        Err(UpsamplingError::InvalidInput(format!(
            "dt must be a non-negative finite number, got {}",
            dt
        )))
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

fn step_seed(base: u64, step: u64) -> u64 {
    base ^ step.wrapping_mul(0xD1B5_4A32_D192_ED03)
}

fn particle_bounds(particles: &[FineParticle], fine_radius: f32) -> Option<Aabb> {
    particles
        .par_iter()
        .map(|particle| Aabb::from_point(particle.position))
        .reduce_with(Aabb::union)
        .map(|bounds| bounds.inflate(fine_radius))
}
