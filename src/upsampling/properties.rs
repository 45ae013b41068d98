//! 细粒子物理属性
//!
//! 由地形单元尺寸、颗粒密度和放大倍数推导名义粗粒子与细粒子的半径/质量。

use crate::core::error::ensure_positive;
use crate::core::UpsamplingResult;
use std::f32::consts::PI;

/// 随机堆积的体积分数
pub const PACKING_RATIO: f32 = 0.67;

/// 细粒子属性
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FineParticleProperties {
    /// 地形单元尺寸
    pub element_size: f32,
    /// 颗粒密度
    pub particle_density: f32,
    /// 放大倍数
    pub upscaling: f32,
    /// 名义粗粒子半径
    pub nominal_radius: f32,
    /// 名义粗粒子质量
    pub nominal_mass: f32,
    /// 细粒子半径
    pub fine_radius: f32,
    /// 细粒子质量
    pub fine_mass: f32,
}

impl FineParticleProperties {
    /// 计算属性
    ///
    /// # 参数
    ///
    /// * `element_size` - 地形单元尺寸
    /// * `particle_density` - 颗粒密度
    /// * `upscaling` - 放大倍数
    ///
    /// # 错误
    ///
    /// 任一参数不是正的有限数时返回 `InvalidConfig`。
    pub fn new(element_size: f32, particle_density: f32, upscaling: f32) -> UpsamplingResult<Self> {
        let element_size = ensure_positive("element_size", element_size)?;
        let particle_density = ensure_positive("particle_density", particle_density)?;
        let upscaling = ensure_positive("upscaling", upscaling)?;

        let nominal_radius = Self::nominal_radius_for(element_size);
        let nominal_mass = particle_density * 4.0 / 3.0 * PI * nominal_radius.powi(3);

        Ok(Self {
            element_size,
            particle_density,
            upscaling,
            nominal_radius,
            nominal_mass,
            fine_radius: nominal_radius / upscaling.powf(1.0 / 3.0),
            fine_mass: nominal_mass / upscaling,
        })
    }

    /// 单元尺寸对应的名义半径：堆积体积等于单元体积
    pub fn nominal_radius_for(element_size: f32) -> f32 {
        (3.0 * PACKING_RATIO / (4.0 * PI)).powf(1.0 / 3.0) * element_size
    }

    /// 使名义质量恰好为 `nominal_mass` 的密度
    pub fn density_for_nominal_mass(element_size: f32, nominal_mass: f32) -> f32 {
        nominal_mass / (4.0 / 3.0 * PI * Self::nominal_radius_for(element_size).powi(3))
    }

    /// 粗粒子影响球半径与粒子半径之比
    pub fn influence_scale() -> f32 {
        PACKING_RATIO.powf(-1.0 / 3.0)
    }

    /// 输入是否与当前属性一致
    pub fn matches(&self, element_size: f32, particle_density: f32, upscaling: f32) -> bool {
        self.element_size == element_size
            && self.particle_density == particle_density
            && self.upscaling == upscaling
    }

    /// 质量对应的细粒子数量（向下取整）
    pub fn fine_count_for(&self, mass: f32) -> i32 {
        if mass <= 0.0 {
            return 0;
        }
        // 容差吸收浮点累加误差，避免 7.9999 被取整成 7
        (mass / self.fine_mass + 1e-4).floor() as i32
    }
}
