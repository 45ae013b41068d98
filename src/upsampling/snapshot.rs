//! 供渲染端读取的细粒子只读视图

use super::types::{Aabb, FineParticle};
use crate::config::{ParticleRenderMode, RenderConfig};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// 单个细粒子的绘制参数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RenderInstance {
    pub position: Vec3,
    /// 按可见度缩放后的半径
    pub radius: f32,
    /// 0 = 不可见，1 = 完整尺寸
    pub visibility: f32,
    /// 按高度在低/高颜色之间插值
    pub color: [f32; 4],
}

/// 细粒子快照
///
/// 借用自 [`ParticleUpsampler`](super::ParticleUpsampler)，持有期间无法执行下一步。
#[derive(Debug, Clone, Copy)]
pub struct FineParticleSnapshot<'a> {
    particles: &'a [FineParticle],
    fine_radius: f32,
    bounds: Option<Aabb>,
    render: &'a RenderConfig,
    step: u64,
}

impl<'a> FineParticleSnapshot<'a> {
    pub(crate) fn new(
        particles: &'a [FineParticle],
        fine_radius: f32,
        bounds: Option<Aabb>,
        render: &'a RenderConfig,
        step: u64,
    ) -> Self {
        Self {
            particles,
            fine_radius,
            bounds,
            render,
            step,
        }
    }

    pub fn particles(&self) -> &'a [FineParticle] {
        self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// 细粒子缓冲区的原始字节，可直接上传
    pub fn as_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.particles)
    }

    /// 所有细粒子的包围盒（已外扩细粒子半径），没有粒子时为 `None`
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn fine_radius(&self) -> f32 {
        self.fine_radius
    }

    pub fn render_mode(&self) -> ParticleRenderMode {
        self.render.mode
    }

    /// 产生该快照的步数
    pub fn step(&self) -> u64 {
        self.step
    }

    /// 生成绘制参数
    pub fn instances(&self) -> Vec<RenderInstance> {
        let (low, span) = match self.bounds {
            Some(bounds) => (bounds.min.y, bounds.size().y),
            None => (0.0, 0.0),
        };

        self.particles
            .iter()
            .map(|particle| {
                let visibility = particle.visibility();
                let height = if span > 0.0 {
                    ((particle.position.y - low) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                RenderInstance {
                    position: particle.position,
                    radius: self.fine_radius * visibility,
                    visibility,
                    color: lerp_color(self.render.color_low, self.render.color_high, height),
                }
            })
            .collect()
    }
}

fn lerp_color(low: [f32; 4], high: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| low[i] + (high[i] - low[i]) * t)
}
