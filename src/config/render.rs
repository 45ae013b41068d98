use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 细粒子的绘制方式（仅作为提示传给渲染端）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParticleRenderMode {
    /// 面向相机的四边形
    #[default]
    Impostor,
    /// 实例化网格
    Mesh,
}

/// 渲染提示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 绘制方式
    pub mode: ParticleRenderMode,

    /// 低处颜色（RGBA）
    pub color_low: [f32; 4],

    /// 高处颜色（RGBA）
    pub color_high: [f32; 4],
}

impl_default!(RenderConfig {
    mode: ParticleRenderMode::Impostor,
    color_low: [1.0, 1.0, 1.0, 1.0],
    color_high: [1.0, 1.0, 1.0, 1.0],
});
