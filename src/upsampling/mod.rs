//! 颗粒细粒子上采样模块
//!
//! 把求解器输出的少量粗粒子变成大量仅用于显示的细粒子，每步在 CPU
//! 线程池上完成，不重新运行物理。
//!
//! ## 架构设计
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Particle Upsampler                      │
//! ├─────────────────────────────────────────────────────────┤
//! │  0. 两步之间的扩容                                        │
//! │     - 粗粒子缓冲区 / 活动体素缓冲区 / 哈希表 / 细粒子池    │
//! │                                                          │
//! │  1. ClearTable / UpdateGrid                              │
//! │     - 清空哈希表，插入活动体素                            │
//! │     - 粗粒子质量计入中心所在体素，邻居只累加速度           │
//! │                                                          │
//! │  2. ApplyParticleMass / Compact / Swap                   │
//! │     - 细粒子认领体素名额，失败则开始消失并推进消失动画     │
//! │     - 保序压缩到另一个缓冲区并翻转                         │
//! │                                                          │
//! │  3. SpawnParticles / Move                                │
//! │     - 剩余名额在体素内部区域生成新粒子                     │
//! │     - 跟随体素速度移动，推进出现动画                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 使用示例
//!
//! ```ignore
//! let mut upsampler = ParticleUpsampler::new(UpsamplingConfig::default())?;
//!
//! // 每个模拟步
//! if let Some(stats) = upsampler.step(&terrain, dt)? {
//!     let snapshot = upsampler.snapshot();
//!     renderer.upload(snapshot.as_bytes());
//! }
//! ```

pub mod hash_table;
pub mod motion;
pub mod pipeline;
pub mod pool;
pub mod properties;
pub mod provider;
pub mod snapshot;
pub mod types;
pub mod upsampler;
pub mod voxel_grid;


pub use hash_table::{RoomClaim, SpatialHashTable, INITIAL_VOXEL_BUFFER_SIZE};
pub use motion::MotionIntegrator;
pub use pipeline::{PassReport, StepInputs, UpsamplingPipeline};
pub use pool::FineParticlePool;
pub use properties::{FineParticleProperties, PACKING_RATIO};
pub use provider::{ParticleProvider, StaticParticleSource};
pub use snapshot::{FineParticleSnapshot, RenderInstance};
pub use types::{
    ease, Aabb, CoarseParticle, FineParticle, ParticleState, VoxelEntry, VoxelGeometry, VoxelIndex,
    VOXEL_COORD_LIMIT,
};
pub use upsampler::ParticleUpsampler;
pub use voxel_grid::{VoxelGridGenerator, MAX_INFLUENCE_VOXELS};
