//! # Granule Upsampler
//!
//! Turns a sparse set of physically simulated "coarse" granular particles into a
//! dense, visually stable set of "fine" particles, every simulation step, without
//! running physics at the fine resolution.
//!
//! ## Features
//!
//! - **Spatial Hash Table**: lock-free open addressing keyed by voxel index, rebuilt every step
//! - **Voxel Rasterization**: coarse influence spheres to the active voxel set
//! - **Double-Buffered Pool**: parallel stream compaction of fine particles
//! - **Mass Budget**: fine particles spawn only while their voxel has room
//! - **Eased Lifetime**: spawn/despawn animate through a phase instead of popping
//!
//! ## Architecture Design
//!
//! One step is a strict sequence of data-parallel passes executed on a rayon pool:
//!
//! ```text
//! ParticleProvider ──► VoxelGridGenerator ──► SpatialHashTable
//!                                                  ▲
//!   ClearTable → UpdateGrid → ApplyParticleMass → Compact → Swap → Spawn → Move
//!                                                  │
//!                     FineParticlePool ──► FineParticleSnapshot ──► Renderer
//! ```
//!
//! ### Example
//!
//! ```ignore
//! use granule_upsampler::prelude::*;
//!
//! let mut upsampler = ParticleUpsampler::new(UpsamplingConfig::default())?;
//! upsampler.step(&terrain, 1.0 / 60.0)?;
//! let snapshot = upsampler.snapshot();
//! renderer.upload(snapshot.as_bytes(), snapshot.len());
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Error types, logging and shared macros
//! - [`config`]: Configuration loading and validation
//! - [`performance`]: Lock-free primitives and step statistics
//! - [`upsampling`]: The upsampling core

/// Error types, logging initialization and shared macros
pub mod core;
/// Configuration system
pub mod config;
/// Lock-free primitives and per-step statistics
pub mod performance;
/// Spatial hashing, pooling and the per-step pass pipeline
pub mod upsampling;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{ParticleRenderMode, UpsamplingConfig};
    pub use crate::core::{UpsamplingError, UpsamplingResult};
    pub use crate::performance::StepStats;
    pub use crate::upsampling::{
        Aabb, CoarseParticle, FineParticle, FineParticleProperties, FineParticleSnapshot,
        ParticleProvider, ParticleUpsampler, RenderInstance, VoxelIndex,
    };
}
