//! 土堆滑落演示
//!
//! 一小堆粗粒子沿斜坡下滑，打印每步的细粒子统计。
//!
//! ```text
//! cargo run --example soil_pile
//! RUST_LOG=upsampling=debug cargo run --example soil_pile
//! ```

use glam::Vec3;
use granule_upsampler::core::init_logging;
use granule_upsampler::prelude::*;
use granule_upsampler::upsampling::StaticParticleSource;

const ELEMENT_SIZE: f32 = 0.2;
const DENSITY: f32 = 1600.0;
const DT: f32 = 1.0 / 30.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = UpsamplingConfig::load_or_default().with_upscaling(27.0);
    config.apply_env_overrides();
    init_logging(&config.logging);

    let mut upsampler = ParticleUpsampler::new(config)?;
    let mut source = StaticParticleSource::new(pile(), ELEMENT_SIZE, DENSITY);

    for frame in 0..90 {
        // 前60帧下滑，之后土堆被移走，细粒子淡出
        if frame == 60 {
            source.particles.clear();
        }
        for particle in &mut source.particles {
            particle.position += particle.velocity * DT;
        }

        let Some(stats) = upsampler.step(&source, DT)? else {
            continue;
        };
        if frame % 10 == 0 || frame == 89 {
            let snapshot = upsampler.snapshot();
            println!(
                "frame {:3}: {:4} coarse, {:4} voxels, {:6} fine (+{} / -{}), {} us, bounds {:?}",
                frame,
                stats.coarse_particles,
                stats.active_voxels,
                stats.live_particles,
                stats.spawned,
                stats.removed,
                stats.elapsed_us,
                snapshot.bounds().map(|b| b.size())
            );
        }
    }

    Ok(())
}

fn pile() -> Vec<CoarseParticle> {
    let radius = FineParticleProperties::nominal_radius_for(ELEMENT_SIZE);
    let mass = FineParticleProperties::new(ELEMENT_SIZE, DENSITY, 1.0)
        .map(|props| props.nominal_mass)
        .unwrap_or(0.0);

    let mut particles = Vec::new();
    for layer in 0..4 {
        let width = 8 - 2 * layer;
        for x in 0..width {
            for z in 0..width {
                let position = Vec3::new(
                    (x + layer) as f32 * ELEMENT_SIZE,
                    layer as f32 * ELEMENT_SIZE,
                    (z + layer) as f32 * ELEMENT_SIZE,
                );
                let velocity = Vec3::new(0.6, -0.1 * layer as f32, 0.0);
                particles.push(CoarseParticle::new(position, radius, velocity, mass));
            }
        }
    }
    particles
}
