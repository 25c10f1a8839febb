use std::{collections::VecDeque, f32::consts::TAU, fmt};

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::ParticleConfig,
    render::{rgba, PointSprite, Primitive, Viewport},
    VisualParameterSet,
};

/// Positions and velocities are in normalised units: the origin is the
/// viewport centre and 1.0 is half the shorter side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub lifetime: f32,
    pub remaining: f32,
    /// Simulation time of the spawn, in seconds.
    pub birth_time: f64,
}

impl Particle {
    pub fn alpha(&self) -> f32 {
        if self.lifetime <= 0.0 {
            0.0
        } else {
            (self.remaining / self.lifetime).clamp(0.0, 1.0)
        }
    }
}

/// Fixed-capacity particle storage. Slots are reused through a free list and
/// live slots are kept in birth order so the oldest can be evicted first.
/// Nothing allocates after construction.
#[derive(Clone)]
pub struct ParticleArena {
    slots: Vec<Particle>,
    alive: Vec<bool>,
    free: Vec<usize>,
    order: VecDeque<usize>,
}

impl ParticleArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Particle::default(); capacity],
            alive: vec![false; capacity],
            free: (0..capacity).rev().collect(),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Inserts a particle. Returns `true` when the oldest live particle had to
    /// be evicted to make room.
    pub fn spawn(&mut self, particle: Particle) -> bool {
        let (index, evicted) = match self.free.pop() {
            Some(index) => (index, false),
            None => match self.order.pop_front() {
                Some(oldest) => (oldest, true),
                None => return false,
            },
        };
        self.slots[index] = particle;
        self.alive[index] = true;
        self.order.push_back(index);
        evicted
    }

    /// Integrates every live particle and releases the expired ones.
    pub fn integrate(&mut self, dt: f32, damping: f32) {
        for &index in &self.order {
            let particle = &mut self.slots[index];
            particle.position += particle.velocity * dt;
            particle.velocity *= damping;
            particle.remaining -= dt;
            if particle.remaining <= 0.0 {
                self.alive[index] = false;
                self.free.push(index);
            }
        }
        let alive = &self.alive;
        self.order.retain(|&index| alive[index]);
    }

    pub fn clear(&mut self) {
        self.alive.iter_mut().for_each(|alive| *alive = false);
        self.order.clear();
        self.free.clear();
        self.free.extend((0..self.slots.len()).rev());
    }

    /// Live particles, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> + '_ {
        self.order.iter().map(|&index| &self.slots[index])
    }
}

impl fmt::Debug for ParticleArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleArena")
            .field("capacity", &self.capacity())
            .field("live", &self.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ParticleField {
    arena: ParticleArena,
    rng: ChaCha8Rng,
    seed: u64,
    elapsed: f64,
    spawn_carry: f64,
    lifetime: f32,
    lifetime_jitter: f32,
    drag: f32,
    evicted: u64,
}

impl ParticleField {
    pub fn new(config: &ParticleConfig) -> Self {
        Self {
            arena: ParticleArena::with_capacity(config.max_particles),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            seed: config.seed,
            elapsed: 0.0,
            spawn_carry: 0.0,
            lifetime: config.lifetime_seconds.max(f32::EPSILON),
            lifetime_jitter: config.lifetime_jitter.clamp(0.0, 1.0),
            drag: config.drag.max(0.0),
            evicted: 0,
        }
    }

    pub fn arena(&self) -> &ParticleArena {
        &self.arena
    }

    /// Particles removed early because the arena was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn reset(&mut self) {
        self.arena.clear();
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.elapsed = 0.0;
        self.spawn_carry = 0.0;
        self.evicted = 0;
    }

    pub fn step(&mut self, params: &VisualParameterSet, dt: f32, viewport: Viewport) -> Vec<Primitive> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.elapsed += f64::from(dt);
        self.arena.integrate(dt, (-self.drag * dt).exp());
        self.emit(params, dt);

        let center = viewport.center();
        let scale = viewport.min_side() * 0.5;
        let sprites = self
            .arena
            .iter()
            .map(|particle| PointSprite {
                position: center + particle.position * scale,
                size: params.particle_size,
                alpha: particle.alpha(),
            })
            .collect();

        vec![Primitive::Points {
            sprites,
            color: rgba(params.primary_color, 1.0),
        }]
    }

    fn emit(&mut self, params: &VisualParameterSet, dt: f32) {
        let expected = f64::from(params.emission_rate.max(0.0)) * f64::from(dt) + self.spawn_carry;
        let count = expected.floor();
        self.spawn_carry = expected - count;

        let count = count as usize;
        let capacity = self.arena.capacity();
        if count == 0 || capacity == 0 {
            return;
        }

        // Births beyond the cap would be evicted within this same step.
        let skipped = count.saturating_sub(capacity);
        self.evicted += skipped as u64;

        for k in skipped..count {
            // Spread births across the step so bursts do not clump at the origin.
            let age = dt * (count - 1 - k) as f32 / count as f32;
            let angle = self.rng.gen::<f32>() * TAU;
            let speed = params.movement_speed * (0.5 + 0.5 * self.rng.gen::<f32>());
            let lifetime = self.lifetime * (1.0 - self.lifetime_jitter * self.rng.gen::<f32>());
            let velocity = Vec2::from_angle(angle) * speed;
            if age >= lifetime {
                // Born and expired within this step.
                continue;
            }

            if self.arena.spawn(Particle {
                position: velocity * age,
                velocity,
                lifetime,
                remaining: lifetime - age,
                birth_time: self.elapsed - f64::from(age),
            }) {
                self.evicted += 1;
            }
        }
    }
}
