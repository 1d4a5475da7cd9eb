//! Simulated player movement for headless clients.
//!
//! Bots walk in a circle on the ground plane, facing along their direction of
//! travel, so that other session members see a smoothly moving avatar.

use rand::Rng;
use shared::PlayerState;
use std::f64::consts::TAU;

#[derive(Debug, Clone, PartialEq)]
pub struct CircularMotion {
    pub center: (f64, f64, f64),
    pub radius: f64,
    /// Radians per second; negative values walk clockwise
    pub angular_speed: f64,
    pub phase: f64,
}

impl CircularMotion {
    pub fn new(center: (f64, f64, f64), radius: f64, angular_speed: f64) -> Self {
        Self {
            center,
            radius,
            angular_speed,
            phase: 0.0,
        }
    }

    /// Picks a random circle near the origin so several bots do not overlap
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let center = (rng.gen_range(-20.0..20.0), 0.0, rng.gen_range(-20.0..20.0));
        let radius = rng.gen_range(2.0..8.0);
        let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        Self {
            center,
            radius,
            angular_speed: direction * rng.gen_range(0.5..2.0),
            phase: rng.gen_range(0.0..TAU),
        }
    }

    /// Linear speed along the circle
    pub fn speed(&self) -> f64 {
        self.radius * self.angular_speed.abs()
    }

    /// State of the walker `elapsed` seconds after starting
    pub fn state_at(&self, elapsed: f64) -> PlayerState {
        let theta = self.phase + self.angular_speed * elapsed;
        let (sin, cos) = theta.sin_cos();

        let mut state = PlayerState::at(
            self.center.0 + self.radius * cos,
            self.center.1,
            self.center.2 + self.radius * sin,
        );

        // Tangent of the circle, pointing the way we walk
        let turn = self.angular_speed.signum();
        state.fx = -sin * turn;
        state.fz = cos * turn;
        state.angle = state.fx.atan2(state.fz).to_degrees();
        state.speed = self.speed();
        state.grounded = true;
        state
    }
}
