//! Avatar motion, run by the owner of an avatar once per tick.

use std::time::Duration;

use cubeclash_protocol::Vec3;
use serde::{Deserialize, Serialize};

/// Below this planar speed a coasting avatar stops.
const REST_SPEED: f32 = 1e-3;

/// Movement and arena tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Target speed at full stick deflection.
    pub move_speed: f32,
    /// Easing rate towards the target velocity while there is input.
    pub acceleration: f32,
    /// Easing rate towards rest without input.
    pub deceleration: f32,
    pub max_speed: f32,
    /// Divides push impulses.
    pub mass: f32,
    /// Half the side length of the square platform centred on the origin.
    pub platform_half_extent: f32,
    pub gravity: f32,
    /// An avatar below this height has fallen off.
    pub fall_threshold: f32,
    /// Further falls of the same avatar within this window are ignored.
    pub fall_cooldown: Duration,
    /// Centre distance at which two cubes touch.
    pub contact_distance: f32,
    /// Minimum time between two contact pushes against the same avatar.
    pub push_cooldown: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            acceleration: 10.0,
            deceleration: 5.0,
            max_speed: 8.0,
            mass: 1.0,
            platform_half_extent: 10.0,
            gravity: 9.81,
            fall_threshold: -5.0,
            fall_cooldown: Duration::from_secs(1),
            contact_distance: 1.0,
            push_cooldown: Duration::from_millis(500),
        }
    }
}

impl MotionConfig {
    /// Velocity change caused by a push impulse.
    pub fn impulse_to_velocity(&self, impulse: Vec3) -> Vec3 {
        if self.mass > 0.0 {
            impulse * (1.0 / self.mass)
        } else {
            impulse
        }
    }

    pub fn is_on_platform(&self, position: Vec3) -> bool {
        position.x.abs() <= self.platform_half_extent && position.z.abs() <= self.platform_half_extent
    }

    pub fn has_fallen(&self, position: Vec3) -> bool {
        position.y < self.fall_threshold
    }

    /// Whether cubes at `a` and `b` touch.
    pub fn in_contact(&self, a: Vec3, b: Vec3) -> bool {
        (b - a).length() < self.contact_distance
    }
}

/// Whether an avatar is under way along the platform.
pub fn is_moving(velocity: Vec3) -> bool {
    Vec3::new(velocity.x, 0.0, velocity.z).length() >= REST_SPEED
}

/// Clamps a movement vector to `[-1, 1]²`. Non-finite components count
/// as no input.
pub fn clamp_input((x, y): (f32, f32)) -> (f32, f32) {
    let clamp = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
    (clamp(x), clamp(y))
}

/// Advances one avatar by `dt`. Returns the new position and velocity.
///
/// The planar velocity eases towards `input * move_speed` and is capped at
/// `max_speed`. Off the platform the avatar also falls.
pub fn step(
    config: &MotionConfig,
    input: (f32, f32),
    position: Vec3,
    velocity: Vec3,
    dt: Duration,
) -> (Vec3, Vec3) {
    let dt = dt.as_secs_f32();
    let (x, z) = clamp_input(input);
    let target = Vec3::new(x, 0.0, z) * config.move_speed;
    let planar = Vec3::new(velocity.x, 0.0, velocity.z);

    let has_input = x != 0.0 || z != 0.0;
    let rate = if has_input {
        config.acceleration
    } else {
        config.deceleration
    };
    let t = (rate * dt).clamp(0.0, 1.0);
    let mut planar = (planar + (target - planar) * t).clamp_length(config.max_speed);
    if !has_input && planar.length() < REST_SPEED {
        planar = Vec3::ZERO;
    }

    let vertical = if config.is_on_platform(position) {
        0.0
    } else {
        velocity.y - config.gravity * dt
    };

    let velocity = Vec3::new(planar.x, vertical, planar.z);
    (position + velocity * dt, velocity)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(100);

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_motion_config_default() {
        let config = MotionConfig::default();
        assert_eq!(config.move_speed, 5.0);
        assert_eq!(config.max_speed, 8.0);
        assert_eq!(config.fall_threshold, -5.0);
        assert_eq!(config.fall_cooldown, Duration::from_secs(1));
        assert_eq!(config.contact_distance, 1.0);
    }

    #[test]
    fn test_clamp_input_limits_and_sanitizes() {
        assert_eq!(clamp_input((2.0, -3.0)), (1.0, -1.0));
        assert_eq!(clamp_input((f32::NAN, 0.5)), (0.0, 0.5));
    }

    #[test]
    fn test_step_accelerates_towards_input() {
        let config = MotionConfig::default();
        let start = Vec3::new(0.0, 1.0, 0.0);
        let (position, velocity) = step(&config, (1.0, 0.0), start, Vec3::ZERO, DT);

        // Eased by acceleration * dt = 1.0, so straight to the target speed.
        assert!(approx(velocity.x, 5.0));
        assert!(approx(position.x, 0.5));
        assert_eq!(velocity.y, 0.0);
    }

    #[test]
    fn test_step_decelerates_without_input() {
        let config = MotionConfig::default();
        let (_, velocity) = step(
            &config,
            (0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            DT,
        );
        assert!(approx(velocity.x, 2.0));
    }

    #[test]
    fn test_step_coasting_avatar_comes_to_rest() {
        let config = MotionConfig::default();
        let start = Vec3::new(0.0, 1.0, 0.0);
        let mut velocity = Vec3::new(1.0, 0.0, 0.0);
        for _ in 0..200 {
            (_, velocity) = step(&config, (0.0, 0.0), start, velocity, DT);
        }
        assert_eq!(velocity, Vec3::ZERO);
    }

    #[test]
    fn test_step_caps_speed() {
        let config = MotionConfig::default();
        let (_, velocity) = step(
            &config,
            (1.0, 1.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(20.0, 0.0, 0.0),
            DT,
        );
        assert!(velocity.length() <= config.max_speed + 1e-4);
    }

    #[test]
    fn test_step_falls_off_the_platform() {
        let config = MotionConfig::default();
        let (position, velocity) = step(
            &config,
            (0.0, 0.0),
            Vec3::new(11.0, 1.0, 0.0),
            Vec3::ZERO,
            DT,
        );
        assert!(velocity.y < 0.0);
        assert!(position.y < 1.0);
    }

    #[test]
    fn test_impulse_to_velocity_divides_by_mass() {
        let config = MotionConfig {
            mass: 2.0,
            ..MotionConfig::default()
        };
        assert_eq!(
            config.impulse_to_velocity(Vec3::new(10.0, 0.0, 0.0)),
            Vec3::new(5.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_has_fallen_below_threshold() {
        let config = MotionConfig::default();
        assert!(config.has_fallen(Vec3::new(0.0, -5.5, 0.0)));
        assert!(!config.has_fallen(Vec3::new(0.0, -4.0, 0.0)));
    }

    #[test]
    fn test_in_contact_within_cube_size() {
        let config = MotionConfig::default();
        let a = Vec3::new(0.0, 1.0, 0.0);
        assert!(config.in_contact(a, Vec3::new(0.9, 1.0, 0.0)));
        assert!(!config.in_contact(a, Vec3::new(1.5, 1.0, 0.0)));
    }

    #[test]
    fn test_is_moving_ignores_vertical_speed() {
        assert!(is_moving(Vec3::new(0.5, 0.0, 0.0)));
        assert!(!is_moving(Vec3::new(0.0, -3.0, 0.0)));
        assert!(!is_moving(Vec3::ZERO));
    }
}
