//! Keyboard sampling and the locally driven car

use crate::config::ClientConfig;
use macroquad::prelude::*;
use shared::{round_highscore, ClientId, PlayerRecord, Vec3};

const MAX_SPEED: f32 = 40.0;
const ACCELERATION: f32 = 25.0;
const BRAKING: f32 = 45.0;
const DRAG: f32 = 8.0;
/// Degrees per second at full steering
const TURN_RATE: f32 = 120.0;
/// Distance units per highscore point
const DISTANCE_PER_POINT: f32 = 10.0;

/// Throttle and steering, each within `[-1, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveInput {
    pub throttle: f32,
    pub steer: f32,
}

/// One-shot key presses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Controls {
    pub reconnect: bool,
    pub quit: bool,
}

/// The local client's car, simulated from input and reported to the server
#[derive(Debug, Clone)]
pub struct LocalCar {
    pub record: PlayerRecord,
    pub speed: f32,
    distance: f32,
}

impl LocalCar {
    pub fn new(config: &ClientConfig) -> Self {
        let mut record = PlayerRecord::new(0);
        record.username = config.username.clone();
        record.model = config.model.clone();
        record.texture = config.texture.clone();
        record.cosmetic = config.cosmetic.clone();

        Self {
            record,
            speed: 0.0,
            distance: 0.0,
        }
    }

    pub fn set_id(&mut self, client_id: ClientId) {
        self.record.id = client_id;
    }

    /// Heading in degrees around the vertical axis
    pub fn heading(&self) -> f32 {
        self.record.rotation.y
    }

    pub fn step(&mut self, input: DriveInput, dt: f32) {
        let throttle = input.throttle.clamp(-1.0, 1.0);
        let steer = input.steer.clamp(-1.0, 1.0);

        if throttle > 0.0 {
            self.speed += ACCELERATION * throttle * dt;
        } else if throttle < 0.0 {
            self.speed += BRAKING * throttle * dt;
        } else {
            let slowdown = (DRAG * dt).min(self.speed.abs());
            self.speed -= slowdown * self.speed.signum();
        }
        self.speed = self.speed.clamp(-MAX_SPEED / 2.0, MAX_SPEED);

        // Steering only bites while moving
        let grip = (self.speed.abs() / MAX_SPEED).min(1.0);
        self.record.rotation.y = (self.heading() + steer * TURN_RATE * grip * dt).rem_euclid(360.0);

        let yaw = self.heading().to_radians();
        let travel = self.speed * dt;
        self.record.position += Vec3::new(yaw.sin(), 0.0, yaw.cos()) * travel;

        self.distance += travel.abs();
        let score = round_highscore((self.distance / DISTANCE_PER_POINT) as f64);
        if score > self.record.highscore {
            self.record.highscore = score;
        }
    }

    /// Back to the spawn pose, keeping identity and score
    pub fn respawn(&mut self) {
        let fresh = PlayerRecord::new(self.record.id);
        self.record.position = fresh.position;
        self.record.rotation = fresh.rotation;
        self.speed = 0.0;
    }
}

/// Samples the keyboard once per frame
#[derive(Debug, Default)]
pub struct InputManager {
    prev_key_r: bool,
    prev_key_escape: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self) -> (DriveInput, Controls) {
        let forward = is_key_down(KeyCode::W) || is_key_down(KeyCode::Up);
        let back = is_key_down(KeyCode::S) || is_key_down(KeyCode::Down);
        let left = is_key_down(KeyCode::A) || is_key_down(KeyCode::Left);
        let right = is_key_down(KeyCode::D) || is_key_down(KeyCode::Right);

        let drive = DriveInput {
            throttle: axis(forward, back),
            steer: axis(right, left),
        };

        let key_r = is_key_down(KeyCode::R);
        let key_escape = is_key_down(KeyCode::Escape);

        let controls = Controls {
            reconnect: key_r && !self.prev_key_r,
            quit: key_escape && !self.prev_key_escape,
        };

        self.prev_key_r = key_r;
        self.prev_key_escape = key_escape;

        (drive, controls)
    }
}

fn axis(positive: bool, negative: bool) -> f32 {
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::SPAWN_POSITION;

    fn car() -> LocalCar {
        LocalCar::new(&ClientConfig::default())
    }

    #[test]
    fn test_new_car_uses_config_identity() {
        let config = ClientConfig {
            username: "Kari".into(),
            ..ClientConfig::default()
        };
        let car = LocalCar::new(&config);
        assert_eq!(car.record.username, "Kari");
        assert_eq!(car.record.position, SPAWN_POSITION);
    }

    #[test]
    fn test_throttle_moves_along_heading() {
        let mut car = car();
        for _ in 0..60 {
            car.step(DriveInput { throttle: 1.0, steer: 0.0 }, 1.0 / 60.0);
        }

        // Spawn heading is 90 degrees, facing +x
        assert!(car.record.position.x > SPAWN_POSITION.x);
        assert_approx_eq!(car.record.position.z, SPAWN_POSITION.z, 1e-3);
        assert!(car.record.highscore > 0.0);
    }

    #[test]
    fn test_drag_stops_the_car() {
        let mut car = car();
        car.speed = 4.0;
        for _ in 0..120 {
            car.step(DriveInput::default(), 1.0 / 60.0);
        }
        assert_eq!(car.speed, 0.0);
    }

    #[test]
    fn test_no_steering_while_parked() {
        let mut car = car();
        car.step(DriveInput { throttle: 0.0, steer: 1.0 }, 1.0);
        assert_eq!(car.heading(), 90.0);
    }

    #[test]
    fn test_highscore_never_decreases() {
        let mut car = car();
        car.record.highscore = 50.0;
        car.step(DriveInput { throttle: 1.0, steer: 0.0 }, 0.1);
        assert_eq!(car.record.highscore, 50.0);
    }

    #[test]
    fn test_respawn_keeps_score() {
        let mut car = car();
        car.set_id(3);
        car.record.highscore = 12.0;
        car.step(DriveInput { throttle: 1.0, steer: 0.0 }, 0.5);

        car.respawn();

        assert_eq!(car.record.position, SPAWN_POSITION);
        assert_eq!(car.record.highscore, 12.0);
        assert_eq!(car.record.id, 3);
    }

    #[test]
    fn test_axis() {
        assert_eq!(axis(true, false), 1.0);
        assert_eq!(axis(false, true), -1.0);
        assert_eq!(axis(true, true), 0.0);
    }
}
