use crate::input::LocalCar;
use crate::leaderboard::LeaderboardRow;
use crate::mirror::{MirrorEntry, Presentation};
use crate::network::ConnectionStatus;
use macroquad::prelude::*;
use shared::{PlayerRecord, Vec3};
use std::collections::BTreeMap;

/// Screen pixels per world unit
const PIXELS_PER_UNIT: f32 = 4.0;
const CAR_LENGTH: f32 = 4.5;
const CAR_WIDTH: f32 = 2.2;
const GRID_SPACING: f32 = 20.0;

const PALETTE: [Color; 6] = [
    Color::new(0.86, 0.20, 0.20, 1.0),
    Color::new(0.20, 0.45, 0.90, 1.0),
    Color::new(0.95, 0.80, 0.15, 1.0),
    Color::new(0.60, 0.30, 0.85, 1.0),
    Color::new(0.95, 0.55, 0.10, 1.0),
    Color::new(0.15, 0.75, 0.75, 1.0),
];

/// A remote car as it is drawn
#[derive(Debug, Clone)]
pub struct CarVisual {
    pub record: PlayerRecord,
    pub color: Color,
}

/// Top-down view centred on the local car
pub struct Renderer {
    width: f32,
    height: f32,
    cars: BTreeMap<String, CarVisual>,
}

impl Renderer {
    pub fn new(width: usize, height: usize) -> Self {
        Renderer {
            width: width as f32,
            height: height as f32,
            cars: BTreeMap::new(),
        }
    }

    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    pub fn visual(&self, key: &str) -> Option<&CarVisual> {
        self.cars.get(key)
    }

    pub fn render(&self, local: &LocalCar, leaderboard: &[LeaderboardRow], status: &ConnectionStatus) {
        clear_background(Color::from_rgba(38, 52, 38, 255));

        let camera = local.record.position;
        self.draw_grid(camera);

        for car in self.cars.values() {
            self.draw_car(&car.record, camera, car.color);
        }
        self.draw_car(&local.record, camera, GREEN);

        self.draw_leaderboard(leaderboard);
        self.draw_status(status, local);
    }

    fn to_screen(&self, position: Vec3, camera: Vec3) -> Vec2 {
        world_to_screen(position, camera, vec2(self.width / 2.0, self.height / 2.0))
    }

    fn draw_grid(&self, camera: Vec3) {
        let line_color = Color::from_rgba(55, 72, 55, 255);
        let step = GRID_SPACING * PIXELS_PER_UNIT;
        let origin = self.to_screen(Vec3::ZERO, camera);

        let mut x = origin.x.rem_euclid(step);
        while x < self.width {
            draw_line(x, 0.0, x, self.height, 1.0, line_color);
            x += step;
        }

        let mut y = origin.y.rem_euclid(step);
        while y < self.height {
            draw_line(0.0, y, self.width, y, 1.0, line_color);
            y += step;
        }
    }

    fn draw_car(&self, record: &PlayerRecord, camera: Vec3, color: Color) {
        let center = self.to_screen(record.position, camera);
        let length = CAR_LENGTH * PIXELS_PER_UNIT;
        let width = CAR_WIDTH * PIXELS_PER_UNIT;

        draw_rectangle_ex(
            center.x,
            center.y,
            length,
            width,
            DrawRectangleParams {
                offset: vec2(0.5, 0.5),
                rotation: screen_angle(record.rotation.y),
                color,
            },
        );

        let label = format!("{} ({:.2})", record.username, record.highscore);
        let size = measure_text(&label, None, 14, 1.0);
        draw_text(&label, center.x - size.width / 2.0, center.y - width, 14.0, WHITE);
    }

    fn draw_leaderboard(&self, rows: &[LeaderboardRow]) {
        let x = self.width - 210.0;
        let mut y = 24.0;

        draw_rectangle(x - 10.0, 4.0, 210.0, 30.0 + rows.len() as f32 * 20.0, Color::from_rgba(0, 0, 0, 140));
        draw_text("Leaderboard", x, y, 20.0, WHITE);

        for (rank, row) in rows.iter().enumerate() {
            y += 20.0;
            let color = if row.is_local { GREEN } else { WHITE };
            let line = format!("{}. {:<12} {:>8.2}", rank + 1, row.username, row.highscore);
            draw_text(&line, x, y, 18.0, color);
        }
    }

    fn draw_status(&self, status: &ConnectionStatus, local: &LocalCar) {
        let color = match status {
            ConnectionStatus::Connected(_) => GREEN,
            ConnectionStatus::Connecting => YELLOW,
            _ => RED,
        };
        draw_rectangle(10.0, 12.0, 10.0, 10.0, color);
        draw_text(&status.to_string(), 28.0, 22.0, 18.0, WHITE);

        let speed = format!("{:.0} km/h", local.speed.abs() * 3.6);
        draw_text(&speed, 10.0, 44.0, 18.0, WHITE);

        let players = format!("{} other players", self.cars.len());
        draw_text(&players, 10.0, 64.0, 18.0, WHITE);

        if !status.is_connected() && *status != ConnectionStatus::Connecting {
            draw_text("Press R to reconnect", 10.0, self.height - 16.0, 20.0, YELLOW);
        }
    }
}

impl Presentation for Renderer {
    fn spawn(&mut self, key: &str, entry: &MirrorEntry) {
        let record = entry.presented();
        let color = car_color(&record.texture);
        self.cars.insert(key.to_string(), CarVisual { record, color });
    }

    fn update(&mut self, key: &str, entry: &MirrorEntry) {
        match self.cars.get_mut(key) {
            Some(car) => {
                car.record = entry.presented();
                car.color = car_color(&car.record.texture);
            }
            None => self.spawn(key, entry),
        }
    }

    fn despawn(&mut self, key: &str) {
        self.cars.remove(key);
    }
}

/// Projects the ground plane (x, z) onto the screen around `camera`
pub fn world_to_screen(position: Vec3, camera: Vec3, screen_center: Vec2) -> Vec2 {
    vec2(
        screen_center.x + (position.x - camera.x) * PIXELS_PER_UNIT,
        screen_center.y + (position.z - camera.z) * PIXELS_PER_UNIT,
    )
}

/// Rectangle rotation in radians for a heading in degrees. Heading 0 points
/// along +z, which is down on screen.
pub fn screen_angle(heading: f32) -> f32 {
    (90.0 - heading).to_radians()
}

/// Stable colour per texture so every client paints a car the same way
pub fn car_color(texture: &str) -> Color {
    let hash = texture
        .bytes()
        .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u32));
    PALETTE[hash as usize % PALETTE.len()]
}
