//! Types shared by the server and the client: the replicated player record,
//! the wire packets and the framing used to carry them over a byte stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod framing;

pub use framing::{encode_frame, read_packet, write_packet, FrameError, MAX_FRAME_LEN};

/// Identifier the server assigns to every accepted connection
pub type ClientId = u32;

pub const DEFAULT_PORT: u16 = 25565;
pub const PLAYER_KEY_PREFIX: &str = "player_";
pub const PLAYER_TYPE: &str = "player";
pub const DEFAULT_USERNAME: &str = "Guest";
pub const DEFAULT_MODEL: &str = "assets/cars/sports_car.obj";
pub const DEFAULT_TEXTURE: &str = "assets/cars/garage/sports-car/sports-red.png";
pub const NO_COSMETIC: &str = "none";
pub const SPAWN_POSITION: Vec3 = Vec3::new(-80.0, -30.0, 15.0);
pub const SPAWN_ROTATION: Vec3 = Vec3::new(0.0, 90.0, 0.0);

/// Store key of the variable owned by `client_id`
pub fn player_key(client_id: ClientId) -> String {
    format!("{}{}", PLAYER_KEY_PREFIX, client_id)
}

/// Rounds a score to two decimals, the precision scores travel with
pub fn round_highscore(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*other - *self).length()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Value of one replicated player variable
///
/// Every store event carries the complete record, so a receiver never needs
/// earlier state to rebuild it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Discriminator, always [`PLAYER_TYPE`]
    pub kind: String,
    pub id: ClientId,
    pub username: String,
    pub position: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
    pub model: String,
    pub texture: String,
    pub highscore: f64,
    pub cosmetic: String,
}

impl PlayerRecord {
    /// Record a freshly connected client starts with
    pub fn new(id: ClientId) -> Self {
        Self {
            kind: PLAYER_TYPE.to_string(),
            id,
            username: DEFAULT_USERNAME.to_string(),
            position: SPAWN_POSITION,
            rotation: SPAWN_ROTATION,
            model: DEFAULT_MODEL.to_string(),
            texture: DEFAULT_TEXTURE.to_string(),
            highscore: 0.0,
            cosmetic: NO_COSMETIC.to_string(),
        }
    }

    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Position => FieldValue::Vector(self.position),
            Field::Rotation => FieldValue::Vector(self.rotation),
            Field::Model => FieldValue::Text(self.model.clone()),
            Field::Texture => FieldValue::Text(self.texture.clone()),
            Field::Username => FieldValue::Text(self.username.clone()),
            Field::Highscore => FieldValue::Number(self.highscore),
            Field::Cosmetic => FieldValue::Text(self.cosmetic.clone()),
        }
    }

    /// Replaces a single field. Returns the rejected value when its kind does
    /// not fit the field; the record is left untouched in that case.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<(), FieldValue> {
        match (field, value) {
            (Field::Position, FieldValue::Vector(v)) => self.position = v,
            (Field::Rotation, FieldValue::Vector(v)) => self.rotation = v,
            (Field::Model, FieldValue::Text(s)) => self.model = s,
            (Field::Texture, FieldValue::Text(s)) => self.texture = s,
            (Field::Username, FieldValue::Text(s)) => self.username = s,
            (Field::Highscore, FieldValue::Number(n)) => self.highscore = n,
            (Field::Cosmetic, FieldValue::Text(s)) => self.cosmetic = s,
            (_, other) => return Err(other),
        }
        Ok(())
    }
}

/// The writable fields of a [`PlayerRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Position,
    Rotation,
    Model,
    Texture,
    Username,
    Highscore,
    Cosmetic,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Position,
        Field::Rotation,
        Field::Model,
        Field::Texture,
        Field::Username,
        Field::Highscore,
        Field::Cosmetic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Position => "position",
            Field::Rotation => "rotation",
            Field::Model => "model",
            Field::Texture => "texture",
            Field::Username => "username",
            Field::Highscore => "highscore",
            Field::Cosmetic => "cosmetic",
        }
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == name)
            .ok_or_else(|| name.to_string())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Vector(Vec3),
    Text(String),
    Number(f64),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server. The sender is implied by the connection.
    SetPosition(Vec3),
    SetRotation(Vec3),
    SetModel(String),
    SetTexture(String),
    SetUsername(String),
    /// Number encoded as a string, rounded to two decimals
    SetHighscore(String),
    SetCosmetic(String),
    Heartbeat,
    Disconnect,

    // Server -> client
    AssignId { client_id: ClientId },
    Created { key: String, record: PlayerRecord },
    Updated { key: String, record: PlayerRecord },
    Removed { key: String },
    Disconnected { reason: String },
}

impl Packet {
    /// Builds the message that reports `value` for `field`
    pub fn field_update(field: Field, value: &PlayerRecord) -> Packet {
        match field {
            Field::Position => Packet::SetPosition(value.position),
            Field::Rotation => Packet::SetRotation(value.rotation),
            Field::Model => Packet::SetModel(value.model.clone()),
            Field::Texture => Packet::SetTexture(value.texture.clone()),
            Field::Username => Packet::SetUsername(value.username.clone()),
            Field::Highscore => {
                Packet::SetHighscore(format!("{:.2}", round_highscore(value.highscore)))
            }
            Field::Cosmetic => Packet::SetCosmetic(value.cosmetic.clone()),
        }
    }

    /// Key of the variable a store event refers to
    pub fn event_key(&self) -> Option<&str> {
        match self {
            Packet::Created { key, .. } | Packet::Updated { key, .. } | Packet::Removed { key } => {
                Some(key.as_str())
            }
            _ => None,
        }
    }
}
