//! Drawing instructions: the genes of an organism.
//!
//! An instruction is a closed set of primitives (line, circle, polygon).
//! Each one can be hashed by content, bounded, encoded as a
//! `type|data` record, and decoded back through [`Instruction::decode`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Rect, Rgba};

/// Anti-aliasing margin added around every bounding box.
const AA_MARGIN: f32 = 1.0;

/// Type tag of an instruction variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Line,
    Circle,
    Polygon,
}

impl InstructionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionKind::Line => "line",
            InstructionKind::Circle => "circle",
            InstructionKind::Polygon => "polygon",
        }
    }

    fn tag_byte(&self) -> u8 {
        match self {
            InstructionKind::Line => 1,
            InstructionKind::Circle => 2,
            InstructionKind::Polygon => 3,
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionKind {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(InstructionKind::Line),
            "circle" => Ok(InstructionKind::Circle),
            "polygon" => Ok(InstructionKind::Polygon),
            other => Err(InstructionError::UnknownType(other.to_string())),
        }
    }
}

/// Stroked line segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start_x: f32,
    pub start_y: f32,
    pub end_x: f32,
    pub end_y: f32,
    pub width: f32,
    pub color: Rgba,
}

/// Filled circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub color: Rgba,
}

/// Polygon vertex in polar coordinates around the polygon center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Polypoint {
    pub distance: f32,
    /// Degrees.
    pub angle: f32,
}

/// Filled polygon. Points are kept sorted by angle so the outline never
/// self-intersects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub x: f32,
    pub y: f32,
    pub points: Vec<Polypoint>,
    pub color: Rgba,
}

impl Polygon {
    pub fn sort_points(&mut self) {
        self.points.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    }

    /// Vertices in canvas coordinates.
    pub fn vertices(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.points.iter().map(|p| {
            let radians = p.angle.to_radians();
            (
                self.x + p.distance * radians.cos(),
                self.y + p.distance * radians.sin(),
            )
        })
    }
}

/// One drawing primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Line(Line),
    Circle(Circle),
    Polygon(Polygon),
}

impl Instruction {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::Line(_) => InstructionKind::Line,
            Instruction::Circle(_) => InstructionKind::Circle,
            Instruction::Polygon(_) => InstructionKind::Polygon,
        }
    }

    pub fn color(&self) -> Rgba {
        match self {
            Instruction::Line(l) => l.color,
            Instruction::Circle(c) => c.color,
            Instruction::Polygon(p) => p.color,
        }
    }

    pub fn color_mut(&mut self) -> &mut Rgba {
        match self {
            Instruction::Line(l) => &mut l.color,
            Instruction::Circle(c) => &mut c.color,
            Instruction::Polygon(p) => &mut p.color,
        }
    }

    /// Canvas area this instruction can touch, including anti-aliasing.
    pub fn bounds(&self) -> Rect {
        match self {
            Instruction::Line(l) => Rect::new(
                l.start_x.min(l.end_x),
                l.start_y.min(l.end_y),
                l.start_x.max(l.end_x),
                l.start_y.max(l.end_y),
            )
            .inflate(l.width / 2.0 + AA_MARGIN),
            Instruction::Circle(c) => Rect::new(
                c.x - c.radius,
                c.y - c.radius,
                c.x + c.radius,
                c.y + c.radius,
            )
            .inflate(AA_MARGIN),
            Instruction::Polygon(p) => p
                .vertices()
                .fold(Rect::new(p.x, p.y, p.x, p.y), |r, (x, y)| {
                    r.union(Rect::new(x, y, x, y))
                })
                .inflate(AA_MARGIN),
        }
    }

    /// Content hash (hex). Equal instructions always hash equally.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.kind().tag_byte()]);
        let mut floats = |values: &[f32]| {
            for v in values {
                hasher.update(&v.to_le_bytes());
            }
        };
        match self {
            Instruction::Line(l) => {
                floats(&[l.start_x, l.start_y, l.end_x, l.end_y, l.width]);
            }
            Instruction::Circle(c) => floats(&[c.x, c.y, c.radius]),
            Instruction::Polygon(p) => {
                floats(&[p.x, p.y]);
                for point in &p.points {
                    floats(&[point.distance, point.angle]);
                }
            }
        }
        let c = self.color();
        hasher.update(&[c.r, c.g, c.b, c.a]);
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Compact JSON of the variant's fields.
    pub fn encode_data(&self) -> Result<String, InstructionError> {
        let data = match self {
            Instruction::Line(l) => serde_json::to_string(l),
            Instruction::Circle(c) => serde_json::to_string(c),
            Instruction::Polygon(p) => serde_json::to_string(p),
        };
        Ok(data?)
    }

    /// Decode variant data for a type tag.
    pub fn decode(kind: InstructionKind, data: &str) -> Result<Self, InstructionError> {
        let instruction = match kind {
            InstructionKind::Line => Instruction::Line(serde_json::from_str(data)?),
            InstructionKind::Circle => Instruction::Circle(serde_json::from_str(data)?),
            InstructionKind::Polygon => {
                let mut polygon: Polygon = serde_json::from_str(data)?;
                polygon.sort_points();
                Instruction::Polygon(polygon)
            }
        };
        Ok(instruction)
    }

    /// Encode as a `type|data` genome record.
    pub fn to_record(&self) -> Result<String, InstructionError> {
        Ok(format!("{}|{}", self.kind(), self.encode_data()?))
    }

    /// Decode a `type|data` genome record.
    pub fn from_record(record: &str) -> Result<Self, InstructionError> {
        let (tag, data) = record
            .split_once('|')
            .ok_or_else(|| InstructionError::MalformedRecord(record.to_string()))?;
        Self::decode(tag.parse()?, data)
    }

    /// Multiply all geometry by `factor`.
    pub fn scale(&mut self, factor: f32) {
        match self {
            Instruction::Line(l) => {
                l.start_x *= factor;
                l.start_y *= factor;
                l.end_x *= factor;
                l.end_y *= factor;
                l.width *= factor;
            }
            Instruction::Circle(c) => {
                c.x *= factor;
                c.y *= factor;
                c.radius *= factor;
            }
            Instruction::Polygon(p) => {
                p.x *= factor;
                p.y *= factor;
                for point in &mut p.points {
                    point.distance *= factor;
                }
            }
        }
    }
}

/// Instruction encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum InstructionError {
    #[error("Unknown instruction type '{0}'")]
    UnknownType(String),
    #[error("Malformed instruction record '{0}'")]
    MalformedRecord(String),
    #[error("Invalid instruction data: {0}")]
    Data(#[from] serde_json::Error),
}
