//! Map layout transfer with checksum verification
//!
//! The host seals a wall list into a [`MapPayload`] before sending it in a
//! `MapSync` or `SessionStart` message. The client opens it, which recomputes
//! the checksum and refuses the whole payload on any mismatch.

use crate::error::NetError;
use crate::protocol::{self, Message};
use bincode::Options;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAP_FORMAT_VERSION: u16 = 1;

/// Axis-aligned wall: centre, width, height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Wall {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    fn is_valid(&self) -> bool {
        [self.cx, self.cy, self.w, self.h].iter().all(|v| v.is_finite())
            && self.w > 0.0
            && self.h > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPayload {
    pub walls: Vec<Wall>,
    pub wall_count: u32,
    /// Lowercase hex SHA-256 of the canonical wall encoding
    pub checksum: String,
    pub version: u16,
}

impl MapPayload {
    /// Validates `layout`, computes its checksum and makes sure it fits in one datagram.
    pub fn seal(layout: &[Wall]) -> Result<Self, NetError> {
        validate_layout(layout)?;

        let payload = Self {
            walls: layout.to_vec(),
            wall_count: layout.len() as u32,
            checksum: layout_checksum(layout)?,
            version: MAP_FORMAT_VERSION,
        };

        // Reject up front rather than failing later on the wire
        protocol::encode(&Message::map_sync(payload.clone()))?;

        Ok(payload)
    }

    /// Verifies the payload and returns the layout it carries.
    pub fn open(&self) -> Result<Vec<Wall>, NetError> {
        if self.version != MAP_FORMAT_VERSION {
            return Err(NetError::Integrity(format!(
                "unsupported map version {}",
                self.version
            )));
        }

        if self.walls.len() != self.wall_count as usize {
            return Err(NetError::Integrity(format!(
                "wall count mismatch: expected {}, got {}",
                self.wall_count,
                self.walls.len()
            )));
        }

        validate_layout(&self.walls).map_err(|e| NetError::Integrity(e.to_string()))?;

        let actual = layout_checksum(&self.walls)?;
        if actual != self.checksum {
            return Err(NetError::Integrity(format!(
                "checksum mismatch: expected {}, got {}",
                self.checksum, actual
            )));
        }

        Ok(self.walls.clone())
    }
}

pub fn validate_layout(layout: &[Wall]) -> Result<(), NetError> {
    if layout.is_empty() {
        return Err(NetError::Protocol("map layout is empty".into()));
    }

    if let Some(index) = layout.iter().position(|wall| !wall.is_valid()) {
        return Err(NetError::Protocol(format!("wall {} is invalid", index)));
    }

    Ok(())
}

pub fn layout_checksum(layout: &[Wall]) -> Result<String, NetError> {
    let canonical = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .serialize(layout)
        .map_err(|e| NetError::Protocol(format!("cannot encode layout: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn same_layout(a: &[Wall], b: &[Wall]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    match (layout_checksum(a), layout_checksum(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Bounds and area overview of a layout, used for logging and map previews
#[derive(Debug, Clone, PartialEq)]
pub struct MapSummary {
    pub wall_count: usize,
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub total_wall_area: f32,
    pub checksum: String,
}

impl MapSummary {
    pub fn of(layout: &[Wall]) -> Result<Self, NetError> {
        validate_layout(layout)?;

        let mut summary = Self {
            wall_count: layout.len(),
            min_x: f32::MAX,
            max_x: f32::MIN,
            min_y: f32::MAX,
            max_y: f32::MIN,
            total_wall_area: 0.0,
            checksum: layout_checksum(layout)?,
        };

        for wall in layout {
            summary.min_x = summary.min_x.min(wall.cx - wall.w / 2.0);
            summary.max_x = summary.max_x.max(wall.cx + wall.w / 2.0);
            summary.min_y = summary.min_y.min(wall.cy - wall.h / 2.0);
            summary.max_y = summary.max_y.max(wall.cy + wall.h / 2.0);
            summary.total_wall_area += wall.w * wall.h;
        }

        Ok(summary)
    }
}
