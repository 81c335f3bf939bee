//! World positions and their wire formats.
//!
//! Locations are stored as `world|x|y|z`. The world name is everything left
//! of the last three separators, so world names containing `|` still parse.
//!
//! | Type | Wire format | Example |
//! |------|-------------|---------|
//! | [`Location`] | `world|x|y|z` (f64) | `world|10.5|64|-3.25` |
//! | [`BlockLocation`] | `world|x|y|z` (i32) | `world|10|64|-4` |
//! | [`ChunkKey`] | `world|cx|cz` | `world|0|-1` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Separator used by every location wire format.
const SEPARATOR: char = '|';

/// Number of blocks along one edge of a chunk, as a shift.
const CHUNK_SHIFT: u32 = 4;

/// Split `world|a|b|c` into the world name and the trailing components.
fn split_components<const N: usize>(raw: &str) -> Option<(&str, [&str; N])> {
    let mut parts = raw.rsplitn(N.saturating_add(1), SEPARATOR);
    let mut tail = [""; N];
    for slot in tail.iter_mut().rev() {
        *slot = parts.next()?;
    }
    let world = parts.next()?;
    if world.is_empty() {
        return None;
    }
    Some((world, tail))
}

/// A precise position in a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Name of the world the position lives in.
    pub world: String,
    /// East/west coordinate.
    pub x: f64,
    /// Height.
    pub y: f64,
    /// North/south coordinate.
    pub z: f64,
}

impl Location {
    /// Create a location in `world` at the given coordinates.
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// The block this location falls inside.
    #[allow(clippy::cast_possible_truncation)]
    pub fn block(&self) -> BlockLocation {
        BlockLocation::new(
            self.world.clone(),
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    /// The chunk this location falls inside.
    pub fn chunk(&self) -> ChunkKey {
        self.block().chunk()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|{}", self.world, self.x, self.y, self.z)
    }
}

impl FromStr for Location {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::Location(s.to_owned());
        let (world, [x, y, z]) = split_components::<3>(s.trim()).ok_or_else(malformed)?;
        let coord = |v: &str| v.trim().parse::<f64>().map_err(|_e| malformed());
        Ok(Self::new(world, coord(x)?, coord(y)?, coord(z)?))
    }
}

/// The integer coordinates of a single block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Name of the world the block lives in.
    pub world: String,
    /// East/west block coordinate.
    pub x: i32,
    /// Block height.
    pub y: i32,
    /// North/south block coordinate.
    pub z: i32,
}

impl BlockLocation {
    /// Create a block location.
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// The chunk containing this block.
    pub fn chunk(&self) -> ChunkKey {
        ChunkKey::new(
            self.world.clone(),
            self.x.wrapping_shr(CHUNK_SHIFT),
            self.z.wrapping_shr(CHUNK_SHIFT),
        )
    }

    /// Centre of the block's bottom face, as a precise location.
    pub fn to_location(&self) -> Location {
        Location::new(
            self.world.clone(),
            f64::from(self.x) + 0.5,
            f64::from(self.y),
            f64::from(self.z) + 0.5,
        )
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|{}", self.world, self.x, self.y, self.z)
    }
}

impl FromStr for BlockLocation {
    type Err = ParseError;

    /// Accepts integer coordinates, and floors fractional ones written by
    /// older rows that stored precise positions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::from_str(s).map(|location| location.block())
    }
}

/// Identifies a chunk: a 16x16 column of blocks in one world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    /// Name of the world the chunk lives in.
    pub world: String,
    /// Chunk X (block X >> 4).
    pub x: i32,
    /// Chunk Z (block Z >> 4).
    pub z: i32,
}

impl ChunkKey {
    /// Create a chunk key.
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.world, self.x, self.z)
    }
}

impl FromStr for ChunkKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::Location(s.to_owned());
        let (world, [x, z]) = split_components::<2>(s.trim()).ok_or_else(malformed)?;
        let coord = |v: &str| v.trim().parse::<i32>().map_err(|_e| malformed());
        Ok(Self::new(world, coord(x)?, coord(z)?))
    }
}
