//! Mesh Sections
//!
//! Per-section geometry and metadata owned by the section store.
//! Features:
//! - Up to [`MAX_LODS`] levels of detail per section, LOD 0 being the most detailed
//! - Optional normals, tangents, colors and up to [`MAX_UV_CHANNELS`] UV channels
//! - Render/collision flags and an update-frequency hint
//! - Generation stamps for detecting stale commands

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::math::{Aabb, Vec2, Vec3, Vec4};
use crate::{MeshError, MeshResult};

/// Maximum number of LOD levels a mesh can carry
pub const MAX_LODS: usize = 8;

/// Maximum number of UV channels per vertex
pub const MAX_UV_CHANNELS: usize = 4;

/// Identifier of a section, unique within one mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectionId(pub u32);

impl SectionId {
    /// Get the raw ID value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic stamp taken from a store's generation clock
///
/// Every successful mutation receives a strictly larger generation than the
/// previous one, so a section's generations keep increasing even across
/// delete and re-create cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    /// Generation of a store that has never been mutated
    pub const ZERO: Self = Self(0);

    /// The following generation
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

bitflags! {
    /// Render and collision behaviour of a section
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SectionFlags: u32 {
        /// Drawn through the cached static draw path instead of per-frame dynamic submission
        const STATIC_PATH = 1 << 0;
        /// Casts shadows
        const CAST_SHADOW = 1 << 1;
        /// Contributes triangles to the mesh collision
        const COLLISION = 1 << 2;
        /// Drawn at all
        const VISIBLE = 1 << 3;
    }
}

impl SectionFlags {
    /// Flags a new section gets for the given update frequency
    pub fn defaults_for(frequency: UpdateFrequency) -> Self {
        let mut flags = Self::VISIBLE | Self::CAST_SHADOW;
        if frequency == UpdateFrequency::Infrequent {
            flags |= Self::STATIC_PATH;
        }
        flags
    }
}

impl Default for SectionFlags {
    fn default() -> Self {
        Self::defaults_for(UpdateFrequency::default())
    }
}

/// How often a section is expected to change
///
/// Only affects buffer layout on the render side, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateFrequency {
    Infrequent,
    #[default]
    Average,
    Frequent,
}

/// Geometry of a single LOD level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionLod {
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Per-vertex normals (empty or one per vertex)
    pub normals: Vec<Vec3>,
    /// Per-vertex tangents, `w` holding the binormal sign (empty or one per vertex)
    pub tangents: Vec<Vec4>,
    /// UV channels, each empty or one per vertex
    pub uvs: Vec<Vec<Vec2>>,
    /// Per-vertex RGBA colors (empty or one per vertex)
    pub colors: Vec<[u8; 4]>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Screen size below which the next LOD takes over
    pub screen_size: f32,
}

impl SectionLod {
    /// Create LOD geometry from positions and a triangle list
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            screen_size: 1.0,
            ..Default::default()
        }
    }

    /// Empty geometry, used to clear a section through an update
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<Vec4>) -> Self {
        self.tangents = tangents;
        self
    }

    /// Append a UV channel
    pub fn with_uv_channel(mut self, uvs: Vec<Vec2>) -> Self {
        self.uvs.push(uvs);
        self
    }

    pub fn with_colors(mut self, colors: Vec<[u8; 4]>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_screen_size(mut self, screen_size: f32) -> Self {
        self.screen_size = screen_size;
        self
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Geometry without vertices stands for "no section"
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Local-space bounds of the positions
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }

    /// Check that indices and per-vertex attributes agree with the vertex count
    pub fn validate(&self) -> MeshResult<()> {
        let vertex_count = self.positions.len();

        if self.indices.len() % 3 != 0 {
            return Err(MeshError::GeometrySizeMismatch(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }

        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::GeometrySizeMismatch(format!(
                "index {} references past {} vertices",
                index, vertex_count
            )));
        }

        check_attribute("normals", self.normals.len(), vertex_count)?;
        check_attribute("tangents", self.tangents.len(), vertex_count)?;
        check_attribute("colors", self.colors.len(), vertex_count)?;

        if self.uvs.len() > MAX_UV_CHANNELS {
            return Err(MeshError::GeometrySizeMismatch(format!(
                "{} UV channels exceed the limit of {}",
                self.uvs.len(),
                MAX_UV_CHANNELS
            )));
        }
        for uvs in &self.uvs {
            check_attribute("uvs", uvs.len(), vertex_count)?;
        }

        Ok(())
    }
}

fn check_attribute(name: &str, len: usize, vertex_count: usize) -> MeshResult<()> {
    if len != 0 && len != vertex_count {
        return Err(MeshError::GeometrySizeMismatch(format!(
            "{} has {} entries for {} vertices",
            name, len, vertex_count
        )));
    }
    Ok(())
}

/// Authoritative state of one section
///
/// LOD geometry is held behind `Arc` so commands and cook snapshots can share
/// it without copying; replacing a LOD never mutates a snapshot already handed out.
#[derive(Debug, Clone)]
pub struct Section {
    pub(crate) id: SectionId,
    pub(crate) lods: Vec<Arc<SectionLod>>,
    pub(crate) update_frequency: UpdateFrequency,
    pub(crate) flags: SectionFlags,
    pub(crate) generation: Generation,
}

impl Section {
    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn lods(&self) -> &[Arc<SectionLod>] {
        &self.lods
    }

    pub fn lod(&self, index: usize) -> Option<&Arc<SectionLod>> {
        self.lods.get(index)
    }

    pub fn num_lods(&self) -> usize {
        self.lods.len()
    }

    pub fn update_frequency(&self) -> UpdateFrequency {
        self.update_frequency
    }

    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    /// Generation of the last mutation applied to this section
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_collision_enabled(&self) -> bool {
        self.flags.contains(SectionFlags::COLLISION)
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(SectionFlags::VISIBLE)
    }

    /// Local bounds of the most detailed LOD
    pub fn bounds(&self) -> Aabb {
        self.lods.first().map(|lod| lod.bounds()).unwrap_or(Aabb::EMPTY)
    }
}
