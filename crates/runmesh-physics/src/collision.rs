//! Collision Geometry
//!
//! Aggregation of section geometry into the single triangle soup a physics
//! body is cooked from, plus the mapping from aggregate faces back to sections.

use std::sync::Arc;

use glam::Vec3;
use runmesh_core::{SectionId, SectionLod, SectionStore};

use crate::{CookError, CookResult};

/// Range of aggregate faces contributed by one section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionFaceRange {
    pub section: SectionId,
    /// Index of the section's first face in the aggregate
    pub first_face: u32,
    pub num_faces: u32,
}

/// Triangle soup of one or more sections, sections in ascending id order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMeshData {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    pub sections: Vec<SectionFaceRange>,
}

/// Geometry of the sections that feed collision
pub type CollisionParts = Vec<(SectionId, Arc<SectionLod>)>;

/// LOD 0 of each section that should feed collision
///
/// With `use_all_sections` every section contributes, not only the
/// collision-enabled ones.
pub fn collision_parts(store: &SectionStore, use_all_sections: bool) -> CollisionParts {
    store
        .sections()
        .filter(|section| use_all_sections || section.is_collision_enabled())
        .filter_map(|section| section.lod(0).map(|lod| (section.id(), lod.clone())))
        .collect()
}

impl TriMeshData {
    /// Concatenate the parts, offsetting each part's indices
    ///
    /// The aggregate must stay within `u32` vertex and face counts; the
    /// cooker rejects larger inputs before building one.
    pub fn from_parts(parts: &[(SectionId, Arc<SectionLod>)]) -> Self {
        debug_assert!(check_aggregate_size(parts).is_ok());
        let mut data = Self::default();
        for (section, lod) in parts {
            let base = data.vertices.len() as u32;
            let first_face = data.triangles.len() as u32;

            data.vertices.extend_from_slice(&lod.positions);
            data.triangles.extend(
                lod.indices
                    .chunks_exact(3)
                    .map(|tri| [tri[0] + base, tri[1] + base, tri[2] + base]),
            );

            let num_faces = data.triangles.len() as u32 - first_face;
            if num_faces > 0 {
                data.sections.push(SectionFaceRange {
                    section: *section,
                    first_face,
                    num_faces,
                });
            }
        }
        data
    }

    /// Aggregate straight from a store
    pub fn from_store(store: &SectionStore, use_all_sections: bool) -> Self {
        Self::from_parts(&collision_parts(store, use_all_sections))
    }

    pub fn num_faces(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Section and section-local face index of an aggregate face
    pub fn section_and_face(&self, face_index: u32) -> Option<(SectionId, u32)> {
        let slot = self
            .sections
            .partition_point(|range| range.first_face + range.num_faces <= face_index);
        let range = self.sections.get(slot)?;
        if face_index < range.first_face {
            return None;
        }
        Some((range.section, face_index - range.first_face))
    }

    /// Area of one triangle, `None` for an out-of-range face
    pub(crate) fn triangle_area(&self, face_index: usize) -> Option<f32> {
        let [a, b, c] = *self.triangles.get(face_index)?;
        let a = *self.vertices.get(a as usize)?;
        let b = *self.vertices.get(b as usize)?;
        let c = *self.vertices.get(c as usize)?;
        Some((b - a).cross(c - a).length() * 0.5)
    }
}

/// Fail when the aggregate of `parts` cannot be indexed with `u32`
pub fn check_aggregate_size(parts: &[(SectionId, Arc<SectionLod>)]) -> CookResult<()> {
    let vertices: usize = parts.iter().map(|(_, lod)| lod.positions.len()).sum();
    let faces: usize = parts.iter().map(|(_, lod)| lod.indices.len() / 3).sum();
    check_counts(vertices, faces)
}

fn check_counts(vertices: usize, faces: usize) -> CookResult<()> {
    if u32::try_from(vertices).is_err() || u32::try_from(faces).is_err() {
        return Err(CookError::TooLarge { vertices, faces });
    }
    Ok(())
}
