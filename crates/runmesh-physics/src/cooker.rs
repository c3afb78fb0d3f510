//! Collision Cooker
//!
//! Turns a snapshot of collision geometry into a queryable collision mesh.
//! Runs either inline on the owner context or on a cook worker.
//! Features:
//! - Aggregation of per-section geometry in ascending section order
//! - Optional vertex welding for lighter runtime collision
//! - parry3d triangle mesh with a BVH for ray queries
//! - Bounding box as the simple collision representation

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use glam::Vec3;
use parry3d::na::{Point3, Vector3};
use parry3d::query::{Ray, RayCast};
use parry3d::shape::TriMesh;
use runmesh_core::math::Aabb;
use runmesh_core::{Generation, SectionId, SectionLod, SectionStore};

use crate::collision::{check_aggregate_size, collision_parts, CollisionParts, TriMeshData};
use crate::{CookConfig, CookError, CookPriority, CookResult};

/// Triangles with less area than this are considered degenerate
pub const DEGENERATE_AREA: f32 = 1.0e-12;

/// Immutable copy of the collision inputs at one aggregate generation
#[derive(Debug, Clone)]
pub struct CookSnapshot {
    pub generation: Generation,
    pub parts: CollisionParts,
    pub use_complex_as_simple: bool,
    pub priority: CookPriority,
}

impl CookSnapshot {
    /// Capture the collision-enabled sections of a store
    ///
    /// Only `Arc` handles to LOD 0 are copied; the geometry itself is shared.
    pub fn capture(store: &SectionStore, config: &CookConfig) -> Self {
        Self {
            generation: store.collision_generation(),
            parts: collision_parts(store, false),
            use_complex_as_simple: config.use_complex_as_simple,
            priority: config.priority,
        }
    }

    pub fn from_parts(generation: Generation, parts: Vec<(SectionId, Arc<SectionLod>)>) -> Self {
        Self {
            generation,
            parts,
            use_complex_as_simple: true,
            priority: CookPriority::default(),
        }
    }
}

/// Result of a ray query against a collision mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub point: Vec3,
    pub distance: f32,
}

/// Cooked collision of one mesh
pub struct CollisionMesh {
    generation: Generation,
    data: TriMeshData,
    shape: TriMesh,
    bounds: Aabb,
    use_complex_as_simple: bool,
}

impl CollisionMesh {
    /// Aggregate generation this mesh was cooked from
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Triangle data the mesh was built from
    pub fn data(&self) -> &TriMeshData {
        &self.data
    }

    pub fn num_faces(&self) -> usize {
        self.shape.num_triangles()
    }

    pub fn num_vertices(&self) -> usize {
        self.shape.vertices().len()
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Whether queries run against the triangles instead of the simple shape
    pub fn uses_complex_as_simple(&self) -> bool {
        self.use_complex_as_simple
    }

    /// Simple collision; `None` when the complex triangles stand in for it
    pub fn simple_shape(&self) -> Option<Aabb> {
        (!self.use_complex_as_simple).then_some(self.bounds)
    }

    /// Section and section-local face index of a collision face
    pub fn section_and_face(&self, face_index: u32) -> Option<(SectionId, u32)> {
        self.data.section_and_face(face_index)
    }

    /// Cast a ray against the triangles
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RaycastHit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let ray = Ray::new(
            Point3::new(origin.x, origin.y, origin.z),
            Vector3::new(direction.x, direction.y, direction.z),
        );
        let distance = self.shape.cast_local_ray(&ray, max_distance, true)?;
        Some(RaycastHit {
            point: origin + direction * distance,
            distance,
        })
    }
}

impl fmt::Debug for CollisionMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollisionMesh")
            .field("generation", &self.generation)
            .field("faces", &self.num_faces())
            .field("vertices", &self.num_vertices())
            .field("bounds", &self.bounds)
            .field("use_complex_as_simple", &self.use_complex_as_simple)
            .finish()
    }
}

/// Cook a snapshot into a collision mesh
pub fn cook(snapshot: &CookSnapshot) -> CookResult<CollisionMesh> {
    let _span = tracing::debug_span!(
        "cook_collision",
        generation = snapshot.generation.0,
        sections = snapshot.parts.len()
    )
    .entered();

    check_aggregate_size(&snapshot.parts)?;
    let mut data = TriMeshData::from_parts(&snapshot.parts);
    if data.is_empty() {
        return Err(CookError::EmptyGeometry);
    }

    let degenerate = (0..data.num_faces())
        .filter(|&face| data.triangle_area(face).map_or(true, |area| area <= DEGENERATE_AREA))
        .count();
    if degenerate == data.num_faces() {
        return Err(CookError::Degenerate { triangles: degenerate });
    }

    if snapshot.priority == CookPriority::CollisionPerformance {
        weld_vertices(&mut data);
    }

    let bounds = Aabb::from_points(&data.vertices);
    let vertices = data
        .vertices
        .iter()
        .map(|v| Point3::new(v.x, v.y, v.z))
        .collect();
    let shape = TriMesh::new(vertices, data.triangles.clone());

    log::debug!(
        "Cooked {} faces from {} sections at {} ({} degenerate)",
        data.num_faces(),
        data.sections.len(),
        snapshot.generation,
        degenerate
    );

    Ok(CollisionMesh {
        generation: snapshot.generation,
        data,
        shape,
        bounds,
        use_complex_as_simple: snapshot.use_complex_as_simple,
    })
}

/// Merge bit-identical vertices, keeping face order intact
fn weld_vertices(data: &mut TriMeshData) {
    let mut remap = Vec::with_capacity(data.vertices.len());
    let mut unique: AHashMap<[u32; 3], u32> = AHashMap::with_capacity(data.vertices.len());
    let mut welded = Vec::with_capacity(data.vertices.len());

    for vertex in &data.vertices {
        let key = [vertex.x.to_bits(), vertex.y.to_bits(), vertex.z.to_bits()];
        let index = *unique.entry(key).or_insert_with(|| {
            welded.push(*vertex);
            welded.len() as u32 - 1
        });
        remap.push(index);
    }

    for triangle in &mut data.triangles {
        for index in triangle.iter_mut() {
            *index = remap[*index as usize];
        }
    }
    data.vertices = welded;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_lod(height: f32) -> Arc<SectionLod> {
        Arc::new(SectionLod::new(
            vec![
                Vec3::new(-1.0, height, -1.0),
                Vec3::new(1.0, height, -1.0),
                Vec3::new(-1.0, height, 1.0),
                Vec3::new(1.0, height, 1.0),
            ],
            vec![0, 2, 1, 1, 2, 3],
        ))
    }

    fn snapshot(parts: Vec<(SectionId, Arc<SectionLod>)>) -> CookSnapshot {
        CookSnapshot::from_parts(Generation(4), parts)
    }

    #[test]
    fn test_cook_single_section() {
        let mesh = cook(&snapshot(vec![(SectionId(0), quad_lod(0.0))])).unwrap();

        assert_eq!(mesh.generation(), Generation(4));
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.bounds().min, Vec3::new(-1.0, 0.0, -1.0));
        assert!(mesh.simple_shape().is_none());
    }

    #[test]
    fn test_cook_empty_fails() {
        assert_eq!(cook(&snapshot(Vec::new())).unwrap_err(), CookError::EmptyGeometry);
    }

    #[test]
    fn test_cook_degenerate_fails() {
        let sliver = Arc::new(SectionLod::new(vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0], vec![0, 1, 2]));
        assert_eq!(
            cook(&snapshot(vec![(SectionId(0), sliver)])).unwrap_err(),
            CookError::Degenerate { triangles: 1 }
        );
    }

    #[test]
    fn test_weld_keeps_faces() {
        // Two sections sharing an edge position
        let parts = vec![(SectionId(0), quad_lod(0.0)), (SectionId(1), quad_lod(0.0))];
        let mesh = cook(&snapshot(parts.clone())).unwrap();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 4);
        assert_eq!(mesh.section_and_face(3), Some((SectionId(1), 1)));

        let mut fast = snapshot(parts);
        fast.priority = CookPriority::CookingPerformance;
        assert_eq!(cook(&fast).unwrap().num_vertices(), 8);
    }

    #[test]
    fn test_simple_shape_is_bounds() {
        let mut input = snapshot(vec![(SectionId(0), quad_lod(2.0))]);
        input.use_complex_as_simple = false;
        let mesh = cook(&input).unwrap();
        assert_eq!(mesh.simple_shape(), Some(mesh.bounds()));
    }

    #[test]
    fn test_raycast() {
        let mesh = cook(&snapshot(vec![(SectionId(0), quad_lod(1.0))])).unwrap();

        let hit = mesh.raycast(Vec3::new(0.25, 5.0, 0.25), Vec3::NEG_Y, 100.0).unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-4);
        assert!((hit.point.y - 1.0).abs() < 1e-4);

        assert!(mesh.raycast(Vec3::new(5.0, 5.0, 5.0), Vec3::NEG_Y, 100.0).is_none());
        assert!(mesh.raycast(Vec3::ZERO, Vec3::ZERO, 100.0).is_none());
    }
}
