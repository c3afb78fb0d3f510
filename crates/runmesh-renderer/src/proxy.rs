//! Render Proxy
//!
//! Render-context mirror of a mesh's renderable sections. State changes only
//! through the `apply_*` entry points, each of which needs a [`RenderToken`].
//!
//! Every apply is generation-checked: a command whose generation is not newer
//! than what the proxy last saw for that section is ignored. Deleted sections
//! leave a tombstone generation behind so late commands cannot bring them back.
//! At most [`MAX_TOMBSTONES`] are kept; evicting the oldest raises a floor, and
//! any command for an unknown section at or below the floor is stale.

use std::sync::Arc;

use ahash::AHashMap;
use runmesh_core::{
    Generation, MeshCommand, ScreenSizes, SectionCreate, SectionFlags, SectionId, SectionLod,
    UpdateFrequency,
};

use crate::token::RenderToken;

/// Tombstones kept per proxy before the oldest are folded into the floor
pub const MAX_TOMBSTONES: usize = 256;

/// GPU buffer usage chosen from a section's update frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uploaded once, rarely rewritten
    Static,
    /// Rewritten now and then
    Dynamic,
    /// Rewritten most frames
    Streaming,
}

impl From<UpdateFrequency> for BufferUsage {
    fn from(frequency: UpdateFrequency) -> Self {
        match frequency {
            UpdateFrequency::Infrequent => Self::Static,
            UpdateFrequency::Average => Self::Dynamic,
            UpdateFrequency::Frequent => Self::Streaming,
        }
    }
}

/// Renderable state of one section
#[derive(Debug, Clone)]
pub struct RenderSection {
    lods: Vec<Arc<SectionLod>>,
    usage: BufferUsage,
    flags: SectionFlags,
    generation: Generation,
}

impl RenderSection {
    fn from_create(create: &SectionCreate, generation: Generation) -> Self {
        Self {
            lods: create.lods.clone(),
            usage: create.update_frequency.into(),
            flags: create.flags,
            generation,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    pub fn buffer_usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn num_lods(&self) -> usize {
        self.lods.len()
    }

    pub fn lod(&self, index: usize) -> Option<&SectionLod> {
        self.lods.get(index).map(|lod| lod.as_ref())
    }

    pub fn wants_static_path(&self) -> bool {
        self.flags.contains(SectionFlags::STATIC_PATH)
    }

    pub fn casts_shadow(&self) -> bool {
        self.flags.contains(SectionFlags::CAST_SHADOW)
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(SectionFlags::VISIBLE)
    }
}

/// Which draw paths the proxy's visible sections need
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewRelevance {
    pub has_static_sections: bool,
    pub has_dynamic_sections: bool,
    pub has_shadowed_sections: bool,
}

/// Render-side mirror of one mesh
#[derive(Debug, Default)]
pub struct RenderProxy {
    sections: AHashMap<SectionId, RenderSection>,
    /// Generation at which each deleted section was removed
    tombstones: AHashMap<SectionId, Generation>,
    /// Newest generation of an evicted tombstone
    tombstone_floor: Generation,
    screen_sizes: ScreenSizes,
    screen_size_generation: Generation,
}

impl RenderProxy {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Newest generation seen for a section, live or deleted
    fn last_generation(&self, id: SectionId) -> Option<Generation> {
        self.sections
            .get(&id)
            .map(|section| section.generation)
            .or_else(|| self.tombstones.get(&id).copied())
    }

    fn is_stale(&self, id: SectionId, generation: Generation) -> bool {
        generation <= self.last_generation(id).unwrap_or(self.tombstone_floor)
    }

    fn prune_tombstones(&mut self) {
        if self.tombstones.len() <= MAX_TOMBSTONES {
            return;
        }
        let mut generations: Vec<_> = self.tombstones.values().copied().collect();
        generations.sort_unstable();
        // Keep the newest half
        let floor = generations[generations.len() - MAX_TOMBSTONES / 2 - 1];
        self.tombstones.retain(|_, generation| *generation > floor);
        self.tombstone_floor = self.tombstone_floor.max(floor);
        log::trace!("Pruned tombstones up to {}", floor);
    }

    /// Apply any mesh command, returning whether it changed the proxy
    pub fn apply(&mut self, token: &RenderToken, command: &MeshCommand) -> bool {
        match command {
            MeshCommand::CreateSection { section, generation, payload } => {
                self.apply_create(token, *section, *generation, payload)
            }
            MeshCommand::UpdateGeometry { section, generation, lod_index, geometry } => {
                self.apply_update_geometry(token, *section, *generation, *lod_index, geometry)
            }
            MeshCommand::UpdateProperties { section, generation, flags } => {
                self.apply_update_properties(token, *section, *generation, *flags)
            }
            MeshCommand::DeleteSection { section, generation } => {
                self.apply_delete(token, *section, *generation)
            }
            MeshCommand::SetScreenSizes { generation, sizes } => {
                self.apply_set_screen_sizes(token, *generation, sizes)
            }
        }
    }

    pub fn apply_create(
        &mut self,
        _token: &RenderToken,
        id: SectionId,
        generation: Generation,
        create: &SectionCreate,
    ) -> bool {
        if self.is_stale(id, generation) {
            log::trace!("Skipping stale create of section {} at {}", id, generation);
            return false;
        }
        self.tombstones.remove(&id);
        self.sections.insert(id, RenderSection::from_create(create, generation));
        true
    }

    pub fn apply_update_geometry(
        &mut self,
        _token: &RenderToken,
        id: SectionId,
        generation: Generation,
        lod_index: usize,
        geometry: &Arc<SectionLod>,
    ) -> bool {
        let Some(section) = self.sections.get_mut(&id) else {
            log::trace!("Geometry update for missing section {}", id);
            return false;
        };
        if generation <= section.generation {
            return false;
        }
        let Some(slot) = section.lods.get_mut(lod_index) else {
            log::warn!("Geometry update for LOD {} of section {} out of range", lod_index, id);
            return false;
        };
        *slot = geometry.clone();
        section.generation = generation;
        true
    }

    pub fn apply_update_properties(
        &mut self,
        _token: &RenderToken,
        id: SectionId,
        generation: Generation,
        flags: SectionFlags,
    ) -> bool {
        match self.sections.get_mut(&id) {
            Some(section) if generation > section.generation => {
                section.flags = flags;
                section.generation = generation;
                true
            }
            _ => false,
        }
    }

    /// Remove a section; a missing target counts as already deleted
    pub fn apply_delete(&mut self, _token: &RenderToken, id: SectionId, generation: Generation) -> bool {
        if self.is_stale(id, generation) {
            return false;
        }
        self.sections.remove(&id);
        self.tombstones.insert(id, generation);
        self.prune_tombstones();
        true
    }

    pub fn apply_set_screen_sizes(
        &mut self,
        _token: &RenderToken,
        generation: Generation,
        sizes: &ScreenSizes,
    ) -> bool {
        if generation <= self.screen_size_generation {
            return false;
        }
        self.screen_sizes = sizes.clone();
        self.screen_size_generation = generation;
        true
    }

    /// Draw-path relevance of all visible sections
    pub fn summarize(&self, _token: &RenderToken) -> ViewRelevance {
        let mut relevance = ViewRelevance::default();
        for section in self.sections.values().filter(|s| s.is_visible()) {
            let wants_static = section.wants_static_path();
            relevance.has_static_sections |= wants_static;
            relevance.has_dynamic_sections |= !wants_static;
            relevance.has_shadowed_sections |= section.casts_shadow();
        }
        relevance
    }

    /// Screen size of a LOD, zero for LODs without a configured size
    pub fn screen_size(&self, lod_index: usize) -> f32 {
        self.screen_sizes.get(lod_index).copied().unwrap_or(0.0)
    }

    pub fn section(&self, id: SectionId) -> Option<&RenderSection> {
        self.sections.get(&id)
    }

    /// Live section ids in ascending order
    pub fn section_ids(&self) -> Vec<SectionId> {
        let mut ids: Vec<_> = self.sections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::RenderContextGuard;
    use runmesh_core::math::Vec3;

    fn create(id: u32, generation: u64, flags: SectionFlags) -> MeshCommand {
        MeshCommand::CreateSection {
            section: SectionId(id),
            generation: Generation(generation),
            payload: Arc::new(SectionCreate {
                lods: vec![Arc::new(SectionLod::new(
                    vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                    vec![0, 1, 2],
                ))],
                update_frequency: UpdateFrequency::Average,
                flags,
            }),
        }
    }

    fn delete(id: u32, generation: u64) -> MeshCommand {
        MeshCommand::DeleteSection {
            section: SectionId(id),
            generation: Generation(generation),
        }
    }

    #[test]
    fn test_duplicate_delivery_is_noop() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();
        let command = create(1, 1, SectionFlags::default());

        assert!(proxy.apply(&token, &command));
        for _ in 0..5 {
            assert!(!proxy.apply(&token, &command));
        }
        assert_eq!(proxy.section_ids(), vec![SectionId(1)]);
        assert_eq!(proxy.section(SectionId(1)).unwrap().generation(), Generation(1));
    }

    #[test]
    fn test_stale_create_does_not_resurrect() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();

        // late commands from before the delete at g5
        assert!(proxy.apply(&token, &create(1, 1, SectionFlags::default())));
        assert!(proxy.apply(&token, &delete(1, 5)));
        assert!(!proxy.apply(&token, &create(1, 4, SectionFlags::default())));
        assert!(!proxy.apply(&token, &delete(1, 3)));

        assert_eq!(proxy.num_sections(), 0);
        assert!(proxy.apply(&token, &create(1, 6, SectionFlags::default())));
        assert_eq!(proxy.num_sections(), 1);
    }

    #[test]
    fn test_delete_missing_is_tolerated() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();
        assert!(proxy.apply(&token, &delete(7, 2)));
        assert!(!proxy.apply(&token, &create(7, 1, SectionFlags::default())));
        assert_eq!(proxy.num_sections(), 0);
    }

    #[test]
    fn test_tombstones_stay_bounded_under_churn() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();

        for id in 0..2000u32 {
            let generation = 2 * id as u64 + 1;
            assert!(proxy.apply(&token, &create(id, generation, SectionFlags::default())));
            assert!(proxy.apply(&token, &delete(id, generation + 1)));
            assert!(proxy.tombstones.len() <= MAX_TOMBSTONES);
        }
        assert_eq!(proxy.num_sections(), 0);

        // Late commands for evicted sections still cannot resurrect them
        assert!(!proxy.apply(&token, &create(0, 1, SectionFlags::default())));
        assert!(!proxy.apply(&token, &create(1500, 3001, SectionFlags::default())));
        assert_eq!(proxy.num_sections(), 0);

        // Newer commands go through
        assert!(proxy.apply(&token, &create(0, 5000, SectionFlags::default())));
        assert_eq!(proxy.section_ids(), vec![SectionId(0)]);
    }

    #[test]
    fn test_geometry_update_generation_check() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();
        proxy.apply(&token, &create(1, 2, SectionFlags::default()));

        let quad = Arc::new(SectionLod::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE],
            vec![0, 1, 2, 2, 1, 3],
        ));
        let old = MeshCommand::UpdateGeometry {
            section: SectionId(1),
            generation: Generation(1),
            lod_index: 0,
            geometry: quad.clone(),
        };
        assert!(!proxy.apply(&token, &old));

        let new = MeshCommand::UpdateGeometry {
            section: SectionId(1),
            generation: Generation(3),
            lod_index: 0,
            geometry: quad,
        };
        assert!(proxy.apply(&token, &new));
        let section = proxy.section(SectionId(1)).unwrap();
        assert_eq!(section.lod(0).unwrap().triangle_count(), 2);
        assert_eq!(section.buffer_usage(), BufferUsage::Dynamic);
    }

    #[test]
    fn test_summarize() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();
        assert_eq!(proxy.summarize(&token), ViewRelevance::default());

        proxy.apply(&token, &create(1, 1, SectionFlags::VISIBLE | SectionFlags::STATIC_PATH));
        let relevance = proxy.summarize(&token);
        assert!(relevance.has_static_sections);
        assert!(!relevance.has_dynamic_sections);
        assert!(!relevance.has_shadowed_sections);

        proxy.apply(&token, &create(2, 2, SectionFlags::VISIBLE | SectionFlags::CAST_SHADOW));
        proxy.apply(&token, &create(3, 3, SectionFlags::STATIC_PATH));
        let relevance = proxy.summarize(&token);
        assert!(relevance.has_static_sections);
        assert!(relevance.has_dynamic_sections);
        assert!(relevance.has_shadowed_sections);

        let hide = MeshCommand::UpdateProperties {
            section: SectionId(2),
            generation: Generation(4),
            flags: SectionFlags::CAST_SHADOW,
        };
        assert!(proxy.apply(&token, &hide));
        assert!(!proxy.summarize(&token).has_dynamic_sections);
    }

    #[test]
    fn test_screen_sizes() {
        let (_guard, token) = RenderContextGuard::enter();
        let mut proxy = RenderProxy::new();
        let sizes = MeshCommand::SetScreenSizes {
            generation: Generation(2),
            sizes: ScreenSizes::from_slice(&[1.0, 0.5]),
        };
        assert!(proxy.apply(&token, &sizes));
        assert!(!proxy.apply(&token, &sizes));
        assert_eq!(proxy.screen_size(1), 0.5);
        assert_eq!(proxy.screen_size(5), 0.0);
    }
}
