//! Section Store
//!
//! Authoritative per-section geometry on the owner context.
//!
//! Every successful mutation validates first, then stamps the next generation
//! from the store clock and returns exactly one [`MeshCommand`] describing the
//! change. A failed mutation leaves the store untouched.

use std::sync::Arc;

use ahash::AHashMap;

use crate::command::{MeshCommand, ScreenSizes, SectionCreate};
use crate::math::{Aabb, MeshBounds};
use crate::section::{
    Generation, Section, SectionFlags, SectionId, SectionLod, UpdateFrequency, MAX_LODS,
};
use crate::{MeshError, MeshResult};

/// Result of a successful store mutation
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Command to forward to the render side
    pub command: MeshCommand,
    /// Whether the aggregate collision geometry changed
    pub affects_collision: bool,
}

/// Owner-side store of all sections of one mesh
#[derive(Debug, Default)]
pub struct SectionStore {
    sections: AHashMap<SectionId, Section>,
    /// Generation clock, bumped once per successful mutation
    clock: Generation,
    /// Generation of the last collision-relevant mutation
    collision_generation: Generation,
    screen_sizes: ScreenSizes,
    screen_size_generation: Generation,
    /// Cached bounds, `None` when dirty
    bounds: Option<MeshBounds>,
}

impl SectionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> Generation {
        self.clock = self.clock.next();
        self.bounds = None;
        self.clock
    }

    /// Create a section from its LOD chain
    ///
    /// Returns `Ok(None)` when LOD 0 has no vertices: such a section is
    /// indistinguishable from a missing one and is never stored.
    pub fn create_section(
        &mut self,
        id: SectionId,
        lods: Vec<SectionLod>,
        collision_enabled: bool,
        update_frequency: UpdateFrequency,
        flags: SectionFlags,
    ) -> MeshResult<Option<Mutation>> {
        if self.sections.contains_key(&id) {
            return Err(MeshError::SectionAlreadyExists(id));
        }
        if lods.len() > MAX_LODS {
            return Err(MeshError::TooManyLods { count: lods.len(), limit: MAX_LODS });
        }
        if lods.first().is_none_or(SectionLod::is_empty) {
            return Ok(None);
        }
        for (index, lod) in lods.iter().enumerate() {
            if lod.is_empty() {
                return Err(MeshError::GeometrySizeMismatch(format!(
                    "LOD {} of section {} has no vertices",
                    index, id
                )));
            }
            lod.validate()?;
        }

        let mut flags = flags;
        flags.set(SectionFlags::COLLISION, collision_enabled);

        let generation = self.tick();
        let lods: Vec<Arc<SectionLod>> = lods.into_iter().map(Arc::new).collect();
        let section = Section {
            id,
            lods: lods.clone(),
            update_frequency,
            flags,
            generation,
        };
        self.sections.insert(id, section);

        let affects_collision = collision_enabled;
        if affects_collision {
            self.collision_generation = generation;
        }

        log::debug!("Created section {} with {} LODs at {}", id, lods.len(), generation);

        Ok(Some(Mutation {
            command: MeshCommand::CreateSection {
                section: id,
                generation,
                payload: Arc::new(SectionCreate { lods, update_frequency, flags }),
            },
            affects_collision,
        }))
    }

    /// Replace the geometry of one LOD
    ///
    /// Empty geometry removes the whole section, exactly like
    /// [`delete_section`](Self::delete_section).
    pub fn update_section(
        &mut self,
        id: SectionId,
        lod_index: usize,
        geometry: SectionLod,
    ) -> MeshResult<Mutation> {
        let section = self.sections.get(&id).ok_or(MeshError::SectionNotFound(id))?;
        if lod_index >= section.num_lods() {
            return Err(MeshError::LodIndexOutOfRange {
                section: id,
                lod_index,
                num_lods: section.num_lods(),
            });
        }

        if geometry.is_empty() {
            return self.delete_section(id);
        }
        geometry.validate()?;

        let collision_enabled = section.is_collision_enabled();
        let generation = self.tick();
        let geometry = Arc::new(geometry);

        let section = self.sections.get_mut(&id).ok_or(MeshError::SectionNotFound(id))?;
        section.lods[lod_index] = geometry.clone();
        section.generation = generation;

        // Only LOD 0 is cooked into collision
        let affects_collision = collision_enabled && lod_index == 0;
        if affects_collision {
            self.collision_generation = generation;
        }

        Ok(Mutation {
            command: MeshCommand::UpdateGeometry {
                section: id,
                generation,
                lod_index,
                geometry,
            },
            affects_collision,
        })
    }

    /// Replace the flags of a section
    pub fn update_section_properties(
        &mut self,
        id: SectionId,
        flags: SectionFlags,
    ) -> MeshResult<Mutation> {
        let section = self.sections.get(&id).ok_or(MeshError::SectionNotFound(id))?;
        let was_collision = section.is_collision_enabled();

        let generation = self.tick();
        let section = self.sections.get_mut(&id).ok_or(MeshError::SectionNotFound(id))?;
        section.flags = flags;
        section.generation = generation;

        let affects_collision = was_collision != flags.contains(SectionFlags::COLLISION);
        if affects_collision {
            self.collision_generation = generation;
        }

        Ok(Mutation {
            command: MeshCommand::UpdateProperties {
                section: id,
                generation,
                flags,
            },
            affects_collision,
        })
    }

    /// Remove a section; missing sections are an error
    pub fn delete_section(&mut self, id: SectionId) -> MeshResult<Mutation> {
        let section = self.sections.remove(&id).ok_or(MeshError::SectionNotFound(id))?;
        let generation = self.tick();

        let affects_collision = section.is_collision_enabled();
        if affects_collision {
            self.collision_generation = generation;
        }

        log::debug!("Deleted section {} at {}", id, generation);

        Ok(Mutation {
            command: MeshCommand::DeleteSection { section: id, generation },
            affects_collision,
        })
    }

    /// Remove every section, one mutation per section in ascending id order
    pub fn clear_all_sections(&mut self) -> Vec<Mutation> {
        self.section_ids()
            .into_iter()
            .filter_map(|id| self.delete_section(id).ok())
            .collect()
    }

    /// Set the screen-size threshold of each LOD
    pub fn set_lod_screen_sizes(&mut self, sizes: &[f32]) -> MeshResult<Mutation> {
        if sizes.len() > MAX_LODS {
            return Err(MeshError::TooManyLods { count: sizes.len(), limit: MAX_LODS });
        }

        let generation = self.tick();
        self.screen_sizes = ScreenSizes::from_slice(sizes);
        self.screen_size_generation = generation;

        Ok(Mutation {
            command: MeshCommand::SetScreenSizes {
                generation,
                sizes: self.screen_sizes.clone(),
            },
            affects_collision: false,
        })
    }

    pub fn does_section_exist(&self, id: SectionId) -> bool {
        self.sections.contains_key(&id)
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    /// All section ids in ascending order
    pub fn section_ids(&self) -> Vec<SectionId> {
        let mut ids: Vec<_> = self.sections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sections in ascending id order
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        let mut sections: Vec<&Section> = self.sections.values().collect();
        sections.sort_unstable_by_key(|s| s.id);
        sections.into_iter()
    }

    /// Collision-enabled sections in ascending id order
    pub fn collision_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections().filter(|s| s.is_collision_enabled())
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    /// Current value of the generation clock
    pub fn generation(&self) -> Generation {
        self.clock
    }

    /// Generation of the last change to the aggregate collision geometry
    pub fn collision_generation(&self) -> Generation {
        self.collision_generation
    }

    pub fn screen_sizes(&self) -> &[f32] {
        &self.screen_sizes
    }

    /// Commands that rebuild the current state on a fresh proxy
    pub fn snapshot_commands(&self) -> Vec<MeshCommand> {
        let mut commands: Vec<MeshCommand> = self
            .sections()
            .map(|section| MeshCommand::CreateSection {
                section: section.id,
                generation: section.generation,
                payload: Arc::new(SectionCreate {
                    lods: section.lods.clone(),
                    update_frequency: section.update_frequency,
                    flags: section.flags,
                }),
            })
            .collect();

        if self.screen_size_generation > Generation::ZERO {
            commands.push(MeshCommand::SetScreenSizes {
                generation: self.screen_size_generation,
                sizes: self.screen_sizes.clone(),
            });
        }
        commands
    }

    /// Local bounds of all sections, recomputed only after a mutation
    pub fn local_bounds(&mut self) -> MeshBounds {
        if let Some(bounds) = self.bounds {
            return bounds;
        }
        let aabb = self
            .sections
            .values()
            .fold(Aabb::EMPTY, |acc, section| acc.merge(&section.bounds()));
        let bounds = MeshBounds::from_aabb(aabb);
        self.bounds = Some(bounds);
        bounds
    }

    /// Whether the cached bounds must be recomputed
    pub fn bounds_dirty(&self) -> bool {
        self.bounds.is_none()
    }
}
