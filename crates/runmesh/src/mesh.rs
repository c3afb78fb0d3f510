//! Runtime Mesh
//!
//! Owner-side facade tying the section store to its render proxy, its
//! collision cook queue and its linked components.
//!
//! Every mutation validates in the store, forwards exactly one command to the
//! render proxy (if there is one), notifies linked components of structural
//! changes and schedules a collision cook when the collision aggregate
//! changed. Collision results are installed by [`RuntimeMesh::tick`].

use std::fmt;
use std::sync::Arc;

use runmesh_core::math::MeshBounds;
use runmesh_core::{
    command_channel, CommandReceiver, CommandSender, Generation, JobPool, ListenerId,
    ListenerRegistry, MeshEvent, MeshListener, MeshResult, Mutation, Section, SectionFlags,
    SectionId, SectionLod, SectionStore, UpdateFrequency,
};
use runmesh_physics::{
    CollisionMesh, CookConfig, CookOutcome, CookQueue, CookResult, CookState, CookStats,
    CookingMode, TriMeshData,
};
use runmesh_renderer::{OwnerProxyHandle, ProxyId, RenderQueue};

use crate::MeshConfig;

/// Work queued for a later cycle of the owner context
pub type DeferredTask = Box<dyn FnOnce(&mut RuntimeMesh) + Send>;

/// Handle linked components use to queue deferred work
pub type DeferredSender = CommandSender<DeferredTask>;

/// Runtime-editable mesh living on the owner context
pub struct RuntimeMesh {
    store: SectionStore,
    proxy: Option<OwnerProxyHandle>,
    cook: CookQueue,
    listeners: ListenerRegistry,
    deferred_tx: DeferredSender,
    deferred_rx: CommandReceiver<DeferredTask>,
}

impl RuntimeMesh {
    /// Create a mesh with its own cook workers
    pub fn new(config: MeshConfig) -> Self {
        let pool = Arc::new(JobPool::new(config.job_pool_config()));
        Self::with_pool(config.cook, pool)
    }

    /// Create a mesh cooking on a shared pool
    pub fn with_pool(cook_config: CookConfig, pool: Arc<JobPool>) -> Self {
        let (deferred_tx, deferred_rx) = command_channel();
        Self {
            store: SectionStore::new(),
            proxy: None,
            cook: CookQueue::new(cook_config, pool),
            listeners: ListenerRegistry::new(),
            deferred_tx,
            deferred_rx,
        }
    }

    // --- Sections -------------------------------------------------------

    /// Create a section from its LOD chain
    ///
    /// Empty LOD 0 geometry creates nothing.
    pub fn create_section(
        &mut self,
        id: SectionId,
        lods: Vec<SectionLod>,
        collision_enabled: bool,
        update_frequency: UpdateFrequency,
        flags: SectionFlags,
    ) -> MeshResult<()> {
        match self
            .store
            .create_section(id, lods, collision_enabled, update_frequency, flags)?
        {
            Some(mutation) => self.apply(mutation),
            None => log::debug!("Section {} created empty, nothing stored", id),
        }
        Ok(())
    }

    /// Replace the geometry of one LOD; empty geometry deletes the section
    pub fn update_section(
        &mut self,
        id: SectionId,
        lod_index: usize,
        geometry: SectionLod,
    ) -> MeshResult<()> {
        let mutation = self.store.update_section(id, lod_index, geometry)?;
        self.apply(mutation);
        Ok(())
    }

    pub fn update_section_properties(&mut self, id: SectionId, flags: SectionFlags) -> MeshResult<()> {
        let mutation = self.store.update_section_properties(id, flags)?;
        self.apply(mutation);
        Ok(())
    }

    pub fn delete_section(&mut self, id: SectionId) -> MeshResult<()> {
        let mutation = self.store.delete_section(id)?;
        self.apply(mutation);
        Ok(())
    }

    /// Create a single-LOD section, or replace LOD 0 of an existing one
    ///
    /// Empty geometry removes the section if it exists. The collision flag of
    /// an existing section is switched to `collision_enabled`.
    pub fn set_mesh_section(
        &mut self,
        id: SectionId,
        geometry: SectionLod,
        collision_enabled: bool,
        update_frequency: UpdateFrequency,
    ) -> MeshResult<()> {
        let existing = self.store.section(id).map(Section::flags);
        match existing {
            None => self.create_section(
                id,
                vec![geometry],
                collision_enabled,
                update_frequency,
                SectionFlags::defaults_for(update_frequency),
            ),
            Some(_) if geometry.is_empty() => self.delete_section(id),
            Some(flags) => {
                self.update_section(id, 0, geometry)?;
                if flags.contains(SectionFlags::COLLISION) != collision_enabled {
                    let mut flags = flags;
                    flags.set(SectionFlags::COLLISION, collision_enabled);
                    self.update_section_properties(id, flags)?;
                }
                Ok(())
            }
        }
    }

    /// Delete every section
    pub fn clear_all_sections(&mut self) {
        for mutation in self.store.clear_all_sections() {
            self.apply(mutation);
        }
    }

    /// Set the screen-size threshold of each LOD
    pub fn set_lod_screen_sizes(&mut self, sizes: &[f32]) -> MeshResult<()> {
        let mutation = self.store.set_lod_screen_sizes(sizes)?;
        self.apply(mutation);
        Ok(())
    }

    pub fn does_section_exist(&self, id: SectionId) -> bool {
        self.store.does_section_exist(id)
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.store.section(id)
    }

    /// Existing section ids in ascending order
    pub fn section_ids(&self) -> Vec<SectionId> {
        self.store.section_ids()
    }

    pub fn num_sections(&self) -> usize {
        self.store.num_sections()
    }

    /// Local bounds of all sections
    pub fn local_bounds(&mut self) -> MeshBounds {
        self.store.local_bounds()
    }

    /// Generation of the newest mutation
    pub fn generation(&self) -> Generation {
        self.store.generation()
    }

    pub fn store(&self) -> &SectionStore {
        &self.store
    }

    fn apply(&mut self, mutation: Mutation) {
        let Mutation { command, affects_collision } = mutation;
        let generation = command.generation();
        let structural = command.is_structural();

        if let Some(proxy) = &self.proxy {
            proxy.submit(command);
        }
        if structural {
            self.listeners.notify(&MeshEvent::ProxyInvalidated);
        }
        if affects_collision {
            self.cook.request(generation);
        }
    }

    // --- Render proxy ---------------------------------------------------

    /// Create the render proxy on `queue`'s render context
    ///
    /// The proxy starts from the current sections. An existing proxy is
    /// released first.
    pub fn create_render_proxy(&mut self, queue: &RenderQueue) -> ProxyId {
        self.release_render_proxy();
        let handle = queue.create_proxy(self.store.snapshot_commands());
        let id = handle.id();
        log::debug!("Mesh bound to {} with {} sections", id, self.store.num_sections());
        self.proxy = Some(handle);
        self.listeners.notify(&MeshEvent::ProxyInvalidated);
        id
    }

    /// Release the render proxy; its destruction happens on the render context
    pub fn release_render_proxy(&mut self) -> bool {
        self.proxy.take().is_some()
    }

    pub fn proxy_id(&self) -> Option<ProxyId> {
        self.proxy.as_ref().map(OwnerProxyHandle::id)
    }

    // --- Linked components ----------------------------------------------

    /// Link a component; the mesh holds it weakly
    pub fn link_component<L: MeshListener + 'static>(&mut self, component: &Arc<L>) -> ListenerId {
        self.listeners.register(component)
    }

    pub fn unlink_component(&mut self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Number of linked components still alive
    pub fn linked_component_count(&self) -> usize {
        self.listeners.live_count()
    }

    /// Queue work for the next [`tick`](Self::tick)
    pub fn queue_deferred<F>(&self, task: F)
    where
        F: FnOnce(&mut RuntimeMesh) + Send + 'static,
    {
        self.deferred_tx.submit(Box::new(task));
    }

    /// Sender that components can keep to queue deferred work from event handlers
    pub fn deferred_sender(&self) -> DeferredSender {
        self.deferred_tx.clone()
    }

    // --- Collision ------------------------------------------------------

    /// Advance the mesh by one owner cycle
    ///
    /// Runs deferred work queued before this call, then drives the cook
    /// queue. Each finalized cook is installed before `CollisionUpdated` is
    /// dispatched, so listeners can query the new collision right away.
    pub fn tick(&mut self) -> Vec<CookOutcome> {
        let tasks: Vec<DeferredTask> = self.deferred_rx.drain().collect();
        for task in tasks {
            task(self);
        }

        if !self.cook.is_armed() {
            return Vec::new();
        }
        let outcomes = self.cook.tick(&self.store);
        for outcome in &outcomes {
            self.notify_cook(outcome);
        }
        outcomes
    }

    /// Whether `tick` has anything to do
    pub fn needs_tick(&self) -> bool {
        self.cook.is_armed() || self.deferred_rx.pending() > 0
    }

    /// Cook collision synchronously, bypassing the queue
    ///
    /// Blocks the owner context. Any running cook is abandoned and the cook
    /// queue is idle afterwards.
    pub fn cook_collision_now(&mut self) -> CookResult<Generation> {
        let result = self.cook.cook_now(&self.store);
        let outcome = match &result {
            Ok(generation) => CookOutcome::Installed { generation: *generation },
            Err(error) => CookOutcome::Failed {
                generation: self.store.collision_generation(),
                error: error.clone(),
            },
        };
        self.notify_cook(&outcome);
        result
    }

    fn notify_cook(&mut self, outcome: &CookOutcome) {
        let event = match outcome {
            CookOutcome::Installed { generation } => MeshEvent::CollisionUpdated {
                generation: *generation,
                succeeded: true,
            },
            CookOutcome::Failed { generation, .. } => MeshEvent::CollisionUpdated {
                generation: *generation,
                succeeded: false,
            },
            CookOutcome::Discarded { .. } => return,
        };
        self.listeners.notify(&event);
    }

    pub fn cook_state(&self) -> CookState {
        self.cook.state()
    }

    pub fn cook_stats(&self) -> CookStats {
        self.cook.stats()
    }

    pub fn cook_config(&self) -> &CookConfig {
        self.cook.config()
    }

    pub fn last_cook_failure(&self) -> Option<&runmesh_physics::CookError> {
        self.cook.last_failure()
    }

    /// Use the triangles for simple collision queries; recooks on change
    pub fn set_use_complex_as_simple(&mut self, enabled: bool) {
        let config = CookConfig {
            use_complex_as_simple: enabled,
            ..self.cook.config().clone()
        };
        self.cook.set_config(config);
    }

    pub fn set_cooking_mode(&mut self, mode: CookingMode) {
        let config = CookConfig {
            cooking_mode: mode,
            ..self.cook.config().clone()
        };
        self.cook.set_config(config);
    }

    /// Installed collision mesh
    pub fn collision_mesh(&self) -> Option<Arc<CollisionMesh>> {
        self.cook.collision_mesh().cloned()
    }

    /// Triangle data of the current sections
    ///
    /// With `use_all_sections` sections without collision contribute too.
    pub fn get_physics_tri_mesh_data(&self, use_all_sections: bool) -> Option<TriMeshData> {
        let data = TriMeshData::from_store(&self.store, use_all_sections);
        (!data.is_empty()).then_some(data)
    }

    pub fn contains_physics_tri_mesh_data(&self, use_all_sections: bool) -> bool {
        self.store
            .sections()
            .filter(|section| use_all_sections || section.is_collision_enabled())
            .any(|section| section.lod(0).is_some_and(|lod| lod.triangle_count() > 0))
    }

    /// Section and local face of a face of the installed collision mesh
    pub fn section_and_face_from_collision_index(&self, face_index: u32) -> Option<(SectionId, u32)> {
        self.cook.collision_mesh()?.section_and_face(face_index)
    }

    pub fn section_id_from_collision_index(&self, face_index: u32) -> Option<SectionId> {
        self.section_and_face_from_collision_index(face_index)
            .map(|(section, _)| section)
    }
}

impl fmt::Debug for RuntimeMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeMesh")
            .field("sections", &self.store.num_sections())
            .field("generation", &self.store.generation())
            .field("proxy", &self.proxy_id())
            .field("cook_state", &self.cook.state())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
