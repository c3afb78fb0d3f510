//! Cook Queue
//!
//! Per-mesh state machine that keeps the installed collision representation
//! in step with the section store.
//!
//! ```text
//! Idle --request--> Pending --tick--> Cooking --complete--> Finalizing --> Idle
//!                      ^                 |                       |
//!                      +----superseded---+-------newer target----+
//! ```
//!
//! Every cook carries the aggregate generation it was captured at and a
//! request id unique to the queue. A completion whose id is not the cook in
//! flight was orphaned and is ignored, even when its generation matches. A
//! cook whose generation is no longer the target is discarded, so only the
//! newest geometry ever gets installed. Only `tick` and `cook_now` install
//! results, both on the owner context.

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use runmesh_core::{Generation, JobPool, SectionStore};

use crate::cooker::{cook, CollisionMesh, CookSnapshot};
use crate::{CookConfig, CookError, CookResult, CookingMode};

/// Cook queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookState {
    /// Installed collision is current
    #[default]
    Idle,
    /// A cook is wanted and starts on the next tick
    Pending,
    /// A cook is running on a worker
    Cooking,
    /// A finished cook is being installed
    Finalizing,
}

/// What a tick or an immediate cook did
#[derive(Debug, Clone, PartialEq)]
pub enum CookOutcome {
    /// A new collision mesh was installed
    Installed { generation: Generation },
    /// The cook failed; the previous collision mesh stays installed
    Failed {
        generation: Generation,
        error: CookError,
    },
    /// A cook finished after newer geometry arrived and was thrown away
    Discarded { generation: Generation },
}

impl CookOutcome {
    /// Whether the collision representation was finalized
    pub fn is_finalized(&self) -> bool {
        !matches!(self, Self::Discarded { .. })
    }
}

/// Cook queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookStats {
    pub started: u64,
    pub installed: u64,
    pub failed: u64,
    pub discarded: u64,
}

struct CookCompletion {
    request: u64,
    generation: Generation,
    result: CookResult<CollisionMesh>,
}

/// Collision cook queue of one mesh
pub struct CookQueue {
    config: CookConfig,
    state: CookState,
    /// Newest aggregate generation that should be installed
    target: Generation,
    /// Request id and generation of the cook running on a worker
    in_flight: Option<(u64, Generation)>,
    next_request: u64,
    /// Generation of the last install or failure
    finalized: Generation,
    installed: Option<Arc<CollisionMesh>>,
    last_failure: Option<CookError>,
    pool: Arc<JobPool>,
    completion_tx: Sender<CookCompletion>,
    completion_rx: Receiver<CookCompletion>,
    stats: CookStats,
}

impl CookQueue {
    /// Create an idle queue cooking on `pool` when async cooking is enabled
    pub fn new(config: CookConfig, pool: Arc<JobPool>) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            config,
            state: CookState::Idle,
            target: Generation::ZERO,
            in_flight: None,
            next_request: 0,
            finalized: Generation::ZERO,
            installed: None,
            last_failure: None,
            pool,
            completion_tx,
            completion_rx,
            stats: CookStats::default(),
        }
    }

    pub fn config(&self) -> &CookConfig {
        &self.config
    }

    /// Replace the configuration and recook with it
    pub fn set_config(&mut self, config: CookConfig) {
        if self.config != config {
            self.config = config;
            self.invalidate();
        }
    }

    pub fn state(&self) -> CookState {
        self.state
    }

    /// Whether the owner must keep ticking the queue
    pub fn is_armed(&self) -> bool {
        self.state != CookState::Idle
    }

    /// Currently installed collision mesh
    pub fn collision_mesh(&self) -> Option<&Arc<CollisionMesh>> {
        self.installed.as_ref()
    }

    /// Error of the most recent failed cook, cleared by the next install
    pub fn last_failure(&self) -> Option<&CookError> {
        self.last_failure.as_ref()
    }

    /// Newest generation a cook has been requested for
    pub fn target_generation(&self) -> Generation {
        self.target
    }

    pub fn stats(&self) -> CookStats {
        self.stats
    }

    /// Note that the collision aggregate changed at `generation`
    pub fn request(&mut self, generation: Generation) {
        self.target = self.target.max(generation);
        if self.state == CookState::Idle {
            log::trace!("Collision cook requested at {}", generation);
            self.state = CookState::Pending;
        }
    }

    /// Recook the current aggregate even though it did not change
    ///
    /// A cook already running was captured with the old inputs and is orphaned.
    pub fn invalidate(&mut self) {
        if self.in_flight.take().is_some() {
            self.state = CookState::Pending;
        }
        self.request(self.target);
    }

    /// Advance the state machine
    ///
    /// Installs finished cooks first, then starts a new cook if one is
    /// pending. Must be called on the owner context.
    pub fn tick(&mut self, store: &SectionStore) -> Vec<CookOutcome> {
        let mut outcomes = Vec::new();

        while let Ok(completion) = self.completion_rx.try_recv() {
            if let Some(outcome) = self.complete(completion) {
                outcomes.push(outcome);
            }
        }

        if self.state == CookState::Pending {
            if let Some(outcome) = self.start(store) {
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    /// Cook the current aggregate synchronously and install the result
    ///
    /// Any cook still running is orphaned and its result ignored. The queue
    /// is idle afterwards.
    pub fn cook_now(&mut self, store: &SectionStore) -> CookResult<Generation> {
        let snapshot = CookSnapshot::capture(store, &self.config);
        let generation = snapshot.generation;
        if let Some((_, orphaned)) = self.in_flight.take() {
            log::debug!("Immediate cook at {} orphans cook at {}", generation, orphaned);
        }

        self.stats.started += 1;
        self.target = self.target.max(generation);
        self.state = CookState::Finalizing;
        let outcome = self.install(generation, cook(&snapshot));
        self.state = CookState::Idle;

        match outcome {
            CookOutcome::Failed { error, .. } => Err(error),
            _ => Ok(generation),
        }
    }

    fn start(&mut self, store: &SectionStore) -> Option<CookOutcome> {
        let snapshot = CookSnapshot::capture(store, &self.config);
        let generation = snapshot.generation;
        let request = self.next_request;
        self.next_request += 1;
        self.target = self.target.max(generation);
        self.in_flight = Some((request, generation));
        self.state = CookState::Cooking;
        self.stats.started += 1;

        match self.config.cooking_mode {
            CookingMode::SyncOnly => {
                let result = cook(&snapshot);
                self.complete(CookCompletion { request, generation, result })
            }
            CookingMode::AsyncPreferred => {
                log::trace!("Queued async cook at {}", generation);
                let sender = self.completion_tx.clone();
                self.pool.submit_fn("cook_collision", move || {
                    let result = cook(&snapshot);
                    // The queue may be gone by now.
                    let _ = sender.send(CookCompletion { request, generation, result });
                });
                None
            }
        }
    }

    fn complete(&mut self, completion: CookCompletion) -> Option<CookOutcome> {
        let generation = completion.generation;
        if self.in_flight != Some((completion.request, generation)) {
            log::trace!("Ignoring orphaned cook {} at {}", completion.request, generation);
            return None;
        }
        self.in_flight = None;

        if generation != self.target {
            log::debug!("Discarding cook at {}, target is {}", generation, self.target);
            self.stats.discarded += 1;
            self.state = CookState::Pending;
            return Some(CookOutcome::Discarded { generation });
        }

        self.state = CookState::Finalizing;
        let outcome = self.install(generation, completion.result);
        self.state = if self.target > self.finalized {
            CookState::Pending
        } else {
            CookState::Idle
        };
        Some(outcome)
    }

    fn install(&mut self, generation: Generation, result: CookResult<CollisionMesh>) -> CookOutcome {
        self.finalized = generation;
        match result {
            Ok(mesh) => {
                self.installed = Some(Arc::new(mesh));
                self.last_failure = None;
                self.stats.installed += 1;
                CookOutcome::Installed { generation }
            }
            Err(error) => {
                log::warn!("Collision cook at {} failed: {}", generation, error);
                self.last_failure = Some(error.clone());
                self.stats.failed += 1;
                CookOutcome::Failed { generation, error }
            }
        }
    }
}

impl Drop for CookQueue {
    fn drop(&mut self) {
        if let Some((_, generation)) = self.in_flight {
            log::trace!("Cook queue dropped with cook at {} in flight", generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runmesh_core::math::Vec3;
    use runmesh_core::{JobPoolConfig, SectionFlags, SectionId, SectionLod, UpdateFrequency};

    fn triangle(scale: f32) -> SectionLod {
        SectionLod::new(vec![Vec3::ZERO, Vec3::X * scale, Vec3::Y * scale], vec![0, 1, 2])
    }

    fn add(store: &mut SectionStore, id: u32, scale: f32) -> Generation {
        store
            .create_section(
                SectionId(id),
                vec![triangle(scale)],
                true,
                UpdateFrequency::Average,
                SectionFlags::default(),
            )
            .unwrap()
            .unwrap()
            .command
            .generation()
    }

    fn update(store: &mut SectionStore, id: u32, scale: f32) -> Generation {
        store
            .update_section(SectionId(id), 0, triangle(scale))
            .unwrap()
            .command
            .generation()
    }

    /// Pool whose jobs only run when the test pumps them
    fn manual_pool() -> Arc<JobPool> {
        Arc::new(JobPool::new(JobPoolConfig {
            num_workers: 0,
            ..Default::default()
        }))
    }

    fn queue(mode: CookingMode, pool: Arc<JobPool>) -> CookQueue {
        CookQueue::new(
            CookConfig {
                cooking_mode: mode,
                ..Default::default()
            },
            pool,
        )
    }

    #[test]
    fn test_sync_cook_within_one_tick() {
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());
        let generation = add(&mut store, 0, 1.0);

        queue.request(generation);
        assert_eq!(queue.state(), CookState::Pending);
        assert!(queue.collision_mesh().is_none());

        let outcomes = queue.tick(&store);
        assert_eq!(outcomes, vec![CookOutcome::Installed { generation }]);
        assert_eq!(queue.state(), CookState::Idle);
        assert!(!queue.is_armed());
        assert_eq!(queue.collision_mesh().unwrap().generation(), generation);
    }

    #[test]
    fn test_idle_tick_does_nothing() {
        let store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());
        assert!(queue.tick(&store).is_empty());
        assert_eq!(queue.stats().started, 0);
    }

    #[test]
    fn test_async_cook_installs_on_later_tick() {
        let pool = manual_pool();
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());
        let generation = add(&mut store, 0, 1.0);

        queue.request(generation);
        assert!(queue.tick(&store).is_empty());
        assert_eq!(queue.state(), CookState::Cooking);

        // Not finished yet
        assert!(queue.tick(&store).is_empty());
        assert_eq!(queue.state(), CookState::Cooking);

        pool.process_jobs(usize::MAX);
        assert_eq!(queue.tick(&store), vec![CookOutcome::Installed { generation }]);
        assert_eq!(queue.state(), CookState::Idle);
    }

    #[test]
    fn test_superseded_cook_is_discarded() {
        let pool = manual_pool();
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());

        queue.request(add(&mut store, 0, 1.0));
        queue.tick(&store);
        assert_eq!(queue.state(), CookState::Cooking);

        let newest = update(&mut store, 0, 2.0);
        queue.request(newest);
        assert_eq!(queue.state(), CookState::Cooking);

        pool.process_jobs(usize::MAX);
        let outcomes = queue.tick(&store);
        assert!(matches!(outcomes[0], CookOutcome::Discarded { .. }));
        assert_eq!(queue.state(), CookState::Cooking);

        pool.process_jobs(usize::MAX);
        assert_eq!(queue.tick(&store), vec![CookOutcome::Installed { generation: newest }]);

        let stats = queue.stats();
        assert_eq!(stats.installed, 1);
        assert_eq!(stats.discarded, 1);
        let mesh = queue.collision_mesh().unwrap();
        assert_eq!(mesh.bounds().max, Vec3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn test_requests_coalesce_while_pending() {
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());

        queue.request(add(&mut store, 0, 1.0));
        queue.request(add(&mut store, 1, 1.0));
        let last = update(&mut store, 0, 3.0);
        queue.request(last);

        assert_eq!(queue.tick(&store), vec![CookOutcome::Installed { generation: last }]);
        assert_eq!(queue.stats().started, 1);
    }

    #[test]
    fn test_failed_cook_keeps_previous_mesh() {
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());
        let first = add(&mut store, 0, 1.0);
        queue.request(first);
        queue.tick(&store);

        let removed = store.delete_section(SectionId(0)).unwrap().command.generation();
        queue.request(removed);
        let outcomes = queue.tick(&store);

        assert_eq!(
            outcomes,
            vec![CookOutcome::Failed {
                generation: removed,
                error: CookError::EmptyGeometry
            }]
        );
        assert_eq!(queue.state(), CookState::Idle);
        assert_eq!(queue.collision_mesh().unwrap().generation(), first);
        assert_eq!(queue.last_failure(), Some(&CookError::EmptyGeometry));
    }

    #[test]
    fn test_cook_now_orphans_in_flight_cook() {
        let pool = manual_pool();
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());

        queue.request(add(&mut store, 0, 1.0));
        queue.tick(&store);
        assert_eq!(queue.state(), CookState::Cooking);

        let latest = update(&mut store, 0, 5.0);
        queue.request(latest);
        assert_eq!(queue.cook_now(&store), Ok(latest));
        assert_eq!(queue.state(), CookState::Idle);

        pool.process_jobs(usize::MAX);
        assert!(queue.tick(&store).is_empty());
        assert_eq!(queue.state(), CookState::Idle);
        assert_eq!(queue.collision_mesh().unwrap().generation(), latest);
    }

    #[test]
    fn test_cook_now_reports_failure() {
        let store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());
        assert_eq!(queue.cook_now(&store), Err(CookError::EmptyGeometry));
        assert_eq!(queue.state(), CookState::Idle);
        assert!(queue.collision_mesh().is_none());
    }

    #[test]
    fn test_config_change_recooks() {
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::SyncOnly, manual_pool());
        queue.request(add(&mut store, 0, 1.0));
        queue.tick(&store);
        assert!(queue.collision_mesh().unwrap().simple_shape().is_none());

        queue.set_config(CookConfig {
            use_complex_as_simple: false,
            ..queue.config().clone()
        });
        assert_eq!(queue.state(), CookState::Pending);
        queue.tick(&store);
        assert!(queue.collision_mesh().unwrap().simple_shape().is_some());
    }

    #[test]
    fn test_config_change_while_cooking_uses_new_config() {
        let pool = manual_pool();
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());
        let generation = add(&mut store, 0, 1.0);
        queue.request(generation);
        queue.tick(&store);
        assert_eq!(queue.state(), CookState::Cooking);

        // Same generation, new config: the running cook must not be installed
        queue.set_config(CookConfig {
            use_complex_as_simple: false,
            ..queue.config().clone()
        });
        queue.tick(&store);
        assert_eq!(queue.state(), CookState::Cooking);

        pool.process_jobs(usize::MAX);
        assert_eq!(queue.tick(&store), vec![CookOutcome::Installed { generation }]);
        assert_eq!(queue.state(), CookState::Idle);
        assert_eq!(queue.stats().installed, 1);

        let mesh = queue.collision_mesh().unwrap();
        assert!(!mesh.uses_complex_as_simple());
        assert!(mesh.simple_shape().is_some());
    }

    #[test]
    fn test_cook_now_then_stale_job_same_generation() {
        let pool = manual_pool();
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());
        let generation = add(&mut store, 0, 1.0);
        queue.request(generation);
        queue.tick(&store);

        assert_eq!(queue.cook_now(&store), Ok(generation));
        queue.invalidate();
        queue.tick(&store);
        assert_eq!(queue.state(), CookState::Cooking);

        // Both the orphaned and the live job finish; only the live one counts
        pool.process_jobs(usize::MAX);
        assert_eq!(queue.tick(&store), vec![CookOutcome::Installed { generation }]);
        assert_eq!(queue.state(), CookState::Idle);
        assert_eq!(queue.stats().installed, 2);
    }

    #[test]
    fn test_threaded_workers() {
        let pool = Arc::new(JobPool::new(JobPoolConfig {
            num_workers: 2,
            ..Default::default()
        }));
        let mut store = SectionStore::new();
        let mut queue = queue(CookingMode::AsyncPreferred, pool.clone());
        let generation = add(&mut store, 0, 1.0);
        queue.request(generation);

        let mut installed = Vec::new();
        for _ in 0..1000 {
            installed.extend(queue.tick(&store));
            if !queue.is_armed() {
                break;
            }
            pool.wait_all();
        }
        assert_eq!(installed, vec![CookOutcome::Installed { generation }]);
    }
}
