//! Collision cooking through the runtime mesh facade

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use runmesh::{
    CookConfig, CookError, CookOutcome, CookState, CookingMode, JobPool, JobPoolConfig,
    MeshConfig, MeshEvent, MeshListener, RuntimeMesh, SectionFlags, SectionId, SectionLod,
    UpdateFrequency, Vec3,
};

/// Records collision events only
#[derive(Default)]
struct CollisionWatcher {
    events: Mutex<Vec<MeshEvent>>,
}

impl MeshListener for CollisionWatcher {
    fn on_mesh_event(&self, event: &MeshEvent) {
        if let MeshEvent::CollisionUpdated { .. } = event {
            self.events.lock().push(*event);
        }
    }
}

impl CollisionWatcher {
    fn updates(&self) -> Vec<MeshEvent> {
        self.events.lock().clone()
    }
}

fn quad(size: f32) -> SectionLod {
    SectionLod::new(
        vec![
            Vec3::ZERO,
            Vec3::new(size, 0.0, 0.0),
            Vec3::new(0.0, 0.0, size),
            Vec3::new(size, 0.0, size),
        ],
        vec![0, 2, 1, 1, 2, 3],
    )
}

fn manual_pool() -> Arc<JobPool> {
    Arc::new(JobPool::new(JobPoolConfig {
        num_workers: 0,
        ..Default::default()
    }))
}

fn mesh_with(mode: CookingMode, pool: Arc<JobPool>) -> RuntimeMesh {
    RuntimeMesh::with_pool(
        CookConfig {
            cooking_mode: mode,
            ..Default::default()
        },
        pool,
    )
}

fn add_collision_section(mesh: &mut RuntimeMesh, id: u32, size: f32) {
    mesh.create_section(
        SectionId(id),
        vec![quad(size)],
        true,
        UpdateFrequency::Average,
        SectionFlags::default(),
    )
    .unwrap();
}

#[test]
fn test_sync_cook_finalizes_in_one_tick() {
    let mut mesh = mesh_with(CookingMode::SyncOnly, manual_pool());
    let watcher = Arc::new(CollisionWatcher::default());
    mesh.link_component(&watcher);

    add_collision_section(&mut mesh, 0, 1.0);
    assert_eq!(mesh.cook_state(), CookState::Pending);
    assert!(mesh.collision_mesh().is_none());

    mesh.tick();

    let generation = mesh.generation();
    assert_eq!(mesh.cook_state(), CookState::Idle);
    assert_eq!(
        watcher.updates(),
        vec![MeshEvent::CollisionUpdated { generation, succeeded: true }]
    );
    let collision = mesh.collision_mesh().unwrap();
    assert_eq!(collision.generation(), generation);
    assert_eq!(collision.num_faces(), 2);

    // Nothing left to do
    assert!(mesh.tick().is_empty());
    assert_eq!(watcher.updates().len(), 1);
}

#[test]
fn test_async_double_update_installs_latest_once() {
    let pool = manual_pool();
    let mut mesh = mesh_with(CookingMode::AsyncPreferred, pool.clone());
    let watcher = Arc::new(CollisionWatcher::default());
    mesh.link_component(&watcher);

    add_collision_section(&mut mesh, 0, 1.0);
    mesh.tick();
    assert_eq!(mesh.cook_state(), CookState::Cooking);

    mesh.update_section(SectionId(0), 0, quad(2.0)).unwrap();
    mesh.update_section(SectionId(0), 0, quad(3.0)).unwrap();
    let latest = mesh.generation();

    // First cook finishes after the updates and is superseded
    pool.process_jobs(usize::MAX);
    let outcomes = mesh.tick();
    assert!(matches!(outcomes.as_slice(), [CookOutcome::Discarded { .. }]));
    assert!(watcher.updates().is_empty());

    pool.process_jobs(usize::MAX);
    mesh.tick();

    assert_eq!(
        watcher.updates(),
        vec![MeshEvent::CollisionUpdated { generation: latest, succeeded: true }]
    );
    let collision = mesh.collision_mesh().unwrap();
    assert_eq!(collision.generation(), latest);
    assert_eq!(collision.bounds().max, Vec3::new(3.0, 0.0, 3.0));
    assert_eq!(mesh.cook_stats().installed, 1);
}

#[test]
fn test_async_cook_on_worker_threads() {
    let pool = Arc::new(JobPool::new(JobPoolConfig {
        num_workers: 2,
        ..Default::default()
    }));
    let mut mesh = mesh_with(CookingMode::AsyncPreferred, pool);
    for id in 0..8 {
        add_collision_section(&mut mesh, id, 1.0 + id as f32);
    }

    for _ in 0..2000 {
        mesh.tick();
        if mesh.cook_state() == CookState::Idle {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(mesh.cook_state(), CookState::Idle);
    let collision = mesh.collision_mesh().unwrap();
    assert_eq!(collision.num_faces(), 16);
    assert_eq!(mesh.section_and_face_from_collision_index(15), Some((SectionId(7), 1)));
}

#[test]
fn test_cook_now_from_every_state_lands_idle() {
    let pool = manual_pool();
    let mut mesh = mesh_with(CookingMode::AsyncPreferred, pool.clone());

    // Idle
    assert_eq!(mesh.cook_collision_now(), Err(CookError::EmptyGeometry));
    assert_eq!(mesh.cook_state(), CookState::Idle);

    // Pending
    add_collision_section(&mut mesh, 0, 1.0);
    assert_eq!(mesh.cook_state(), CookState::Pending);
    assert_eq!(mesh.cook_collision_now(), Ok(mesh.generation()));
    assert_eq!(mesh.cook_state(), CookState::Idle);

    // Cooking
    mesh.update_section(SectionId(0), 0, quad(4.0)).unwrap();
    mesh.tick();
    assert_eq!(mesh.cook_state(), CookState::Cooking);
    assert!(mesh.cook_collision_now().is_ok());
    assert_eq!(mesh.cook_state(), CookState::Idle);

    // The abandoned job finishing later changes nothing
    pool.process_jobs(usize::MAX);
    assert!(mesh.tick().is_empty());
    assert_eq!(mesh.cook_state(), CookState::Idle);
    assert_eq!(mesh.collision_mesh().unwrap().bounds().max.x, 4.0);
}

#[test]
fn test_failed_cook_keeps_previous_collision() {
    let mut mesh = mesh_with(CookingMode::SyncOnly, manual_pool());
    let watcher = Arc::new(CollisionWatcher::default());
    mesh.link_component(&watcher);

    add_collision_section(&mut mesh, 0, 1.0);
    mesh.tick();
    let first = mesh.collision_mesh().unwrap().generation();

    mesh.clear_all_sections();
    mesh.tick();

    assert_eq!(mesh.cook_state(), CookState::Idle);
    assert_eq!(mesh.collision_mesh().unwrap().generation(), first);
    assert_eq!(mesh.last_cook_failure(), Some(&CookError::EmptyGeometry));
    assert!(matches!(
        watcher.updates().last(),
        Some(MeshEvent::CollisionUpdated { succeeded: false, .. })
    ));
}

#[test]
fn test_use_complex_as_simple_toggle_recooks() {
    let mut mesh = RuntimeMesh::new(MeshConfig {
        cook_workers: Some(0),
        ..Default::default()
    });
    add_collision_section(&mut mesh, 0, 1.0);
    mesh.tick();
    assert!(mesh.collision_mesh().unwrap().simple_shape().is_none());

    mesh.set_use_complex_as_simple(false);
    assert_eq!(mesh.cook_state(), CookState::Pending);
    mesh.tick();
    assert!(mesh.collision_mesh().unwrap().simple_shape().is_some());
}
