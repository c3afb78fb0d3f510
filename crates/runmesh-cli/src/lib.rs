//! # Runmesh CLI
//!
//! Command-line driver for the Runmesh runtime mesh system.
//!
//! ## Commands
//! - `stress` - Mutate sections every frame against a live render thread
//! - `cook` - Cook a generated grid into collision and time it
//! - `config` - Print the default mesh configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use runmesh::{
    CookState, CookingMode, MeshConfig, RenderContext, RenderContextConfig, RuntimeMesh,
    SectionFlags, SectionId, SectionLod, UpdateFrequency, Vec3, ViewRelevance,
};
use serde::Serialize;

/// How long to wait for background cooks to settle
const COOK_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runmesh runtime mesh CLI
#[derive(Parser)]
#[command(name = "runmesh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Mesh configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Mutate sections every frame while a render thread applies the changes
    Stress {
        /// Number of sections
        #[arg(short, long, default_value = "64")]
        sections: u32,

        /// Number of frames to simulate
        #[arg(short, long, default_value = "120")]
        frames: u32,

        /// Cook collision on worker threads
        #[arg(long)]
        async_cook: bool,
    },

    /// Cook a generated grid section into collision
    Cook {
        /// Approximate number of triangles
        #[arg(short, long, default_value = "20000")]
        triangles: u32,

        /// Cook collision on worker threads
        #[arg(long)]
        async_cook: bool,
    },

    /// Print the default mesh configuration as JSON
    Config,
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MeshConfig::default(),
    };

    match cli.command {
        Commands::Stress { sections, frames, async_cook } => {
            log::info!("Stressing {} sections for {} frames...", sections, frames);
            let report = run_stress(with_cooking(config, async_cook), sections, frames)?;
            log::info!("Stress complete!");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Cook { triangles, async_cook } => {
            log::info!("Cooking a grid of about {} triangles...", triangles);
            let report = run_cook(with_cooking(config, async_cook), triangles)?;
            log::info!("Cook complete in {:.2} ms", report.cook_ms);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Load a mesh configuration file
pub fn load_config(path: &Path) -> Result<MeshConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

fn with_cooking(mut config: MeshConfig, async_cook: bool) -> MeshConfig {
    if async_cook {
        config.cook.cooking_mode = CookingMode::AsyncPreferred;
    }
    config
}

/// Outcome of a stress run
#[derive(Debug, Serialize)]
pub struct StressReport {
    pub frames: u32,
    pub store_sections: usize,
    pub proxy_sections: usize,
    pub commands_submitted: u64,
    pub has_static_sections: bool,
    pub has_dynamic_sections: bool,
    pub has_shadowed_sections: bool,
    pub cooks_started: u64,
    pub cooks_installed: u64,
    pub cooks_discarded: u64,
    pub collision_faces: usize,
    pub elapsed_ms: f64,
}

/// Drive a mesh against a threaded render context
pub fn run_stress(config: MeshConfig, sections: u32, frames: u32) -> Result<StressReport> {
    let start = Instant::now();
    let context = RenderContext::spawn(RenderContextConfig::default())?;
    let queue = context.queue();
    let mut mesh = RuntimeMesh::new(config);
    let proxy = mesh.create_render_proxy(&queue);

    for id in 0..sections {
        let frequency = if id % 4 == 0 {
            UpdateFrequency::Infrequent
        } else {
            UpdateFrequency::Frequent
        };
        mesh.create_section(
            SectionId(id),
            vec![grid(2, 1.0 + id as f32), grid(1, 1.0 + id as f32)],
            id % 2 == 0,
            frequency,
            SectionFlags::defaults_for(frequency),
        )?;
    }

    for frame in 0..frames {
        let scale = 1.0 + (frame % 8) as f32 * 0.25;
        for id in (frame % 3..sections).step_by(3) {
            if mesh.does_section_exist(SectionId(id)) {
                mesh.update_section(SectionId(id), 0, grid(2, scale))?;
            }
        }

        // Churn one section per frame through delete and recreate
        if sections > 0 {
            let churned = SectionId(frame % sections);
            if mesh.does_section_exist(churned) {
                mesh.delete_section(churned)?;
            } else {
                mesh.set_mesh_section(churned, grid(2, scale), true, UpdateFrequency::Frequent)?;
            }
        }

        mesh.tick();
    }

    settle(&mut mesh)?;

    let store_sections = mesh.num_sections();
    let (proxy_sections, relevance) = context
        .query(move |token, scene| {
            scene
                .proxy(proxy)
                .map(|p| (p.num_sections(), p.summarize(token)))
                .unwrap_or((0, ViewRelevance::default()))
        })
        .context("Render context stopped")?;

    if proxy_sections != store_sections {
        bail!(
            "Render proxy has {} sections, store has {}",
            proxy_sections,
            store_sections
        );
    }

    let stats = mesh.cook_stats();
    let report = StressReport {
        frames,
        store_sections,
        proxy_sections,
        commands_submitted: queue.stats().submitted(),
        has_static_sections: relevance.has_static_sections,
        has_dynamic_sections: relevance.has_dynamic_sections,
        has_shadowed_sections: relevance.has_shadowed_sections,
        cooks_started: stats.started,
        cooks_installed: stats.installed,
        cooks_discarded: stats.discarded,
        collision_faces: mesh.collision_mesh().map_or(0, |c| c.num_faces()),
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    drop(mesh);
    context.shutdown();
    Ok(report)
}

/// Outcome of a cook run
#[derive(Debug, Serialize)]
pub struct CookReport {
    pub triangles: usize,
    pub vertices: usize,
    pub async_cook: bool,
    pub cook_ms: f64,
}

/// Cook one grid section and time it
pub fn run_cook(config: MeshConfig, triangles: u32) -> Result<CookReport> {
    let async_cook = config.cook.cooking_mode == CookingMode::AsyncPreferred;
    let cells = ((triangles.max(2) / 2) as f32).sqrt().ceil() as u32;
    let mut mesh = RuntimeMesh::new(config);

    let start = Instant::now();
    mesh.set_mesh_section(SectionId(0), grid(cells, 1.0), true, UpdateFrequency::Infrequent)?;
    if async_cook {
        settle(&mut mesh)?;
    } else {
        mesh.cook_collision_now()?;
    }
    let cook_ms = start.elapsed().as_secs_f64() * 1000.0;

    let collision = mesh
        .collision_mesh()
        .context("No collision mesh was installed")?;

    Ok(CookReport {
        triangles: collision.num_faces(),
        vertices: collision.num_vertices(),
        async_cook,
        cook_ms,
    })
}

/// Tick until the cook queue is idle
fn settle(mesh: &mut RuntimeMesh) -> Result<()> {
    let deadline = Instant::now() + COOK_SETTLE_TIMEOUT;
    while mesh.needs_tick() {
        mesh.tick();
        if mesh.cook_state() == CookState::Cooking {
            if Instant::now() > deadline {
                bail!("Collision cook did not finish within {:?}", COOK_SETTLE_TIMEOUT);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
    if let Some(error) = mesh.last_cook_failure() {
        log::warn!("Last collision cook failed: {}", error);
    }
    Ok(())
}

/// Flat grid of `cells` x `cells` quads in the XZ plane
pub fn grid(cells: u32, size: f32) -> SectionLod {
    let cells = cells.max(1);
    let step = size / cells as f32;
    let row = cells + 1;

    let positions = (0..row * row)
        .map(|i| Vec3::new((i % row) as f32 * step, 0.0, (i / row) as f32 * step))
        .collect();

    let mut indices = Vec::with_capacity((cells * cells * 6) as usize);
    for z in 0..cells {
        for x in 0..cells {
            let i = z * row + x;
            indices.extend_from_slice(&[i, i + row, i + 1, i + 1, i + row, i + row + 1]);
        }
    }

    SectionLod::new(positions, indices)
}
