//! # Runmesh Core
//!
//! Owner-side foundation of the Runmesh runtime mesh system.
//!
//! This crate provides the pieces shared by the render and collision pipelines:
//! - **Sections**: per-LOD geometry, flags and generation stamps
//! - **Section Store**: authoritative, validated section state on the owner context
//! - **Commands**: immutable change descriptions for the render context
//! - **Command Channel**: ordered, non-blocking owner → renderer delivery
//! - **Job Pool**: worker threads for background cooking
//! - **Notification Fan-out**: weakly-held listeners sharing one mesh

pub mod channel;
pub mod command;
pub mod job;
pub mod math;
pub mod notify;
pub mod section;
pub mod store;

pub use channel::{command_channel, CommandReceiver, CommandSender};
pub use command::{MeshCommand, ScreenSizes, SectionCreate};
pub use job::{Job, JobHandle, JobPool, JobPoolConfig};
pub use notify::{ListenerId, ListenerRegistry, MeshEvent, MeshListener};
pub use section::{
    Generation, Section, SectionFlags, SectionId, SectionLod, UpdateFrequency, MAX_LODS,
    MAX_UV_CHANNELS,
};
pub use store::{Mutation, SectionStore};

use thiserror::Error;

/// Section store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Section not found: {0}")]
    SectionNotFound(SectionId),

    #[error("Section already exists: {0}")]
    SectionAlreadyExists(SectionId),

    #[error("LOD index {lod_index} out of range for section {section} with {num_lods} LODs")]
    LodIndexOutOfRange {
        section: SectionId,
        lod_index: usize,
        num_lods: usize,
    },

    #[error("Geometry size mismatch: {0}")]
    GeometrySizeMismatch(String),

    #[error("Too many LODs: {count} exceeds the limit of {limit}")]
    TooManyLods { count: usize, limit: usize },
}

/// Result type for section operations
pub type MeshResult<T> = Result<T, MeshError>;
