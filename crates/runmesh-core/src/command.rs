//! Mesh Commands
//!
//! Immutable descriptions of a single section or LOD change, produced by the
//! section store after validation and consumed on the render context.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::section::{Generation, SectionFlags, SectionId, SectionLod, UpdateFrequency, MAX_LODS};

/// Everything the render side needs to build a section
#[derive(Debug, Clone)]
pub struct SectionCreate {
    pub lods: Vec<Arc<SectionLod>>,
    pub update_frequency: UpdateFrequency,
    pub flags: SectionFlags,
}

/// LOD screen-size thresholds shared by all sections of a mesh
pub type ScreenSizes = SmallVec<[f32; MAX_LODS]>;

/// One change to apply to a render proxy
#[derive(Debug, Clone)]
pub enum MeshCommand {
    CreateSection {
        section: SectionId,
        generation: Generation,
        payload: Arc<SectionCreate>,
    },
    UpdateGeometry {
        section: SectionId,
        generation: Generation,
        lod_index: usize,
        geometry: Arc<SectionLod>,
    },
    UpdateProperties {
        section: SectionId,
        generation: Generation,
        flags: SectionFlags,
    },
    DeleteSection {
        section: SectionId,
        generation: Generation,
    },
    SetScreenSizes {
        generation: Generation,
        sizes: ScreenSizes,
    },
}

impl MeshCommand {
    /// Section targeted by the command, `None` for mesh-wide commands
    pub fn section(&self) -> Option<SectionId> {
        match self {
            Self::CreateSection { section, .. }
            | Self::UpdateGeometry { section, .. }
            | Self::UpdateProperties { section, .. }
            | Self::DeleteSection { section, .. } => Some(*section),
            Self::SetScreenSizes { .. } => None,
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            Self::CreateSection { generation, .. }
            | Self::UpdateGeometry { generation, .. }
            | Self::UpdateProperties { generation, .. }
            | Self::DeleteSection { generation, .. }
            | Self::SetScreenSizes { generation, .. } => *generation,
        }
    }

    /// Whether applying the command changes which sections exist or how they are drawn
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::UpdateGeometry { .. })
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateSection { .. } => "create_section",
            Self::UpdateGeometry { .. } => "update_geometry",
            Self::UpdateProperties { .. } => "update_properties",
            Self::DeleteSection { .. } => "delete_section",
            Self::SetScreenSizes { .. } => "set_screen_sizes",
        }
    }
}
