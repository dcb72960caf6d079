//! Model state and read-only snapshots of it

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::loader::LoadedModel;

/// Load state of the served model
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Failed { error: String },
}

impl ModelState {
    pub fn name(&self) -> &'static str {
        match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ModelState::Loading)
    }
}

/// Copy of the controller state at one instant
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub state: ModelState,
    /// Total load attempts made so far
    pub load_attempts: u32,
    /// Most recent failure message, truncated
    pub last_error: Option<String>,
    /// Name of the loaded architecture
    pub architecture: Option<String>,
    pub loading_started_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn model_loaded(&self) -> bool {
        self.state.is_ready()
    }

    pub fn model_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Error to report: the permanent failure, or the last retried one
    pub fn model_load_error(&self) -> Option<&str> {
        match &self.state {
            ModelState::Failed { error } => Some(error),
            ModelState::Ready => None,
            _ => self.last_error.as_deref(),
        }
    }
}

/// Whether a request can be served right now
#[derive(Clone)]
pub enum Availability {
    Ready(Arc<LoadedModel>),
    Loading,
    Failed(String),
    NotLoaded,
}

impl std::fmt::Debug for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Ready(model) => write!(f, "Ready({})", model.architecture),
            Availability::Loading => write!(f, "Loading"),
            Availability::Failed(e) => write!(f, "Failed({})", e),
            Availability::NotLoaded => write!(f, "NotLoaded"),
        }
    }
}
