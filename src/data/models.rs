//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Repo
// =============================================================================

/// A GitHub repository tracked by one user
///
/// `owner_id` is the GitHub user ID of the trainyard user, `owner` is the
/// GitHub login owning the repository itself.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Repo {
    pub id: String,
    #[serde(skip_serializing)]
    pub owner_id: i64,
    pub github_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub html_url: String,
    pub description: Option<String>,
    pub default_branch: Option<String>,
    /// Whether a push webhook is registered on GitHub
    pub hooked: bool,
    #[serde(skip_serializing)]
    pub hook_id: Option<i64>,
    /// Last webhook event name (e.g. "push")
    pub last_event: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Model
// =============================================================================

/// Training state of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Never trained
    Idle,
    /// Training requested
    Training,
    /// The bound repository changed since the last training request
    Stale,
}

/// A model trained from a repository
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Model {
    pub id: String,
    #[serde(skip_serializing)]
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Bound repository ID
    pub repo_id: Option<String>,
    pub status: ModelStatus,
    pub training_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
