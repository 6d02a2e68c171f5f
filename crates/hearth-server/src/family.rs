//! Family membership lookup and group resolution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_core::{FamilyId, UserId};
use thiserror::Error;
use tracing::{debug, info};

/// Failure talking to the membership source.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The membership file could not be read.
    #[error("failed to read memberships: {0}")]
    Io(#[from] std::io::Error),
    /// The membership file is not `{ "<user>": ["<family>", ...] }`.
    #[error("failed to parse memberships: {0}")]
    Json(#[from] serde_json::Error),
    /// The backing service did not answer.
    #[error("membership directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for which families a user belongs to.
#[async_trait]
pub trait FamilyDirectory: Send + Sync {
    /// Families `user` is a member of, in any order.
    async fn families_for_user(&self, user: UserId) -> Result<Vec<FamilyId>, DirectoryError>;
}

/// Membership table held in memory, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryFamilyDirectory {
    memberships: DashMap<UserId, Vec<FamilyId>>,
}

impl InMemoryFamilyDirectory {
    /// Empty directory: every user resolves to `NoFamily`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{ "<user uuid>": ["<family uuid>", ...] }`.
    pub fn from_json_str(json: &str) -> Result<Self, DirectoryError> {
        let table: HashMap<UserId, Vec<FamilyId>> = serde_json::from_str(json)?;
        let directory = Self::new();
        for (user, families) in table {
            for family in families {
                directory.add_member(user, family);
            }
        }
        Ok(directory)
    }

    /// Load a membership file.
    pub fn load_from_file(path: &Path) -> Result<Self, DirectoryError> {
        debug!(?path, "loading family memberships");
        let directory = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(?path, users = directory.memberships.len(), "family memberships loaded");
        Ok(directory)
    }

    /// Record that `user` belongs to `family`. Duplicate entries are ignored.
    pub fn add_member(&self, user: UserId, family: FamilyId) {
        let mut families = self.memberships.entry(user).or_default();
        if !families.contains(&family) {
            families.push(family);
        }
    }

    /// Remove `user` from `family`.
    pub fn remove_member(&self, user: UserId, family: FamilyId) {
        if let Some(mut families) = self.memberships.get_mut(&user) {
            families.retain(|f| *f != family);
        }
        let _ = self.memberships.remove_if(&user, |_, families| families.is_empty());
    }
}

#[async_trait]
impl FamilyDirectory for InMemoryFamilyDirectory {
    async fn families_for_user(&self, user: UserId) -> Result<Vec<FamilyId>, DirectoryError> {
        Ok(self
            .memberships
            .get(&user)
            .map(|families| families.clone())
            .unwrap_or_default())
    }
}

/// Why a user could not be mapped to a single family group.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The user belongs to no family.
    #[error("user {user} belongs to no family")]
    NoFamily {
        /// User being resolved.
        user: UserId,
    },
    /// The user belongs to several families and none was named.
    #[error("user {user} belongs to {count} families; a target family is required")]
    Ambiguous {
        /// User being resolved.
        user: UserId,
        /// Number of memberships.
        count: usize,
    },
    /// The named family is not one of the user's.
    #[error("user {user} is not a member of family {family}")]
    NotMember {
        /// User being resolved.
        user: UserId,
        /// Requested family.
        family: FamilyId,
    },
    /// The directory lookup failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl ResolutionError {
    /// Short label for close frames and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoFamily { .. } => "no_family",
            Self::Ambiguous { .. } => "ambiguous_family",
            Self::NotMember { .. } => "not_a_member",
            Self::Directory(_) => "directory_unavailable",
        }
    }
}

/// Maps a user to the family whose group they broadcast to and listen on.
pub struct FamilyGroupResolver {
    directory: Arc<dyn FamilyDirectory>,
}

impl FamilyGroupResolver {
    /// Resolve through `directory`.
    pub fn new(directory: Arc<dyn FamilyDirectory>) -> Self {
        Self { directory }
    }

    /// The user's only family.
    pub async fn resolve(&self, user: UserId) -> Result<FamilyId, ResolutionError> {
        self.resolve_for(user, None).await
    }

    /// The user's family, or `target` when given and the user belongs to it.
    ///
    /// - no families: [`ResolutionError::NoFamily`]
    /// - `target` given: it must be one of the user's families
    /// - no `target`: exactly one family, otherwise [`ResolutionError::Ambiguous`]
    pub async fn resolve_for(
        &self,
        user: UserId,
        target: Option<FamilyId>,
    ) -> Result<FamilyId, ResolutionError> {
        let families = self.directory.families_for_user(user).await?;
        match (families.as_slice(), target) {
            ([], _) => Err(ResolutionError::NoFamily { user }),
            (all, Some(family)) if all.contains(&family) => Ok(family),
            (_, Some(family)) => Err(ResolutionError::NotMember { user, family }),
            ([only], None) => Ok(*only),
            (all, None) => Err(ResolutionError::Ambiguous {
                user,
                count: all.len(),
            }),
        }
    }
}
