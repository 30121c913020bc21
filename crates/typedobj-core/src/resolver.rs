//! Collaborator interface to the naming authority that resolves ids.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::IdReferenceErrorKind;
use crate::idref::IdReferenceType;

/// One id to resolve, with every allowed-type list it accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Raw id text.
    pub id: String,
    /// Allowed-type lists; the target must satisfy each one.
    pub allowed_types: Vec<Vec<String>>,
}

/// Canonical form and concrete type of a resolved id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Canonical replacement text.
    pub id: String,
    /// Concrete type of the target.
    #[serde(rename = "type")]
    pub target_type: String,
}

impl ResolvedTarget {
    /// Creates a resolved target.
    pub fn new(id: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_type: target_type.into(),
        }
    }
}

/// Why the authority refused one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// The id names nothing.
    NotFound,
    /// The caller may not reference the target.
    NotAuthorized(String),
    /// The id text is malformed for this type.
    Unparseable(String),
}

impl From<ResolutionFailure> for IdReferenceErrorKind {
    fn from(failure: ResolutionFailure) -> Self {
        match failure {
            ResolutionFailure::NotFound => IdReferenceErrorKind::NotFound,
            ResolutionFailure::NotAuthorized(reason) => IdReferenceErrorKind::NotAuthorized(reason),
            ResolutionFailure::Unparseable(reason) => IdReferenceErrorKind::Unparseable(reason),
        }
    }
}

/// The authority failed as a whole (unreachable, timed out).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ResolverError(pub String);

/// Per-id outcome list returned by [`IdResolver::resolve`].
pub type Resolutions = Vec<(String, Result<ResolvedTarget, ResolutionFailure>)>;

/// Batch resolution of ids of one type. Called once per type per batch.
pub trait IdResolver: Send {
    /// Resolves every request; ids missing from the result count as not found.
    fn resolve(
        &self,
        id_type: &IdReferenceType,
        requests: &[ResolutionRequest],
    ) -> Result<Resolutions, ResolverError>;
}

/// Map-backed resolver for tests and offline use.
#[derive(Debug, Default)]
pub struct StaticResolver {
    targets: BTreeMap<String, ResolvedTarget>,
    denied: BTreeMap<String, String>,
    calls: AtomicUsize,
}

impl StaticResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a resolver from `raw id -> target` pairs.
    pub fn from_targets(targets: impl IntoIterator<Item = (String, ResolvedTarget)>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Adds a resolvable id.
    pub fn with_target(
        mut self,
        raw: impl Into<String>,
        canonical: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        self.targets
            .insert(raw.into(), ResolvedTarget::new(canonical, target_type));
        self
    }

    /// Adds an id the caller may not reference.
    pub fn with_denied(mut self, raw: impl Into<String>, reason: impl Into<String>) -> Self {
        self.denied.insert(raw.into(), reason.into());
        self
    }

    /// Number of `resolve` calls served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdResolver for StaticResolver {
    fn resolve(
        &self,
        _id_type: &IdReferenceType,
        requests: &[ResolutionRequest],
    ) -> Result<Resolutions, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(requests
            .iter()
            .map(|request| {
                let outcome = match (self.denied.get(&request.id), self.targets.get(&request.id)) {
                    (Some(reason), _) => Err(ResolutionFailure::NotAuthorized(reason.clone())),
                    (None, Some(target)) => Ok(target.clone()),
                    (None, None) => Err(ResolutionFailure::NotFound),
                };
                (request.id.clone(), outcome)
            })
            .collect())
    }
}

impl<R: IdResolver + Sync> IdResolver for std::sync::Arc<R> {
    fn resolve(
        &self,
        id_type: &IdReferenceType,
        requests: &[ResolutionRequest],
    ) -> Result<Resolutions, ResolverError> {
        (**self).resolve(id_type, requests)
    }
}
