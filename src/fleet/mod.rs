//! # Fleet
//!
//! The managed fleet as seen by the controller: worker units, their keys, the
//! watch event protocol and the [`FleetApi`] seam to the external inventory
//! service.
//!
//! - `kubernetes`: [`FleetApi`] backed by Kubernetes pods
//! - `memory`: in-memory [`FleetApi`] used by tests and local runs

pub mod kubernetes;
pub mod memory;

use crate::constants::{
    MAINTENANCE_APPROVED_ANNOTATION, MAINTENANCE_APPROVED_VALUE,
    MAINTENANCE_IN_PROGRESS_ANNOTATION, NEEDS_MAINTENANCE_ANNOTATION,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use kubernetes::KubeFleet;
pub use memory::InMemoryFleet;

/// Errors returned by the fleet inventory service
#[derive(Debug, Error)]
pub enum FleetError {
    /// The write was based on a stale copy of the unit
    #[error("conflicting update for {key}: unit changed since it was read")]
    Conflict { key: String },
    /// The unit no longer exists in the fleet service
    #[error("unit {key} not found")]
    NotFound { key: String },
    /// The fleet service could not be reached or refused the request
    #[error("fleet service unavailable: {0}")]
    Unavailable(String),
    /// An object from the fleet service could not be turned into a worker unit
    #[error("invalid fleet object: {0}")]
    InvalidObject(String),
    /// Any other Kubernetes API failure
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    /// The watch stream reported an error (the stream itself keeps retrying)
    #[error("watch error: {0}")]
    Watch(String),
}

/// A key that does not identify a worker unit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed unit key {key:?}: expected <namespace>/<name>")]
pub struct KeyError {
    pub key: String,
}

/// Namespace-qualified reference to a worker unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    pub namespace: String,
    pub name: String,
}

impl UnitKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split a `<namespace>/<name>` key into its parts
    ///
    /// Both parts must be non-empty and the name may not contain another `/`.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(KeyError {
                key: key.to_string(),
            }),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One disruptable member of the fleet
///
/// A missing annotation map on the source object is represented as an empty
/// map, so callers never have to special-case it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerUnit {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    /// Whether the unit currently reports itself as ready to serve
    pub ready: bool,
    /// Version of the object this copy was read at, used for conditional writes
    pub resource_version: Option<String>,
}

impl WorkerUnit {
    /// A ready unit without annotations
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            annotations: BTreeMap::new(),
            ready: true,
            resource_version: None,
        }
    }

    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// The queue key for this unit (`<namespace>/<name>`)
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn unit_key(&self) -> UnitKey {
        UnitKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.contains_key(annotation)
    }

    pub fn needs_maintenance(&self) -> bool {
        self.has_annotation(NEEDS_MAINTENANCE_ANNOTATION)
    }

    pub fn maintenance_approved(&self) -> bool {
        self.has_annotation(MAINTENANCE_APPROVED_ANNOTATION)
    }

    pub fn maintenance_in_progress(&self) -> bool {
        self.has_annotation(MAINTENANCE_IN_PROGRESS_ANNOTATION)
    }

    /// Whether this unit counts against the admission budget
    ///
    /// Approved-but-not-started units count too, otherwise a burst of
    /// approvals could race ahead of the agents executing them.
    pub fn is_unavailable(&self) -> bool {
        !self.ready || self.maintenance_in_progress() || self.maintenance_approved()
    }

    /// Copy of this unit carrying the approval annotation
    #[must_use]
    pub fn approved_copy(&self) -> Self {
        self.clone().with_annotation(
            MAINTENANCE_APPROVED_ANNOTATION,
            MAINTENANCE_APPROVED_VALUE,
        )
    }
}

/// A unit that left the fleet
///
/// Deletions observed directly carry the last known state. Deletions inferred
/// while re-listing only know the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletedUnit {
    Final(WorkerUnit),
    Tombstone { key: String },
}

impl DeletedUnit {
    /// Key of the deleted unit, available for both variants
    pub fn key(&self) -> String {
        match self {
            DeletedUnit::Final(unit) => unit.key(),
            DeletedUnit::Tombstone { key } => key.clone(),
        }
    }
}

/// Change notifications delivered by [`FleetApi::watch`]
///
/// A (re)list is framed by `Init` .. `InitDone` with one `InitApply` per unit;
/// afterwards live changes arrive as `Apply` and `Delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Init,
    InitApply(WorkerUnit),
    InitDone,
    Apply(WorkerUnit),
    Delete(DeletedUnit),
}

/// Stream of watch events; errors are reported but do not end the stream
pub type FleetWatchStream = BoxStream<'static, Result<FleetEvent, FleetError>>;

/// The external fleet inventory service
#[async_trait]
pub trait FleetApi: Send + Sync + fmt::Debug {
    /// List-then-watch the fleet partition
    ///
    /// Disconnects are retried inside the stream; consumers simply keep polling.
    fn watch(&self) -> FleetWatchStream;

    /// Conditionally write the unit's annotations back to the fleet
    ///
    /// Fails with [`FleetError::Conflict`] if the unit changed since
    /// `unit.resource_version` was read.
    async fn update(&self, unit: &WorkerUnit) -> Result<WorkerUnit, FleetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_key() {
        let key = UnitKey::parse("default/worker-0").unwrap();
        assert_eq!(key.namespace, "default");
        assert_eq!(key.name, "worker-0");
        assert_eq!(key.to_string(), "default/worker-0");
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for key in ["not-a-valid-key", "/name", "ns/", "", "a/b/c", "/"] {
            assert!(UnitKey::parse(key).is_err(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn test_unavailable_predicate() {
        let unit = WorkerUnit::new("default", "a");
        assert!(!unit.is_unavailable());
        assert!(unit.clone().with_ready(false).is_unavailable());
        assert!(unit
            .clone()
            .with_annotation(MAINTENANCE_IN_PROGRESS_ANNOTATION, "")
            .is_unavailable());
        assert!(unit.approved_copy().is_unavailable());
        assert!(!unit
            .with_annotation(NEEDS_MAINTENANCE_ANNOTATION, "")
            .is_unavailable());
    }

    #[test]
    fn test_approved_copy_leaves_source_untouched() {
        let unit = WorkerUnit::new("default", "a").with_annotation(NEEDS_MAINTENANCE_ANNOTATION, "");
        let approved = unit.approved_copy();
        assert!(!unit.maintenance_approved());
        assert!(approved.maintenance_approved());
        assert!(approved.needs_maintenance());
    }

    #[test]
    fn test_tombstone_key() {
        let deleted = DeletedUnit::Tombstone {
            key: "default/gone".to_string(),
        };
        assert_eq!(deleted.key(), "default/gone");
        let deleted = DeletedUnit::Final(WorkerUnit::new("default", "gone"));
        assert_eq!(deleted.key(), "default/gone");
    }
}
