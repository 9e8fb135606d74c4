//! Policy-driven initializer for Kubernetes objects
//!
//! Watches Deployments, Ingresses and Services, runs the mutators enabled for
//! each object's namespace on a private copy and submits the difference as a
//! conditional strategic merge patch. The same mutators can also be served as
//! a mutating admission webhook.

pub mod admission;
pub mod config;
pub mod context;
pub mod error;
pub mod event_source;
pub mod matcher;
pub mod mutate;
pub mod operator;
pub mod patch;
pub mod policy;
pub mod reconcile;
pub mod resource;
pub mod store;

pub use context::Context;
pub use error::{Error, Result};
pub use event_source::{EventKind, EventSource, KubeSource, ObjectEvent, PendingFilter};
pub use mutate::{Mutator, MutatorSet};
pub use operator::Operator;
pub use patch::{PatchDocument, SchemaHints, compute_patch};
pub use policy::{Feature, Policy};
pub use reconcile::{Outcome, reconcile};
pub use resource::{ManagedResource, ObjectKey, ResourceKind};
pub use store::{KubeStore, ObjectStore};
