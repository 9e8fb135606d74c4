//! Single-object reconciliation
//!
//! `Received -> Copied -> Mutated -> Diffed -> (NoOp | Submitted) -> Done`,
//! any step may end in `Failed`. The patch is computed completely before the
//! store is contacted, so a failure before submission leaves the cluster as it
//! was.

use std::error::Error as StdError;

use tracing::{debug, info, warn};

use crate::Result;
use crate::context::Context;
use crate::mutate::MutatorSet;
use crate::patch::{PatchDocument, SchemaHints, compute_value_patch};
use crate::policy::Policy;
use crate::resource::ManagedResource;
use crate::store::ObjectStore;

/// Steps of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Copied,
    Mutated,
    Diffed,
    NoOp,
    Submitted,
    Done,
    Failed,
}

/// How a successful reconciliation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to change, the store was not contacted
    NoOp,
    /// The store accepted a patch
    Patched,
}

/// Original object and its working copy for one reconciliation
pub struct MutationContext<'a> {
    original: &'a ManagedResource,
    working: ManagedResource,
    policy: &'a Policy,
    phase: Phase,
}

impl<'a> MutationContext<'a> {
    /// Takes the working copy; `original` is never modified
    pub fn new(original: &'a ManagedResource, policy: &'a Policy) -> Self {
        Self {
            original,
            working: original.clone(),
            policy,
            phase: Phase::Copied,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn original(&self) -> &ManagedResource {
        self.original
    }

    pub fn working(&self) -> &ManagedResource {
        &self.working
    }

    /// Runs the applicable mutators on the working copy
    pub fn mutate(&mut self, mutators: &MutatorSet) -> Vec<&'static str> {
        let applied = mutators.apply(&mut self.working, self.policy);
        self.phase = Phase::Mutated;
        applied
    }

    /// Strategic merge patch from the original to the working copy
    pub fn diff(&mut self) -> Result<PatchDocument> {
        let hints = SchemaHints::for_kind(self.original.kind());
        let result = self.original.to_value().and_then(|original| {
            let working = self.working.to_value()?;
            compute_value_patch(&original, &working, &hints)
        });

        self.phase = match &result {
            Ok(patch) if patch.is_empty() => Phase::NoOp,
            Ok(_) => Phase::Diffed,
            Err(_) => Phase::Failed,
        };
        result
    }
}

/// Brings one observed object in line with the policy
pub async fn reconcile<S>(resource: &ManagedResource, context: &Context<S>) -> Result<Outcome>
where
    S: ObjectStore,
{
    let key = resource.key()?;
    debug!(phase = ?Phase::Received, %key, "reconciling");

    let mut mutation = MutationContext::new(resource, &context.policy);
    let applied = mutation.mutate(&context.mutators);

    let patch = match mutation.diff() {
        Ok(patch) => patch,
        Err(err) => {
            warn!(
                %key,
                phase = ?Phase::Failed,
                error = &err as &dyn StdError,
                "patch computation failed"
            );
            return Err(err);
        }
    };

    if mutation.phase() == Phase::NoOp {
        debug!(%key, mutators = ?applied, "object already conforms");
        return Ok(Outcome::NoOp);
    }

    let patch = match resource.resource_version() {
        Some(version) => patch.with_precondition(version),
        None => patch,
    };

    debug!(%key, phase = ?Phase::Submitted, fields = patch.len(), "submitting patch");
    context.store.patch(&key, &patch).await?;

    info!(%key, phase = ?Phase::Done, mutators = ?applied, "patched object");
    Ok(Outcome::Patched)
}
