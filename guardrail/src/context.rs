use std::sync::Arc;

use crate::mutate::MutatorSet;
use crate::policy::Policy;
use crate::store::ObjectStore;

/// Read-only state shared by every reconciliation
///
/// Built once at startup; concurrent reconciliations all see the same policy.
pub struct Context<S> {
    /// Store receiving the computed patches
    pub store: S,
    /// Validated policy snapshot
    pub policy: Arc<Policy>,
    /// Mutators applied to every object, in order
    pub mutators: Arc<MutatorSet>,
}

impl<S> Context<S>
where
    S: ObjectStore,
{
    pub fn new(store: S, policy: impl Into<Arc<Policy>>) -> Self {
        Self {
            store,
            policy: policy.into(),
            mutators: Arc::new(MutatorSet::default()),
        }
    }
}

impl<S> From<(S, Policy)> for Context<S>
where
    S: ObjectStore,
{
    fn from((store, policy): (S, Policy)) -> Self {
        Self::new(store, policy)
    }
}
