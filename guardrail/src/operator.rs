use std::collections::hash_map::DefaultHasher;
use std::error::Error as StdError;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::context::Context;
use crate::event_source::{EventSource, ObjectEvent};
use crate::reconcile::reconcile;
use crate::resource::ObjectKey;
use crate::store::ObjectStore;

/// Capacity of the channel between the sources and the dispatcher
const EVENT_BUFFER: usize = 256;

/// Capacity of each worker's queue
const WORKER_BUFFER: usize = 64;

/// Reconciliation loop fed by one or more event sources
///
/// Events for the same object always land on the same worker, so an object is
/// never reconciled twice at once while different objects proceed in parallel.
pub struct Operator<S> {
    context: Arc<Context<S>>,
    sources: Vec<Box<dyn EventSource>>,
    workers: usize,
}

impl<S> Operator<S>
where
    S: ObjectStore + 'static,
{
    /// Creates a new operator with a single worker
    pub fn new(context: Arc<Context<S>>) -> Self {
        Self {
            context,
            sources: Default::default(),
            workers: 1,
        }
    }

    /// Registers an event source
    ///
    /// Chain multiple calls to watch several resource kinds.
    #[must_use]
    pub fn source(mut self, source: impl EventSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Sets the number of concurrent workers, at least one
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Runs until every source finishes or `shutdown` resolves
    ///
    /// Events already handed to a worker are reconciled before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> crate::Result<()> {
        tracing::info!(
            sources = self.sources.len(),
            workers = self.workers,
            "starting operator"
        );

        let (events_tx, mut events_rx) = mpsc::channel::<ObjectEvent>(EVENT_BUFFER);

        let mut sources = JoinSet::new();
        for source in self.sources {
            let events = events_tx.clone();
            let span = tracing::info_span!("source", name = source.name());
            let task = async move {
                if let Err(err) = source.run(events).await {
                    tracing::error!(error = &err as &dyn StdError, "source failed");
                }
            };

            sources.spawn(task.instrument(span));
        }
        drop(events_tx);

        let mut workers = JoinSet::new();
        let queues = (0..self.workers)
            .map(|id| {
                let (tx, rx) = mpsc::channel(WORKER_BUFFER);
                let context = self.context.clone();
                let span = tracing::info_span!("worker", id);
                workers.spawn(work(rx, context).instrument(span));
                tx
            })
            .collect::<Vec<_>>();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, draining workers");
                    break;
                }
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("all sources finished");
                        break;
                    };
                    if !dispatch(&queues, event).await {
                        break;
                    }
                }
            }
        }

        sources.abort_all();
        drop(queues);
        workers.join_all().await;
        while sources.join_next().await.is_some() {}

        Ok(())
    }
}

/// Sends `event` to the worker owning its object
///
/// Returns false once workers stopped accepting events.
async fn dispatch(queues: &[mpsc::Sender<ObjectEvent>], event: ObjectEvent) -> bool {
    let key = match event.resource.key() {
        Ok(key) => key,
        Err(err) => {
            tracing::warn!(error = &err as &dyn StdError, "dropping unaddressable object");
            return true;
        }
    };

    queues[shard(&key, queues.len())].send(event).await.is_ok()
}

fn shard(key: &ObjectKey, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn work<S>(mut events: mpsc::Receiver<ObjectEvent>, context: Arc<Context<S>>)
where
    S: ObjectStore,
{
    while let Some(event) = events.recv().await {
        let span = tracing::info_span!(
            "reconcile",
            kind = %event.resource.kind(),
            namespace = event.resource.namespace(),
            name = event.resource.meta().name.as_deref(),
        );
        if let Err(err) = reconcile(&event.resource, &context).instrument(span).await {
            if err.is_transient() {
                tracing::warn!(event = ?event.kind, error = &err as &dyn StdError, "reconcile failed");
            } else {
                tracing::error!(event = ?event.kind, error = &err as &dyn StdError, "reconcile failed");
            }
        }
    }
}

#[doc(hidden)]
pub struct OperatorBuilder;

impl OperatorBuilder {
    /// Attach context to operator builder
    pub fn with_context<S>(self, context: impl Into<Context<S>>) -> Operator<S>
    where
        S: ObjectStore + 'static,
    {
        Operator::new(Arc::new(context.into()))
    }
}

impl Operator<()> {
    /// Start building an Operator
    #[must_use]
    pub const fn builder() -> OperatorBuilder {
        OperatorBuilder
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::event_source::EventKind;
    use crate::mutate::fixtures::{deployment, dev_policy, ingress, service};
    use crate::resource::ManagedResource;
    use crate::store::testing::{RecordingStore, Respond};

    /// Emits a fixed list of objects, then finishes
    struct StaticSource(Mutex<Vec<ManagedResource>>);

    impl StaticSource {
        fn new(resources: impl IntoIterator<Item = ManagedResource>) -> Self {
            Self(Mutex::new(resources.into_iter().collect()))
        }
    }

    #[async_trait]
    impl EventSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn run(&self, events: mpsc::Sender<ObjectEvent>) -> crate::Result<()> {
            let resources = std::mem::take(&mut *self.0.lock().unwrap());
            for resource in resources {
                let event = ObjectEvent {
                    kind: EventKind::Added,
                    resource,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    /// Never emits anything and never finishes
    struct IdleSource;

    #[async_trait]
    impl EventSource for IdleSource {
        fn name(&self) -> &'static str {
            "idle"
        }

        async fn run(&self, _events: mpsc::Sender<ObjectEvent>) -> crate::Result<()> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_shard_is_stable() {
        let key = ObjectKey {
            kind: crate::resource::ResourceKind::Route,
            namespace: "dev-1".to_string(),
            name: "web".to_string(),
        };
        assert_eq!(shard(&key, 4), shard(&key.clone(), 4));
        assert!(shard(&key, 4) < 4);
        assert_eq!(shard(&key, 1), 0);
    }

    #[tokio::test]
    async fn test_operator_reconciles_every_event() {
        let context = Arc::new(Context::new(RecordingStore::new(Respond::Accept), dev_policy()));
        let source = StaticSource::new([
            ManagedResource::from(ingress("dev-1")),
            ManagedResource::from(ingress("prod-1")),
            ManagedResource::from(service("dev-2", "NodePort", &[30080])),
            ManagedResource::from(deployment("dev-3", &["app"])),
        ]);

        Operator::new(context.clone())
            .source(source)
            .workers(3)
            .run(std::future::pending())
            .await
            .unwrap();

        let mut patched = context
            .store
            .recorded()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        patched.sort();
        assert_eq!(
            patched,
            ["Deployment/dev-3/web", "Ingress/dev-1/web", "Service/dev-2/web"]
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_workers() {
        let context = Arc::new(Context::new(RecordingStore::new(Respond::NotFound), dev_policy()));
        let source = StaticSource::new([
            ManagedResource::from(ingress("dev-1")),
            ManagedResource::from(ingress("dev-2")),
        ]);

        Operator::new(context.clone())
            .source(source)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(context.store.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_sources() {
        let operator = Operator::builder()
            .with_context((RecordingStore::new(Respond::Accept), dev_policy()))
            .source(IdleSource)
            .workers(2);

        operator.run(async {}).await.unwrap();
    }
}
