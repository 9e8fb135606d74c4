use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::pin::pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::Result;
use crate::resource::ManagedResource;

/// Annotation that marks an object for initialization when annotations are required
pub const DEFAULT_ANNOTATION: &str = "initializer.suker200.guthub.com/nodeselector";

/// Kind of change observed for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// First time the object is seen
    Added,
    /// The object was seen before and changed
    Modified,
}

/// An object's observed state, delivered to the reconciliation loop
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub kind: EventKind,
    pub resource: ManagedResource,
}

/// Decides which observed objects still need initialization
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    /// Only objects carrying this annotation are delivered
    pub required_annotation: Option<String>,
}

impl PendingFilter {
    pub fn is_pending(&self, resource: &ManagedResource) -> bool {
        if resource.is_terminating() {
            return false;
        }

        self.required_annotation
            .as_deref()
            .is_none_or(|annotation| resource.has_annotation(annotation))
    }
}

/// Producer of object events
///
/// Sources run until they fail or the receiving side of the channel is dropped.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Returns the name of this source for logging purposes
    fn name(&self) -> &'static str;

    async fn run(&self, events: mpsc::Sender<ObjectEvent>) -> Result<()>;
}

/// Watches one resource kind across all namespaces
pub struct KubeSource<K> {
    client: Client,
    filter: PendingFilter,
    _phantom: PhantomData<fn() -> K>,
}

impl<K> KubeSource<K> {
    pub const fn new(client: Client, filter: PendingFilter) -> Self {
        Self {
            client,
            filter,
            _phantom: PhantomData,
        }
    }
}

/// Tracks which objects were already delivered, by UID
///
/// A relist replaces the tracked set, so objects deleted while the watch was
/// down are forgotten.
#[derive(Default)]
struct Sightings {
    seen: HashSet<String>,
    relist: Option<HashSet<String>>,
}

impl Sightings {
    fn classify(&mut self, uid: Option<&str>) -> EventKind {
        let Some(uid) = uid else {
            return EventKind::Added;
        };

        if let Some(relist) = &mut self.relist {
            relist.insert(uid.to_string());
        }
        if self.seen.insert(uid.to_string()) {
            EventKind::Added
        } else {
            EventKind::Modified
        }
    }

    fn forget(&mut self, uid: Option<&str>) {
        if let Some(uid) = uid {
            self.seen.remove(uid);
        }
    }

    fn begin_relist(&mut self) {
        self.relist = Some(HashSet::new());
    }

    fn finish_relist(&mut self) {
        if let Some(relist) = self.relist.take() {
            self.seen = relist;
        }
    }
}

#[async_trait]
impl<K> EventSource for KubeSource<K>
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default,
    ManagedResource: From<K>,
{
    fn name(&self) -> &'static str {
        std::any::type_name::<K>()
            .rsplit("::")
            .next()
            .unwrap_or("resource")
    }

    async fn run(&self, events: mpsc::Sender<ObjectEvent>) -> Result<()> {
        let api = Api::<K>::all(self.client.clone());
        let stream = watcher::watcher(api, WatcherConfig::default()).default_backoff();

        tracing::info!(source = self.name(), "watching all namespaces");
        forward(self.name(), &self.filter, stream, events).await;

        Ok(())
    }
}

/// Delivers pending objects from a watch stream until the stream ends or the
/// channel closes
///
/// Watch errors are logged and skipped; the backoff wrapped around the
/// watcher delays the retry.
async fn forward<K, St>(
    source: &'static str,
    filter: &PendingFilter,
    stream: St,
    events: mpsc::Sender<ObjectEvent>,
) where
    K: Resource,
    ManagedResource: From<K>,
    St: Stream<Item = std::result::Result<Event<K>, watcher::Error>>,
{
    let mut stream = pin!(stream);
    let mut seen = Sightings::default();

    while let Some(event) = stream.next().await {
        let object = match event {
            Ok(Event::Apply(object) | Event::InitApply(object)) => object,
            Ok(Event::Delete(object)) => {
                seen.forget(object.meta().uid.as_deref());
                continue;
            }
            Ok(Event::Init) => {
                seen.begin_relist();
                continue;
            }
            Ok(Event::InitDone) => {
                seen.finish_relist();
                continue;
            }
            Err(err) => {
                tracing::warn!(source, error = &err as &dyn StdError, "watch failed, retrying");
                continue;
            }
        };

        let resource = ManagedResource::from(object);
        if !filter.is_pending(&resource) {
            continue;
        }

        let kind = seen.classify(resource.meta().uid.as_deref());
        if events.send(ObjectEvent { kind, resource }).await.is_err() {
            tracing::debug!(source, "event channel closed");
            break;
        }
    }
}
