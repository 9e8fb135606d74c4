//! Mutating admission webhook
//!
//! Applies the same mutators as the reconciliation loop at admission time and
//! answers with a JSON patch. The webhook never denies: when the object cannot
//! be handled it is admitted unchanged and the reconciliation loop picks it up
//! later.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};
use warp::Filter;

use crate::Result;
use crate::error::Error;
use crate::mutate::MutatorSet;
use crate::policy::Policy;
use crate::resource::{ManagedResource, ResourceKind};

#[async_trait]
pub trait MutatingAdmissionHandler: Send + Sync {
    /// Returns the name of this handler for logging purposes
    fn name(&self) -> &'static str;

    /// Mutates the resource in the admission request
    ///
    /// Returns an `AdmissionResponse` that may include JSON patches to modify the resource.
    /// If no patches are needed, return `AdmissionResponse::from(req)`.
    async fn mutate(&self, req: &AdmissionRequest<DynamicObject>) -> Result<AdmissionResponse>;
}

/// Admission handler that runs the policy's mutators
pub struct PolicyMutator {
    policy: Arc<Policy>,
    mutators: Arc<MutatorSet>,
}

impl PolicyMutator {
    pub fn new(policy: Arc<Policy>, mutators: Arc<MutatorSet>) -> Self {
        Self { policy, mutators }
    }
}

#[async_trait]
impl MutatingAdmissionHandler for PolicyMutator {
    fn name(&self) -> &'static str {
        "policy-mutator"
    }

    async fn mutate(&self, req: &AdmissionRequest<DynamicObject>) -> Result<AdmissionResponse> {
        let response = AdmissionResponse::from(req);

        let Some(object) = &req.object else {
            return Ok(response);
        };
        let Some(kind) = ResourceKind::from_group_kind(&req.kind.group, &req.kind.kind) else {
            debug!(group = %req.kind.group, kind = %req.kind.kind, "kind is not managed");
            return Ok(response);
        };

        let mut resource = ManagedResource::from_value(kind, serde_json::to_value(object)?)?;
        if resource.meta().namespace.is_none() {
            resource.meta_mut().namespace = req.namespace.clone();
        }

        let mutated = self.mutators.mutated(&resource, &self.policy);
        let patch = json_patch::diff(&resource.to_value()?, &mutated.to_value()?);
        if patch.0.is_empty() {
            return Ok(response);
        }

        response
            .with_patch(patch)
            .map_err(|err| Error::PatchComputationError(err.to_string()))
    }
}

/// Handles one admission review, always allowing the object
async fn review(
    handler: Arc<dyn MutatingAdmissionHandler>,
    body: AdmissionReview<DynamicObject>,
) -> std::result::Result<warp::reply::Json, Infallible> {
    let req: AdmissionRequest<_> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid admission request: {}", err);
            return Ok(warp::reply::json(
                &AdmissionResponse::invalid(err.to_string()).into_review(),
            ));
        }
    };

    let name = req
        .object
        .as_ref()
        .map(|object| object.name_any())
        .unwrap_or_else(|| req.name.clone());

    let res = match handler.mutate(&req).await {
        Ok(res) => {
            info!(
                handler = handler.name(),
                operation = ?req.operation,
                kind = %req.kind.kind,
                name = %name,
                patched = res.patch.is_some(),
                "admitted resource"
            );
            res
        }
        Err(err) => {
            warn!(
                handler = handler.name(),
                operation = ?req.operation,
                kind = %req.kind.kind,
                name = %name,
                error = &err as &dyn StdError,
                "mutation failed, admitting unchanged"
            );
            AdmissionResponse::from(&req)
        }
    };

    Ok(warp::reply::json(&res.into_review()))
}

/// `POST /mutate` and `GET /healthz`
pub fn routes(
    handler: Arc<dyn MutatingAdmissionHandler>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let mutate = warp::post()
        .and(warp::path("mutate"))
        .and(warp::path::end())
        .and(warp::any().map(move || handler.clone()))
        .and(warp::body::json())
        .and_then(review);

    let healthz = warp::get()
        .and(warp::path("healthz"))
        .and(warp::path::end())
        .map(|| "ok");

    mutate.or(healthz).with(warp::trace::request())
}

/// Certificate and key used to serve the webhook over HTTPS
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Serves the webhook until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    handler: Arc<dyn MutatingAdmissionHandler>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) {
    let server = warp::serve(routes(handler));

    match tls {
        Some(tls) => {
            let (addr, server) = server
                .tls()
                .cert_path(tls.cert)
                .key_path(tls.key)
                .bind_with_graceful_shutdown(addr, shutdown);
            info!(%addr, "serving admission webhook over https");
            server.await;
        }
        None => {
            let (addr, server) = server.bind_with_graceful_shutdown(addr, shutdown);
            info!(%addr, "serving admission webhook over http");
            server.await;
        }
    }
}
