//! Sink resolution
//!
//! Turns a [`Destination`] into the absolute URI the receive adapter posts
//! events to. A direct URI is validated and used as-is. A reference is
//! looked up through the cluster and its advertised address is used,
//! optionally extended by a relative path.

use tracing::debug;
use url::Url;

use crate::client::SourceKubeClient;
use crate::crd::{Destination, KReference};
use crate::Error;

/// What a destination asks the resolver to do
#[derive(Debug, PartialEq, Eq)]
enum SinkTarget<'a> {
    Direct(&'a str),
    Reference {
        reference: &'a KReference,
        path: Option<&'a str>,
    },
}

impl<'a> SinkTarget<'a> {
    fn from_destination(destination: &'a Destination) -> Result<Self, Error> {
        match (&destination.reference, destination.uri.as_deref()) {
            (Some(reference), path) => Ok(Self::Reference { reference, path }),
            (None, Some(uri)) => Ok(Self::Direct(uri)),
            (None, None) => Err(Error::invalid_sink("sink has neither ref nor uri")),
        }
    }
}

/// Resolve a destination to an absolute URI.
///
/// `namespace` is the source's namespace, used when the reference does not
/// name one. `cluster_domain` is the DNS suffix for core Service sinks.
pub async fn resolve(
    kube: &dyn SourceKubeClient,
    namespace: &str,
    destination: &Destination,
    cluster_domain: &str,
) -> Result<String, Error> {
    match SinkTarget::from_destination(destination)? {
        SinkTarget::Direct(uri) => {
            check_absolute(uri)?;
            Ok(uri.to_string())
        }
        SinkTarget::Reference { reference, path } => {
            let ns = reference.resolve_namespace(namespace);
            let object = kube
                .get_addressable(ns, reference)
                .await?
                .ok_or_else(|| Error::sink_not_found(reference.describe(namespace)))?;

            let address = if is_core_service(reference) {
                service_address(&reference.name, ns, cluster_domain)
            } else {
                advertised_address(&object.data)
                    .ok_or_else(|| Error::sink_not_ready(reference.describe(namespace)))?
            };
            debug!(sink = %reference.describe(namespace), %address, "sink object resolved");

            match path {
                Some(path) if !path.is_empty() => join(&address, path),
                _ => Ok(address),
            }
        }
    }
}

fn check_absolute(uri: &str) -> Result<Url, Error> {
    let url = Url::parse(uri).map_err(|e| Error::invalid_sink(format!("{uri:?}: {e}")))?;
    if url.host_str().is_none() {
        return Err(Error::invalid_sink(format!("{uri:?} has no host")));
    }
    Ok(url)
}

fn is_core_service(reference: &KReference) -> bool {
    reference.api_version == "v1" && reference.kind == "Service"
}

fn service_address(name: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("http://{name}.{namespace}.svc.{cluster_domain}/")
}

/// Address an addressable object publishes in `status.address`
fn advertised_address(data: &serde_json::Value) -> Option<String> {
    let address = data.get("status")?.get("address")?;
    if let Some(url) = address.get("url").and_then(|u| u.as_str()) {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }
    address
        .get("hostname")
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
        .map(|h| format!("http://{h}"))
}

fn join(address: &str, path: &str) -> Result<String, Error> {
    if Url::parse(path).is_ok() {
        return Err(Error::invalid_sink(format!(
            "uri {path:?} must be relative when ref is set"
        )));
    }
    let base = check_absolute(address)?;
    base.join(path)
        .map(String::from)
        .map_err(|e| Error::invalid_sink(format!("cannot join {path:?} onto {address}: {e}")))
}
