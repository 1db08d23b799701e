//! # Deletion Watch
//!
//! Cancels in-flight syncs for `KeyVaultSecretSync` resources that are being
//! deleted and drops their per-resource state. The materialized secrets are
//! garbage collected by Kubernetes through their owner reference.

use crate::controller::reconciler::{resource_key, Reconciler};
use crate::crd::KeyVaultSecretSync;
use futures::{pin_mut, StreamExt};
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn forget(reconciler: &Reconciler, resource: &KeyVaultSecretSync) {
    let key = resource_key(&resource.namespace().unwrap_or_default(), &resource.name_any());
    info!(resource = key.as_str(), "Resource deleted, cancelling in-flight sync");
    reconciler.forget(&key);
}

/// Spawn the deletion watch in the background
pub fn start_deletion_watch(api: Api<KeyVaultSecretSync>, reconciler: Arc<Reconciler>) {
    tokio::spawn(async move {
        let stream = watcher(api, watcher::Config::default());
        pin_mut!(stream);

        debug!("Deletion watch started");

        while let Some(event_result) = stream.next().await {
            match event_result {
                Ok(watcher::Event::Apply(resource)) => {
                    if resource.metadata.deletion_timestamp.is_some() {
                        forget(&reconciler, &resource);
                    }
                }
                Ok(watcher::Event::Delete(resource)) => forget(&reconciler, &resource),
                Ok(
                    watcher::Event::Init
                    | watcher::Event::InitApply(_)
                    | watcher::Event::InitDone,
                ) => {}
                Err(e) => {
                    error!("Error in deletion watch: {}", e);
                }
            }
        }

        warn!("Deletion watch stream ended");
    });
}
