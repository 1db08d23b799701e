//! Common test utilities
//!
//! In-memory implementations of the controller's seams to Key Vault, the
//! identity federation API and the Kubernetes API.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use keyvault_sync_controller::cluster::{
    ClusterError, LocalSecretState, SecretMaterial, SecretSink, ServiceAccountStore,
};
use keyvault_sync_controller::controller::syncer::{SecretOwner, SyncRequest, SyncSettings};
use keyvault_sync_controller::crd::{
    IdentityConfig, KeyVaultSecretSync, KeyVaultSecretSyncSpec, SecretMapping,
};
use keyvault_sync_controller::provider::{
    FederatedCredential, FederationApi, FederationError, FetchedSecret, SecretRef, SecretSource,
    SecretValue, SecretVersion, SourceError,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

pub const VAULT: &str = "solr-kv";
pub const NAMESPACE: &str = "solr";
pub const OWNER: &str = "solr-auth";
pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const ISSUER: &str = "https://oidc.prod-aks.azure.com/tenant/cluster/";
pub const IDENTITY_ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/solr-identity";

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Scripted Key Vault
///
/// Scripted errors are returned first, in order; afterwards the latest value
/// set for the secret name is served.
#[derive(Default)]
pub struct FakeSource {
    script: Mutex<VecDeque<SourceError>>,
    latest: Mutex<HashMap<String, (SecretVersion, String)>>,
    delay: Mutex<Duration>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn set(&self, secret_name: &str, version: &str, created: i64, value: &str) {
        self.latest.lock().unwrap().insert(
            secret_name.to_string(),
            (SecretVersion::new(version, created), value.to_string()),
        );
    }

    pub fn push_error(&self, error: SourceError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretSource for FakeSource {
    async fn fetch(&self, reference: &SecretRef) -> Result<FetchedSecret, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        let latest = self.latest.lock().unwrap();
        let (version, value) = latest
            .get(&reference.secret_name)
            .ok_or_else(|| SourceError::fetch(reference, "SecretNotFound"))?;
        Ok(FetchedSecret {
            reference: reference.clone(),
            version: version.clone(),
            value: SecretValue::new(value.as_str()),
        })
    }
}

/// A local secret as the fake cluster stores it
#[derive(Debug, Clone)]
pub struct StoredSecret {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub has_owner_reference: bool,
}

#[derive(Default)]
pub struct FakeSink {
    objects: Mutex<HashMap<(String, String), StoredSecret>>,
    fail_writes: Mutex<Option<ClusterError>>,
    pub writes: AtomicUsize,
}

impl FakeSink {
    /// A secret created by someone else
    pub fn insert_foreign(&self, namespace: &str, name: &str) {
        self.objects.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            StoredSecret {
                labels: BTreeMap::from([("app".to_string(), "hand-made".to_string())]),
                annotations: BTreeMap::new(),
                data: BTreeMap::from([("password".to_string(), "do-not-touch".to_string())]),
                has_owner_reference: false,
            },
        );
    }

    pub fn fail_writes_with(&self, error: ClusterError) {
        *self.fail_writes.lock().unwrap() = Some(error);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<StoredSecret> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        self.get(namespace, name)
            .and_then(|secret| secret.data.get(key).cloned())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretSink for FakeSink {
    async fn current(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<LocalSecretState>, ClusterError> {
        Ok(self.get(namespace, name).map(|secret| LocalSecretState {
            labels: secret.labels,
            annotations: secret.annotations,
        }))
    }

    async fn write(&self, material: &SecretMaterial) -> Result<(), ClusterError> {
        if let Some(error) = self.fail_writes.lock().unwrap().clone() {
            return Err(error);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            (material.namespace.clone(), material.name.clone()),
            StoredSecret {
                labels: material.labels.clone(),
                annotations: material.annotations.clone(),
                data: BTreeMap::from([(
                    material.key.clone(),
                    material.value.expose().to_string(),
                )]),
                has_owner_reference: material.owner_reference.is_some(),
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFederation {
    credentials: Mutex<HashMap<(String, String), FederatedCredential>>,
    fail: Mutex<Option<FederationError>>,
    delay: Mutex<Duration>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
}

impl FakeFederation {
    pub fn insert(&self, identity_resource_id: &str, credential: FederatedCredential) {
        self.credentials.lock().unwrap().insert(
            (identity_resource_id.to_string(), credential.name.clone()),
            credential,
        );
    }

    pub fn fail_with(&self, error: FederationError) {
        *self.fail.lock().unwrap() = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn credential(&self, identity_resource_id: &str, name: &str) -> Option<FederatedCredential> {
        self.credentials
            .lock()
            .unwrap()
            .get(&(identity_resource_id.to_string(), name.to_string()))
            .cloned()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), FederationError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.fail.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FederationApi for FakeFederation {
    async fn get_credential(
        &self,
        identity_resource_id: &str,
        name: &str,
    ) -> Result<Option<FederatedCredential>, FederationError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(self.credential(identity_resource_id, name))
    }

    async fn put_credential(
        &self,
        identity_resource_id: &str,
        credential: &FederatedCredential,
    ) -> Result<(), FederationError> {
        self.simulate().await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert(identity_resource_id, credential.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeServiceAccounts {
    accounts: Mutex<HashMap<(String, String), BTreeMap<String, String>>>,
    pub annotate_calls: AtomicUsize,
}

impl FakeServiceAccounts {
    pub fn insert(&self, namespace: &str, name: &str, annotations: &[(&str, &str)]) {
        self.accounts.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.accounts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn annotate_calls(&self) -> usize {
        self.annotate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceAccountStore for FakeServiceAccounts {
    async fn annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(self.get(namespace, name))
    }

    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.annotate_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .extend(annotations.clone());
        Ok(())
    }
}

/// Retry settings that keep tests fast
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        max_attempts: 3,
        backoff_start: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        call_timeout: Duration::from_millis(500),
    }
}

pub fn owner() -> SecretOwner {
    SecretOwner {
        name: OWNER.to_string(),
        reference: None,
    }
}

pub fn request(secret_name: &str, local_name: &str) -> SyncRequest {
    SyncRequest {
        reference: SecretRef::new(VAULT, secret_name),
        namespace: NAMESPACE.to_string(),
        local_name: local_name.to_string(),
        key: "password".to_string(),
    }
}

pub fn mapping(secret_name: &str, local_name: &str) -> SecretMapping {
    SecretMapping {
        secret_name: secret_name.to_string(),
        version: None,
        local_name: local_name.to_string(),
        key: Some("password".to_string()),
    }
}

/// A namespaced resource as the API server would hand it to the controller
pub fn resource(secrets: Vec<SecretMapping>) -> KeyVaultSecretSync {
    let mut resource = KeyVaultSecretSync::new(
        OWNER,
        KeyVaultSecretSyncSpec {
            vault_name: VAULT.to_string(),
            identity: IdentityConfig {
                service_account: "solr".to_string(),
                client_id: CLIENT_ID.to_string(),
                tenant_id: None,
                issuer_url: Some(ISSUER.to_string()),
                identity_resource_id: Some(IDENTITY_ID.to_string()),
            },
            secrets,
            refresh_interval: "5m".to_string(),
            suspend: false,
        },
    );
    resource.metadata.namespace = Some(NAMESPACE.to_string());
    resource.metadata.uid = Some("2f8c7a4e-0000-4000-8000-000000000001".to_string());
    resource.metadata.generation = Some(1);
    resource
}
