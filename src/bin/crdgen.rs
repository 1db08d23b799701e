//! # CRD Generator
//!
//! Prints the `KeyVaultSecretSync` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/keyvaultsecretsync.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use keyvault_sync_controller::crd::KeyVaultSecretSync;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&KeyVaultSecretSync::crd())?);
    Ok(())
}
