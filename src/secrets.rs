use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Deserialize;

/// Reference to one key of a Kubernetes Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecretKeySelector {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self, selector: &SecretKeySelector, namespace: &str) -> Result<Vec<u8>>;
}

pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn load(&self, selector: &SecretKeySelector, namespace: &str) -> Result<Vec<u8>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(&selector.name)
            .await
            .with_context(|| format!("failed to load secret \"{}/{}\"", namespace, selector.name))?;

        extract_key(&secret, selector, namespace)
    }
}

fn extract_key(secret: &Secret, selector: &SecretKeySelector, namespace: &str) -> Result<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .map(|value| value.0.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no key \"{}\" in secret \"{}/{}\"",
                selector.key,
                namespace,
                selector.name
            )
        })
}

/// Loads a secret value as trimmed UTF-8.
pub async fn load_string(
    store: &dyn SecretStore,
    selector: &SecretKeySelector,
    namespace: &str,
) -> Result<String> {
    if selector.name.is_empty() {
        anyhow::bail!("secret reference has no name");
    }
    let bytes = store.load(selector, namespace).await?;
    let value = String::from_utf8(bytes).with_context(|| {
        format!(
            "key \"{}\" in secret \"{}/{}\" is not valid UTF-8",
            selector.key, namespace, selector.name
        )
    })?;
    Ok(value.trim().to_string())
}
