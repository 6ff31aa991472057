use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("value at {namespace}/{key} has unexpected shape: {source}")]
    Decode {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Namespaced key-value collaborator backing dispatcher state. No ordering,
/// transactions, or durability are expected of implementations.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn put(&self, namespace: &str, key: &str, value: Value);
    async fn get(&self, namespace: &str, key: &str, default: Value) -> Value;
    async fn has(&self, namespace: &str, key: &str) -> bool;
    /// Missing keys are ignored.
    async fn delete(&self, namespace: &str, key: &str);
}

/// Typed read: absent keys yield `default`, present keys must decode as `T`.
pub async fn get_as<T, S>(
    store: &S,
    namespace: &str,
    key: &str,
    default: T,
) -> Result<T, DatastoreError>
where
    T: DeserializeOwned + Send,
    S: Datastore + ?Sized,
{
    if !store.has(namespace, key).await {
        return Ok(default);
    }
    let value = store.get(namespace, key, Value::Null).await;
    serde_json::from_value(value).map_err(|source| DatastoreError::Decode {
        namespace: namespace.to_string(),
        key: key.to_string(),
        source,
    })
}
