use crate::ports::datastore::Datastore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

type Key = (String, String);

#[derive(Default)]
pub struct InMemoryDatastore {
    inner: RwLock<HashMap<Key, Value>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, key: &str) -> Key {
        (namespace.to_string(), key.to_string())
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn put(&self, namespace: &str, key: &str, value: Value) {
        self.inner
            .write()
            .await
            .insert(Self::key(namespace, key), value);
    }

    async fn get(&self, namespace: &str, key: &str, default: Value) -> Value {
        self.inner
            .read()
            .await
            .get(&Self::key(namespace, key))
            .cloned()
            .unwrap_or(default)
    }

    async fn has(&self, namespace: &str, key: &str) -> bool {
        self.inner
            .read()
            .await
            .contains_key(&Self::key(namespace, key))
    }

    async fn delete(&self, namespace: &str, key: &str) {
        self.inner.write().await.remove(&Self::key(namespace, key));
    }
}
