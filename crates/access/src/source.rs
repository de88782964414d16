use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{ErrorKind, Result};

/// Raw `prefix -> secret` pairs, as stored.
pub type SecretTable = HashMap<String, String>;

/// Where the secret table comes from.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn load(&self) -> Result<SecretTable>;
}

/// A JSON object on disk, e.g. `{"inf/private": "hunter2"}`.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}
impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretSource for JsonFileSource {
    async fn load(&self) -> Result<SecretTable> {
        let raw = tokio::fs::read(&self.path).await.map_err(ErrorKind::Source)?;
        let table = serde_json::from_slice(&raw).map_err(|err| ErrorKind::InvalidTable(err.to_string()))?;
        Ok(table)
    }
}

/// A fixed table, for tests and for running without a secrets file.
#[derive(Debug, Clone, Default)]
pub struct StaticSource(pub SecretTable);

#[async_trait]
impl SecretSource for StaticSource {
    async fn load(&self) -> Result<SecretTable> {
        Ok(self.0.clone())
    }
}
