//! Path-prefix access rules.
//!
//! A rule maps a path prefix to a shared secret. A request is checked against
//! every prefix of its path, segment by segment from the root; the deepest
//! prefix that carries a secret decides which credential is required. Paths
//! with no matching rule are open.
//!
//! ```
//! use trove_access::{AccessGate, Decision};
//!
//! let gate = AccessGate::with_rules([("inf/secret", "p1"), ("inf/secret/nested", "p2")]);
//! assert_eq!(gate.check("/inf/secret/nested/file", Some("p2")), Decision::Allow);
//! assert_eq!(gate.check("/inf/secret/nested/file", Some("p1")), Decision::Deny);
//! assert_eq!(gate.check("/inf/other/file", None), Decision::Allow);
//! ```

pub mod error;
mod source;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

pub use crate::source::{JsonFileSource, SecretSource, SecretTable, StaticSource};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}
impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn normalize(table: SecretTable) -> HashMap<String, String> {
    table
        .into_iter()
        // An empty secret protects nothing.
        .filter(|(_, secret)| !secret.is_empty())
        .map(|(prefix, secret)| (segments(&prefix).collect::<Vec<_>>().join("/"), secret))
        .collect()
}

pub struct AccessGate {
    rules: RwLock<HashMap<String, String>>,
    source: Arc<dyn SecretSource>,
}

impl AccessGate {
    /// A gate with no rules yet; call [`reload`](Self::reload) to populate it.
    pub fn new(source: Arc<dyn SecretSource>) -> Self {
        Self { rules: RwLock::default(), source }
    }

    /// A gate with a fixed rule set.
    pub fn with_rules<K, V>(rules: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let table: SecretTable = rules.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { rules: RwLock::new(normalize(table.clone())), source: Arc::new(StaticSource(table)) }
    }

    /// The secret required for `path`, if any rule covers it.
    pub fn required_secret(&self, path: &str) -> Option<String> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut prefix = String::new();
        let mut required = rules.get("").cloned();
        for segment in segments(path) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if let Some(secret) = rules.get(&prefix) {
                required = Some(secret.clone());
            }
        }
        required
    }

    /// Like [`check`](Self::check), without logging. Used to filter listings.
    pub fn permits(&self, path: &str, credential: Option<&str>) -> bool {
        match self.required_secret(path) {
            None => true,
            Some(secret) => credential == Some(secret.as_str()),
        }
    }

    /// Rule prefixes strictly below `path` that `credential` does not open.
    /// Anything handing out a whole subtree at once must refuse when this is
    /// non-empty and one of the prefixes exists.
    pub fn locked_below(&self, path: &str, credential: Option<&str>) -> Vec<String> {
        let base = segments(path).collect::<Vec<_>>().join("/");
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut locked: Vec<String> = rules
            .iter()
            .filter(|(prefix, _)| {
                if base.is_empty() {
                    !prefix.is_empty()
                } else {
                    prefix.strip_prefix(base.as_str()).is_some_and(|rest| rest.starts_with('/'))
                }
            })
            .filter(|(_, secret)| credential != Some(secret.as_str()))
            .map(|(prefix, _)| prefix.clone())
            .collect();
        locked.sort();
        locked
    }

    pub fn check(&self, path: &str, credential: Option<&str>) -> Decision {
        if self.permits(path, credential) {
            return Decision::Allow;
        }
        tracing::warn!(path, "Bad credentials");
        Decision::Deny
    }

    /// Fetch the table again. On failure the current rules stay in place.
    pub async fn reload(&self) -> Result<usize> {
        let rules = normalize(self.source.load().await?);
        let count = rules.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
        tracing::debug!(rules = count, "Secret table loaded");
        Ok(count)
    }

    /// Reload every `period`, starting one period from now.
    pub fn spawn_reload(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(err) = self.reload().await {
                    tracing::warn!(error = %err, "Secret table reload failed; keeping previous rules");
                }
            }
        })
    }
}
