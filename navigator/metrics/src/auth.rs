//! Bearer-token acquisition for metrics backends.
//!
//! Tokens produced by external credential commands are cached per
//! invocation-identity with a freshness TTL and bounded memory: expiry is
//! checked on read and by a periodic sweep, LRU eviction applies on insert.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    time::{Duration, Instant},
};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPACITY: usize = 100;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How a metrics backend authenticates requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSpec {
    /// A literal bearer token, returned verbatim.
    Static { token: String },

    /// An external command whose trimmed stdout is the token.
    Exec(ExecSpec),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Merged over the process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Humantime-style deadline for the command, e.g. `"30s"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential command timed out after {0:?}")]
    ExecTimeout(Duration),

    #[error("credential command exited with {status}: {stderr}")]
    ExecFailed { status: String, stderr: String },

    #[error("credential command produced no output")]
    EmptyOutput,

    #[error("invalid credential timeout {value:?}: {source}")]
    TimeoutParse {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("failed to run credential command: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Process-wide token cache shared by every edge's metrics client.
pub struct TokenCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    edge_id: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
    /// Sorted by name.
    env: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
struct Entry {
    token: String,
    expires_at: Instant,
}

// === impl TokenCache ===

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TOKEN_TTL)
    }
}

impl TokenCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns a bearer token for the given spec.
    ///
    /// Identical invocations (same edge, command, arguments, environment,
    /// and timeout) within the TTL share a single execution. The command
    /// itself always runs outside the cache lock.
    pub async fn acquire(&self, edge_id: &str, spec: &AuthSpec) -> Result<String, Error> {
        let exec = match spec {
            AuthSpec::Static { token } => return Ok(token.clone()),
            AuthSpec::Exec(exec) => exec,
        };

        let timeout = parse_timeout(exec.timeout.as_deref())?;
        let key = CacheKey::new(edge_id, exec, timeout);

        if let Some(token) = self.lookup(&key) {
            return Ok(token);
        }

        let token = run_command(exec, timeout).await?;
        let mut entries = self.entries.lock();
        entries.push(
            key,
            Entry {
                token: token.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(token)
    }

    fn lookup(&self, key: &CacheKey) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.token.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Removes entries whose expiry has passed.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            entries.pop(&key);
        }
        if count > 0 {
            tracing::debug!(count, "swept expired tokens");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the periodic expiry sweep until cancelled.
    pub async fn run_sweeper(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => self.sweep(),
            }
        }
    }
}

// === impl CacheKey ===

impl CacheKey {
    fn new(edge_id: &str, exec: &ExecSpec, timeout: Duration) -> Self {
        // BTreeMap iteration is already name-ordered.
        let env = exec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            edge_id: edge_id.to_string(),
            command: exec.command.clone(),
            args: exec.args.clone(),
            timeout,
            env,
        }
    }
}

fn parse_timeout(timeout: Option<&str>) -> Result<Duration, Error> {
    match timeout {
        None => Ok(DEFAULT_EXEC_TIMEOUT),
        Some(value) => humantime::parse_duration(value).map_err(|source| Error::TimeoutParse {
            value: value.to_string(),
            source,
        }),
    }
}

async fn run_command(exec: &ExecSpec, timeout: Duration) -> Result<String, Error> {
    let mut command = Command::new(&exec.command);
    command.args(&exec.args).envs(&exec.env).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| Error::ExecTimeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ExecFailed {
            status: output.status.to_string(),
            stderr: snippet(&stderr),
        });
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(Error::EmptyOutput);
    }
    Ok(token)
}

fn snippet(s: &str) -> String {
    const MAX: usize = 256;
    let s = s.trim();
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
