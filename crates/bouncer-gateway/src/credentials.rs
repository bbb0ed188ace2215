//! Credential isolation for executors.
//!
//! Cross-account execution hands short-lived credentials to the executor.
//! Executors that spawn a child process scope them to the child's
//! environment; executors that are inherently process-global (the
//! in-process CLI driver case) get wrapped in [`EnvScopedExecutor`], which
//! serializes invocations behind a process-wide mutex and restores the
//! prior environment on every exit path, unwinds included.

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use crate::traits::{CommandExecutor, ExecError, ExecutionOutcome, Invocation};

/// The credential variables the wrapper manages.
const CREDENTIAL_VARS: [&str; 3] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

/// Process-wide lock guarding credential environment mutation.
///
/// Async so the guard can be held across the inner executor's await; the
/// override window is exactly the invocation.
static ENV_LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

fn env_lock() -> Arc<Mutex<()>> {
    Arc::clone(ENV_LOCK.get_or_init(|| Arc::new(Mutex::new(()))))
}

/// RAII restoration of the credential environment.
///
/// Captures the prior values on construction and writes them back on drop,
/// so a panicking executor still leaves the process environment as it found
/// it.
struct EnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    #[allow(unsafe_code)]
    fn set(invocation: &Invocation) -> Self {
        let saved = CREDENTIAL_VARS
            .iter()
            .map(|&var| (var, std::env::var(var).ok()))
            .collect();
        if let Some(creds) = &invocation.credentials {
            // Caller holds the process-wide env lock; no concurrent reader
            // of these variables exists outside it.
            unsafe {
                std::env::set_var("AWS_ACCESS_KEY_ID", &creds.access_key_id);
                std::env::set_var("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key);
                std::env::set_var("AWS_SESSION_TOKEN", &creds.session_token);
            }
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        for (var, value) in &self.saved {
            unsafe {
                match value {
                    Some(value) => std::env::set_var(var, value),
                    None => std::env::remove_var(var),
                }
            }
        }
    }
}

/// Wraps an executor that reads credentials from the process environment.
///
/// Invocations serialize on a process-wide mutex held only for the duration
/// of the call; the prior environment is captured before the override and
/// restored afterwards on all paths.
pub struct EnvScopedExecutor<E> {
    inner: E,
}

impl<E> EnvScopedExecutor<E> {
    /// Wrap an inner executor.
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: CommandExecutor> CommandExecutor for EnvScopedExecutor<E> {
    async fn execute(&self, invocation: Invocation) -> Result<ExecutionOutcome, ExecError> {
        let lock = env_lock();
        // Hold the guard (and therefore the env override) only while the
        // inner executor runs.
        let _serialized = lock.lock().await;
        let _env = EnvGuard::set(&invocation);
        let scrubbed = Invocation {
            credentials: None,
            ..invocation
        };
        self.inner.execute(scrubbed).await
    }
}
