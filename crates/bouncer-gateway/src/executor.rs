//! Execution plumbing shared by the pipeline and the dispatcher.
//!
//! The engine resolves credentials, runs the executor, and pages the
//! output. An executor transport failure is folded into an
//! `executed_error`-shaped report; it is never retried implicitly.

use std::sync::Arc;

use bouncer_approval::Store;
use bouncer_core::RequestId;

use crate::paging::{PagedOutput, Pager};
use crate::traits::{CommandExecutor, CredentialBroker, Invocation};

/// Default executor deadline in seconds.
const DEFAULT_EXEC_TIMEOUT: u64 = 840;

/// The outcome of one engine run, ready for record patches and messages.
#[derive(Debug, Clone)]
pub struct ExecReport {
    /// First page of the output.
    pub first_page: String,
    /// Output truncated for the persisted record.
    pub truncated_result: String,
    /// Exit code (-1 for transport failures).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Paging info for the full output.
    pub paged: PagedOutput,
}

impl ExecReport {
    /// Whether the command completed successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Credential resolution + execution + paging.
pub struct ExecutionEngine<S> {
    executor: Arc<dyn CommandExecutor>,
    broker: Option<Arc<dyn CredentialBroker>>,
    pager: Pager<S>,
    result_truncate_chars: usize,
}

impl<S: Store> ExecutionEngine<S> {
    /// Build an engine.
    #[must_use]
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        broker: Option<Arc<dyn CredentialBroker>>,
        pager: Pager<S>,
        result_truncate_chars: usize,
    ) -> Self {
        Self {
            executor,
            broker,
            pager,
            result_truncate_chars,
        }
    }

    /// Run `argv` with the account's role (when any) and page the output.
    pub async fn run(
        &self,
        request_id: &RequestId,
        argv: Vec<String>,
        assume_role: Option<&str>,
    ) -> ExecReport {
        let started = std::time::Instant::now();

        let credentials = match (assume_role, &self.broker) {
            (Some(role_arn), Some(broker)) => match broker.assume_role(role_arn).await {
                Ok(creds) => Some(creds),
                Err(e) => {
                    tracing::warn!(error = %e, role_arn, "assume-role failed");
                    return self
                        .finish(
                            request_id,
                            format!("failed to obtain credentials: {e}"),
                            -1,
                            started,
                        )
                        .await;
                },
            },
            (Some(role_arn), None) => {
                tracing::warn!(role_arn, "no credential broker configured");
                return self
                    .finish(
                        request_id,
                        "cross-account execution requires a credential broker".to_owned(),
                        -1,
                        started,
                    )
                    .await;
            },
            (None, _) => None,
        };

        let invocation = Invocation {
            argv,
            credentials,
            timeout_seconds: DEFAULT_EXEC_TIMEOUT,
        };
        match self.executor.execute(invocation).await {
            Ok(outcome) => {
                let output = if outcome.output.trim().is_empty() {
                    if outcome.exit_code == 0 {
                        "(command succeeded with no output)".to_owned()
                    } else {
                        format!("(command failed with exit code {})", outcome.exit_code)
                    }
                } else {
                    outcome.output
                };
                self.finish(request_id, output, outcome.exit_code, started)
                    .await
            },
            Err(e) => {
                tracing::warn!(error = %e, "executor transport failure");
                self.finish(request_id, format!("execution failed: {e}"), -1, started)
                    .await
            },
        }
    }

    async fn finish(
        &self,
        request_id: &RequestId,
        output: String,
        exit_code: i32,
        started: std::time::Instant,
    ) -> ExecReport {
        let paged = self.pager.store_paged(request_id, &output).await;
        let truncated_result: String = output.chars().take(self.result_truncate_chars).collect();
        ExecReport {
            first_page: paged.first_page.clone(),
            truncated_result,
            exit_code,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            paged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ExecError, ExecutionOutcome};
    use async_trait::async_trait;
    use bouncer_approval::MemoryStore;

    struct FixedExecutor {
        output: String,
        exit_code: i32,
    }

    #[async_trait]
    impl CommandExecutor for FixedExecutor {
        async fn execute(&self, _invocation: Invocation) -> Result<ExecutionOutcome, ExecError> {
            Ok(ExecutionOutcome {
                output: self.output.clone(),
                exit_code: self.exit_code,
                duration_ms: 1,
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl CommandExecutor for FailingExecutor {
        async fn execute(&self, _invocation: Invocation) -> Result<ExecutionOutcome, ExecError> {
            Err(ExecError("transport down".to_owned()))
        }
    }

    fn engine(executor: Arc<dyn CommandExecutor>) -> ExecutionEngine<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        ExecutionEngine::new(executor, None, Pager::new(store, 100, 60), 50)
    }

    fn argv() -> Vec<String> {
        vec!["aws".to_owned(), "s3".to_owned(), "ls".to_owned()]
    }

    #[tokio::test]
    async fn test_success_report() {
        let engine = engine(Arc::new(FixedExecutor {
            output: "bucket-a\nbucket-b".to_owned(),
            exit_code: 0,
        }));
        let report = engine.run(&RequestId::from("req-1"), argv(), None).await;
        assert!(report.is_ok());
        assert_eq!(report.first_page, "bucket-a\nbucket-b");
        assert!(!report.paged.is_paged());
    }

    #[tokio::test]
    async fn test_truncation_for_record() {
        let engine = engine(Arc::new(FixedExecutor {
            output: "y".repeat(500),
            exit_code: 0,
        }));
        let report = engine.run(&RequestId::from("req-1"), argv(), None).await;
        assert_eq!(report.truncated_result.len(), 50);
        assert!(report.paged.is_paged());
    }

    #[tokio::test]
    async fn test_transport_failure_is_executed_error_shape() {
        let engine = engine(Arc::new(FailingExecutor));
        let report = engine.run(&RequestId::from("req-1"), argv(), None).await;
        assert!(!report.is_ok());
        assert_eq!(report.exit_code, -1);
        assert!(report.first_page.contains("transport down"));
    }

    #[tokio::test]
    async fn test_missing_broker_for_cross_account() {
        let engine = engine(Arc::new(FixedExecutor {
            output: "unused".to_owned(),
            exit_code: 0,
        }));
        let report = engine
            .run(
                &RequestId::from("req-1"),
                argv(),
                Some("arn:aws:iam::1:role/x"),
            )
            .await;
        assert_eq!(report.exit_code, -1);
        assert!(report.first_page.contains("credential broker"));
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let engine = engine(Arc::new(FixedExecutor {
            output: String::new(),
            exit_code: 0,
        }));
        let report = engine.run(&RequestId::from("req-1"), argv(), None).await;
        assert!(report.first_page.contains("no output"));
    }
}
