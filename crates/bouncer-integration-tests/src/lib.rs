//! Scripted fakes for Bouncer end-to-end tests.
//!
//! The scenario tests in `tests/` build a full [`bouncer_gateway::Bouncer`]
//! over the in-memory store with these fakes standing in for the external
//! collaborators: a recording notifier, a scripted executor, an in-memory
//! object store, and a fixed deployer.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use bouncer_approval::CommitInfo;
use bouncer_core::{MessageId, Timestamp};
use bouncer_gateway::{
    CommandExecutor, DeployError, Deployer, ExecError, ExecutionOutcome, Invocation, Notification,
    Notifier, NotifyError, ObjectStore, PresignRequest, PresignedUrl, RunningDeploy, SignError,
};

/// Everything the recording notifier observed.
#[derive(Debug, Default)]
pub struct NotifierLog {
    /// Approval messages, with the handle issued for each.
    pub sent: Vec<(MessageId, Notification)>,
    /// Silent messages.
    pub silent: Vec<Notification>,
    /// Message edits.
    pub edits: Vec<(MessageId, Notification)>,
    /// Callback answers `(callback_id, text)`.
    pub answers: Vec<(String, String)>,
}

/// Notifier fake that records every interaction.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    log: Mutex<NotifierLog>,
    counter: AtomicU32,
    fail_sends: AtomicBool,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail until cleared.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of approval messages sent.
    pub async fn sent_count(&self) -> usize {
        self.log.lock().await.sent.len()
    }

    /// Number of message edits.
    pub async fn edit_count(&self) -> usize {
        self.log.lock().await.edits.len()
    }

    /// All callback answers so far.
    pub async fn answers(&self) -> Vec<(String, String)> {
        self.log.lock().await.answers.clone()
    }

    /// All silent messages so far.
    pub async fn silent_messages(&self) -> Vec<Notification> {
        self.log.lock().await.silent.clone()
    }

    /// The last approval message sent, if any.
    pub async fn last_sent(&self) -> Option<(MessageId, Notification)> {
        self.log.lock().await.sent.last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &Notification) -> Result<MessageId, NotifyError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NotifyError("scripted send failure".to_owned()));
        }
        let id = MessageId(format!("{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1));
        self.log.lock().await.sent.push((id.clone(), message.clone()));
        Ok(id)
    }

    async fn send_silent(&self, message: &Notification) -> Result<(), NotifyError> {
        self.log.lock().await.silent.push(message.clone());
        Ok(())
    }

    async fn edit(
        &self,
        message_id: &MessageId,
        message: &Notification,
    ) -> Result<(), NotifyError> {
        self.log
            .lock()
            .await
            .edits
            .push((message_id.clone(), message.clone()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError> {
        self.log
            .lock()
            .await
            .answers
            .push((callback_id.to_owned(), text.to_owned()));
        Ok(())
    }
}

/// Executor fake with per-command scripted outcomes.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<HashMap<String, (String, i32)>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Executor that answers `ok` / exit 0 for everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an outcome for a joined argv string.
    pub async fn script(&self, command: &str, output: &str, exit_code: i32) {
        self.outcomes
            .lock()
            .await
            .insert(command.to_owned(), (output.to_owned(), exit_code));
    }

    /// Joined argv strings of everything executed so far.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: Invocation) -> Result<ExecutionOutcome, ExecError> {
        let joined = invocation.argv.join(" ");
        self.executed.lock().await.push(joined.clone());
        let (output, exit_code) = self
            .outcomes
            .lock()
            .await
            .get(&joined)
            .cloned()
            .unwrap_or_else(|| ("ok".to_owned(), 0));
        Ok(ExecutionOutcome {
            output,
            exit_code,
            duration_ms: 1,
        })
    }
}

/// Object-store fake: staged keys live in a set; promote records the move.
#[derive(Debug, Default)]
pub struct FakeObjectStore {
    staged: Mutex<HashSet<String>>,
    promoted: Mutex<Vec<String>>,
}

impl FakeObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as present in the staging bucket.
    pub async fn stage(&self, key: &str) {
        self.staged.lock().await.insert(key.to_owned());
    }

    /// Everything promoted so far.
    pub async fn promoted(&self) -> Vec<String> {
        self.promoted.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn presign_put(&self, request: &PresignRequest) -> Result<PresignedUrl, SignError> {
        Ok(PresignedUrl {
            url: format!("https://signed.example/{}/{}", request.bucket, request.key),
            expires_at: Timestamp::now().plus_seconds(request.expires_in),
        })
    }

    async fn head_object(&self, _bucket: &str, key: &str) -> Result<bool, SignError> {
        Ok(self.staged.lock().await.contains(key))
    }

    async fn promote(&self, bucket: &str, key: &str) -> Result<String, SignError> {
        let uri = format!("s3://{bucket}/{key}");
        self.promoted.lock().await.push(uri.clone());
        Ok(uri)
    }
}

/// Deployer fake with a switchable running deploy.
#[derive(Debug, Default)]
pub struct FakeDeployer {
    running: Mutex<Option<RunningDeploy>>,
    started: Mutex<Vec<String>>,
    template: Mutex<Option<String>>,
}

impl FakeDeployer {
    /// Create a quiet deployer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a deploy already in flight.
    pub async fn set_running(&self, deploy_id: &str) {
        *self.running.lock().await = Some(RunningDeploy {
            deploy_id: deploy_id.to_owned(),
            started_at: Timestamp::now(),
            estimated_remaining: "about 3 minutes".to_owned(),
        });
    }

    /// Set the template payload returned for compliance scanning.
    pub async fn set_template(&self, template: &str) {
        *self.template.lock().await = Some(template.to_owned());
    }

    /// Projects started so far.
    pub async fn started(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn running(&self, _project_id: &str) -> Result<Option<RunningDeploy>, DeployError> {
        Ok(self.running.lock().await.clone())
    }

    async fn resolve_commit(
        &self,
        _project_id: &str,
        _branch: &str,
    ) -> Result<CommitInfo, DeployError> {
        Ok(CommitInfo {
            sha: "0123456789abcdef0123456789abcdef01234567".to_owned(),
            short: "0123456".to_owned(),
            message: "ship the widget".to_owned(),
        })
    }

    async fn template(&self, _project_id: &str) -> Result<Option<String>, DeployError> {
        Ok(self.template.lock().await.clone())
    }

    async fn start(
        &self,
        project_id: &str,
        _branch: &str,
        _approver: &str,
        _reason: &str,
    ) -> Result<String, DeployError> {
        self.started.lock().await.push(project_id.to_owned());
        Ok(format!("deploy-{project_id}-1"))
    }
}

/// All the fakes behind one harness, plus the wired service.
pub struct Harness {
    /// The recording notifier.
    pub notifier: Arc<RecordingNotifier>,
    /// The scripted executor.
    pub executor: Arc<ScriptedExecutor>,
    /// The staging object store.
    pub object_store: Arc<FakeObjectStore>,
    /// The deploy orchestrator.
    pub deployer: Arc<FakeDeployer>,
    /// The shared store, for direct inspection.
    pub store: Arc<bouncer_approval::MemoryStore>,
    /// The wired service.
    pub bouncer: bouncer_gateway::Bouncer<bouncer_approval::MemoryStore>,
}

/// The request secret the harness configures.
pub const REQUEST_SECRET: &str = "it-request-secret";
/// The callback secret the harness configures.
pub const CALLBACK_SECRET: &str = "it-callback-secret";
/// The whitelisted approver identity.
pub const APPROVER: &str = "approver-1";
/// The default target account.
pub const ACCOUNT: &str = "111111111111";

/// Build a fully wired service over fakes.
#[must_use]
pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// Build a harness, letting the caller tweak the config first.
#[must_use]
pub fn harness_with(tweak: impl FnOnce(&mut bouncer_config::Config)) -> Harness {
    let mut config = bouncer_config::Config::default();
    config.auth.request_secret = REQUEST_SECRET.to_owned();
    config.auth.callback_secret = CALLBACK_SECRET.to_owned();
    config.auth.approver_whitelist.insert(APPROVER.to_owned());
    config.accounts.default_account_id = ACCOUNT.to_owned();
    config.upload.upload_bucket = "uploads-final".to_owned();
    config.upload.staging_bucket = "uploads-staging".to_owned();
    tweak(&mut config);

    let notifier = Arc::new(RecordingNotifier::new());
    let executor = Arc::new(ScriptedExecutor::new());
    let object_store = Arc::new(FakeObjectStore::new());
    let deployer = Arc::new(FakeDeployer::new());
    let store = Arc::new(bouncer_approval::MemoryStore::new());
    let accounts = Arc::new(bouncer_gateway::MemoryAccountStore::with_default_account(
        ACCOUNT, "Dev",
    ));

    let deps = bouncer_gateway::BouncerDeps {
        notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
        executor: Arc::clone(&executor) as Arc<dyn CommandExecutor>,
        broker: None,
        object_store: Arc::clone(&object_store) as Arc<dyn ObjectStore>,
        deployer: Some(Arc::clone(&deployer) as Arc<dyn Deployer>),
        accounts,
    };
    let bouncer = bouncer_gateway::Bouncer::with_store(config, Arc::clone(&store), deps)
        .expect("harness config is valid");

    Harness {
        notifier,
        executor,
        object_store,
        deployer,
        store,
        bouncer,
    }
}
