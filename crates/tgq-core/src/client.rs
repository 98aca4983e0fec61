use std::sync::Arc;

use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    campaign::CampaignOrchestrator,
    config::{ClientConfig, SharedConfig, UserAgent},
    directory::MembershipFetcher,
    domain::{DeliveryRequest, GroupKind, GroupTarget, Template},
    governor::RateLimitGovernor,
    ports::DirectoryTransport,
    queue::{DeliveryQueue, SentLedger},
    scheduler::{DeliveryEvent, DeliveryScheduler},
    Result,
};

/// Coordination point for one telegram queue.
///
/// Construct one per process and hand out clones; every clone drives the same queue,
/// scheduler, and campaigns.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tgq_core::{client::TelegramClient, config::{ClientConfig, UserAgent}, domain::*, ports::DirectoryTransport};
/// # async fn demo(transport: Arc<dyn DirectoryTransport>) -> tgq_core::Result<()> {
/// let cfg = ClientConfig::new("client key", UserAgent::new("my nation", "welcomer", "1.0"));
/// let client = TelegramClient::new(cfg, transport);
///
/// let template = Template::new("secret key", "telegram id");
/// client.queue_telegram(template.clone(), "some nation");
/// client
///     .mass_telegram(template, GroupKind::NewGroupMembers, GroupTarget::region("lazarus"))
///     .await?;
/// client.wait().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TelegramClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SharedConfig,
    governor: Arc<RateLimitGovernor>,
    scheduler: DeliveryScheduler,
    orchestrator: CampaignOrchestrator,
    state: Mutex<RunState>,
    running: watch::Sender<bool>,
}

#[derive(Default)]
struct RunState {
    cancel: Option<CancellationToken>,
    scheduler: Option<JoinHandle<()>>,
    campaigns: Vec<CampaignTask>,
}

struct CampaignTask {
    kind: GroupKind,
    handle: JoinHandle<()>,
}

impl TelegramClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn DirectoryTransport>) -> Self {
        let config = SharedConfig::new(config);
        let governor = Arc::new(RateLimitGovernor::new(transport, config.clone()));
        let queue = DeliveryQueue::new();
        let scheduler = DeliveryScheduler::new(
            config.clone(),
            governor.clone(),
            queue.clone(),
            SentLedger::new(),
        );
        let orchestrator = CampaignOrchestrator::new(
            MembershipFetcher::new(governor.clone()),
            queue,
            config.clone(),
        );
        let (running, _) = watch::channel(false);

        Self {
            inner: Arc::new(ClientInner {
                config,
                governor,
                scheduler,
                orchestrator,
                state: Mutex::new(RunState::default()),
                running,
            }),
        }
    }

    // === configuration ===

    pub fn config(&self) -> ClientConfig {
        self.inner.config.snapshot()
    }

    pub fn set_client_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.inner.config.update(|c| c.client_key = Some(key));
    }

    /// Takes effect on the next outbound request.
    pub fn set_user_agent(&self, user_agent: UserAgent) {
        self.inner.config.update(|c| c.user_agent = Some(user_agent));
    }

    /// Pacing delay in seconds; below 30 is rejected.
    pub fn set_delay(&self, seconds: u64) -> Result<()> {
        self.inner.config.update(|c| c.set_delay(seconds))
    }

    // === queueing ===

    pub fn queue_telegram(&self, template: Template, recipient: impl Into<String>) {
        let request = DeliveryRequest::new(template, recipient);
        debug!(
            message_id = %request.template.message_id,
            recipient = %request.recipient,
            "queued"
        );
        self.inner.scheduler.queue().enqueue(request);
    }

    /// Start sending if stopped; otherwise nothing happens.
    ///
    /// Fails without touching the network when the client key or user agent is unset.
    pub async fn start(&self) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        self.start_locked(&mut st)
    }

    /// Queue `group` as it is (static kinds) or as it grows (dynamic kinds), starting
    /// the scheduler if needed.
    ///
    /// Missing regions / proposal id are reported here, before anything is spawned.
    pub async fn mass_telegram(
        &self,
        template: Template,
        kind: GroupKind,
        target: GroupTarget,
    ) -> Result<()> {
        kind.validate(&target)?;

        let mut st = self.inner.state.lock().await;
        self.start_locked(&mut st)?;
        let Some(cancel) = st.cancel.as_ref().map(CancellationToken::child_token) else {
            return Ok(());
        };

        let orchestrator = self.inner.orchestrator.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = orchestrator.run(template, kind, target, cancel).await {
                error!(group = %kind, error = %e, "campaign failed");
            }
        });

        st.campaigns.retain(|c| !c.handle.is_finished());
        st.campaigns.push(CampaignTask { kind, handle });
        Ok(())
    }

    /// Cancel the scheduler and every campaign, wait for them, then close the transport.
    ///
    /// Queue contents and the sent ledger survive; `start()` resumes from them.
    pub async fn stop(&self) {
        let (cancel, scheduler, campaigns) = {
            let mut st = self.inner.state.lock().await;
            if st.scheduler.is_none() {
                return;
            }
            (
                st.cancel.take(),
                st.scheduler.take(),
                std::mem::take(&mut st.campaigns),
            )
        };

        if let Some(tok) = cancel {
            tok.cancel();
        }

        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        for campaign in campaigns {
            if let Err(e) = campaign.handle.await {
                warn!(group = %campaign.kind, error = %e, "campaign task ended abnormally");
            }
        }

        self.inner.governor.transport().close().await;
        self.inner.running.send_replace(false);
        info!("client stopped");
    }

    /// Resolves once the client is (or already was) stopped.
    pub async fn wait(&self) {
        let mut rx = self.inner.running.subscribe();
        // the sender lives in `inner`, which we hold, so this can't fail
        let _ = rx.wait_for(|running| !*running).await;
    }

    // === diagnostics ===

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.scheduler.is_some()
    }

    /// Campaigns still polling or fetching.
    pub async fn active_campaigns(&self) -> Vec<GroupKind> {
        self.inner
            .state
            .lock()
            .await
            .campaigns
            .iter()
            .filter(|c| !c.handle.is_finished())
            .map(|c| c.kind)
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.inner.scheduler.queue().len()
    }

    pub fn has_sent(&self, recipient: &str) -> bool {
        self.inner.scheduler.ledger().contains(recipient)
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner.scheduler.ledger().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.scheduler.subscribe()
    }

    fn start_locked(&self, st: &mut RunState) -> Result<()> {
        self.inner.config.snapshot().ensure_ready()?;
        if st.scheduler.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let scheduler = self.inner.scheduler.clone();
        let token = cancel.clone();
        st.scheduler = Some(tokio::spawn(async move { scheduler.run(token).await }));
        st.cancel = Some(cancel);
        self.inner.running.send_replace(true);
        Ok(())
    }
}
