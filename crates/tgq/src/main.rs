use std::{path::Path, sync::Arc};

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use tgq_core::{
    config::ClientConfig,
    domain::{GroupKind, GroupTarget, Template},
    TelegramClient,
};
use tgq_http::HttpTransport;

/// What to send and to whom, loaded from a JSON file.
///
/// ```json
/// {
///   "template": { "secret_key": "...", "message_id": "..." },
///   "recipients": ["some nation"],
///   "campaigns": [{ "group": "new_group_members", "regions": ["lazarus"] }]
/// }
/// ```
#[derive(Debug, Deserialize)]
struct CampaignFile {
    template: Template,
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    campaigns: Vec<CampaignEntry>,
}

#[derive(Debug, Deserialize)]
struct CampaignEntry {
    group: GroupKind,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    proposal: Option<String>,
}

impl CampaignEntry {
    fn target(&self) -> GroupTarget {
        match &self.proposal {
            Some(id) => GroupTarget::proposal(id.as_str()),
            None => GroupTarget::regions(self.regions.iter().cloned()),
        }
    }
}

fn load_campaign(path: &Path) -> tgq_core::Result<CampaignFile> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgq_core::logging::init("tgq")?;

    let cfg = ClientConfig::from_env()?;
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TGQ_CAMPAIGN_FILE").ok())
        .context("usage: tgq <campaign.json> (or set TGQ_CAMPAIGN_FILE)")?;
    let campaign = load_campaign(Path::new(&path))
        .with_context(|| format!("failed to load campaign file {path}"))?;

    let transport = Arc::new(HttpTransport::new(cfg.api_url.clone()));
    let client = TelegramClient::new(cfg, transport);

    for recipient in &campaign.recipients {
        client.queue_telegram(campaign.template.clone(), recipient.as_str());
    }
    client.start().await?;

    for entry in &campaign.campaigns {
        client
            .mass_telegram(campaign.template.clone(), entry.group, entry.target())
            .await
            .with_context(|| format!("cannot start {} campaign", entry.group))?;
    }

    tokio::select! {
      res = tokio::signal::ctrl_c() => {
        res.context("failed to listen for ctrl-c")?;
        info!("interrupted, stopping");
      }
      _ = client.wait() => {}
    }

    client.stop().await;
    info!(sent = client.sent().len(), pending = client.queued(), "done");
    Ok(())
}
