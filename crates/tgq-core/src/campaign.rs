//! Mass campaigns: turn a group of recipients into queued telegrams.
//!
//! Static groups are fetched once and every member is queued. Dynamic groups are
//! snapshotted first, then re-polled forever; only identifiers that were not seen
//! before are queued.

use std::{collections::HashSet, future::Future};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SharedConfig,
    directory::MembershipFetcher,
    domain::{canonicalize, DeliveryRequest, GroupKind, GroupSpec, GroupTarget, Strategy, Template},
    queue::DeliveryQueue,
    Result,
};

#[derive(Clone)]
pub struct CampaignOrchestrator {
    fetcher: MembershipFetcher,
    queue: DeliveryQueue,
    config: SharedConfig,
}

impl CampaignOrchestrator {
    pub fn new(fetcher: MembershipFetcher, queue: DeliveryQueue, config: SharedConfig) -> Self {
        Self {
            fetcher,
            queue,
            config,
        }
    }

    /// Run one campaign until it finishes (static) or `cancel` fires (dynamic).
    ///
    /// Returns how many telegrams it queued. Argument errors surface before any fetch.
    pub async fn run(
        &self,
        template: Template,
        kind: GroupKind,
        target: GroupTarget,
        cancel: CancellationToken,
    ) -> Result<usize> {
        kind.validate(&target)?;
        let spec = kind.spec();
        info!(group = %kind, "campaign started");

        let queued = match spec.strategy {
            Strategy::Static => self.enumerate_once(&template, spec, &target, &cancel).await?,
            Strategy::Dynamic => self.follow(&template, spec, &target, &cancel).await,
        };

        info!(group = %kind, queued, "campaign finished");
        Ok(queued)
    }

    async fn enumerate_once(
        &self,
        template: &Template,
        spec: GroupSpec,
        target: &GroupTarget,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let Some(members) = until_cancelled(cancel, self.fetcher.fetch_all(spec.source, target)).await
        else {
            return Ok(0);
        };
        let members = members?;

        for member in &members {
            self.queue
                .enqueue(DeliveryRequest::new(template.clone(), member.as_str()));
            debug!(message_id = %template.message_id, recipient = %member, "queued");
        }
        Ok(members.len())
    }

    async fn follow(
        &self,
        template: &Template,
        spec: GroupSpec,
        target: &GroupTarget,
        cancel: &CancellationToken,
    ) -> usize {
        let mut existing = loop {
            match until_cancelled(cancel, self.fetcher.fetch_all(spec.source, target)).await {
                None => return 0,
                Some(Ok(members)) => {
                    break members.iter().map(|m| canonicalize(m)).collect::<HashSet<_>>()
                }
                Some(Err(e)) => error!(error = %e, "could not fetch baseline membership"),
            }
            if !self.pause(cancel).await {
                return 0;
            }
        };
        debug!(baseline = existing.len(), "baseline membership fetched");

        let mut queued = 0usize;
        loop {
            match until_cancelled(cancel, self.fetcher.fetch_all(spec.source, target)).await {
                None => break,
                Some(Ok(members)) => {
                    queued += self.enqueue_newcomers(template, &mut existing, members);
                }
                Some(Err(e)) => warn!(error = %e, "membership poll failed, retrying next interval"),
            }
            if !self.pause(cancel).await {
                break;
            }
        }
        queued
    }

    /// Queue every member not yet in `existing`, recording it there.
    fn enqueue_newcomers(
        &self,
        template: &Template,
        existing: &mut HashSet<String>,
        members: Vec<String>,
    ) -> usize {
        let mut queued = 0usize;
        for member in members {
            let recipient = canonicalize(&member);
            if existing.contains(&recipient) {
                continue;
            }
            debug!(message_id = %template.message_id, recipient = %recipient, "queued newcomer");
            self.queue
                .enqueue(DeliveryRequest::new(template.clone(), recipient.as_str()));
            existing.insert(recipient);
            queued += 1;
        }
        queued
    }

    /// Wait one poll interval. `false` if cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        let interval = self.config.snapshot().poll_interval;
        tokio::select! {
          _ = cancel.cancelled() => false,
          _ = sleep(interval) => true,
        }
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
      _ = cancel.cancelled() => None,
      out = fut => Some(out),
    }
}
