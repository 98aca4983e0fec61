use std::{collections::HashSet, sync::Arc};

use tracing::debug;

use crate::{
    domain::{canonicalize, GroupTarget, MembershipSource},
    errors::Error,
    governor::RateLimitGovernor,
    markup::{self, Delimiter},
    ports::ApiRequest,
    Result,
};

/// Assembly chamber (council) a proposal is filed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chamber {
    Primary,
    Secondary,
}

impl Chamber {
    fn council(self) -> &'static str {
        match self {
            Chamber::Primary => "1",
            Chamber::Secondary => "2",
        }
    }
}

/// Directory queries for group membership.
///
/// Every call goes through the governor. Identifiers come back exactly as the
/// directory reports them, not canonicalized.
#[derive(Clone)]
pub struct MembershipFetcher {
    governor: Arc<RateLimitGovernor>,
}

impl MembershipFetcher {
    pub fn new(governor: Arc<RateLimitGovernor>) -> Self {
        Self { governor }
    }

    /// Members of `source` for a single region (or none, for global sources).
    ///
    /// Region-scoped sources use the first region of `target`; callers that want the
    /// union across regions go through [`MembershipFetcher::fetch_all`].
    pub async fn fetch(&self, source: MembershipSource, target: &GroupTarget) -> Result<Vec<String>> {
        match source {
            MembershipSource::AssemblyMembers => self.assembly_members().await,
            MembershipSource::AssemblyDelegates => self.assembly_delegates().await,
            MembershipSource::NewFounds => self.new_founds().await,
            MembershipSource::RegionMembers => {
                let region = target
                    .region_list()
                    .first()
                    .ok_or_else(|| Error::Config("region(s) not provided".to_string()))?;
                self.region_members(region).await
            }
            MembershipSource::ProposalApprovals => {
                self.delegates_approving(require_proposal(target)?).await
            }
            MembershipSource::ProposalNonApprovals => {
                self.delegates_not_approving(require_proposal(target)?).await
            }
        }
    }

    /// Like [`MembershipFetcher::fetch`], concatenating every region in order.
    pub async fn fetch_all(
        &self,
        source: MembershipSource,
        target: &GroupTarget,
    ) -> Result<Vec<String>> {
        if source != MembershipSource::RegionMembers {
            return self.fetch(source, target).await;
        }
        if target.region_list().is_empty() {
            return Err(Error::Config("region(s) not provided".to_string()));
        }

        let mut out = Vec::new();
        for region in target.region_list() {
            out.extend(self.region_members(region).await?);
        }
        Ok(out)
    }

    pub async fn region_members(&self, region: &str) -> Result<Vec<String>> {
        let req = ApiRequest::new()
            .param("q", "nations")
            .param("region", region);
        let body = self.governor.execute(&req).await?.body;
        let text = markup::element_text(&body, &["REGION", "NATIONS"])?;
        Ok(markup::split_list(&text, Delimiter::Colon))
    }

    pub async fn assembly_members(&self) -> Result<Vec<String>> {
        let req = ApiRequest::new().param("q", "members").param("wa", "1");
        let body = self.governor.execute(&req).await?.body;
        let text = markup::element_text(&body, &["WA", "MEMBERS"])?;
        Ok(markup::split_list(&text, Delimiter::Comma))
    }

    pub async fn assembly_delegates(&self) -> Result<Vec<String>> {
        let req = ApiRequest::new().param("q", "delegates").param("wa", "1");
        let body = self.governor.execute(&req).await?.body;
        let text = markup::element_text(&body, &["WA", "DELEGATES"])?;
        Ok(markup::split_list(&text, Delimiter::Comma))
    }

    pub async fn new_founds(&self) -> Result<Vec<String>> {
        let req = ApiRequest::new().param("q", "newnations");
        let body = self.governor.execute(&req).await?.body;
        let text = markup::element_text(&body, &["WORLD", "NEWNATIONS"])?;
        Ok(markup::split_list(&text, Delimiter::Comma))
    }

    /// Approvals listed for `proposal_id` in one chamber, `None` if it isn't listed there.
    pub async fn proposal_approvals(
        &self,
        proposal_id: &str,
        chamber: Chamber,
    ) -> Result<Option<Vec<String>>> {
        let req = ApiRequest::new()
            .param("q", "proposals")
            .param("wa", chamber.council());
        let body = self.governor.execute(&req).await?.body;
        let approvals = markup::proposal_approvals(&body, proposal_id)?;
        Ok(approvals.map(|text| markup::split_list(&text, Delimiter::Colon)))
    }

    /// Delegates approving a proposal: primary chamber first, then the secondary one.
    ///
    /// A proposal that is in neither (closed, or not indexed yet) has no approvals.
    pub async fn delegates_approving(&self, proposal_id: &str) -> Result<Vec<String>> {
        for chamber in [Chamber::Primary, Chamber::Secondary] {
            if let Some(approvals) = self.proposal_approvals(proposal_id, chamber).await? {
                return Ok(approvals);
            }
        }
        debug!(proposal_id, "proposal not found in either chamber");
        Ok(Vec::new())
    }

    /// All delegates minus the ones approving `proposal_id`, in delegate-list order.
    pub async fn delegates_not_approving(&self, proposal_id: &str) -> Result<Vec<String>> {
        let approving: HashSet<String> = self
            .delegates_approving(proposal_id)
            .await?
            .iter()
            .map(|d| canonicalize(d))
            .collect();

        Ok(self
            .assembly_delegates()
            .await?
            .into_iter()
            .filter(|d| !approving.contains(&canonicalize(d)))
            .collect())
    }
}

fn require_proposal(target: &GroupTarget) -> Result<&str> {
    target
        .proposal_id()
        .ok_or_else(|| Error::Config("proposal id not provided".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn fetcher(transport: std::sync::Arc<ScriptedTransport>) -> MembershipFetcher {
        MembershipFetcher::new(Arc::new(RateLimitGovernor::new(transport, test_config())))
    }

    fn council(c: &'static str) -> impl Fn(&ApiRequest) -> bool + Send + Sync {
        move |req| req.get("q") == Some("proposals") && req.get("wa") == Some(c)
    }

    #[tokio::test]
    async fn region_members_split_on_colon() {
        let transport = ScriptedTransport::new();
        transport.route(query("nations"), vec![region_xml("lazarus", &["a", "b", "c"])]);
        let members = fetcher(transport.clone())
            .region_members("lazarus")
            .await
            .unwrap();

        assert_eq!(members, vec!["a", "b", "c"]);
        assert_eq!(transport.requests()[0].get("region"), Some("lazarus"));
    }

    #[tokio::test]
    async fn fetch_all_concatenates_regions_in_order() {
        let transport = ScriptedTransport::new();
        transport.route(
            |req| req.get("region") == Some("one"),
            vec![region_xml("one", &["a", "b"])],
        );
        transport.route(
            |req| req.get("region") == Some("two"),
            vec![region_xml("two", &["c"])],
        );
        let members = fetcher(transport)
            .fetch_all(
                MembershipSource::RegionMembers,
                &GroupTarget::regions(["one", "two"]),
            )
            .await
            .unwrap();
        assert_eq!(members, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn scoped_sources_fail_fast_without_arguments() {
        let transport = ScriptedTransport::new();
        let f = fetcher(transport.clone());

        let err = f
            .fetch(MembershipSource::RegionMembers, &GroupTarget::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = f
            .fetch(MembershipSource::ProposalApprovals, &GroupTarget::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn proposal_falls_back_to_secondary_chamber() {
        let transport = ScriptedTransport::new();
        transport.route(council("1"), vec![proposals_xml(1, &[("other_1", &["x"])])]);
        transport.route(
            council("2"),
            vec![proposals_xml(2, &[("target_2", &["d1", "d2"])])],
        );

        let approving = fetcher(transport.clone())
            .delegates_approving("target_2")
            .await
            .unwrap();
        assert_eq!(approving, vec!["d1", "d2"]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn primary_chamber_hit_skips_secondary() {
        let transport = ScriptedTransport::new();
        transport.route(council("1"), vec![proposals_xml(1, &[("target_1", &["d1"])])]);

        let approving = fetcher(transport.clone())
            .delegates_approving("target_1")
            .await
            .unwrap();
        assert_eq!(approving, vec!["d1"]);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn unknown_proposal_yields_empty_list() {
        let transport = ScriptedTransport::new();
        transport.route(council("1"), vec![proposals_xml(1, &[])]);
        transport.route(council("2"), vec![proposals_xml(2, &[("other", &["x"])])]);

        let approving = fetcher(transport)
            .delegates_approving("gone_123")
            .await
            .unwrap();
        assert!(approving.is_empty());
    }

    #[tokio::test]
    async fn not_approving_is_delegates_minus_approvals() {
        let transport = ScriptedTransport::new();
        transport.route(
            council("1"),
            vec![proposals_xml(1, &[("target_1", &["delegate_b"])])],
        );
        transport.route(
            query("delegates"),
            vec![delegates_xml(&["delegate_a", "Delegate B", "delegate_c"])],
        );

        let rest = fetcher(transport)
            .delegates_not_approving("target_1")
            .await
            .unwrap();
        assert_eq!(rest, vec!["delegate_a", "delegate_c"]);
    }
}
