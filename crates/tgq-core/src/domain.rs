use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Credentials for one telegram (message) type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    pub secret_key: String,
    pub message_id: String,
}

impl Template {
    pub fn new(secret_key: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            message_id: message_id.into(),
        }
    }
}

/// One queued telegram: a template addressed to a single recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub template: Template,
    pub recipient: String,
}

impl DeliveryRequest {
    pub fn new(template: Template, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
        }
    }
}

/// Canonical form of a recipient identifier: lowercase, spaces as underscores.
///
/// Every comparison between recipients (ledger, campaign dedup) goes through here.
pub fn canonicalize(recipient: &str) -> String {
    recipient.trim().to_lowercase().replace(' ', "_")
}

/// Named membership collections a mass campaign can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    NewAssemblyMembers,
    AllAssemblyMembers,
    NewFounds,
    AllAssemblyDelegates,
    NewGroupMembers,
    AllGroupMembers,
    DelegatesApprovingProposal,
    DelegatesNotApprovingProposal,
}

/// Static groups are enumerated once; dynamic groups are re-polled for newcomers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Static,
    Dynamic,
}

/// Extra arguments a group needs before it can be fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    Regions,
    Proposal,
}

/// Directory query backing a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipSource {
    AssemblyMembers,
    AssemblyDelegates,
    NewFounds,
    RegionMembers,
    ProposalApprovals,
    ProposalNonApprovals,
}

/// Dispatch entry for one [`GroupKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSpec {
    pub strategy: Strategy,
    pub scope: Scope,
    pub source: MembershipSource,
}

impl GroupKind {
    pub const ALL: [GroupKind; 8] = [
        GroupKind::NewAssemblyMembers,
        GroupKind::AllAssemblyMembers,
        GroupKind::NewFounds,
        GroupKind::AllAssemblyDelegates,
        GroupKind::NewGroupMembers,
        GroupKind::AllGroupMembers,
        GroupKind::DelegatesApprovingProposal,
        GroupKind::DelegatesNotApprovingProposal,
    ];

    /// Dispatch table. Adding a group kind means adding one row here.
    pub const fn spec(self) -> GroupSpec {
        use MembershipSource as Src;
        use Scope::*;
        use Strategy::*;

        let (strategy, scope, source) = match self {
            GroupKind::NewAssemblyMembers => (Dynamic, Global, Src::AssemblyMembers),
            GroupKind::AllAssemblyMembers => (Static, Global, Src::AssemblyMembers),
            GroupKind::NewFounds => (Dynamic, Global, Src::NewFounds),
            GroupKind::AllAssemblyDelegates => (Static, Global, Src::AssemblyDelegates),
            GroupKind::NewGroupMembers => (Dynamic, Regions, Src::RegionMembers),
            GroupKind::AllGroupMembers => (Static, Regions, Src::RegionMembers),
            GroupKind::DelegatesApprovingProposal => (Static, Proposal, Src::ProposalApprovals),
            GroupKind::DelegatesNotApprovingProposal => {
                (Static, Proposal, Src::ProposalNonApprovals)
            }
        };

        GroupSpec {
            strategy,
            scope,
            source,
        }
    }

    pub fn is_dynamic(self) -> bool {
        self.spec().strategy == Strategy::Dynamic
    }

    /// Check that `target` carries what this group's scope requires.
    pub fn validate(self, target: &GroupTarget) -> Result<()> {
        match self.spec().scope {
            Scope::Global => Ok(()),
            Scope::Regions if target.region_list().is_empty() => Err(Error::Config(format!(
                "{self} requires at least one region"
            ))),
            Scope::Proposal if target.proposal_id().is_none() => Err(Error::Config(format!(
                "{self} requires a proposal id"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupKind::NewAssemblyMembers => "new_assembly_members",
            GroupKind::AllAssemblyMembers => "all_assembly_members",
            GroupKind::NewFounds => "new_founds",
            GroupKind::AllAssemblyDelegates => "all_assembly_delegates",
            GroupKind::NewGroupMembers => "new_group_members",
            GroupKind::AllGroupMembers => "all_group_members",
            GroupKind::DelegatesApprovingProposal => "delegates_approving_proposal",
            GroupKind::DelegatesNotApprovingProposal => "delegates_not_approving_proposal",
        };
        f.write_str(name)
    }
}

/// Arguments for region- or proposal-scoped groups.
///
/// Blank entries are ignored, so `GroupTarget::region("")` counts as no region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupTarget {
    regions: Vec<String>,
    proposal: Option<String>,
}

impl GroupTarget {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn region(region: impl Into<String>) -> Self {
        Self::regions([region])
    }

    pub fn regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let regions = regions
            .into_iter()
            .map(Into::into)
            .filter(|r: &String| !r.trim().is_empty())
            .collect();
        Self {
            regions,
            proposal: None,
        }
    }

    pub fn proposal(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            regions: Vec::new(),
            proposal: if id.trim().is_empty() { None } else { Some(id) },
        }
    }

    pub fn region_list(&self) -> &[String] {
        &self.regions
    }

    pub fn proposal_id(&self) -> Option<&str> {
        self.proposal.as_deref()
    }
}
