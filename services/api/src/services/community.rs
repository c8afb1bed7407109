//! services/api/src/services/community.rs
//!
//! Community lifecycle and membership. The lead is always a member and may
//! not leave; live sessions of a user who leaves are dropped from the hub.

use std::sync::Arc;
use tracing::{info, warn};
use unisphere_core::domain::{Community, NewCommunity, Role, UserSummary};
use unisphere_core::ports::{
    ChatMessageRepository, CommunityRepository, FileRepository, MembershipRepository, PortError,
    PortResult,
};

use crate::realtime::HubHandle;
use crate::services::files::FileService;

const MAX_NAME_LEN: usize = 120;
const MAX_ABBREVIATION_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct CommunityDetail {
    pub community: Community,
    pub member_count: i64,
    pub members: Vec<UserSummary>,
}

#[derive(Debug, Clone)]
pub struct CommunitySummary {
    pub community: Community,
    pub member_count: i64,
}

#[derive(Clone)]
pub struct CommunityService {
    communities: Arc<dyn CommunityRepository>,
    memberships: Arc<dyn MembershipRepository>,
    messages: Arc<dyn ChatMessageRepository>,
    file_rows: Arc<dyn FileRepository>,
    files: FileService,
    hub: HubHandle,
}

impl CommunityService {
    pub fn new(
        communities: Arc<dyn CommunityRepository>,
        memberships: Arc<dyn MembershipRepository>,
        messages: Arc<dyn ChatMessageRepository>,
        file_rows: Arc<dyn FileRepository>,
        files: FileService,
        hub: HubHandle,
    ) -> Self {
        Self {
            communities,
            memberships,
            messages,
            file_rows,
            files,
            hub,
        }
    }

    /// The caller becomes the lead and first member.
    pub async fn create(&self, lead_id: i64, name: &str, abbreviation: &str) -> PortResult<Community> {
        let name = name.trim();
        let abbreviation = abbreviation.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(PortError::BadRequest(format!(
                "name must be 1 to {} characters",
                MAX_NAME_LEN
            )));
        }
        if abbreviation.is_empty() || abbreviation.chars().count() > MAX_ABBREVIATION_LEN {
            return Err(PortError::BadRequest(format!(
                "abbreviation must be 1 to {} characters",
                MAX_ABBREVIATION_LEN
            )));
        }

        let community = self
            .communities
            .create_community(NewCommunity {
                name: name.to_string(),
                abbreviation: abbreviation.to_string(),
                lead_id,
            })
            .await?;
        info!(community_id = community.id, lead_id, "community created");
        Ok(community)
    }

    pub async fn get_detail(&self, community_id: i64) -> PortResult<CommunityDetail> {
        let community = self.communities.find_community(community_id).await?;
        let member_count = self.memberships.count_members(community_id).await?;
        let members = self.memberships.list_members(community_id).await?;
        Ok(CommunityDetail {
            community,
            member_count,
            members,
        })
    }

    pub async fn members(&self, community_id: i64) -> PortResult<Vec<UserSummary>> {
        self.communities.find_community(community_id).await?;
        self.memberships.list_members(community_id).await
    }

    pub async fn join(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        self.communities.find_community(community_id).await?;
        self.memberships.add_member(community_id, user_id).await?;
        info!(community_id, user_id, "member joined");
        Ok(())
    }

    /// A second leave is a `Conflict`, like leaving as the lead.
    pub async fn leave(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        let community = self.communities.find_community(community_id).await?;
        if community.lead_id == user_id {
            return Err(PortError::Conflict(
                "the community lead cannot leave".to_string(),
            ));
        }

        match self.memberships.remove_member(community_id, user_id).await {
            Ok(()) => {}
            Err(PortError::NotFound(_)) => {
                return Err(PortError::Conflict(
                    "not a member of this community".to_string(),
                ))
            }
            Err(e) => return Err(e),
        }

        self.hub.evict_user(community_id, user_id).await;
        info!(community_id, user_id, "member left");
        Ok(())
    }

    /// Lead or administrator only. Rows go first; files are removed afterwards
    /// and a failure there is logged, not returned.
    pub async fn delete(&self, community_id: i64, user_id: i64, role: Role) -> PortResult<()> {
        let community = self.communities.find_community(community_id).await?;
        if community.lead_id != user_id && role != Role::Admin {
            warn!(community_id, user_id, lead_id = community.lead_id, "community delete denied");
            return Err(PortError::Forbidden(
                "you are not allowed to perform this action".to_string(),
            ));
        }

        let files = self.file_rows.list_community_files(community_id).await?;
        let messages = self.messages.delete_messages_for_community(community_id).await?;
        self.communities.delete_community(community_id).await?;
        self.hub.close_community(community_id).await;

        let removed = self.files.delete_all_best_effort(&files).await;
        if removed < files.len() {
            warn!(community_id, removed, total = files.len(), "some community files were left behind");
        }
        info!(community_id, messages, files = removed, "community deleted");
        Ok(())
    }

    /// Communities the user belongs to, with member counts fetched in one batch.
    pub async fn list_for_user(&self, user_id: i64) -> PortResult<Vec<CommunitySummary>> {
        let communities = self.memberships.list_communities_for_user(user_id).await?;
        let ids: Vec<i64> = communities.iter().map(|c| c.id).collect();
        let counts = self.memberships.count_members_many(&ids).await?;

        Ok(communities
            .into_iter()
            .map(|community| CommunitySummary {
                member_count: counts.get(&community.id).copied().unwrap_or(0),
                community,
            })
            .collect())
    }
}
