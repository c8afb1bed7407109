//! Communities and their memberships.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use unisphere_core::domain::{Community, Membership, NewCommunity, UserSummary};
use unisphere_core::ports::{CommunityRepository, MembershipRepository, PortError, PortResult};

use super::{CommunityRecord, DbAdapter, UserSummaryRecord, COMMUNITY_COLUMNS};

#[async_trait]
impl CommunityRepository for DbAdapter {
    async fn create_community(&self, community: NewCommunity) -> PortResult<Community> {
        let sql = format!(
            "INSERT INTO communities (name, abbreviation, lead_id) VALUES ($1, $2, $3) RETURNING {}",
            COMMUNITY_COLUMNS
        );
        let record = self
            .timed(format!("community {}", community.name), async {
                let mut tx = self.pool.begin().await?;
                let record = sqlx::query_as::<_, CommunityRecord>(&sql)
                    .bind(&community.name)
                    .bind(&community.abbreviation)
                    .bind(community.lead_id)
                    .fetch_one(&mut *tx)
                    .await?;
                sqlx::query("INSERT INTO community_participants (community_id, user_id) VALUES ($1, $2)")
                    .bind(record.id)
                    .bind(community.lead_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok::<_, sqlx::Error>(record)
            })
            .await?;
        Ok(record.to_domain())
    }

    async fn find_community(&self, community_id: i64) -> PortResult<Community> {
        let sql = format!("SELECT {} FROM communities WHERE id = $1", COMMUNITY_COLUMNS);
        let record = self
            .timed(
                format!("community {}", community_id),
                sqlx::query_as::<_, CommunityRecord>(&sql)
                    .bind(community_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(record.to_domain())
    }

    async fn delete_community(&self, community_id: i64) -> PortResult<()> {
        let result = self
            .timed(
                format!("community {}", community_id),
                sqlx::query("DELETE FROM communities WHERE id = $1")
                    .bind(community_id)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("community {} not found", community_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for DbAdapter {
    async fn is_member(&self, community_id: i64, user_id: i64) -> PortResult<bool> {
        self.timed(
            format!("membership of user {} in community {}", user_id, community_id),
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM community_participants \
                 WHERE community_id = $1 AND user_id = $2)",
            )
            .bind(community_id)
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn add_member(&self, community_id: i64, user_id: i64) -> PortResult<Membership> {
        let joined_at: DateTime<Utc> = self
            .timed(
                format!("membership of user {} in community {}", user_id, community_id),
                sqlx::query_scalar(
                    "INSERT INTO community_participants (community_id, user_id) VALUES ($1, $2) \
                     RETURNING joined_at",
                )
                .bind(community_id)
                .bind(user_id)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(Membership {
            community_id,
            user_id,
            joined_at,
        })
    }

    async fn remove_member(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        let result = self
            .timed(
                format!("membership of user {} in community {}", user_id, community_id),
                sqlx::query("DELETE FROM community_participants WHERE community_id = $1 AND user_id = $2")
                    .bind(community_id)
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "user {} is not a member of community {}",
                user_id, community_id
            )));
        }
        Ok(())
    }

    async fn count_members(&self, community_id: i64) -> PortResult<i64> {
        self.timed(
            format!("community {}", community_id),
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM community_participants WHERE community_id = $1")
                .bind(community_id)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn count_members_many(&self, community_ids: &[i64]) -> PortResult<HashMap<i64, i64>> {
        if community_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, i64)> = self
            .timed(
                "member counts",
                sqlx::query_as(
                    "SELECT community_id, COUNT(*) FROM community_participants \
                     WHERE community_id = ANY($1) GROUP BY community_id",
                )
                .bind(community_ids)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn list_communities_for_user(&self, user_id: i64) -> PortResult<Vec<Community>> {
        let records = self
            .timed(
                format!("communities of user {}", user_id),
                sqlx::query_as::<_, CommunityRecord>(
                    "SELECT c.id, c.name, c.abbreviation, c.lead_id, c.profile_photo_id, \
                            c.created_at, c.updated_at \
                     FROM community_participants p \
                     JOIN communities c ON c.id = p.community_id \
                     WHERE p.user_id = $1 \
                     ORDER BY c.name, c.id",
                )
                .bind(user_id)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(records.into_iter().map(CommunityRecord::to_domain).collect())
    }

    async fn list_members(&self, community_id: i64) -> PortResult<Vec<UserSummary>> {
        let records = self
            .timed(
                format!("members of community {}", community_id),
                sqlx::query_as::<_, UserSummaryRecord>(
                    "SELECT u.id, u.email, u.role, f.file_url AS profile_photo_url \
                     FROM community_participants p \
                     JOIN users u ON u.id = p.user_id \
                     LEFT JOIN files f ON f.id = u.profile_photo_id \
                     WHERE p.community_id = $1 \
                     ORDER BY p.joined_at, u.id",
                )
                .bind(community_id)
                .fetch_all(&self.pool),
            )
            .await?;
        records.into_iter().map(UserSummaryRecord::to_domain).collect()
    }
}
