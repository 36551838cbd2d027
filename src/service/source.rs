//! Read path to the source of truth
//!
//! One aggregation per resource family, behind a trait so the façade can
//! be exercised against an in-memory fixture. The database implementation
//! is the only place the accounting core touches the relational store.

use anyhow::anyhow;
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QuerySelect,
};

use crate::entity::{organization, sandbox, snapshot, volume};
use crate::model::event::SandboxUsageProjection;
use crate::model::quota::SandboxResourceTotals;
use crate::model::state::{
    SANDBOX_STATES_CONSUMING_COMPUTE, SANDBOX_STATES_CONSUMING_DISK,
    SNAPSHOT_USAGE_IGNORED_STATES, SandboxState, VOLUME_USAGE_IGNORED_STATES,
};

/// Aggregated projection reads the accounting core needs from the
/// platform database
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Sum of cpu/mem over compute-consuming sandboxes and disk over
    /// disk-consuming sandboxes of the organization
    async fn fetch_sandbox_usage(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<SandboxResourceTotals>;

    /// Count of snapshots whose state counts toward usage
    async fn fetch_snapshot_count(&self, organization_id: &str) -> anyhow::Result<i64>;

    /// Count of volumes whose state counts toward usage
    async fn fetch_volume_count(&self, organization_id: &str) -> anyhow::Result<i64>;

    /// The organization row, for quota limits and existence checks
    async fn find_organization(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<organization::Model>>;

    /// Live projection of one sandbox, for exclusion arithmetic
    async fn find_sandbox(
        &self,
        sandbox_id: &str,
    ) -> anyhow::Result<Option<SandboxUsageProjection>>;
}

#[derive(Debug, FromQueryResult)]
struct SandboxUsageRow {
    cpu: Option<i64>,
    mem: Option<i64>,
    disk: Option<i64>,
}

/// `SUM(CASE WHEN state IN (…) THEN column ELSE 0 END)`, so one query over
/// the organization's sandbox rows yields every aggregate of the family
fn sum_where_state_in(states: &[SandboxState], column: sandbox::Column) -> SimpleExpr {
    let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
    let case: SimpleExpr =
        Expr::case(sandbox::Column::State.is_in(states), Expr::col(column))
            .finally(0)
            .into();
    Func::sum(case).into()
}

/// [`UsageSource`] over the platform's relational database
pub struct DatabaseUsageSource {
    db: DatabaseConnection,
}

impl DatabaseUsageSource {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageSource for DatabaseUsageSource {
    async fn fetch_sandbox_usage(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<SandboxResourceTotals> {
        let row = sandbox::Entity::find()
            .select_only()
            .column_as(
                sum_where_state_in(SANDBOX_STATES_CONSUMING_COMPUTE, sandbox::Column::Cpu),
                "cpu",
            )
            .column_as(
                sum_where_state_in(SANDBOX_STATES_CONSUMING_COMPUTE, sandbox::Column::Mem),
                "mem",
            )
            .column_as(
                sum_where_state_in(SANDBOX_STATES_CONSUMING_DISK, sandbox::Column::Disk),
                "disk",
            )
            .filter(sandbox::Column::OrganizationId.eq(organization_id))
            .into_model::<SandboxUsageRow>()
            .one(&self.db)
            .await?;

        Ok(SandboxResourceTotals {
            cpu: row.as_ref().and_then(|r| r.cpu).unwrap_or(0),
            mem: row.as_ref().and_then(|r| r.mem).unwrap_or(0),
            disk: row.and_then(|r| r.disk).unwrap_or(0),
        })
    }

    async fn fetch_snapshot_count(&self, organization_id: &str) -> anyhow::Result<i64> {
        let ignored: Vec<String> = SNAPSHOT_USAGE_IGNORED_STATES
            .iter()
            .map(|s| s.to_string())
            .collect();

        let count = snapshot::Entity::find()
            .filter(snapshot::Column::OrganizationId.eq(organization_id))
            .filter(snapshot::Column::State.is_not_in(ignored))
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }

    async fn fetch_volume_count(&self, organization_id: &str) -> anyhow::Result<i64> {
        let ignored: Vec<String> = VOLUME_USAGE_IGNORED_STATES
            .iter()
            .map(|s| s.to_string())
            .collect();

        let count = volume::Entity::find()
            .filter(volume::Column::OrganizationId.eq(organization_id))
            .filter(volume::Column::State.is_not_in(ignored))
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }

    async fn find_organization(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<organization::Model>> {
        Ok(organization::Entity::find_by_id(organization_id)
            .one(&self.db)
            .await?)
    }

    async fn find_sandbox(
        &self,
        sandbox_id: &str,
    ) -> anyhow::Result<Option<SandboxUsageProjection>> {
        let Some(model) = sandbox::Entity::find_by_id(sandbox_id).one(&self.db).await? else {
            return Ok(None);
        };

        let state = model
            .state
            .parse()
            .map_err(|_| anyhow!("invalid sandbox state '{}' for '{}'", model.state, model.id))?;

        Ok(Some(SandboxUsageProjection {
            id: model.id,
            organization_id: model.organization_id,
            state,
            cpu: model.cpu,
            mem: model.mem,
            disk: model.disk,
        }))
    }
}
