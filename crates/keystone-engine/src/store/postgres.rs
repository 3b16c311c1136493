//! PostgreSQL store implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus, GraphId, GraphRecord,
    LogEntry, Outputs, Project, ProjectId, StateBlob, StoredState,
};

use super::{DeploymentStore, StateStore};

const DEPLOYMENT_COLUMNS: &str = "id, project_id, graph_id, status, outputs, logs, \
     terraform_state, state_version, error, created_at, updated_at";

/// PostgreSQL-backed deployment and state store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> EngineResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                cloud_provider TEXT NOT NULL,
                settings JSONB NOT NULL DEFAULT 'null'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graphs (
                id UUID PRIMARY KEY,
                project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                nodes JSONB NOT NULL DEFAULT '[]'::jsonb,
                edges JSONB NOT NULL DEFAULT '[]'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id UUID PRIMARY KEY,
                project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                graph_id UUID NOT NULL REFERENCES graphs(id),
                status TEXT NOT NULL,
                outputs JSONB NOT NULL DEFAULT '{}'::jsonb,
                logs JSONB NOT NULL DEFAULT '[]'::jsonb,
                terraform_state BYTEA,
                state_version BIGINT NOT NULL DEFAULT 0,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_project
            ON deployments (project_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_status
            ON deployments (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &PgRow) -> EngineResult<DeploymentRecord> {
        let status_str: String = row.try_get("status")?;
        let outputs_json: serde_json::Value = row.try_get("outputs")?;
        let logs_json: serde_json::Value = row.try_get("logs")?;
        let state: Option<Vec<u8>> = row.try_get("terraform_state")?;
        let state_version: i64 = row.try_get("state_version")?;

        let status: DeploymentStatus = status_str.parse().map_err(|e| {
            EngineError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;
        let outputs: Outputs = serde_json::from_value(outputs_json).map_err(|e| {
            EngineError::Serialisation(format!("failed to deserialise outputs: {e}"))
        })?;
        let logs: Vec<LogEntry> = serde_json::from_value(logs_json)
            .map_err(|e| EngineError::Serialisation(format!("failed to deserialise logs: {e}")))?;

        Ok(DeploymentRecord {
            data: DeploymentData {
                id: DeploymentId::new(row.try_get("id")?),
                project_id: ProjectId::new(row.try_get("project_id")?),
                graph_id: GraphId::new(row.try_get("graph_id")?),
                outputs,
                terraform_state: stored_state(state_version, state),
                logs,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                error: row.try_get("error")?,
            },
            status,
        })
    }

    fn not_found_unless_affected(
        result: &sqlx::postgres::PgQueryResult,
        id: &DeploymentId,
    ) -> EngineResult<()> {
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("deployment", id));
        }
        Ok(())
    }
}

fn stored_state(version: i64, blob: Option<Vec<u8>>) -> StoredState {
    StoredState::from_parts(u64::try_from(version).unwrap_or(0), blob.map(StateBlob::from))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> EngineResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Serialisation(format!("failed to serialise {what}: {e}")))
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert_project(&self, project: &Project) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, cloud_provider, settings)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(project.id.as_uuid())
        .bind(&project.name)
        .bind(&project.cloud_provider)
        .bind(&project.settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_graph(&self, graph: &GraphRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO graphs (id, project_id, version, nodes, edges)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(graph.id.as_uuid())
        .bind(graph.project_id.as_uuid())
        .bind(graph.version)
        .bind(&graph.nodes)
        .bind(&graph.edges)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_deployment(&self, record: &DeploymentRecord) -> EngineResult<()> {
        let data = &record.data;
        let outputs = to_json(&data.outputs, "outputs")?;
        let logs = to_json(&data.logs, "logs")?;
        let version = i64::try_from(data.terraform_state.version())
            .map_err(|_| EngineError::internal("state version overflow"))?;

        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, project_id, graph_id, status, outputs, logs,
                terraform_state, state_version, error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(data.id.as_uuid())
        .bind(data.project_id.as_uuid())
        .bind(data.graph_id.as_uuid())
        .bind(record.status.as_str())
        .bind(&outputs)
        .bind(&logs)
        .bind(data.terraform_state.blob().map(StateBlob::as_bytes))
        .bind(version)
        .bind(&data.error)
        .bind(data.created_at)
        .bind(data.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> EngineResult<Option<DeploymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn get_project(&self, id: &ProjectId) -> EngineResult<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, cloud_provider, settings
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> EngineResult<Project> {
            Ok(Project {
                id: ProjectId::new(r.try_get("id")?),
                name: r.try_get("name")?,
                cloud_provider: r.try_get("cloud_provider")?,
                settings: r.try_get("settings")?,
            })
        })
        .transpose()
    }

    async fn get_graph(&self, id: &GraphId) -> EngineResult<Option<GraphRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, version, nodes, edges
            FROM graphs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> EngineResult<GraphRecord> {
            Ok(GraphRecord {
                id: GraphId::new(r.try_get("id")?),
                project_id: ProjectId::new(r.try_get("project_id")?),
                version: r.try_get("version")?,
                nodes: r.try_get("nodes")?,
                edges: r.try_get("edges")?,
            })
        })
        .transpose()
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $1, error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Self::not_found_unless_affected(&result, id)
    }

    async fn save_outputs(&self, id: &DeploymentId, outputs: &Outputs) -> EngineResult<()> {
        let outputs = to_json(outputs, "outputs")?;
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET outputs = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(&outputs)
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Self::not_found_unless_affected(&result, id)
    }

    async fn append_log(&self, id: &DeploymentId, entry: &LogEntry) -> EngineResult<()> {
        let entry = to_json(&[entry], "log entry")?;
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET logs = logs || $1::jsonb, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(&entry)
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Self::not_found_unless_affected(&result, id)
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    async fn save_state(&self, id: &DeploymentId, state: Option<&StateBlob>) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET terraform_state = $1, state_version = state_version + 1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(state.map(StateBlob::as_bytes))
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::state_store(format!("save state: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::state_store(format!(
                "save state: deployment not found: {id}"
            )));
        }
        Ok(())
    }

    async fn load_state(&self, id: &DeploymentId) -> EngineResult<StoredState> {
        let row = sqlx::query(
            r#"
            SELECT terraform_state, state_version
            FROM deployments
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::state_store(format!("load state: {e}")))?
        .ok_or_else(|| EngineError::state_store(format!("load state: deployment not found: {id}")))?;

        let blob: Option<Vec<u8>> = row.try_get("terraform_state")?;
        let version: i64 = row.try_get("state_version")?;
        Ok(stored_state(version, blob))
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
