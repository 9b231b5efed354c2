// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Postgres-backed [`WdPostStore`].

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::PgConnection;

use super::{PartitionTask, PartitionTaskIdentity, ProofRecord, WdPostStore};
use crate::harmony::{TaskId, TaskTx};

/// DDL for the tables owned by this system. The `harmony_*` tables are
/// created by the task runtime's own migrations.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wdpost_partition_tasks (
        task_id BIGINT PRIMARY KEY,
        sp_id BIGINT NOT NULL,
        proving_period_start BIGINT NOT NULL,
        deadline_index BIGINT NOT NULL,
        partition_index BIGINT NOT NULL,
        UNIQUE (sp_id, proving_period_start, deadline_index, partition_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wdpost_proofs (
        sp_id BIGINT NOT NULL,
        proving_period_start BIGINT NOT NULL,
        deadline BIGINT NOT NULL,
        partition BIGINT NOT NULL,
        submit_at_epoch BIGINT NOT NULL,
        submit_by_epoch BIGINT NOT NULL,
        proof_params BYTEA
    )
    "#,
];

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: i64,
    sp_id: i64,
    proving_period_start: i64,
    deadline_index: i64,
    partition_index: i64,
}

impl From<TaskRow> for PartitionTask {
    fn from(row: TaskRow) -> Self {
        PartitionTask {
            task_id: TaskId(row.task_id),
            identity: PartitionTaskIdentity {
                sp_id: row.sp_id as u64,
                proving_period_start: row.proving_period_start,
                deadline_index: row.deadline_index as u64,
                partition_index: row.partition_index as u64,
            },
        }
    }
}

#[derive(Clone)]
pub struct PgWdPostStore {
    pool: PgPool,
}

impl PgWdPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies [`SCHEMA`].
    pub async fn migrate(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("applying wdpost schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl WdPostStore for PgWdPostStore {
    async fn partition_task(&self, id: TaskId) -> Result<Option<PartitionTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT task_id, sp_id, proving_period_start, deadline_index, partition_index \
             FROM wdpost_partition_tasks WHERE task_id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PartitionTask::from))
    }

    async fn partition_tasks(&self, ids: &[TaskId]) -> Result<Vec<PartitionTask>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT task_id, sp_id, proving_period_start, deadline_index, partition_index \
             FROM wdpost_partition_tasks WHERE task_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PartitionTask::from).collect())
    }

    async fn failed_attempts(&self, id: TaskId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM harmony_task_history WHERE task_id = $1 AND result = FALSE",
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn is_test_task(&self, id: TaskId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM harmony_test WHERE task_id = $1")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn set_test_result(&self, id: TaskId, result: &str) -> Result<u64> {
        let res = sqlx::query("UPDATE harmony_test SET result = $1 WHERE task_id = $2")
            .bind(result)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_proof(&self, record: &ProofRecord) -> Result<u64> {
        let res = sqlx::query(
            "INSERT INTO wdpost_proofs (sp_id, proving_period_start, deadline, partition, \
             submit_at_epoch, submit_by_epoch, proof_params) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.sp_id as i64)
        .bind(record.proving_period_start)
        .bind(record.deadline as i64)
        .bind(record.partition as i64)
        .bind(record.submit_at_epoch)
        .bind(record.submit_by_epoch)
        .bind(&record.proof_params)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

/// [`TaskTx`] over a connection enrolled in the runtime's task-creation
/// transaction.
pub struct PgTaskTx<'c>(pub &'c mut PgConnection);

#[async_trait]
impl<'c> TaskTx for PgTaskTx<'c> {
    async fn insert_partition_task(
        &mut self,
        id: TaskId,
        identity: &PartitionTaskIdentity,
    ) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO wdpost_partition_tasks \
             (task_id, sp_id, proving_period_start, deadline_index, partition_index) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (sp_id, proving_period_start, deadline_index, partition_index) DO NOTHING",
        )
        .bind(id.0)
        .bind(identity.sp_id as i64)
        .bind(identity.proving_period_start)
        .bind(identity.deadline_index as i64)
        .bind(identity.partition_index as i64)
        .execute(&mut *self.0)
        .await
        .context("insert partition task")?;
        Ok(res.rows_affected() == 1)
    }
}
