//! Postgres-backed implementation of the event log, work queue and
//! materialized playbook tables. Queries are plain `sqlx::query` (runtime
//! checked, not `query!`) so the crate builds without a live database at
//! compile time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noetl_core::{Event, EventType, LoopFields, QueueJob, QueueStatus, Status, Value};
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};

use super::store::{
    ErrorLogEntry, EventStore, ExecutionSummary, QueueStore, StoreError, TransitionRow,
    WorkbookRow, WorkflowRow, WorkflowTableStore,
};

/// Postgres-backed store. One pool, shared across the event log, the
/// queue, and the materialized playbook tables.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    v.to_json()
}

fn opt_value_to_json(v: &Option<Value>) -> Option<serde_json::Value> {
    v.as_ref().map(|v| v.to_json())
}

fn json_to_value(j: serde_json::Value) -> Value {
    Value::from_json(j)
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let current_item: Option<serde_json::Value> = row.try_get("current_item")?;
    let input_context: Option<serde_json::Value> = row.try_get("input_context")?;
    let output_result: Option<serde_json::Value> = row.try_get("output_result")?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;

    Ok(Event {
        event_id: row.try_get("event_id")?,
        parent_event_id: row.try_get("parent_event_id")?,
        execution_id: row.try_get("execution_id")?,
        parent_execution_id: row.try_get("parent_execution_id")?,
        timestamp: row.try_get("timestamp")?,
        insertion_rank: row.try_get("insertion_rank")?,
        event_type: EventType(row.try_get::<String, _>("event_type")?),
        status: Status::normalize(&row.try_get::<String, _>("status")?),
        node_id: row.try_get("node_id")?,
        node_name: row.try_get("node_name")?,
        node_type: row.try_get("node_type")?,
        input_context: input_context.map(json_to_value),
        output_result: output_result.map(json_to_value),
        metadata: metadata.map(json_to_value),
        loop_fields: LoopFields {
            loop_id: row.try_get("loop_id")?,
            loop_name: row.try_get("loop_name")?,
            iterator: row.try_get("iterator")?,
            current_index: row.try_get("current_index")?,
            current_item: current_item.map(json_to_value),
        },
        error: row.try_get("error")?,
    })
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<QueueJob, StoreError> {
    let action: serde_json::Value = row.try_get("action")?;
    let input_context: serde_json::Value = row.try_get("input_context")?;
    let status: String = row.try_get("status")?;
    Ok(QueueJob {
        queue_id: row.try_get("queue_id")?,
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        action: json_to_value(action),
        input_context: json_to_value(input_context),
        status: match status.as_str() {
            "leased" => QueueStatus::Leased,
            "done" => QueueStatus::Done,
            "dead" => QueueStatus::Dead,
            _ => QueueStatus::Queued,
        },
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        available_at: row.try_get("available_at")?,
        lease_until: row.try_get("lease_until")?,
        worker_id: row.try_get("worker_id")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EventStore for PostgresStore {
    #[instrument(skip(self, event), fields(execution_id = %event.execution_id, event_id = %event.event_id))]
    async fn emit(&self, event: Event) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if event.event_type.as_str() == EventType::EXECUTION_START {
            let workload = event.input_context.clone().unwrap_or(Value::Null);
            sqlx::query(
                r#"INSERT INTO noetl_execution (execution_id, path, version, workload)
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (execution_id) DO NOTHING"#,
            )
            .bind(&event.execution_id)
            .bind(event.input_context.as_ref().and_then(|c| c.get_path("path")).and_then(|v| v.as_str().map(str::to_string)))
            .bind(event.input_context.as_ref().and_then(|c| c.get_path("version")).and_then(|v| v.as_str().map(str::to_string)))
            .bind(value_to_json(&workload))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"INSERT INTO noetl_event (
                event_id, parent_event_id, execution_id, parent_execution_id,
                "timestamp", insertion_rank, event_type, status,
                node_id, node_name, node_type,
                input_context, output_result, metadata,
                loop_id, loop_name, iterator, current_index, current_item, error
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
            ON CONFLICT (event_id) DO NOTHING"#,
        )
        .bind(&event.event_id)
        .bind(&event.parent_event_id)
        .bind(&event.execution_id)
        .bind(&event.parent_execution_id)
        .bind(event.timestamp)
        .bind(event.insertion_rank)
        .bind(event.event_type.as_str())
        .bind(event.status.as_str())
        .bind(&event.node_id)
        .bind(&event.node_name)
        .bind(&event.node_type)
        .bind(opt_value_to_json(&event.input_context))
        .bind(opt_value_to_json(&event.output_result))
        .bind(opt_value_to_json(&event.metadata))
        .bind(&event.loop_fields.loop_id)
        .bind(&event.loop_fields.loop_name)
        .bind(&event.loop_fields.iterator)
        .bind(event.loop_fields.current_index)
        .bind(opt_value_to_json(&event.loop_fields.current_item))
        .bind(&event.error)
        .execute(&mut *tx)
        .await?;

        if event.status.is_terminal() && event.status == Status::Failed {
            sqlx::query(
                r#"INSERT INTO noetl_error_log (execution_id, event_id, node_name, message, severity)
                   VALUES ($1, $2, $3, $4, 'error')"#,
            )
            .bind(&event.execution_id)
            .bind(&event.event_id)
            .bind(&event.node_name)
            .bind(event.error.clone().unwrap_or_else(|| "unknown error".to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_events(&self, execution_id: &str) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM noetl_event WHERE execution_id = $1
               ORDER BY "timestamp" ASC, insertion_rank ASC"#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn get_latest_by_step(
        &self,
        execution_id: &str,
        node_name: &str,
    ) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM noetl_event WHERE execution_id = $1 AND node_name = $2
               ORDER BY "timestamp" DESC, insertion_rank DESC LIMIT 1"#,
        )
        .bind(execution_id)
        .bind(node_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn find_error(&self, execution_id: &str) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM noetl_event WHERE execution_id = $1 AND status = 'failed'
               ORDER BY "timestamp" ASC, insertion_rank ASC LIMIT 1"#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn get_workload(&self, execution_id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query(r#"SELECT workload FROM noetl_execution WHERE execution_id = $1"#)
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let j: Option<serde_json::Value> = r.try_get("workload")?;
                Ok(j.map(json_to_value))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT execution_id, path, version, created_at FROM noetl_execution
               ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(ExecutionSummary {
                    execution_id: r.try_get("execution_id")?,
                    path: r.try_get("path")?,
                    version: r.try_get("version")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn enqueue(
        &self,
        execution_id: &str,
        node_id: &str,
        action: Value,
        input_context: Value,
        priority: i32,
        max_attempts: i32,
        available_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"INSERT INTO noetl_queue (
                execution_id, node_id, action, input_context, status,
                priority, max_attempts, available_at
            ) VALUES ($1,$2,$3,$4,'queued',$5,$6,$7)
            ON CONFLICT (execution_id, node_id)
            DO UPDATE SET execution_id = EXCLUDED.execution_id
            WHERE noetl_queue.status IN ('queued', 'leased')
            RETURNING queue_id"#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(value_to_json(&action))
        .bind(value_to_json(&input_context))
        .bind(priority)
        .bind(max_attempts)
        .bind(available_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.try_get("queue_id")?),
            None => {
                let existing = sqlx::query(
                    r#"SELECT queue_id FROM noetl_queue WHERE execution_id = $1 AND node_id = $2
                       AND status IN ('queued', 'leased')"#,
                )
                .bind(execution_id)
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing.try_get("queue_id")?)
            }
        }
    }

    #[instrument(skip(self))]
    async fn lease(&self, worker_id: &str, lease_seconds: i64) -> Result<Option<QueueJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"SELECT queue_id FROM noetl_queue
               WHERE status = 'queued' AND available_at <= now()
               ORDER BY priority DESC, queue_id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let queue_id: i64 = row.try_get("queue_id")?;

        let updated = sqlx::query(
            r#"UPDATE noetl_queue
               SET status = 'leased', worker_id = $2, attempts = attempts + 1,
                   lease_until = now() + make_interval(secs => $3),
                   heartbeat_at = now(), updated_at = now()
               WHERE queue_id = $1
               RETURNING *"#,
        )
        .bind(queue_id)
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row_to_job(&updated)?))
    }

    async fn complete(&self, queue_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE noetl_queue SET status = 'done', updated_at = now()
               WHERE queue_id = $1 AND status != 'done'"#,
        )
        .bind(queue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        queue_id: i64,
        retry: bool,
        retry_delay: Duration,
    ) -> Result<(), StoreError> {
        if retry {
            let updated = sqlx::query(
                r#"UPDATE noetl_queue
                   SET status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'dead' END,
                       available_at = now() + make_interval(secs => $2),
                       lease_until = NULL, worker_id = NULL, updated_at = now()
                   WHERE queue_id = $1
                   RETURNING status"#,
            )
            .bind(queue_id)
            .bind(retry_delay.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;
            if updated.is_none() {
                return Err(StoreError::QueueJobNotFound(queue_id));
            }
        } else {
            let result = sqlx::query(
                r#"UPDATE noetl_queue SET status = 'dead', lease_until = NULL, worker_id = NULL,
                   updated_at = now() WHERE queue_id = $1"#,
            )
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::QueueJobNotFound(queue_id));
            }
        }
        Ok(())
    }

    async fn heartbeat(
        &self,
        queue_id: i64,
        worker_id: &str,
        extend_seconds: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE noetl_queue
               SET lease_until = now() + make_interval(secs => $3), heartbeat_at = now()
               WHERE queue_id = $1 AND worker_id = $2 AND status = 'leased'"#,
        )
        .bind(queue_id)
        .bind(worker_id)
        .bind(extend_seconds as f64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseNotHeld {
                queue_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"UPDATE noetl_queue
               SET status = 'queued', worker_id = NULL, lease_until = NULL, updated_at = now()
               WHERE status = 'leased' AND lease_until IS NOT NULL AND lease_until < now()"#,
        )
        .execute(&self.pool)
        .await?;

        let n = result.rows_affected();
        if n > 0 {
            warn!(reclaimed = n, "reaped expired leases");
        }
        Ok(n)
    }

    async fn find_active(&self, execution_id: &str, node_id: &str) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM noetl_queue WHERE execution_id = $1 AND node_id = $2
               AND status IN ('queued', 'leased')"#,
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueJob>, StoreError> {
        let rows = match status {
            Some(s) => {
                sqlx::query(r#"SELECT * FROM noetl_queue WHERE status = $1 ORDER BY queue_id ASC"#)
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(r#"SELECT * FROM noetl_queue ORDER BY queue_id ASC"#)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_job).collect()
    }

    async fn get(&self, queue_id: i64) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM noetl_queue WHERE queue_id = $1"#)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }
}

#[async_trait]
impl WorkflowTableStore for PostgresStore {
    async fn upsert_workflow_rows(&self, rows: Vec<WorkflowRow>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO noetl_workflow (execution_id, step_id, step_name, step_type, description, raw_config)
                   VALUES ($1,$2,$3,$4,$5,$6)
                   ON CONFLICT (execution_id, step_name)
                   DO UPDATE SET step_id = EXCLUDED.step_id, step_type = EXCLUDED.step_type,
                       description = EXCLUDED.description, raw_config = EXCLUDED.raw_config"#,
            )
            .bind(&row.execution_id)
            .bind(row.step_id)
            .bind(&row.step_name)
            .bind(&row.step_type)
            .bind(&row.description)
            .bind(value_to_json(&row.raw_config))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_transition_rows(&self, rows: Vec<TransitionRow>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            upsert_transition_tx(&mut tx, &row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_workbook_rows(&self, rows: Vec<WorkbookRow>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO noetl_workbook (execution_id, task_id, task_name, task_type, raw_config)
                   VALUES ($1,$2,$3,$4,$5)
                   ON CONFLICT (execution_id, task_name)
                   DO UPDATE SET task_id = EXCLUDED.task_id, task_type = EXCLUDED.task_type,
                       raw_config = EXCLUDED.raw_config"#,
            )
            .bind(&row.execution_id)
            .bind(row.task_id)
            .bind(&row.task_name)
            .bind(&row.task_type)
            .bind(value_to_json(&row.raw_config))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_transition(&self, row: TransitionRow) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_transition_tx(&mut tx, &row).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_transition_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    row: &TransitionRow,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO noetl_transition (execution_id, from_step, to_step, condition, with_params)
           VALUES ($1,$2,$3,$4,$5)
           ON CONFLICT (execution_id, from_step, to_step)
           DO UPDATE SET condition = EXCLUDED.condition, with_params = EXCLUDED.with_params"#,
    )
    .bind(&row.execution_id)
    .bind(&row.from_step)
    .bind(&row.to_step)
    .bind(&row.condition)
    .bind(opt_value_to_json(&row.with_params))
    .execute(&mut **tx)
    .await?;
    Ok(())
}
