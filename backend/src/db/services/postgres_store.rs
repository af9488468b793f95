//! Postgres-backed `MonitorStore` built on SeaORM.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Schema, Set,
};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::{MonitorStore, StoreError};
use crate::db::entities::{monitor_state, subscriber};
use crate::db::models::{DEFAULT_SUBSCRIBER_STATE, MonitorState, Subscriber, SubscriberId};

pub struct PgStore {
    db: DatabaseConnection,
}

impl PgStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(10)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(opt).await?;
        Ok(Self::new(db))
    }

    /// Creates the `subscribers` and `monitor_states` tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), DbErr> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let subscribers = schema
            .create_table_from_entity(subscriber::Entity)
            .if_not_exists()
            .to_owned();
        self.db.execute(backend.build(&subscribers)).await?;

        let states = schema
            .create_table_from_entity(monitor_state::Entity)
            .if_not_exists()
            .to_owned();
        self.db.execute(backend.build(&states)).await?;

        info!("Database schema is ready.");
        Ok(())
    }
}

fn position_to_idx(position: usize) -> Result<i32, StoreError> {
    i32::try_from(position)
        .map_err(|_| StoreError::InvalidRecord(format!("Monitor position {position} is out of range")))
}

fn subscriber_from_model(model: subscriber::Model) -> Result<Subscriber, StoreError> {
    let properties = match model.properties {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::InvalidRecord(format!(
                "Subscriber {} has non-object properties: {other}",
                model.id
            )));
        }
    };
    let monitors = match model.monitors {
        Value::Array(items) => items,
        other => {
            return Err(StoreError::InvalidRecord(format!(
                "Subscriber {} has a non-array monitor list: {other}",
                model.id
            )));
        }
    };
    Ok(Subscriber {
        id: model.id,
        state: model.state,
        properties,
        monitors,
    })
}

fn state_from_model(model: monitor_state::Model) -> Result<MonitorState, StoreError> {
    let position = usize::try_from(model.monitor_idx).map_err(|_| {
        StoreError::InvalidRecord(format!("Negative monitor index {}", model.monitor_idx))
    })?;
    Ok(MonitorState {
        subscriber_id: model.subscriber_id,
        position,
        streak: u64::try_from(model.unsuccessful_runs).unwrap_or(0),
        suppressed_until: model.suppressed_until,
    })
}

#[async_trait]
impl MonitorStore for PgStore {
    async fn list_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        subscriber::Entity::find()
            .order_by_asc(subscriber::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(subscriber_from_model)
            .collect()
    }

    async fn get_or_create_subscriber(&self, id: SubscriberId) -> Result<Subscriber, StoreError> {
        let now = Utc::now();
        let defaults = subscriber::ActiveModel {
            id: Set(id),
            state: Set(DEFAULT_SUBSCRIBER_STATE.to_string()),
            properties: Set(Value::Object(Default::default())),
            monitors: Set(Value::Array(Vec::new())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // A concurrent creator wins silently; both callers then read the same row.
        subscriber::Entity::insert(defaults)
            .on_conflict(
                OnConflict::column(subscriber::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        let model = subscriber::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::InvalidRecord(format!("Subscriber {id} vanished after upsert")))?;
        subscriber_from_model(model)
    }

    async fn save_subscriber(&self, record: &Subscriber) -> Result<(), StoreError> {
        let now = Utc::now();
        let model = subscriber::ActiveModel {
            id: Set(record.id),
            state: Set(record.state.clone()),
            properties: Set(Value::Object(record.properties.clone())),
            monitors: Set(Value::Array(record.monitors.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        subscriber::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscriber::Column::Id)
                    .update_columns([
                        subscriber::Column::State,
                        subscriber::Column::Properties,
                        subscriber::Column::Monitors,
                        subscriber::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn get_or_create_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<MonitorState, StoreError> {
        let monitor_idx = position_to_idx(position)?;
        let defaults = monitor_state::ActiveModel {
            subscriber_id: Set(subscriber_id),
            monitor_idx: Set(monitor_idx),
            unsuccessful_runs: Set(0),
            suppressed_until: Set(None),
        };
        monitor_state::Entity::insert(defaults)
            .on_conflict(
                OnConflict::columns([
                    monitor_state::Column::SubscriberId,
                    monitor_state::Column::MonitorIdx,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        let model = monitor_state::Entity::find_by_id((subscriber_id, monitor_idx))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "Monitor state ({subscriber_id}, {position}) vanished after upsert"
                ))
            })?;
        state_from_model(model)
    }

    async fn save_monitor_state(&self, state: &MonitorState) -> Result<(), StoreError> {
        let model = monitor_state::ActiveModel {
            subscriber_id: Set(state.subscriber_id),
            monitor_idx: Set(position_to_idx(state.position)?),
            unsuccessful_runs: Set(i64::try_from(state.streak).unwrap_or(i64::MAX)),
            suppressed_until: Set(state.suppressed_until),
        };
        monitor_state::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    monitor_state::Column::SubscriberId,
                    monitor_state::Column::MonitorIdx,
                ])
                .update_columns([
                    monitor_state::Column::UnsuccessfulRuns,
                    monitor_state::Column::SuppressedUntil,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_monitor_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        monitor_state::Entity::delete_many()
            .filter(monitor_state::Column::SubscriberId.eq(subscriber_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<(), StoreError> {
        monitor_state::Entity::delete_many()
            .filter(monitor_state::Column::SubscriberId.eq(subscriber_id))
            .filter(monitor_state::Column::MonitorIdx.eq(position_to_idx(position)?))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Statement, Value as SqlValue};
    use serde_json::json;

    fn executed(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn bound(statement: &Statement) -> &[SqlValue] {
        statement
            .values
            .as_ref()
            .map(|values| values.0.as_slice())
            .unwrap_or_default()
    }

    fn logged(store: PgStore) -> Vec<Statement> {
        store
            .db
            .into_transaction_log()
            .iter()
            .flat_map(|transaction| transaction.statements().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_get_or_create_subscriber_inserts_defaults_then_reads() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(1)])
            .append_query_results([vec![model(json!({}), json!([]))]])
            .into_connection();
        let store = PgStore::new(db);

        let subscriber = store.get_or_create_subscriber(9).await.unwrap();

        assert_eq!(subscriber, Subscriber::new(9));
        let statements = logged(store);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].sql.starts_with(r#"INSERT INTO "subscribers""#));
        assert!(statements[0].sql.contains(r#"ON CONFLICT ("id") DO NOTHING"#));
        let values = bound(&statements[0]);
        assert!(values.contains(&SqlValue::BigInt(Some(9))));
        assert!(values.contains(&SqlValue::String(Some(Box::new("start".to_string())))));
        assert!(values.contains(&SqlValue::Json(Some(Box::new(json!({}))))));
        assert!(values.contains(&SqlValue::Json(Some(Box::new(json!([]))))));
        assert!(statements[1].sql.starts_with("SELECT"));
        assert!(statements[1].sql.contains(r#"WHERE "subscribers"."id" = $1"#));
    }

    #[tokio::test]
    async fn test_get_or_create_subscriber_missing_after_insert() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(0)])
            .append_query_results([Vec::<subscriber::Model>::new()])
            .into_connection();
        let store = PgStore::new(db);

        assert!(matches!(
            store.get_or_create_subscriber(9).await,
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_get_or_create_monitor_state_reads_by_composite_key() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(0)])
            .append_query_results([vec![monitor_state::Model {
                subscriber_id: 4,
                monitor_idx: 2,
                unsuccessful_runs: 7,
                suppressed_until: None,
            }]])
            .into_connection();
        let store = PgStore::new(db);

        let state = store.get_or_create_monitor_state(4, 2).await.unwrap();

        assert_eq!(state.subscriber_id, 4);
        assert_eq!(state.position, 2);
        assert_eq!(state.streak, 7);
        let statements = logged(store);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].sql.starts_with(r#"INSERT INTO "monitor_states""#));
        assert!(
            statements[0]
                .sql
                .contains(r#"ON CONFLICT ("subscriber_id", "monitor_idx") DO NOTHING"#)
        );
        assert!(statements[1].sql.contains(
            r#"WHERE "monitor_states"."subscriber_id" = $1 AND "monitor_states"."monitor_idx" = $2"#
        ));
        let values = bound(&statements[1]);
        assert_eq!(values[0], SqlValue::BigInt(Some(4)));
        assert_eq!(values[1], SqlValue::Int(Some(2)));
    }

    #[tokio::test]
    async fn test_save_monitor_state_upserts_counters() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(1)])
            .into_connection();
        let store = PgStore::new(db);
        let mut state = MonitorState::new(4, 2);
        state.streak = 5;

        store.save_monitor_state(&state).await.unwrap();

        let statements = logged(store);
        assert_eq!(statements.len(), 1);
        let sql = &statements[0].sql;
        assert!(sql.contains(r#"ON CONFLICT ("subscriber_id", "monitor_idx") DO UPDATE SET"#));
        assert!(sql.contains(r#""unsuccessful_runs" = "excluded"."unsuccessful_runs""#));
        assert!(sql.contains(r#""suppressed_until" = "excluded"."suppressed_until""#));
        assert!(bound(&statements[0]).contains(&SqlValue::BigInt(Some(5))));
    }

    #[tokio::test]
    async fn test_delete_monitor_state_filters_both_key_columns() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(1)])
            .into_connection();
        let store = PgStore::new(db);

        store.delete_monitor_state(4, 1).await.unwrap();

        let statements = logged(store);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].sql.starts_with(r#"DELETE FROM "monitor_states""#));
        assert!(statements[0].sql.contains(
            r#"WHERE "monitor_states"."subscriber_id" = $1 AND "monitor_states"."monitor_idx" = $2"#
        ));
        assert_eq!(
            bound(&statements[0]),
            &[SqlValue::BigInt(Some(4)), SqlValue::Int(Some(1))]
        );
    }

    #[tokio::test]
    async fn test_delete_monitor_states_filters_subscriber_only() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([executed(3)])
            .into_connection();
        let store = PgStore::new(db);

        store.delete_monitor_states(4).await.unwrap();

        let statements = logged(store);
        assert!(statements[0].sql.contains(r#"WHERE "monitor_states"."subscriber_id" = $1"#));
        assert!(!statements[0].sql.contains("monitor_idx"));
    }

    fn model(properties: Value, monitors: Value) -> subscriber::Model {
        subscriber::Model {
            id: 9,
            state: "start".to_string(),
            properties,
            monitors,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_subscriber_from_model() {
        let subscriber = subscriber_from_model(model(
            json!({"lang": "en"}),
            json!([{"__class__": "HttpMonitor"}]),
        ))
        .unwrap();
        assert_eq!(subscriber.id, 9);
        assert_eq!(subscriber.properties["lang"], "en");
        assert_eq!(subscriber.monitors.len(), 1);
    }

    #[test]
    fn test_subscriber_from_model_rejects_bad_shapes() {
        assert!(matches!(
            subscriber_from_model(model(json!([]), json!([]))),
            Err(StoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            subscriber_from_model(model(json!({}), json!({"0": {}}))),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_state_from_model_rejects_negative_index() {
        let model = monitor_state::Model {
            subscriber_id: 1,
            monitor_idx: -1,
            unsuccessful_runs: 3,
            suppressed_until: None,
        };
        assert!(state_from_model(model).is_err());
    }
}
