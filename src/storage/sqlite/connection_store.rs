//! SQLite ConnectionStore implementation.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sea_query::{
    Alias, Cond, Expr, Func, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::model::{ComponentId, Connection, ConnectionId, Endpoint};
use crate::storage::schema::{ConnectionSubscriptions, Connections, CREATE_CONNECTIONS_TABLES};
use crate::storage::{
    ConnectionPage, ConnectionQuery, ConnectionStore, Result, StorageError, Upserted,
};

const COLUMNS: [Connections; 9] = [
    Connections::Id,
    Connections::SourceComponent,
    Connections::SourceChannel,
    Connections::TargetComponent,
    Connections::TargetChannel,
    Connections::Enabled,
    Connections::CreateTimestamp,
    Connections::UpdateTimestamp,
    Connections::DeletedTimestamp,
];

/// SQLite-backed connection store.
///
/// A partial unique index on the endpoint columns of live rows enforces
/// one live connection per pair; upserts insert-or-ignore against it.
pub struct SqliteConnectionStore {
    pool: SqlitePool,
}

impl SqliteConnectionStore {
    /// Create a new SQLite connection store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_CONNECTIONS_TABLES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Connection {
        let id: String = row.get("id");
        let source_component: String = row.get("source_component");
        let target_component: String = row.get("target_component");
        let source_channel: String = row.get("source_channel");
        let target_channel: String = row.get("target_channel");

        Connection {
            id: ConnectionId::from(id),
            source: Endpoint::new(ComponentId::from(source_component), source_channel),
            target: Endpoint::new(ComponentId::from(target_component), target_channel),
            enabled: row.get("enabled"),
            create_timestamp: row.get("create_timestamp"),
            update_timestamp: row.get("update_timestamp"),
            deleted_timestamp: row.get("deleted_timestamp"),
            c2_subscriptions: BTreeSet::new(),
        }
    }

    fn live() -> SelectStatement {
        Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .to_owned()
    }

    fn involving(component: &ComponentId) -> Cond {
        Cond::any()
            .add(Expr::col(Connections::SourceComponent).eq(component.as_str()))
            .add(Expr::col(Connections::TargetComponent).eq(component.as_str()))
    }

    /// Run a rendered connection select and fill in the notification sets.
    async fn load(&self, sql: &str) -> Result<Vec<Connection>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut connections: Vec<Connection> = rows.iter().map(Self::from_row).collect();
        if connections.is_empty() {
            return Ok(connections);
        }

        let ids: Vec<String> = connections
            .iter()
            .map(|c| c.id.as_str().to_string())
            .collect();
        let query = Query::select()
            .columns([
                ConnectionSubscriptions::ConnectionId,
                ConnectionSubscriptions::ComponentId,
                ConnectionSubscriptions::ChannelName,
            ])
            .from(ConnectionSubscriptions::Table)
            .and_where(Expr::col(ConnectionSubscriptions::ConnectionId).is_in(ids))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut subscriptions: HashMap<String, BTreeSet<Endpoint>> = HashMap::new();
        for row in &rows {
            let connection_id: String = row.get("connection_id");
            let component_id: String = row.get("component_id");
            let channel_name: String = row.get("channel_name");
            subscriptions
                .entry(connection_id)
                .or_default()
                .insert(Endpoint::new(ComponentId::from(component_id), channel_name));
        }

        for connection in &mut connections {
            if let Some(set) = subscriptions.remove(connection.id.as_str()) {
                connection.c2_subscriptions = set;
            }
        }
        Ok(connections)
    }

    async fn insert_subscription(
        conn: &mut SqliteConnection,
        id: &ConnectionId,
        subscriber: &Endpoint,
    ) -> Result<bool> {
        let query = Query::insert()
            .into_table(ConnectionSubscriptions::Table)
            .columns([
                ConnectionSubscriptions::ConnectionId,
                ConnectionSubscriptions::ComponentId,
                ConnectionSubscriptions::ChannelName,
            ])
            .values_panic([
                id.as_str().into(),
                subscriber.component_id.as_str().into(),
                subscriber.channel_name.as_str().into(),
            ])
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Render one id-ordered keyset page of live connections.
    fn live_page(
        component: Option<&ComponentId>,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> String {
        let mut select = Self::live();
        if let Some(component) = component {
            select.cond_where(Self::involving(component));
        }
        if let Some(after) = after {
            select.and_where(Expr::col(Connections::Id).gt(after.as_str()));
        }
        select
            .order_by(Connections::Id, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder)
    }

    /// Render the count and page selects of a listing.
    fn query_statements(query: &ConnectionQuery) -> (String, String) {
        let mut filter = Cond::all();
        if !query.include_deleted {
            filter = filter.add(Expr::col(Connections::DeletedTimestamp).is_null());
        }
        if let Some(component) = &query.component {
            filter = filter.add(Self::involving(component));
        }

        let count = Query::select()
            .expr_as(
                Func::count(Expr::col(Connections::Id)),
                Alias::new("total"),
            )
            .from(Connections::Table)
            .cond_where(filter.clone())
            .to_string(SqliteQueryBuilder);
        let select = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .cond_where(filter)
            .order_by(Connections::Id, Order::Asc)
            .limit(query.limit as u64)
            .offset(query.offset as u64)
            .to_string(SqliteQueryBuilder);
        (count, select)
    }

    /// Render the timestamp bump and the delete that drop a subscriber.
    fn unsubscribe_statements(component: &ComponentId, now: i64) -> (String, String) {
        let subscribed = Query::select()
            .column(ConnectionSubscriptions::ConnectionId)
            .from(ConnectionSubscriptions::Table)
            .and_where(Expr::col(ConnectionSubscriptions::ComponentId).eq(component.as_str()))
            .to_owned();
        let touch = Query::update()
            .table(Connections::Table)
            .values([(Connections::UpdateTimestamp, now.into())])
            .and_where(Expr::col(Connections::Id).in_subquery(subscribed))
            .to_string(SqliteQueryBuilder);
        let delete = Query::delete()
            .from_table(ConnectionSubscriptions::Table)
            .and_where(Expr::col(ConnectionSubscriptions::ComponentId).eq(component.as_str()))
            .to_string(SqliteQueryBuilder);
        (touch, delete)
    }

    async fn live_by_endpoints(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Option<Connection>> {
        let sql = Self::live()
            .and_where(Expr::col(Connections::SourceComponent).eq(source.component_id.as_str()))
            .and_where(Expr::col(Connections::SourceChannel).eq(source.channel_name.as_str()))
            .and_where(Expr::col(Connections::TargetComponent).eq(target.component_id.as_str()))
            .and_where(Expr::col(Connections::TargetChannel).eq(target.channel_name.as_str()))
            .to_string(SqliteQueryBuilder);
        Ok(self.load(&sql).await?.into_iter().next())
    }
}

#[async_trait]
impl ConnectionStore for SqliteConnectionStore {
    async fn upsert(&self, connection: Connection) -> Result<Upserted> {
        let mut tx = self.pool.begin().await?;

        let query = Query::insert()
            .into_table(Connections::Table)
            .columns(COLUMNS)
            .values_panic([
                connection.id.as_str().into(),
                connection.source.component_id.as_str().into(),
                connection.source.channel_name.as_str().into(),
                connection.target.component_id.as_str().into(),
                connection.target.channel_name.as_str().into(),
                connection.enabled.into(),
                connection.create_timestamp.into(),
                connection.update_timestamp.into(),
                connection.deleted_timestamp.into(),
            ])
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self
                .live_by_endpoints(&connection.source, &connection.target)
                .await?
            {
                Some(existing) => Ok(Upserted::Existing(existing)),
                // Conflict on the primary key rather than the live pair.
                None => Err(StorageError::Corrupt {
                    id: connection.id.to_string(),
                    reason: "connection id already in use".into(),
                }),
            };
        }

        for subscriber in &connection.c2_subscriptions {
            Self::insert_subscription(&mut *tx, &connection.id, subscriber).await?;
        }
        tx.commit().await?;

        Ok(Upserted::Created(connection))
    }

    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        let sql = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::Id).eq(id.as_str()))
            .to_string(SqliteQueryBuilder);
        Ok(self.load(&sql).await?.into_iter().next())
    }

    async fn set_enabled(
        &self,
        id: &ConnectionId,
        enabled: bool,
        now: i64,
    ) -> Result<Option<Connection>> {
        let query = Query::update()
            .table(Connections::Table)
            .values([
                (Connections::Enabled, enabled.into()),
                (Connections::UpdateTimestamp, now.into()),
            ])
            .and_where(Expr::col(Connections::Id).eq(id.as_str()))
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn soft_delete(&self, id: &ConnectionId, now: i64) -> Result<Option<Connection>> {
        let query = Query::update()
            .table(Connections::Table)
            .values([
                (Connections::DeletedTimestamp, now.into()),
                (Connections::Enabled, false.into()),
                (Connections::UpdateTimestamp, now.into()),
            ])
            .and_where(Expr::col(Connections::Id).eq(id.as_str()))
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn add_subscription(
        &self,
        id: &ConnectionId,
        subscriber: &Endpoint,
        now: i64,
    ) -> Result<Option<bool>> {
        let mut tx = self.pool.begin().await?;

        let live = Query::select()
            .column(Connections::Id)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::Id).eq(id.as_str()))
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .to_string(SqliteQueryBuilder);
        if sqlx::query(&live).fetch_optional(&mut *tx).await?.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let added = Self::insert_subscription(&mut *tx, id, subscriber).await?;
        if added {
            let touch = Query::update()
                .table(Connections::Table)
                .values([(Connections::UpdateTimestamp, now.into())])
                .and_where(Expr::col(Connections::Id).eq(id.as_str()))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&touch).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(Some(added))
    }

    async fn remove_subscriptions_of(&self, component: &ComponentId, now: i64) -> Result<u64> {
        let (touch, delete) = Self::unsubscribe_statements(component, now);

        let mut tx = self.pool.begin().await?;
        let changed = sqlx::query(&touch).execute(&mut *tx).await?.rows_affected();
        sqlx::query(&delete).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(changed)
    }

    async fn live_after(
        &self,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>> {
        let sql = Self::live_page(None, after, limit);
        self.load(&sql).await
    }

    async fn live_involving_after(
        &self,
        component: &ComponentId,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>> {
        let sql = Self::live_page(Some(component), after, limit);
        self.load(&sql).await
    }

    async fn query(&self, query: &ConnectionQuery) -> Result<ConnectionPage> {
        let (count, select) = Self::query_statements(query);

        let total: i64 = sqlx::query(&count).fetch_one(&self.pool).await?.get("total");
        let connections = self.load(&select).await?;

        Ok(ConnectionPage {
            total: total as u64,
            connections,
        })
    }

    async fn disable_all(&self, now: i64) -> Result<u64> {
        let query = Query::update()
            .table(Connections::Table)
            .values([
                (Connections::Enabled, false.into()),
                (Connections::UpdateTimestamp, now.into()),
            ])
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .and_where(Expr::col(Connections::Enabled).eq(true))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_all(&self, now: i64) -> Result<u64> {
        let query = Query::update()
            .table(Connections::Table)
            .values([
                (Connections::DeletedTimestamp, now.into()),
                (Connections::Enabled, false.into()),
                (Connections::UpdateTimestamp, now.into()),
            ])
            .and_where(Expr::col(Connections::DeletedTimestamp).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn drop_all(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let subscriptions = Query::delete()
            .from_table(ConnectionSubscriptions::Table)
            .to_string(SqliteQueryBuilder);
        sqlx::query(&subscriptions).execute(&mut *tx).await?;

        let connections = Query::delete()
            .from_table(Connections::Table)
            .to_string(SqliteQueryBuilder);
        let removed = sqlx::query(&connections).execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        Ok(removed)
    }
}
