//! SQLite ComponentStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::model::{ChannelSchema, Component, ComponentId, ComponentType};
use crate::storage::schema::{Components, CREATE_COMPONENTS_TABLE};
use crate::storage::{ComponentPage, ComponentQuery, ComponentStore, Result, StorageError};

const COLUMNS: [Components; 9] = [
    Components::Id,
    Components::ComponentType,
    Components::Name,
    Components::Description,
    Components::Version,
    Components::ApiVersion,
    Components::Since,
    Components::FinishedTime,
    Components::Channels,
];

/// SQLite-backed component store.
///
/// Channels are kept as a JSON document; they are only ever read back
/// whole.
pub struct SqliteComponentStore {
    pool: SqlitePool,
}

impl SqliteComponentStore {
    /// Create a new SQLite component store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_COMPONENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Component> {
        let id: String = row.get("id");
        let component_type: String = row.get("component_type");
        let component_type: ComponentType =
            component_type.parse().map_err(|reason| StorageError::Corrupt {
                id: id.clone(),
                reason,
            })?;
        let channels: String = row.get("channels");
        let channels: Vec<ChannelSchema> = serde_json::from_str(&channels)?;

        Ok(Component {
            id: ComponentId::from(id),
            component_type,
            name: row.get("name"),
            description: row.get("description"),
            version: row.get("version"),
            api_version: row.get("api_version"),
            since: row.get("since"),
            finished_time: row.get("finished_time"),
            channels,
        })
    }

    fn from_rows(rows: &[SqliteRow]) -> Result<Vec<Component>> {
        rows.iter().map(Self::from_row).collect()
    }

    fn active_page(after: Option<&ComponentId>, limit: usize) -> String {
        let mut select = Query::select();
        select
            .columns(COLUMNS)
            .from(Components::Table)
            .and_where(Expr::col(Components::FinishedTime).is_null())
            .and_where(Expr::col(Components::Channels).ne("[]"));
        if let Some(after) = after {
            select.and_where(Expr::col(Components::Id).gt(after.as_str()));
        }
        select
            .order_by(Components::Id, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder)
    }

    /// Type and liveness filter in SQL; the text pattern may be a regex,
    /// so matching and ordering happen on the loaded rows.
    fn active_of_type(component_type: Option<ComponentType>) -> String {
        let mut select = Query::select();
        select
            .columns(COLUMNS)
            .from(Components::Table)
            .and_where(Expr::col(Components::FinishedTime).is_null());
        if let Some(component_type) = component_type {
            select.and_where(Expr::col(Components::ComponentType).eq(component_type.as_str()));
        }
        select.to_string(SqliteQueryBuilder)
    }
}

#[async_trait]
impl ComponentStore for SqliteComponentStore {
    async fn insert(&self, component: &Component) -> Result<()> {
        let channels = serde_json::to_string(&component.channels)?;
        let query = Query::insert()
            .into_table(Components::Table)
            .columns(COLUMNS)
            .values_panic([
                component.id.as_str().into(),
                component.component_type.as_str().into(),
                component.name.as_str().into(),
                component.description.clone().into(),
                component.version.as_str().into(),
                component.api_version.as_str().into(),
                component.since.into(),
                component.finished_time.into(),
                channels.into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateComponent(component.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &ComponentId) -> Result<Option<Component>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(Components::Table)
            .and_where(Expr::col(Components::Id).eq(id.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn finish(&self, id: &ComponentId, now: i64) -> Result<Option<Component>> {
        let query = Query::update()
            .table(Components::Table)
            .values([(Components::FinishedTime, now.into())])
            .and_where(Expr::col(Components::Id).eq(id.as_str()))
            .and_where(Expr::col(Components::FinishedTime).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn finish_all(&self, now: i64) -> Result<u64> {
        let query = Query::update()
            .table(Components::Table)
            .values([(Components::FinishedTime, now.into())])
            .and_where(Expr::col(Components::FinishedTime).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn drop_all(&self) -> Result<u64> {
        let query = Query::delete()
            .from_table(Components::Table)
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn active_after(
        &self,
        after: Option<&ComponentId>,
        limit: usize,
    ) -> Result<Vec<Component>> {
        let query = Self::active_page(after, limit);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Self::from_rows(&rows)
    }

    async fn active_named(&self, name: &str) -> Result<Vec<Component>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(Components::Table)
            .and_where(Expr::col(Components::FinishedTime).is_null())
            .and_where(Expr::col(Components::Name).eq(name))
            .order_by(Components::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Self::from_rows(&rows)
    }

    async fn query(&self, query: &ComponentQuery) -> Result<ComponentPage> {
        let sql = Self::active_of_type(query.component_type);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(query.paginate(Self::from_rows(&rows)?))
    }
}
