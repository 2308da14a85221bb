//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Components table schema.
#[derive(Iden)]
pub enum Components {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "component_type"]
    ComponentType,
    #[iden = "name"]
    Name,
    #[iden = "description"]
    Description,
    #[iden = "version"]
    Version,
    #[iden = "api_version"]
    ApiVersion,
    #[iden = "since"]
    Since,
    #[iden = "finished_time"]
    FinishedTime,
    #[iden = "channels"]
    Channels,
}

/// Connections table schema.
#[derive(Iden)]
pub enum Connections {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "source_component"]
    SourceComponent,
    #[iden = "source_channel"]
    SourceChannel,
    #[iden = "target_component"]
    TargetComponent,
    #[iden = "target_channel"]
    TargetChannel,
    #[iden = "enabled"]
    Enabled,
    #[iden = "create_timestamp"]
    CreateTimestamp,
    #[iden = "update_timestamp"]
    UpdateTimestamp,
    #[iden = "deleted_timestamp"]
    DeletedTimestamp,
}

/// Notification subscriptions of a connection.
#[derive(Iden)]
pub enum ConnectionSubscriptions {
    Table,
    #[iden = "connection_id"]
    ConnectionId,
    #[iden = "component_id"]
    ComponentId,
    #[iden = "channel_name"]
    ChannelName,
}

/// SQL for creating the components table.
pub const CREATE_COMPONENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS components (
    id TEXT PRIMARY KEY,
    component_type TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    version TEXT NOT NULL,
    api_version TEXT NOT NULL,
    since INTEGER NOT NULL,
    finished_time INTEGER,
    channels TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_components_active ON components(finished_time, id);
"#;

/// SQL for creating the connections tables.
///
/// The partial unique index admits one live connection per endpoint pair.
pub const CREATE_CONNECTIONS_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    source_component TEXT NOT NULL,
    source_channel TEXT NOT NULL,
    target_component TEXT NOT NULL,
    target_channel TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    create_timestamp INTEGER NOT NULL,
    update_timestamp INTEGER NOT NULL,
    deleted_timestamp INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_live_pair
    ON connections(source_component, source_channel, target_component, target_channel)
    WHERE deleted_timestamp IS NULL;

CREATE INDEX IF NOT EXISTS idx_connections_source ON connections(source_component);
CREATE INDEX IF NOT EXISTS idx_connections_target ON connections(target_component);

CREATE TABLE IF NOT EXISTS connection_subscriptions (
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    component_id TEXT NOT NULL,
    channel_name TEXT NOT NULL,
    PRIMARY KEY (connection_id, component_id, channel_name)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_component ON connection_subscriptions(component_id);
"#;
