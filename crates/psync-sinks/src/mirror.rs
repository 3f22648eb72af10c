use std::fmt;

use anyhow::{bail, Context};
use async_trait::async_trait;
use psync_core::{ExistingKeySet, ProfileRecord, RecordSchema};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::{info, warn};

use crate::{PartialWrite, Sink, SshTunnel, SshTunnelConfig};

#[derive(Clone)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    /// When set, the connection goes through `127.0.0.1:<local_port>` of the tunnel.
    pub tunnel: Option<SshTunnelConfig>,
}

impl fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

fn quote_ident(ident: &str) -> anyhow::Result<String> {
    if ident.is_empty() || !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("refusing to use {ident:?} as a sql identifier");
    }
    Ok(format!("`{ident}`"))
}

/// `CREATE TABLE IF NOT EXISTS` for the variant's columns. The identifier
/// column is the primary key; an existing table keyed by a unique identifier
/// column is left untouched.
fn create_table_sql(table: &str, schema: &RecordSchema) -> anyhow::Result<String> {
    let mut columns = Vec::with_capacity(schema.columns().len() + 2);
    for column in schema.columns() {
        let ident = quote_ident(column)?;
        if column == schema.identifier_column() {
            columns.push(format!("{ident} VARCHAR(512) NOT NULL PRIMARY KEY"));
        } else {
            columns.push(format!("{ident} TEXT"));
        }
    }
    columns.push("`created_at` TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string());
    columns.push(
        "`updated_at` TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP".to_string(),
    );
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        quote_ident(table)?,
        columns.join(",\n  ")
    ))
}

fn upsert_sql(table: &str, schema: &RecordSchema) -> anyhow::Result<String> {
    let idents = schema
        .columns()
        .iter()
        .map(|c| quote_ident(c))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let placeholders = vec!["?"; idents.len()].join(", ");
    let updates = schema
        .columns()
        .iter()
        .zip(&idents)
        .filter(|(column, _)| column.as_str() != schema.identifier_column())
        .map(|(_, ident)| format!("{ident} = VALUES({ident})"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        quote_ident(table)?,
        idents.join(", "),
        placeholders,
        updates
    ))
}

/// Relational copy of the sheet rows, upserted by identifier.
pub struct MysqlMirror {
    name: String,
    config: MysqlConfig,
    schema: RecordSchema,
    pool: Option<MySqlPool>,
    tunnel: Option<SshTunnel>,
}

impl MysqlMirror {
    pub fn new(config: MysqlConfig, schema: RecordSchema) -> Self {
        Self {
            name: format!("mysql:{}", config.table),
            config,
            schema,
            pool: None,
            tunnel: None,
        }
    }

    async fn connect(&mut self) -> anyhow::Result<&MySqlPool> {
        if self.pool.is_none() {
            let (host, port) = match &self.config.tunnel {
                Some(tunnel_config) => {
                    let tunnel = SshTunnel::open(tunnel_config).await?;
                    let port = tunnel.local_port();
                    self.tunnel = Some(tunnel);
                    ("127.0.0.1".to_string(), port)
                }
                None => (self.config.host.clone(), self.config.port),
            };
            let options = MySqlConnectOptions::new()
                .host(&host)
                .port(port)
                .username(&self.config.user)
                .password(&self.config.password)
                .database(&self.config.database)
                .charset("utf8mb4");
            let pool = MySqlPoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .with_context(|| format!("connecting to mysql at {host}:{port}"))?;
            info!(%host, port, database = %self.config.database, "connected to mysql mirror");
            self.pool = Some(pool);
        }
        self.pool
            .as_ref()
            .context("mysql pool missing after connect")
    }
}

#[async_trait]
impl Sink for MysqlMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_keys(&mut self) -> anyhow::Result<Option<ExistingKeySet>> {
        let ddl = create_table_sql(&self.config.table, &self.schema)?;
        let select = format!(
            "SELECT {} FROM {}",
            quote_ident(self.schema.identifier_column())?,
            quote_ident(&self.config.table)?
        );
        let pool = self.connect().await?;
        sqlx::query(&ddl)
            .execute(pool)
            .await
            .context("ensuring mirror table")?;
        let keys: Vec<String> = sqlx::query_scalar(&select)
            .fetch_all(pool)
            .await
            .context("reading mirror keys")?;
        let keys = ExistingKeySet::from_cells(keys);
        info!(table = %self.config.table, existing = keys.len(), "loaded mirror keys");
        Ok(Some(keys))
    }

    /// All rows go in one transaction: either every row is upserted or none is.
    async fn write(
        &mut self,
        schema: &RecordSchema,
        records: &[&ProfileRecord],
    ) -> Result<usize, PartialWrite> {
        if records.is_empty() {
            return Ok(0);
        }
        let sql = upsert_sql(&self.config.table, schema).map_err(|e| PartialWrite::new(0, e))?;
        let pool = self.connect().await.map_err(|e| PartialWrite::new(0, e))?;

        let result: anyhow::Result<usize> = async {
            let mut tx = pool.begin().await.context("opening mirror transaction")?;
            for record in records {
                let mut query = sqlx::query(&sql);
                for value in record.to_row(schema) {
                    query = query.bind(value);
                }
                query
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("upserting {}", record.identifier()))?;
            }
            tx.commit().await.context("committing mirror transaction")?;
            Ok(records.len())
        }
        .await;

        match result {
            Ok(count) => {
                info!(table = %self.config.table, upserted = count, "mirror upsert committed");
                Ok(count)
            }
            Err(err) => Err(PartialWrite::new(0, err)),
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        if let Some(tunnel) = self.tunnel.take() {
            if let Err(err) = tunnel.shutdown().await {
                warn!(error = %format!("{err:#}"), "ssh tunnel did not shut down cleanly");
            }
        }
        Ok(())
    }
}
