//! `ClusterSession` backed by the scylla driver

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::{StreamExt, TryStreamExt};
use scylla::frame::response::result::{ColumnType, CqlValue, Row as DriverRow};
use scylla::query::Query;
use scylla::serialize::row::SerializeRow;
use scylla::statement::Consistency as DriverConsistency;
use scylla::transport::errors::{DbError, QueryError};
use scylla::{Session, SessionBuilder};
use std::time::Duration;
use tracing::{debug, info};

use cqlkit_core::cluster::{ClusterSession, ResultSet, TokenRange, TokenRing};
use cqlkit_core::{ColumnSchema, ColumnSpec, Consistency, CqlType, Error, Result, Row, Value};

/// Epoch day of `CqlDate`, which counts days with 2^31 at 1970-01-01
const DATE_EPOCH_OFFSET: i64 = 1 << 31;

/// Connection parameters, already merged from flags and config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOptions {
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keyspace: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub fetch_size: i32,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            username: None,
            password: None,
            keyspace: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(12),
            fetch_size: 5000,
        }
    }
}

/// Append the native protocol port when a host has none
pub fn with_default_port(host: &str) -> String {
    let host = host.trim();
    let has_port = match host.rsplit_once(':') {
        // bare IPv6 addresses contain colons too
        Some((head, port)) => !head.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    };
    if has_port || host.starts_with('[') {
        host.to_string()
    } else if host.contains(':') {
        format!("[{}]:9042", host)
    } else {
        format!("{}:9042", host)
    }
}

/// Live cluster connection
pub struct ScyllaCluster {
    session: Session,
    keyspace: Option<String>,
    fetch_size: i32,
    request_timeout: Duration,
}

impl ScyllaCluster {
    /// Connect, authenticate and select the keyspace
    pub async fn connect(options: &ClusterOptions) -> Result<Self> {
        let hosts: Vec<String> = options.hosts.iter().map(|h| with_default_port(h)).collect();
        debug!(
            hosts = ?hosts,
            connect_timeout = ?options.connect_timeout,
            request_timeout = ?options.request_timeout,
            fetch_size = options.fetch_size,
            "connecting to cluster"
        );

        let mut builder = SessionBuilder::new()
            .known_nodes(&hosts)
            .connection_timeout(options.connect_timeout);
        if let Some(username) = &options.username {
            builder = builder.user(username.as_str(), options.password.as_deref().unwrap_or(""));
        }
        let session = builder
            .build()
            .await
            .map_err(|e| Error::connection(format!("{}: {}", hosts.join(","), e)))?;

        let mut cluster = Self {
            session,
            keyspace: None,
            fetch_size: options.fetch_size,
            request_timeout: options.request_timeout,
        };
        if let Some(keyspace) = &options.keyspace {
            cluster.use_keyspace(keyspace).await?;
        }
        info!(hosts = %hosts.join(","), keyspace = ?cluster.keyspace, "connected");
        Ok(cluster)
    }

    async fn use_keyspace(&mut self, keyspace: &str) -> Result<()> {
        let rows = self
            .fetch(
                "SELECT keyspace_name FROM system_schema.keyspaces WHERE keyspace_name = ?",
                (keyspace.to_string(),),
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::configuration(format!(
                "Keyspace '{}' does not exist",
                keyspace
            )));
        }
        self.session
            .use_keyspace(keyspace, true)
            .await
            .map_err(|e| query_error(&format!("USE {}", keyspace), e))?;
        self.keyspace = Some(keyspace.to_string());
        Ok(())
    }

    fn statement(&self, cql: &str, consistency: DriverConsistency) -> Query {
        let mut statement = Query::new(cql);
        statement.set_consistency(consistency);
        statement.set_page_size(self.fetch_size);
        statement.set_request_timeout(Some(self.request_timeout));
        statement
    }

    /// Run a metadata statement and collect every row
    async fn fetch(&self, cql: &str, values: impl SerializeRow) -> Result<Vec<DriverRow>> {
        let statement = self.statement(cql, DriverConsistency::One);
        let rows = self
            .session
            .query_iter(statement, values)
            .await
            .map_err(|e| query_error(cql, e))?;
        rows.try_collect().await.map_err(|e| query_error(cql, e))
    }

    async fn node_tokens(&self, cql: &str) -> Result<Vec<i64>> {
        let mut tokens = Vec::new();
        for row in self.fetch(cql, ()).await? {
            let Some(Some(CqlValue::Set(values) | CqlValue::List(values))) =
                row.columns.into_iter().next()
            else {
                continue;
            };
            for value in values {
                if let CqlValue::Text(token) | CqlValue::Ascii(token) = value {
                    let token = token.parse::<i64>().map_err(|_| {
                        Error::internal(format!("unexpected token '{}'; only Murmur3 rings are supported", token))
                    })?;
                    tokens.push(token);
                }
            }
        }
        Ok(tokens)
    }
}

impl std::fmt::Debug for ScyllaCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScyllaCluster")
            .field("keyspace", &self.keyspace)
            .field("fetch_size", &self.fetch_size)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterSession for ScyllaCluster {
    async fn execute(&self, query: &str, consistency: Consistency) -> Result<ResultSet> {
        let statement = self.statement(query, driver_consistency(consistency));
        let rows = self
            .session
            .query_iter(statement, ())
            .await
            .map_err(|e| query_error(query, e))?;

        let columns = ColumnSchema::new(
            rows.get_column_specs()
                .iter()
                .map(|spec| ColumnSpec::new(spec.name.clone(), convert_type(&spec.typ)))
                .collect(),
        );
        let types: Vec<CqlType> = columns.iter().map(|c| c.cql_type.clone()).collect();
        let query = query.to_string();
        let rows = rows.map(move |row| {
            let row = row.map_err(|e| query_error(&query, e))?;
            convert_row(row, &types)
        });
        Ok(ResultSet::new(columns, Box::pin(rows)))
    }

    async fn partition_key_columns(&self, keyspace: &str, table: &str) -> Result<Vec<String>> {
        let rows = self
            .fetch(
                "SELECT column_name, kind, position FROM system_schema.columns \
                 WHERE keyspace_name = ? AND table_name = ?",
                (keyspace.to_string(), table.to_string()),
            )
            .await?;

        let mut keys: Vec<(i32, String)> = rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.columns.into_iter();
                let name = match cells.next()?? {
                    CqlValue::Text(name) | CqlValue::Ascii(name) => name,
                    _ => return None,
                };
                let kind = match cells.next()?? {
                    CqlValue::Text(kind) | CqlValue::Ascii(kind) => kind,
                    _ => return None,
                };
                let position = match cells.next().flatten() {
                    Some(CqlValue::Int(position)) => position,
                    _ => 0,
                };
                (kind == "partition_key").then_some((position, name))
            })
            .collect();

        if keys.is_empty() {
            return Err(Error::TableNotFound {
                keyspace: keyspace.to_string(),
                table: table.to_string(),
            });
        }
        keys.sort_by_key(|(position, _)| *position);
        Ok(keys.into_iter().map(|(_, name)| name).collect())
    }

    async fn token_ranges(&self) -> Result<Vec<TokenRange>> {
        let mut tokens = self.node_tokens("SELECT tokens FROM system.local").await?;
        tokens.extend(self.node_tokens("SELECT tokens FROM system.peers").await?);
        debug!(tokens = tokens.len(), "fetched token ring");
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        Ok(TokenRing::new(tokens).ranges())
    }

    fn active_keyspace(&self) -> Option<String> {
        self.keyspace.clone()
    }
}

fn driver_consistency(consistency: Consistency) -> DriverConsistency {
    match consistency {
        Consistency::Any => DriverConsistency::Any,
        Consistency::One => DriverConsistency::One,
        Consistency::Two => DriverConsistency::Two,
        Consistency::Three => DriverConsistency::Three,
        Consistency::Quorum => DriverConsistency::Quorum,
        Consistency::All => DriverConsistency::All,
        Consistency::LocalQuorum => DriverConsistency::LocalQuorum,
        Consistency::EachQuorum => DriverConsistency::EachQuorum,
        Consistency::Serial => DriverConsistency::Serial,
        Consistency::LocalSerial => DriverConsistency::LocalSerial,
        Consistency::LocalOne => DriverConsistency::LocalOne,
    }
}

/// Requests the server rejected on their merits fail the same way every time
fn query_error(query: &str, err: QueryError) -> Error {
    let fatal = matches!(
        &err,
        QueryError::BadQuery(_)
            | QueryError::DbError(
                DbError::SyntaxError
                    | DbError::Invalid
                    | DbError::Unauthorized
                    | DbError::AuthenticationError
                    | DbError::ConfigError
                    | DbError::AlreadyExists { .. }
                    | DbError::FunctionFailure { .. },
                _
            )
    );
    if fatal {
        Error::fatal_query(query, err.to_string())
    } else {
        Error::transient(query, err.to_string())
    }
}

/// Map a driver column type onto the closed set the encoders render
pub fn convert_type(typ: &ColumnType) -> CqlType {
    match typ {
        ColumnType::Ascii => CqlType::Ascii,
        ColumnType::Text => CqlType::Text,
        ColumnType::Boolean => CqlType::Boolean,
        ColumnType::TinyInt => CqlType::TinyInt,
        ColumnType::SmallInt => CqlType::SmallInt,
        ColumnType::Int => CqlType::Int,
        ColumnType::BigInt => CqlType::BigInt,
        ColumnType::Counter => CqlType::Counter,
        ColumnType::Varint => CqlType::Varint,
        ColumnType::Float => CqlType::Float,
        ColumnType::Double => CqlType::Double,
        ColumnType::Decimal => CqlType::Decimal,
        ColumnType::Blob => CqlType::Blob,
        ColumnType::Uuid => CqlType::Uuid,
        ColumnType::Timeuuid => CqlType::TimeUuid,
        ColumnType::Inet => CqlType::Inet,
        ColumnType::Timestamp => CqlType::Timestamp,
        ColumnType::Date => CqlType::Date,
        ColumnType::Time => CqlType::Time,
        ColumnType::List(inner) => CqlType::List(Box::new(convert_type(inner))),
        ColumnType::Set(inner) => CqlType::Set(Box::new(convert_type(inner))),
        ColumnType::Map(key, value) => {
            CqlType::Map(Box::new(convert_type(key)), Box::new(convert_type(value)))
        }
        ColumnType::Tuple(_) => CqlType::Unsupported("tuple".to_string()),
        ColumnType::UserDefinedType { type_name, .. } => CqlType::Unsupported(type_name.clone()),
        ColumnType::Duration => CqlType::Unsupported("duration".to_string()),
        ColumnType::Custom(class) => CqlType::Unsupported(class.clone()),
        #[allow(unreachable_patterns)]
        other => CqlType::Unsupported(format!("{:?}", other)),
    }
}

fn convert_row(row: DriverRow, types: &[CqlType]) -> Result<Row> {
    let values = row
        .columns
        .into_iter()
        .zip(types)
        .map(|(cell, ty)| match cell {
            Some(value) => convert_value(value, ty),
            None => Ok(Value::Null),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(values))
}

/// Convert one driver value; `ty` picks the variant where the wire form is shared
pub fn convert_value(value: CqlValue, ty: &CqlType) -> Result<Value> {
    let converted = match value {
        CqlValue::Empty => Value::Null,
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::Boolean(b) => Value::Boolean(b),
        CqlValue::TinyInt(v) => Value::TinyInt(v),
        CqlValue::SmallInt(v) => Value::SmallInt(v),
        CqlValue::Int(v) => Value::Int(v),
        CqlValue::BigInt(v) => Value::BigInt(v),
        CqlValue::Counter(counter) => Value::Counter(counter.0),
        CqlValue::Varint(v) => Value::Varint(num_bigint::BigInt::from(v).to_string()),
        CqlValue::Decimal(v) => Value::Decimal(bigdecimal::BigDecimal::from(v).to_string()),
        CqlValue::Float(v) => Value::Float(v),
        CqlValue::Double(v) => Value::Double(v),
        CqlValue::Blob(bytes) => Value::Blob(bytes),
        CqlValue::Uuid(id) => Value::Uuid(id),
        CqlValue::Timeuuid(id) => Value::TimeUuid(id.into()),
        CqlValue::Inet(addr) => Value::Inet(addr),
        CqlValue::Timestamp(ts) => Value::Timestamp(ts.0),
        CqlValue::Date(date) => {
            let days = i64::from(date.0) - DATE_EPOCH_OFFSET;
            let date = NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days)))
                .ok_or_else(|| Error::internal(format!("date out of range: {} days", days)))?;
            Value::Date(date)
        }
        CqlValue::Time(time) => {
            let nanos = time.0;
            let secs = u32::try_from(nanos / 1_000_000_000)
                .map_err(|_| Error::internal(format!("time out of range: {}ns", nanos)))?;
            let rem = u32::try_from(nanos % 1_000_000_000)
                .map_err(|_| Error::internal(format!("time out of range: {}ns", nanos)))?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, rem)
                .ok_or_else(|| Error::internal(format!("time out of range: {}ns", nanos)))?;
            Value::Time(time)
        }
        CqlValue::List(items) => Value::List(convert_elements(items, element_type(ty))?),
        CqlValue::Set(items) => Value::Set(convert_elements(items, element_type(ty))?),
        CqlValue::Map(entries) => {
            let (key_ty, value_ty) = match ty {
                CqlType::Map(key, value) => (key.as_ref(), value.as_ref()),
                _ => (ty, ty),
            };
            let entries = entries
                .into_iter()
                .map(|(k, v)| Ok((convert_value(k, key_ty)?, convert_value(v, value_ty)?)))
                .collect::<Result<Vec<_>>>()?;
            Value::Map(entries)
        }
        other => return Err(Error::unsupported_type(format!("{:?}", other))),
    };
    Ok(converted)
}

fn element_type(ty: &CqlType) -> &CqlType {
    match ty {
        CqlType::List(inner) | CqlType::Set(inner) => inner,
        _ => ty,
    }
}

fn convert_elements(items: Vec<CqlValue>, ty: &CqlType) -> Result<Vec<Value>> {
    items.into_iter().map(|item| convert_value(item, ty)).collect()
}
