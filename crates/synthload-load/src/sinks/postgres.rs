use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use tracing::debug;

use synthload_core::{RECORD_COLUMNS, SyntheticRecord};

use crate::sink::{Sink, SinkConnection, SinkError};

/// Default target table.
pub const DEFAULT_TABLE: &str = "mock_data.syn_customer";

/// PostgreSQL sink; one `PgConnection` per loader session.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    url: String,
    table: String,
    insert_sql: String,
}

impl PostgresSink {
    /// Create a sink writing to `table` (`name` or `schema.name`).
    pub fn new(url: impl Into<String>, table: &str) -> Result<Self, SinkError> {
        validate_table_name(table)?;
        let placeholders: Vec<String> = (1..=RECORD_COLUMNS.len())
            .map(|idx| format!("${idx}"))
            .collect();
        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            RECORD_COLUMNS.join(", "),
            placeholders.join(", ")
        );
        Ok(Self {
            url: url.into(),
            table: table.to_string(),
            insert_sql,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the target table, with unique constraints on every
    /// constrained column, if it does not exist yet.
    pub async fn ensure_table(&self) -> Result<(), SinkError> {
        let mut conn = PgConnection::connect(&self.url)
            .await
            .map_err(map_sqlx_error)?;

        if let Some((schema, _)) = self.table.split_once('.') {
            conn.execute(format!("CREATE SCHEMA IF NOT EXISTS {schema}").as_str())
                .await
                .map_err(map_sqlx_error)?;
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                uid CHAR(64) NOT NULL UNIQUE,
                guid CHAR(36) NOT NULL UNIQUE,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                email VARCHAR(320) NOT NULL UNIQUE,
                birth_date DATE NOT NULL,
                sin CHAR(11) NOT NULL UNIQUE,
                salt CHAR(16) NOT NULL,
                hashkey CHAR(64) NOT NULL
            )",
            self.table
        );
        conn.execute(ddl.as_str()).await.map_err(map_sqlx_error)?;
        conn.close().await.map_err(map_sqlx_error)?;
        debug!(table = %self.table, "target table ensured");
        Ok(())
    }
}

#[async_trait]
impl Sink for PostgresSink {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> Result<Box<dyn SinkConnection>, SinkError> {
        let conn = PgConnection::connect(&self.url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresConnection {
            conn: Some(conn),
            insert_sql: self.insert_sql.clone(),
        }))
    }
}

struct PostgresConnection {
    conn: Option<PgConnection>,
    insert_sql: String,
}

impl PostgresConnection {
    fn conn(&mut self) -> Result<&mut PgConnection, SinkError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SinkError::ConnectionLost("connection already closed".to_string()))
    }

    async fn simple(&mut self, statement: &str) -> Result<(), SinkError> {
        self.conn()?
            .execute(statement)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl SinkConnection for PostgresConnection {
    async fn begin(&mut self) -> Result<(), SinkError> {
        self.simple("BEGIN").await
    }

    async fn insert(&mut self, record: &SyntheticRecord) -> Result<(), SinkError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| SinkError::ConnectionLost("connection already closed".to_string()))?;
        sqlx::query(&self.insert_sql)
            .bind(record.uid())
            .bind(record.guid())
            .bind(record.first_name())
            .bind(record.last_name())
            .bind(record.email())
            .bind(record.birth_date())
            .bind(record.id_number())
            .bind(record.salt())
            .bind(record.hash_key())
            .execute(conn)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.simple("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }
}

/// Map a driver error onto the driver-neutral taxonomy.
///
/// Broken transports and SQLSTATE class `08` (connection exception) or
/// `57P01`-`57P03` (server shutdown) become [`SinkError::ConnectionLost`].
pub fn map_sqlx_error(err: sqlx::Error) -> SinkError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SinkError::ConnectionLost(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned());
            if code.as_deref().is_some_and(is_connection_sqlstate) {
                SinkError::ConnectionLost(db.message().to_string())
            } else {
                SinkError::Database {
                    code,
                    message: db.message().to_string(),
                }
            }
        }
        _ => SinkError::Statement(err.to_string()),
    }
}

fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid = (1..=2).contains(&parts.len())
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
                && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(SinkError::Statement(format!(
            "invalid table name '{table}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_parameterized_insert() {
        let sink = PostgresSink::new("postgres://localhost/lake", DEFAULT_TABLE).expect("sink");
        assert_eq!(
            sink.insert_sql,
            "INSERT INTO mock_data.syn_customer (uid, guid, first_name, last_name, email, \
             birth_date, sin, salt, hashkey) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
    }

    #[test]
    fn rejects_injected_table_names() {
        for table in ["customers; DROP TABLE x", "a.b.c", "", "1abc", "a.\"b\""] {
            assert!(PostgresSink::new("postgres://localhost/lake", table).is_err());
        }
    }

    #[test]
    fn classifies_connection_sqlstates() {
        assert!(is_connection_sqlstate("08S01"));
        assert!(is_connection_sqlstate("08006"));
        assert!(is_connection_sqlstate("57P01"));
        assert!(!is_connection_sqlstate("23505"));
    }

    #[test]
    fn transport_errors_map_to_connection_lost() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(map_sqlx_error(sqlx::Error::Io(io)).is_transient());
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_transient());
    }
}
