use once_cell::sync::OnceCell;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};

static DB_CONN: OnceCell<DatabaseConnection> = OnceCell::new();

/// Открыть sqlite-базу и создать недостающие таблицы
///
/// Тесты используют эту функцию напрямую с собственным файлом БД;
/// приложение кладёт соединение в глобальный `DB_CONN` через
/// `initialize_database`.
pub async fn connect(db_file: &str) -> anyhow::Result<DatabaseConnection> {
    if let Some(parent) = std::path::Path::new(db_file).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let absolute_path = if std::path::Path::new(db_file).is_absolute() {
        std::path::PathBuf::from(db_file)
    } else {
        std::env::current_dir()?.join(db_file)
    };
    // Normalize path separators and ensure proper URL form on Windows
    let normalized = absolute_path.to_string_lossy().replace('\\', "/");
    let needs_leading_slash = !normalized.starts_with('/') && normalized.contains(':');
    let prefix = if needs_leading_slash { "/" } else { "" };
    let db_url = format!("sqlite://{}{}?mode=rwc", prefix, normalized);
    let conn = Database::connect(&db_url).await?;

    bootstrap_schema(&conn).await?;
    Ok(conn)
}

pub async fn initialize_database(db_path: Option<&str>) -> anyhow::Result<()> {
    let db_file = db_path.unwrap_or("target/db/app.db");
    let conn = connect(db_file).await?;
    DB_CONN
        .set(conn)
        .map_err(|_| anyhow::anyhow!("Failed to set DB_CONN"))?;
    Ok(())
}

pub fn get_connection() -> &'static DatabaseConnection {
    DB_CONN
        .get()
        .expect("Database connection has not been initialized")
}

async fn table_exists(conn: &DatabaseConnection, name: &str) -> anyhow::Result<bool> {
    let check = format!(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='{}';",
        name
    );
    let rows = conn
        .query_all(Statement::from_string(DatabaseBackend::Sqlite, check))
        .await?;
    Ok(!rows.is_empty())
}

/// Минимальный bootstrap схемы (по образцу ручных CREATE TABLE)
async fn bootstrap_schema(conn: &DatabaseConnection) -> anyhow::Result<()> {
    // a001_parcel
    if !table_exists(conn, "a001_parcel").await? {
        tracing::info!("Creating a001_parcel table");
        let create_parcel_table_sql = r#"
            CREATE TABLE a001_parcel (
                id TEXT PRIMARY KEY NOT NULL,
                code TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL,
                comment TEXT,
                track_number TEXT NOT NULL,
                carrier_status TEXT NOT NULL DEFAULT 'registered',
                delivered_at TEXT,
                is_exchange INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT,
                updated_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
        "#;
        conn.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            create_parcel_table_sql.to_string(),
        ))
        .await?;
    }

    // a002_return_case
    if !table_exists(conn, "a002_return_case").await? {
        tracing::info!("Creating a002_return_case table");
        let create_case_table_sql = r#"
            CREATE TABLE a002_return_case (
                id TEXT PRIMARY KEY NOT NULL,
                code TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL,
                comment TEXT,
                parcel_id TEXT NOT NULL,
                state TEXT NOT NULL,
                reason TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                decision_at TEXT,
                closed_at TEXT,
                reverse_track_number TEXT,
                receipt_confirmed INTEGER NOT NULL DEFAULT 0,
                receipt_confirmed_at TEXT,
                exchange_parcel_id TEXT,
                cancel_unavailable_reason TEXT,
                created_at TEXT,
                updated_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
        "#;
        conn.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            create_case_table_sql.to_string(),
        ))
        .await?;
    }

    // Инвариант: не больше одной незакрытой заявки на посылку.
    // Частичный уникальный индекс закрывает гонку двух параллельных create.
    conn.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_a002_active_case
            ON a002_return_case (parcel_id)
            WHERE state != 'CLOSED';
        "#
        .to_string(),
    ))
    .await?;

    // a002_case_idempotency
    if !table_exists(conn, "a002_case_idempotency").await? {
        tracing::info!("Creating a002_case_idempotency table");
        let create_idempotency_table_sql = r#"
            CREATE TABLE a002_case_idempotency (
                key TEXT PRIMARY KEY NOT NULL,
                case_id TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#;
        conn.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            create_idempotency_table_sql.to_string(),
        ))
        .await?;
    }

    Ok(())
}
