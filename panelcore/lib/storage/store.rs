use std::path::Path;

use sqlx::{
    migrate::Migrator,
    postgres::PgPoolOptions,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Postgres, Sqlite,
};
use tokio::{
    fs,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    config::{BackendDescriptor, BackendKind, ConnectionParams},
    PanelcoreError, PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the SQLite panel database
pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("lib/storage/migrations/sqlite");

/// Migrator for the PostgreSQL panel database
pub static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("lib/storage/migrations/postgres");

/// The username of the account seeded into an empty database.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// The password of the account seeded into an empty database.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// The tables owned by the panel schema, in creation order.
pub const PANEL_TABLES: [&str; 6] = [
    "users",
    "inbounds",
    "outbound_traffics",
    "settings",
    "inbound_client_ips",
    "client_traffics",
];

const MAX_CONNECTIONS: u32 = 5;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An open connection pool for one of the two engines.
#[derive(Debug, Clone)]
pub enum StorePool {
    /// A pool over the SQLite file.
    Sqlite(Pool<Sqlite>),

    /// A pool over the PostgreSQL server.
    Postgres(Pool<Postgres>),
}

/// The panel database.
///
/// Request handlers borrow the pool through [`Store::pool`]. The migration pipeline takes the
/// write side of the same lock while it swaps the underlying file, so no query observes a
/// half-replaced database.
#[derive(Debug)]
pub struct Store {
    descriptor: BackendDescriptor,
    pool: RwLock<Option<StorePool>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StorePool {
    /// Flushes the SQLite write-ahead log into the main database file. No-op for PostgreSQL.
    pub async fn checkpoint(&self) -> PanelcoreResult<()> {
        if let Self::Sqlite(pool) = self {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await?;
            tracing::debug!("checkpointed sqlite write-ahead log");
        }

        Ok(())
    }

    /// Closes every connection in the pool.
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }

    /// The engine this pool talks to.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Sqlite(_) => BackendKind::Sqlite,
            Self::Postgres(_) => BackendKind::Postgres,
        }
    }
}

impl Store {
    /// Opens the database described by `descriptor`, migrating the schema and seeding the
    /// default administrator.
    ///
    /// Running it against an already initialized database changes nothing.
    pub async fn initialize(descriptor: BackendDescriptor) -> PanelcoreResult<Self> {
        let pool = open_pool(&descriptor).await?;
        tracing::info!("opened panel database ({})", descriptor);

        Ok(Self {
            descriptor,
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Creates a store handle without opening anything.
    pub fn unopened(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            pool: RwLock::new(None),
        }
    }

    /// The backend this store was created for.
    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    /// The engine kind of the backend.
    pub fn kind(&self) -> BackendKind {
        self.descriptor.kind()
    }

    /// Borrows the live pool.
    ///
    /// Fails with [`PanelcoreError::Configuration`] if the store has been closed.
    pub async fn pool(&self) -> PanelcoreResult<RwLockReadGuard<'_, StorePool>> {
        RwLockReadGuard::try_map(self.pool.read().await, Option::as_ref)
            .map_err(|_| PanelcoreError::Configuration("the database is not open".to_string()))
    }

    /// Flushes the SQLite write-ahead log into the main database file.
    ///
    /// Does nothing for PostgreSQL or when the store is closed.
    pub async fn checkpoint(&self) -> PanelcoreResult<()> {
        match self.pool.read().await.as_ref() {
            Some(pool) => pool.checkpoint().await,
            None => Ok(()),
        }
    }

    /// Releases the pool. Calling it on a closed or never opened store is a no-op.
    pub async fn close(&self) {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            tracing::info!("closed panel database ({})", self.descriptor);
        }
    }

    /// Closes the store and opens it again on the same backend.
    pub async fn reopen(&self) -> PanelcoreResult<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
        }

        *guard = Some(open_pool(&self.descriptor).await?);
        Ok(())
    }

    /// Locks out every other store user for the duration of an import.
    pub(crate) async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, Option<StorePool>> {
        self.pool.write().await
    }

    /// Opens a fresh pool for this store's backend without installing it.
    pub(crate) async fn open_detached(&self) -> PanelcoreResult<StorePool> {
        open_pool(&self.descriptor).await
    }

    /// The number of accounts in the `users` table.
    pub async fn user_count(&self) -> PanelcoreResult<i64> {
        self.count_rows("users").await
    }

    /// Row counts for every panel table.
    pub async fn table_row_counts(&self) -> PanelcoreResult<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(PANEL_TABLES.len());
        for table in PANEL_TABLES {
            counts.push((table, self.count_rows(table).await?));
        }

        Ok(counts)
    }

    async fn count_rows(&self, table: &'static str) -> PanelcoreResult<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", table);
        let pool = self.pool().await?;
        let count = match &*pool {
            StorePool::Sqlite(pool) => sqlx::query_scalar::<_, i64>(&query).fetch_one(pool).await?,
            StorePool::Postgres(pool) => {
                sqlx::query_scalar::<_, i64>(&query).fetch_one(pool).await?
            }
        };

        Ok(count)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn open_pool(descriptor: &BackendDescriptor) -> PanelcoreResult<StorePool> {
    match descriptor {
        BackendDescriptor::Sqlite { path } => open_sqlite(path).await.map(StorePool::Sqlite),
        BackendDescriptor::Postgres { dsn } => open_postgres(dsn).await.map(StorePool::Postgres),
    }
}

async fn open_sqlite(path: &Path) -> PanelcoreResult<Pool<Sqlite>> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(PanelcoreError::Connection)?;

    SQLITE_MIGRATOR.run(&pool).await?;

    let seeded = sqlx::query(
        r#"
        INSERT INTO users (username, password, login_secret)
        SELECT ?, ?, ''
        WHERE (SELECT COUNT(*) FROM users) = 0
        "#,
    )
    .bind(DEFAULT_ADMIN_USERNAME)
    .bind(DEFAULT_ADMIN_PASSWORD)
    .execute(&pool)
    .await?
    .rows_affected();

    if seeded > 0 {
        tracing::info!("seeded default administrator account");
    }

    Ok(pool)
}

async fn open_postgres(dsn: &str) -> PanelcoreResult<Pool<Postgres>> {
    if dsn.trim().is_empty() {
        return Err(PanelcoreError::Configuration(
            "a PostgreSQL connection string is required for the postgres backend".to_string(),
        ));
    }

    let options = ConnectionParams::parse(dsn).connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(PanelcoreError::Connection)?;

    POSTGRES_MIGRATOR.run(&pool).await?;

    let seeded = sqlx::query(
        r#"
        INSERT INTO users (username, password, login_secret)
        SELECT $1, $2, ''
        WHERE (SELECT COUNT(*) FROM users) = 0
        "#,
    )
    .bind(DEFAULT_ADMIN_USERNAME)
    .bind(DEFAULT_ADMIN_PASSWORD)
    .execute(&pool)
    .await?
    .rows_affected();

    if seeded > 0 {
        tracing::info!("seeded default administrator account");
    }

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
