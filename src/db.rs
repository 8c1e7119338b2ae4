//! Global database connection pool.

use once_cell::sync::OnceCell;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;

static DB_POOL: OnceCell<DatabaseConnection> = OnceCell::new();

/// Connect to the database and store the pool globally.
pub async fn init_db(database_url: String, max_connections: u32) -> Result<(), DbErr> {
    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(max_connections)
        .connect_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    if DB_POOL.set(pool).is_err() {
        log::warn!("Database pool was already initialized; keeping the first one.");
    }
    Ok(())
}

/// Returns the global pool. Panics if `init_db` has not been awaited.
pub fn get_db_pool() -> &'static DatabaseConnection {
    DB_POOL
        .get()
        .expect("Database pool accessed before init_db")
}
