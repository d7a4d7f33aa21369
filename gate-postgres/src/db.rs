use gate_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Minimum number of pooled connections kept open.
const MIN_POOL_CONNECTIONS: u32 = 1;

/// Connects a pool to the database described by `config`.
///
/// The pool holds up to `config.max_connections` connections.
pub async fn connect_to_database(config: &PgConnectionConfig) -> Result<PgPool, sqlx::Error> {
    let options = config.with_db();

    let pool = PgPoolOptions::new()
        .min_connections(MIN_POOL_CONNECTIONS)
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
