use gate_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

/// Runs the migrations of the `gate` schema.
///
/// The migrations run with `search_path` set to `gate` so that the `_sqlx_migrations` metadata
/// table is created inside that schema instead of the public schema.
pub async fn apply_gate_migrations(
    connection_config: &PgConnectionConfig,
) -> Result<(), sqlx::Error> {
    let options = connection_config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists gate;").await?;
                conn.execute("set search_path = 'gate';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying gate migrations");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    info!("gate migrations successfully applied");

    Ok(())
}
