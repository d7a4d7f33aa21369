use chrono::NaiveDate;
use gate_config::shared::TableReference;
use pg_escape::quote_identifier;
use sqlx::{PgPool, Row};

/// Builds the fully quoted `schema.table` name of a table reference.
fn quoted_table_name(table: &TableReference) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table.schema),
        quote_identifier(&table.table)
    )
}

/// Counts the rows of `table` whose `date_column` equals `date`.
pub async fn count_rows_for_date(
    pool: &PgPool,
    table: &TableReference,
    date_column: &str,
    date: NaiveDate,
) -> sqlx::Result<i64> {
    let query = format!(
        "select count(*) from {} where {} = $1",
        quoted_table_name(table),
        quote_identifier(date_column)
    );

    sqlx::query_scalar(&query).bind(date).fetch_one(pool).await
}

/// Counts the rows of `table` for `date`, grouped by the text value of `value_column`.
///
/// Rows with a null value are reported under `None`.
pub async fn count_rows_by_value(
    pool: &PgPool,
    table: &TableReference,
    date_column: &str,
    value_column: &str,
    date: NaiveDate,
) -> sqlx::Result<Vec<(Option<String>, i64)>> {
    let query = format!(
        "select {value}::text as value, count(*) as row_count from {table} where {date} = $1 group by 1",
        value = quote_identifier(value_column),
        table = quoted_table_name(table),
        date = quote_identifier(date_column),
    );

    let rows = sqlx::query(&query).bind(date).fetch_all(pool).await?;

    rows.into_iter()
        .map(|row| Ok((row.try_get("value")?, row.try_get("row_count")?)))
        .collect()
}
