use {clap::Subcommand, postrelay_store::SqliteTargetStore};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
    /// Delete every channel, owner and target but keep the schema intact.
    Clear,
}

pub async fn handle_db(action: &DbAction, database_url: &str) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => run_migrations(database_url).await,
        DbAction::Clear => clear_database(database_url).await,
    }
}

async fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    println!("Running migrations on {database_url}...");
    // Connecting applies pending migrations.
    let store = SqliteTargetStore::connect(database_url).await?;
    store.pool().close().await;
    println!("Migrations complete.");
    Ok(())
}

async fn clear_database(database_url: &str) -> anyhow::Result<()> {
    let store = SqliteTargetStore::connect(database_url).await?;
    let pool = store.pool();

    // Targets reference channels, so they go first.
    for table in ["targets", "channels"] {
        let query = format!("DELETE FROM {table}");
        let result = sqlx::query(&query).execute(pool).await?;
        println!("Cleared table: {table} ({} rows)", result.rows_affected());
    }

    pool.close().await;
    Ok(())
}
