use std::path::Path;

/// Migrations live in the server crate; resolve the directory relative to
/// either the workspace root or the crate root, whichever the process was
/// started from.
fn migrations_dir() -> &'static Path {
    let from_workspace = Path::new("server/migrations");
    if from_workspace.exists() {
        return from_workspace;
    }
    Path::new("./migrations")
}

pub async fn run(pool: &sqlx::PgPool) -> Result<(), sqlx_core::migrate::MigrateError> {
    let migrator = sqlx_core::migrate::Migrator::new(migrations_dir()).await?;
    migrator.run(pool).await
}
