//! coursedesk - online course catalogue
//!
//! Loads `coursedesk.yml` (or the path given as the first argument), connects
//! to the database, applies migrations and logs what the catalogue holds.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursedesk::{cache::create_cache, config::Config, db, services::Catalogue};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursedesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("coursedesk.yml"));
    let config = Config::load_with_env(&config_path)?;
    tracing::info!(path = %config_path.display(), "Configuration loaded");

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let pending = db::migrations::pending_migrations(&pool).await?;
    if !pending.is_empty() {
        let names: Vec<&str> = pending.iter().map(|m| m.name).collect();
        tracing::info!(count = pending.len(), "Pending migrations: {}", names.join(", "));
        db::migrations::run_migrations(&pool).await?;
    }
    if let Some(latest) = db::migrations::get_applied_migrations(&pool).await?.last() {
        tracing::info!(
            version = latest.version,
            name = %latest.name,
            applied_at = %latest.applied_at,
            "Schema version"
        );
    }

    let cache = create_cache(&config.cache);
    let catalogue = Catalogue::new(pool.clone(), cache, &config);

    let users = catalogue.users.count().await?;
    let subjects = catalogue.subjects.list().await?;
    let courses = catalogue.courses.count().await?;
    tracing::info!(users, subjects = subjects.len(), courses, "Catalogue loaded");

    for subject in &subjects {
        let count = catalogue.courses.list_by_subject(subject.id).await?.len();
        tracing::info!(slug = %subject.slug, courses = count, "{}", subject);
    }

    pool.close().await;
    Ok(())
}
