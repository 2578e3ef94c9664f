use std::env;
use std::sync::Arc;

use casa::alert::Alert;
use casa::config::Config;
use casa::db::PgPool;
use casa::engine::Engine;
use casa::error::Error;
use casa::local_store::LocalStore;
use casa::router;
use casa::session::{SessionConfig, SessionProvider};

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let local_store = LocalStore::open(&config.local_store_path).await?;
    if local_store.take_cache_clear().await? {
        tracing::info!("first launch, starting from a clean cache");
    }

    let PgPool(pool) = PgPool::new(&config.database_url, config.database_max_connections).await?;
    let engine = Arc::new(Engine::new(pool, &config).await?);

    let session = SessionProvider::init(engine, SessionConfig::from(&config));

    if let (Ok(email), Ok(password)) = (env::var("CASA_EMAIL"), env::var("CASA_PASSWORD")) {
        if let Err(err) = session.sign_in(email, password).await {
            let alert = Alert::from_error("Sign In Error", &err, "Failed to sign in. Please try again.");
            tracing::warn!("{}: {}", alert.title, alert.message);
        }
    }

    let mut changes = session.changes();

    loop {
        tracing::info!("screen: {}", router::route(&changes.borrow_and_update()).name());

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.dispose();

    Ok(())
}
