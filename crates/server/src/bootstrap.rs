use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use paylink_core::config::{AppConfig, ConfigError, LoadOptions};
use paylink_db::repositories::{SqlRelationRepository, SqlWebhookArchiveRepository};
use paylink_db::{connect, migrations, DbPool};
use paylink_gateway::{FlittClient, PaymentGateway};
use paylink_kommo::KommoClient;

use crate::reconcile::{EngineSettings, ReconcileEngine};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<ReconcileEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let crm = Arc::new(KommoClient::new(&config.kommo));
    let gateway = config.gateway.credentials().map(|credentials| {
        Arc::new(FlittClient::new(&config.gateway, credentials)) as Arc<dyn PaymentGateway>
    });
    if gateway.is_none() {
        info!(
            event_name = "system.bootstrap.degraded",
            "gateway credentials missing; starting in webhook-archival-only mode"
        );
    }

    let engine = Arc::new(ReconcileEngine::new(
        crm,
        gateway,
        Arc::new(SqlRelationRepository::new(db_pool.clone())),
        Arc::new(SqlWebhookArchiveRepository::new(db_pool.clone())),
        EngineSettings::from_config(&config),
    ));

    Ok(Application { config, db_pool, engine })
}

#[cfg(test)]
mod tests {
    use paylink_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                kommo_subdomain: Some("acme".to_string()),
                kommo_api_token: Some("token-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_kommo_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                kommo_subdomain: Some("acme".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("kommo.api_token"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_degrades_without_gateway_credentials() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('payment_deal_relations', 'webhook_archive')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected baseline tables to be available after bootstrap");
        assert_eq!(table_count, 2, "bootstrap should expose baseline tables");

        assert!(!app.engine.gateway_available(), "no credentials means degraded mode");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_enables_the_gateway_with_full_credentials() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                kommo_subdomain: Some("acme".to_string()),
                kommo_api_token: Some("token-test".to_string()),
                gateway_api_key: Some("key".to_string()),
                gateway_merchant_id: Some("1396424".to_string()),
                gateway_merchant_secret: Some("secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed");

        assert!(app.engine.gateway_available());

        app.db_pool.close().await;
    }
}
