//! `delegated-billing` worker binary.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use delegated_billing::adapters::{
    HttpDelegationRedeemer, HttpRedeemerConfig, PostgresSubscriptionRepository, ResendConfig,
    ResendEmailService, SystemClock,
};
use delegated_billing::application::{ChangeProcessor, Scheduler, SchedulerConfig, SchedulerError};
use delegated_billing::config::{AppConfig, ConfigError, LoggingConfig, ValidationError};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("redemption client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("signal handler: {0}")]
    Signal(#[from] io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.logging)?;

    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("migrations applied");
    }

    let repository = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let email = Arc::new(ResendEmailService::new(ResendConfig::from_app_config(
        &config.email,
    )));
    let mut processor = ChangeProcessor::new(repository, email, Arc::new(SystemClock));

    if config.scheduler.payment_retries_enabled {
        let redeemer = HttpDelegationRedeemer::new(HttpRedeemerConfig::from_app_config(
            &config.redemption,
        ))?;
        processor = processor.with_payment_retries(
            Arc::new(redeemer),
            config.scheduler.retry_schedule(),
            config.redemption.request_timeout(),
        );
        info!(service_url = %config.redemption.service_url, "payment retries enabled");
    }

    let scheduler = Scheduler::new(
        processor,
        SchedulerConfig::default()
            .with_interval(config.scheduler.interval())
            .with_pass_timeout(config.scheduler.pass_timeout()),
    );
    scheduler.start().await?;

    let signal = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    scheduler.stop().await;
    pool.close().await;
    signal?;
    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> Result<(), ValidationError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json() {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .init();
    }
    Ok(())
}
