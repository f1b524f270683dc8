use aws_config::{BehaviorVersion, meta::region::RegionProviderChain};
use figment::{Figment, providers::Env};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds a service's shared context out of its typed configuration and the
/// loaded AWS SDK configuration.
///
/// Construction is allowed to fail (e.g. the database can't be opened), in
/// which case the service should not start.
pub trait ContextProvider<Config>: Sized {
    fn new(
        config: Config,
        aws_config: aws_config::SdkConfig,
    ) -> impl Future<Output = Result<Self, BoxError>>;
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("failed to create application context: {0}")]
    Context(#[source] BoxError),
}

/// Install the global JSON tracing subscriber.
///
/// # Panics
/// If a global subscriber has already been installed.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        // allow log level to be overridden by RUST_LOG env var
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // keep log lines free of ANSI color codes when shipped to a collector.
        .with_ansi(false)
        // the log collector adds the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();
}

/// Extract the typed configuration from environment variables.
///
/// Variable names are matched case-insensitively against the field names,
/// so `DATABASE_URL` populates `database_url`.
///
/// # Errors
/// If a required value is missing or a value can't be parsed into the
/// field's type.
pub fn load_config<Config: DeserializeOwned>() -> Result<Config, figment::Error> {
    Figment::new().merge(Env::raw()).extract()
}

/// Initialize the application context with configuration from environment variables.
/// The configuration is extracted using figment.
/// The AWS configuration is loaded using the default provider chain.
///
/// # Returns
/// The application context with the configuration and AWS configuration as
/// specified by the trait.
///
/// # Errors
/// If the configuration cannot be extracted from the environment variables
/// or if the context itself fails to build.
///
pub async fn create_app_context<A, Config>() -> Result<A, AppError>
where
    A: ContextProvider<Config>,
    Config: DeserializeOwned,
{
    init_tracing();

    let config: Config = load_config()?;

    let region_provider =
        RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;

    let context = A::new(config, aws_config)
        .await
        .map_err(AppError::Context)?;

    tracing::info!("application context created");

    Ok(context)
}
