use tracing_subscriber::{fmt, EnvFilter};

use rastreo_server::error::ServerError;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = rastreo_config::load_from_env()
        .map_err(|err| ServerError::Serve(err.to_string()))?;
    rastreo_server::run(config).await
}
