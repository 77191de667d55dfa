use argh::FromArgs;
use receipt_analyzer::{
    AppState, GeminiFactory, InferenceGateway, ModelConfig, SessionStore,
    config::{DEFAULT_BASE_URL, DEFAULT_MODEL},
    router,
    server::DEFAULT_SESSION_TTL,
};
use std::time::Duration;

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(FromArgs)]
/// Receipt Analyzer answers questions about uploaded receipt images.
struct AnalyzerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// the Gemini model to query
    #[argh(option, short = 'm', default = "DEFAULT_MODEL.to_string()")]
    model: String,

    /// base URL of the generative language API
    #[argh(option, default = "DEFAULT_BASE_URL.to_string()")]
    base_url: String,

    /// request timeout for model calls, in seconds
    #[argh(option, default = "DEFAULT_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// seconds an untouched session is kept in memory
    #[argh(option, default = "DEFAULT_SESSION_TTL.as_secs()")]
    session_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: AnalyzerArgs = argh::from_env();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let factory =
        GeminiFactory::new(args.base_url).with_timeout(Duration::from_secs(args.timeout_secs));
    let config = ModelConfig::default().with_model(args.model);
    log::info!("Using model {} at {}", config.model, factory.base_url());

    let sessions = SessionStore::new(InferenceGateway::new(factory, config))
        .with_idle_ttl(Duration::from_secs(args.session_ttl_secs));
    let app = router(AppState::with_store(sessions));

    log::info!("🧾 Starting the receipt analyzer");
    log::info!("🔥 Listening on: {}", addr);
    log::info!("🔧 Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
