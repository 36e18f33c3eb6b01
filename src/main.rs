use std::sync::Arc;

use byok_gateway::config::{load_config, GatewayConfig, ResolvedConfig, YamlConfigSource};
use byok_gateway::gateway::Gateway;
use byok_gateway::observability::{init_tracing, LogFormat};
use byok_gateway::registry::InMemoryModelListCache;
use byok_gateway::server::{serve, ClientKeys, ServerState};
use byok_gateway::transport::HttpTransport;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from '{config_path}': {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });
    // Fail at startup on unresolvable secrets rather than on the first call.
    if let Err(e) = ResolvedConfig::from_config(&config) {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    init_tracing(&config.log_level, LogFormat::parse(&config.log_format));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(run(config, config_path));
}

async fn run(config: GatewayConfig, config_path: String) {
    let host = config.server.host.clone();
    let port = config.server.port;

    let gateway = Gateway::new(
        Arc::new(YamlConfigSource::new(config_path)),
        Arc::new(InMemoryModelListCache::new()),
    )
    .with_transport(Arc::new(HttpTransport::new()));
    let state = Arc::new(ServerState::new(gateway, ClientKeys::from_keys(&config.server.api_keys)));

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!(
        "byok-gateway listening on {}:{} (providers={}, auth_required={})",
        host,
        port,
        config.providers.len(),
        state.client_keys.is_required()
    );

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, cancelling in-flight calls");
            shutdown.cancel();
        }
    });

    serve(listener, state).await;
}
