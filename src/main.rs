use std::net::SocketAddr;

use healthclaim_auth::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "healthclaim_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = match AppState::init().await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return Err(e.into());
        }
    };

    let addr: SocketAddr =
        format!("{}:{}", app_state.config.host, app_state.config.port).parse()?;
    tracing::info!(
        environment = %app_state.config.environment,
        frontend = %app_state.config.frontend_url,
        "starting healthclaim auth service"
    );

    let store = app_state.store.clone();
    app::serve(app::build_app(app_state), addr).await?;
    store.close().await;

    Ok(())
}
