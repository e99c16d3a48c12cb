use crate::config::Config;
use crate::directory::{DirectoryStore, MemoryDirectory};
use anyhow::Result;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub directory: Arc<dyn DirectoryStore>,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub directory: Option<Arc<dyn DirectoryStore>>,
    pub token: Option<CancellationToken>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            directory: None,
            token: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn DirectoryStore>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let directory = match self.directory {
            Some(directory) => directory,
            None => {
                let directory = match &config.directory {
                    Some(directory) => MemoryDirectory::from_config(directory),
                    None => MemoryDirectory::new(),
                };
                Arc::new(directory) as Arc<dyn DirectoryStore>
            }
        };
        Ok(Arc::new(AppStateInner {
            config,
            directory,
            token: self.token.unwrap_or_else(CancellationToken::new),
        }))
    }
}

pub fn create_router(state: AppState) -> Router {
    // The platform posts webhooks cross-origin during browser-initiated calls
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    crate::handler::router()
        .with_state(state)
        .layer(middleware::from_fn(crate::handler::request_log::log_requests))
        .layer(cors)
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("webhook server listening on {}", addr);

    let app = create_router(state.clone());
    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}
