//! HTTP server startup and shutdown

use tracing::info;

use crate::api;
use crate::core::{Config, ServerState};
use crate::utils::{AppError, AppResult};

pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create a server around existing state (tests).
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config)?,
        };

        let tasks = state.start_background_tasks().await;

        let app = api::build_app().with_state(state);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("cannot bind {addr}: {e}")))?;

        info!("Duka server listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down...");
            })
            .await
            .map_err(|e| AppError::internal(format!("server error: {e}")))?;

        tasks.shutdown().await;
        Ok(())
    }
}
