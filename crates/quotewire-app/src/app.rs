//! Main application orchestrator.

use crate::auth::{authorizer_for, SessionAuthorizer};
use crate::config::AppConfig;
use crate::consumers::{run_summary, MetricsRecorder};
use crate::error::{AppError, AppResult};
use quotewire_feed::{CloseReason, ConnectionState, FeedError, MarketFeedClient};
use quotewire_ws::{Connector, WsConnector, WsError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs one feed session with its consumers attached.
pub struct Application {
    config: AppConfig,
    client: MarketFeedClient,
    authorizer: Box<dyn SessionAuthorizer>,
}

impl Application {
    /// Create the application. The gate follows `auth_token_env`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let authorizer = authorizer_for(&config);
        Self::with_parts(config, Arc::new(WsConnector::new()), authorizer)
    }

    pub fn with_parts(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        authorizer: Box<dyn SessionAuthorizer>,
    ) -> AppResult<Self> {
        let client = MarketFeedClient::with_connector(config.feed.clone(), connector)?;
        Ok(Self {
            config,
            client,
            authorizer,
        })
    }

    pub fn client(&self) -> &MarketFeedClient {
        &self.client
    }

    /// Check the gate and start connecting.
    pub fn start(&self) -> AppResult<()> {
        if !self.authorizer.is_authorized() {
            warn!("Session not authorized, feed stays idle");
            return Err(AppError::Unauthorized);
        }
        info!(url = %self.config.feed.url, "Starting market feed");
        self.client.connect()?;
        Ok(())
    }

    /// Run until Ctrl+C or until the session gives up reconnecting.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();

        let recorder = MetricsRecorder::new(self.client.prices(), self.config.latency_warn_ms);
        let recorder_task = tokio::spawn(recorder.run(self.client.subscribe(), shutdown.clone()));
        let summary_task = tokio::spawn(run_summary(
            self.client.status(),
            self.client.prices(),
            Duration::from_millis(self.config.summary_interval_ms),
            self.config.latency_warn_ms,
            shutdown.clone(),
        ));

        let result = match self.start() {
            Ok(()) => self.wait_for_exit().await,
            Err(e) => Err(e),
        };

        self.client.disconnect().await;
        shutdown.cancel();
        let _ = recorder_task.await;
        let _ = summary_task.await;

        info!("Application stopped");
        result
    }

    async fn wait_for_exit(&self) -> AppResult<()> {
        let mut status = self.client.status();
        let terminal = async {
            status
                .wait_for(|s| s.state.is_closed())
                .await
                .map(|s| s.state)
                .unwrap_or(ConnectionState::Closed(CloseReason::Disconnected))
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
            state = terminal => match state {
                ConnectionState::Closed(CloseReason::RetriesExhausted { attempts }) => {
                    error!(attempts, "Market feed unavailable, giving up");
                    Err(FeedError::Ws(WsError::RetriesExhausted { attempts }).into())
                }
                _ => Ok(()),
            },
        }
    }
}
