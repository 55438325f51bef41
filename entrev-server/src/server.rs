use crate::api::{create_router, AppState, SiteEngine};
use entrev_core::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct EntrevServer {
    engine: Arc<SiteEngine>,
}

impl EntrevServer {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let engine = SiteEngine::open(config)?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &SiteEngine {
        &self.engine
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let snapshots = self.engine.config().storage_dir.clone();
        let state = AppState {
            engine: self.engine,
        };

        let app = create_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        info!("Server listening on {}", addr);
        info!("Snapshots: {:?}", snapshots);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
