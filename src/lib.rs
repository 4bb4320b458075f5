//! An embeddable implementation of the OCI distribution (Docker Registry
//! HTTP API v2) protocol.
//!
//! The registry is a plain value parameterized by a storage backend: build
//! one, turn it into an [`axum::Router`], and mount it wherever the
//! surrounding server wants it. The bundled in-memory backend makes it
//! usable as-is in tests and local tooling; anything that can satisfy the
//! [`storage`] capability traits can stand in for real persistence.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! quayside::Registry::in_memory().serve(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod digest;
pub mod error;
pub mod mediatypes;
pub mod storage;
pub mod verify;

mod handlers;
mod routes;
mod state;

pub use error::{ErrorCode, RegistryError};
pub use storage::StorageBackend;

use state::AppState;

/// A registry instance: a backend descriptor plus serving configuration.
pub struct Registry {
    backend: StorageBackend,
    base_path: String,
    access_log: bool,
}

impl Registry {
    /// A registry over the reference in-memory backend.
    pub fn in_memory() -> Self {
        Self::with_backend(StorageBackend::in_memory())
    }

    pub fn with_backend(backend: StorageBackend) -> Self {
        Registry {
            backend,
            base_path: String::new(),
            access_log: true,
        }
    }

    /// Mount the registry under a path prefix. Generated `Location`
    /// headers include the prefix so clients can follow them verbatim.
    pub fn base_path(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.base_path = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    /// Per-request logging at info level. On by default.
    pub fn access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    /// The wire surface as a router, ready to be served or merged into a
    /// larger application.
    pub fn into_router(self) -> axum::Router {
        let base_path = self.base_path.clone();
        let state = AppState {
            backend: self.backend,
            base_path: base_path.clone(),
            access_log: self.access_log,
        };
        let router = routes::build_router(state);
        if base_path.is_empty() {
            router
        } else {
            axum::Router::new().nest(&base_path, router)
        }
    }

    /// Serve on an already-bound listener until ctrl-c or SIGTERM.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("registry listening on {addr}");
        }
        let router = self.into_router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install ctrl-c handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                log::warn!("failed to install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        let registry = Registry::in_memory().base_path("registry/");
        assert_eq!(registry.base_path, "/registry");

        let registry = Registry::in_memory().base_path("/mirror");
        assert_eq!(registry.base_path, "/mirror");

        let registry = Registry::in_memory().base_path("/");
        assert_eq!(registry.base_path, "");
    }
}
