//! Startup orchestration.
//!
//! # Order
//! 1. Open the user store and the event sink
//! 2. Populate the endpoint registry (collector)
//! 3. Resolve the authenticator
//! 4. Bind TCP and UDP listeners
//! 5. Serve until a termination signal arrives
//!
//! Any failure before step 5 is fatal.

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};

use crate::auth::{Authenticator, ResolveError};
use crate::collector;
use crate::config::IngressConfig;
use crate::http::IngressServer;
use crate::lifecycle::{signals, Shutdown};
use crate::routing::EndpointRegistry;
use crate::store::{EventSink, MemoryEventSink, MemoryUserStore, StoreError, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open user store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to resolve authenticator: {0}")]
    Auth(#[from] ResolveError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Open the stand-alone stores named by `config.store`.
pub fn open_stores(
    config: &IngressConfig,
) -> Result<(Arc<dyn UserStore>, Arc<dyn EventSink>), StartupError> {
    let users = match &config.store.users_file {
        Some(path) => MemoryUserStore::load_from_file(path, &config.auth.collection)?,
        None => MemoryUserStore::new(),
    };
    let sink = MemoryEventSink::new(config.store.max_events_per_type)
        .with_max_types(config.store.max_event_types);
    tracing::info!(
        database = %config.store.database,
        max_events_per_type = config.store.max_events_per_type,
        max_event_types = config.store.max_event_types,
        "Stores opened"
    );
    Ok((Arc::new(users), Arc::new(sink)))
}

/// Build the server with the collector's endpoints.
pub fn build_server(
    config: &IngressConfig,
    users: Arc<dyn UserStore>,
    sink: Arc<dyn EventSink>,
) -> Result<IngressServer, StartupError> {
    let mut registry = EndpointRegistry::new();
    collector::register(&mut registry, sink, config.listener.max_body_size);

    let authenticator = Authenticator::resolve(&config.auth, users)?;
    Ok(IngressServer::new(config, registry, authenticator))
}

/// Run the ingress server until SIGINT/SIGTERM.
pub async fn run(config: IngressConfig) -> Result<(), StartupError> {
    let (users, sink) = open_stores(&config)?;
    let server = build_server(&config, users, sink)?;

    let http_addr = config.listener.http_addr();
    let listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|source| StartupError::Bind {
            address: http_addr.clone(),
            source,
        })?;

    let udp = match config.listener.udp_addr() {
        Some(address) => {
            let socket = UdpSocket::bind(&address)
                .await
                .map_err(|source| StartupError::Bind {
                    address: address.clone(),
                    source,
                })?;
            tracing::info!(address = %address, "UDP socket bound");
            Some(socket)
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, udp, shutdown).await?;
    Ok(())
}
