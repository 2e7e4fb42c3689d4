//! logcast - tail a log file to WebSocket subscribers.
//!
//! One task drains the [`tail::FileTail`] into the [`hub::Broadcaster`],
//! which fans each line out to every connection in the [`hub::Registry`].
//! The axum server accepts subscribers on `/logs` and registers them.

pub mod config;
pub mod error;
pub mod hub;
pub mod server;
pub mod shutdown;
pub mod tail;

pub use config::{Cli, Config};
pub use error::Error;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::hub::{Broadcaster, CloseReason, Registry};
use crate::server::state::AppState;
use crate::shutdown::Shutdown;
use crate::tail::FileTail;

/// Handle to a started server.
#[derive(Debug)]
pub struct Running {
    local_addr: SocketAddr,
    broadcaster: Broadcaster,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), Error>>,
}

impl Running {
    /// Address the server actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.broadcaster.registry()
    }

    pub fn lines_broadcast(&self) -> u64 {
        self.broadcaster.lines_broadcast()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Waits until the server stops on its own or via the shutdown handle.
    pub async fn wait(self) -> Result<(), Error> {
        self.task.await?
    }

    /// Triggers shutdown and waits for everything to stop.
    pub async fn shutdown(self) -> Result<(), Error> {
        self.shutdown.trigger();
        self.wait().await
    }
}

/// Opens the file, binds the listener and starts serving.
///
/// Fails without serving anything if the file cannot be opened or the
/// address cannot be bound.
pub async fn start(config: Config) -> Result<Running, Error> {
    let tail = FileTail::open(&config.file, config.tail.clone()).await?;

    let bind_err = |source: std::io::Error| Error::Bind {
        addr: config.addr,
        source,
    };
    let listener = TcpListener::bind(config.addr).await.map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;

    let shutdown = Shutdown::new();
    let registry = Arc::new(Registry::new());
    let broadcaster = Broadcaster::new(registry);
    let state = Arc::new(AppState::new(
        &config,
        broadcaster.clone(),
        shutdown.subscribe(),
    ));

    let pump = tokio::spawn(hub::run_pump(
        tail.into_stream(),
        broadcaster.clone(),
        shutdown.subscribe(),
    ));
    let server = tokio::spawn(server::serve(listener, state));

    tracing::info!(
        file = %config.file.display(),
        "Logs WebSocket server running at ws://{}/logs",
        local_addr
    );

    let task = tokio::spawn(supervise(
        pump,
        server,
        shutdown.clone(),
        Arc::clone(broadcaster.registry()),
    ));

    Ok(Running {
        local_addr,
        broadcaster,
        shutdown,
        task,
    })
}

/// Starts the server and runs it until Ctrl-C or a fatal error.
pub async fn run(config: Config) -> Result<(), Error> {
    let running = start(config).await?;

    let shutdown = running.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    running.wait().await
}

enum Finished {
    Pump(Result<(), Error>),
    Server(Result<(), Error>),
}

/// Waits for the pump or the server to finish, then stops the other one and
/// closes every client.
async fn supervise(
    mut pump: JoinHandle<Result<(), Error>>,
    mut server: JoinHandle<Result<(), Error>>,
    shutdown: Shutdown,
    registry: Arc<Registry>,
) -> Result<(), Error> {
    let finished = tokio::select! {
        result = &mut pump => Finished::Pump(flatten(result)),
        result = &mut server => Finished::Server(flatten(result)),
    };

    shutdown.trigger();
    let closed = hub::close_all(&registry, CloseReason::Shutdown);
    tracing::info!(closed, "Closed client connections");

    let (first, remaining) = match finished {
        Finished::Pump(result) => (result, server),
        Finished::Server(result) => (result, pump),
    };
    let rest = flatten(remaining.await);
    first.and(rest)
}

fn flatten(joined: Result<Result<(), Error>, tokio::task::JoinError>) -> Result<(), Error> {
    joined?
}
