//! Loopback server: an in-memory peer speaking the client protocol.
//!
//! The loopback server provides:
//! - A `Repository` state machine holding users, projects and items
//! - The MRQL subset needed by searches
//! - A tokio TCP listener serving one task per connection
//!
//! It backs the integration tests and `mreq serve`.

pub mod mrql;
mod repository;
mod seed;

pub use repository::{AuditEntry, ProjectState, Repository};
pub use seed::{DEMO_PROJECT, DEMO_TOKEN, DEMO_USER, demo_config};

use crate::protocol::{Envelope, ErrorCode, Response};
use eyre::{Context, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Default listen address for `mreq serve`.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5150";

/// Worker threads for a spawned server.
const WORKER_THREADS: usize = 2;

/// Shared repository handle.
pub type SharedRepository = Arc<Mutex<Repository>>;

/// A running loopback server. Dropping the handle stops it.
pub struct LoopbackHandle {
    address: SocketAddr,
    repository: SharedRepository,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackHandle {
    /// The address the server is bound to.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The repository the server is serving, for inspection.
    pub fn repository(&self) -> SharedRepository {
        Arc::clone(&self.repository)
    }

    /// Stop the server and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Loopback server thread panicked");
        }
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a loopback server on a background thread.
///
/// `listen` may use port 0; the bound address is available from the handle.
pub fn spawn(listen: &str, repository: Repository) -> Result<LoopbackHandle> {
    let listener = std::net::TcpListener::bind(listen).with_context(|| format!("Failed to bind {}", listen))?;
    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking")?;
    let address = listener.local_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let repository = Arc::new(Mutex::new(repository));
    let shared = Arc::clone(&repository);
    let (tx, rx) = oneshot::channel();

    let thread = std::thread::Builder::new()
        .name("mreq-loopback".to_string())
        .spawn(move || {
            let result: Result<()> = runtime.block_on(async move {
                let listener = TcpListener::from_std(listener).context("Failed to register listener")?;
                serve(listener, shared, rx).await
            });
            if let Err(e) = result {
                log::error!("Loopback server stopped: {:?}", e);
            }
        })
        .context("Failed to spawn loopback thread")?;

    Ok(LoopbackHandle {
        address,
        repository,
        shutdown: Some(tx),
        thread: Some(thread),
    })
}

/// Serve on `listen` in the foreground until Ctrl-C.
pub async fn run(listen: &str, repository: Repository) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });
    serve(listener, Arc::new(Mutex::new(repository)), rx).await
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    repository: SharedRepository,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    log::info!("Loopback server listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let repository = Arc::clone(&repository);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, repository).await {
                            log::warn!("Connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },

            _ = &mut shutdown => {
                log::info!("Loopback server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(stream: TcpStream, repository: SharedRepository) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read line")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatch(&repository, &line);
        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Decode one request line and run it against the repository.
fn dispatch(repository: &Mutex<Repository>, line: &str) -> Response {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => return Response::error(ErrorCode::Invalid, format!("malformed request: {}", e)),
    };
    match repository.lock() {
        Ok(mut repository) => repository.handle(envelope),
        Err(_) => Response::error(ErrorCode::Invalid, "repository unavailable"),
    }
}
