//! Frontend listener implementation.
//!
//! Accepts incoming connections and serves HTTP/1.1 on each, handing every
//! request to the dispatcher.

use crate::dispatch::Dispatcher;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener {
    /// Dispatcher every request is handed to.
    dispatcher: Arc<Dispatcher>,
    /// TCP listener.
    listener: TcpListener,
    /// Resolved listen address.
    local_addr: SocketAddr,
}

impl FrontendListener {
    /// Bind a listener on `addr`.
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            listen = %local_addr,
            backends = dispatcher.pool().len(),
            "frontend listener bound"
        );

        Ok(Self {
            dispatcher,
            listener,
            local_addr,
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = %self.local_addr))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        // Each connection gets its own receiver so it can drain gracefully.
        let (conn_shutdown, _) = broadcast::channel::<()>(1);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr, conn_shutdown.subscribe());
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    let _ = conn_shutdown.send(());
                    break;
                }
            }
        }
    }

    /// Handle an incoming connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        client_addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            let start_time = Instant::now();

            let service = service_fn(move |req: Request<Incoming>| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { Ok::<_, Infallible>(dispatcher.handle(req, client_addr).await) }
            });

            let conn = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            // Dropping the service future on disconnect cancels any dispatch in flight.
            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            let duration = start_time.elapsed();
            match result {
                Ok(()) => debug!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    "connection completed"
                ),
                Err(e) => warn!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "connection handling failed"
                ),
            }
        });
    }
}
