//! Frontend listener implementation.
//!
//! Accepts client connections and serves HTTP/1.1 on each of them, handing
//! every request to the [`HttpHandler`].

use crate::alert::AlertHandle;
use crate::backend::FailoverRouter;
use crate::config::ProxyConfig;
use crate::frontend::http::HttpHandler;
use crate::metrics::MetricsCollector;
use crate::proxy::Upstream;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener<U> {
    listener: TcpListener,
    handler: Arc<HttpHandler<U>>,
}

impl<U: Upstream> FrontendListener<U> {
    /// Bind the client-facing socket.
    pub async fn bind(
        config: ProxyConfig,
        router: Arc<FailoverRouter<U>>,
        metrics: MetricsCollector,
        alerts: Option<AlertHandle>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;

        info!(
            listen = %config.listen,
            backends = router.pool().len(),
            max_body_size = config.max_body_size,
            "frontend listener bound"
        );

        Ok(Self {
            listener,
            handler: Arc::new(HttpHandler::new(router, metrics, alerts, config.max_body_size)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = ?self.listener.local_addr().ok()))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(handler.handle(req, client_addr).await) }
            });

            // Serve HTTP/1.1 with keep-alive support
            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                debug!(client = %client_addr, error = %e, "client connection ended with error");
            }
        });
    }
}
