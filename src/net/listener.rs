use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Bind a TCP listener, naming the endpoint in the error.
pub async fn bind(addr: &str, endpoint: &str) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {endpoint} on {addr}"))?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Accept connections until `shutdown` flips to true, spawning `handler` per peer.
pub async fn accept_loop<F, Fut>(listener: TcpListener, mut shutdown: watch::Receiver<bool>, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let _ = socket.set_nodelay(true);
                    tokio::spawn(handler(socket, peer));
                }
                Err(err) => tracing::warn!("accept error: {err:?}"),
            },
        }
    }
}
