//! Generic request server.
//!
//! [`serve`] accepts connections until cancelled and spawns one task per
//! connection. A connection may carry any number of request frames; each is
//! handed to the service and answered in order. A failed accept is logged
//! and retried after a short pause; only cancellation stops the server.

use crate::codec::BincodeCodec;
use async_trait::async_trait;
use corelib::Service;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BIND_ATTEMPTS: u32 = 10;
const BIND_RETRY: Duration = Duration::from_millis(200);
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Source of inbound connections.
#[async_trait]
pub(crate) trait Acceptor: Send {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Bind a listener, retrying briefly while the address is still held by a
/// previous run.
pub async fn bind(addr: &str) -> io::Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                warn!(addr, attempt, "address in use, retrying bind");
                attempt += 1;
                tokio::time::sleep(BIND_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Answer requests on `listener` with `service` until `shutdown` fires.
pub async fn serve<Req, Resp, S>(
    listener: TcpListener,
    service: Arc<S>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    Req: for<'de> Deserialize<'de> + Send + 'static,
    Resp: Serialize + Send + 'static,
    S: Service<Req, Resp>,
{
    info!(addr = ?listener.local_addr()?, "serving");
    accept_loop::<Req, Resp, S, _>(listener, service, shutdown).await;
    Ok(())
}

pub(crate) async fn accept_loop<Req, Resp, S, A>(
    mut acceptor: A,
    service: Arc<S>,
    shutdown: CancellationToken,
) where
    Req: for<'de> Deserialize<'de> + Send + 'static,
    Resp: Serialize + Send + 'static,
    S: Service<Req, Resp>,
    A: Acceptor,
{
    loop {
        let accepted = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                // Aborted handshakes and fd exhaustion pass; keep listening
                warn!(error = %e, "accept failed, retrying");
                tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_RETRY) => continue,
                }
            }
        };
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection::<Req, Resp, S>(stream, peer, service).await {
                debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
    debug!("server stopped");
}

async fn handle_connection<Req, Resp, S>(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<S>,
) -> io::Result<()>
where
    Req: for<'de> Deserialize<'de>,
    Resp: Serialize,
    S: Service<Req, Resp>,
{
    let (read, write) = stream.into_split();
    let mut requests = FramedRead::new(read, BincodeCodec::<Req>::new());
    let mut responses = FramedWrite::new(write, BincodeCodec::<Resp>::new());

    while let Some(request) = requests.next().await {
        let response = service.handle(request?).await;
        responses.send(response).await?;
    }
    debug!(%peer, "connection closed");
    Ok(())
}
