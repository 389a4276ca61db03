//! TCP forwarding sessions.
//!
//! Each accepted client is relayed byte-for-byte to one fixed upstream
//! address. Traffic in either direction refreshes the session's liveness, so
//! only connections that sit silent for a full liveness window are reaped.

use std::{future::Future, io, net::SocketAddr};

use socksgate_worker::{Session, SessionContext, SessionError, SessionFactory};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

/// Relay buffer size per direction.
const RELAY_BUFFER: usize = 16 * 1024;

/// Builds a [`ForwardSession`] for every accepted TCP connection.
#[derive(Debug, Clone)]
pub struct ForwardFactory {
    upstream: SocketAddr,
}

impl ForwardFactory {
    /// Forward every connection to `upstream`.
    pub fn new(upstream: SocketAddr) -> Self {
        Self { upstream }
    }
}

impl SessionFactory<TcpStream> for ForwardFactory {
    type Session = ForwardSession;

    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Result<ForwardSession, SessionError> {
        Ok(ForwardSession { client: stream, peer, upstream: self.upstream })
    }
}

/// One client connection relayed to the upstream.
#[derive(Debug)]
pub struct ForwardSession {
    client: TcpStream,
    peer: SocketAddr,
    upstream: SocketAddr,
}

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    /// Both directions reached end-of-stream
    Completed,
    Expired,
    Quitting,
}

impl Session for ForwardSession {
    fn run(self, ctx: SessionContext) -> impl Future<Output = ()> + 'static {
        async move {
            let peer = self.peer;
            let upstream = self.upstream;

            match self.relay(&ctx).await {
                Ok(finish) => {
                    tracing::debug!(%peer, %upstream, session = %ctx.id(), ?finish, "relay finished");
                },
                Err(e) => {
                    tracing::debug!(%peer, %upstream, session = %ctx.id(), error = %e, "relay failed");
                },
            }
        }
    }
}

impl ForwardSession {
    async fn relay(self, ctx: &SessionContext) -> io::Result<Finish> {
        let Self { mut client, upstream, .. } = self;

        let connect = TcpStream::connect(upstream);
        tokio::pin!(connect);

        let mut server = loop {
            tokio::select! {
                connected = &mut connect => break connected?,
                () = ctx.woken() => {
                    if let Some(finish) = close_reason(ctx) {
                        return Ok(finish);
                    }
                },
            }
        };
        ctx.refresh();

        let (mut client_rd, mut client_wr) = client.split();
        let (mut server_rd, mut server_wr) = server.split();

        // Each direction runs until its reader hits EOF, then half-closes
        // its writer. The relay is done once both have.
        let both = async {
            tokio::try_join!(
                pipe(&mut client_rd, &mut server_wr, ctx),
                pipe(&mut server_rd, &mut client_wr, ctx),
            )
        };
        tokio::pin!(both);

        loop {
            tokio::select! {
                done = &mut both => {
                    done?;
                    return Ok(Finish::Completed);
                },
                () = ctx.woken() => {
                    if let Some(finish) = close_reason(ctx) {
                        return Ok(finish);
                    }
                },
            }
        }
    }
}

/// Copy `reader` into `writer` until end-of-stream, refreshing liveness on
/// every transfer, then shut `writer` down.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, ctx: &SessionContext) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }

        writer.write_all(&buf[..n]).await?;
        ctx.refresh();
    }
}

fn close_reason(ctx: &SessionContext) -> Option<Finish> {
    if ctx.is_quitting() {
        Some(Finish::Quitting)
    } else if ctx.is_expired() {
        Some(Finish::Expired)
    } else {
        None
    }
}
