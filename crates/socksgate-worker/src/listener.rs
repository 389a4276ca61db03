//! Listening socket abstraction.
//!
//! The accept loop is written against [`Listener`] so production runs on a
//! Tokio TCP socket while tests feed it scripted in-memory connections.

use std::{future::Future, io, net::SocketAddr};

use tokio::net::{TcpListener, TcpStream};

use crate::error::WorkerError;

/// Source of inbound connections for a worker.
pub trait Listener: 'static {
    /// Connection type handed to the session factory.
    type Stream: 'static;

    /// Wait for the next inbound connection.
    ///
    /// Must be cancel-safe: the accept loop drops this future whenever it is
    /// woken, and a connection that was not returned must stay queued.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>>;

    /// Per-connection socket setup, run before the session is built.
    ///
    /// An error drops the connection without registering a session.
    fn configure(&self, stream: &Self::Stream, peer: SocketAddr) -> io::Result<()>;
}

/// [`Listener`] over a bound, listening TCP socket.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    nodelay: bool,
}

impl TcpAcceptor {
    /// Wrap a Tokio listener.
    pub fn new(listener: TcpListener) -> Self {
        Self { listener, nodelay: false }
    }

    /// Adopt a std listener that is already bound and listening.
    ///
    /// Switches the socket to non-blocking mode and registers it with the
    /// current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, WorkerError> {
        listener.set_nonblocking(true).map_err(WorkerError::Listener)?;
        let listener = TcpListener::from_std(listener).map_err(WorkerError::Listener)?;

        Ok(Self::new(listener))
    }

    /// Set `TCP_NODELAY` on every accepted connection.
    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, WorkerError> {
        self.listener.local_addr().map_err(WorkerError::Listener)
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    fn configure(&self, stream: &TcpStream, _peer: SocketAddr) -> io::Result<()> {
        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adopts_std_listener() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let expected = std_listener.local_addr().unwrap();

        let acceptor = TcpAcceptor::from_std(std_listener).unwrap();
        assert_eq!(acceptor.local_addr().unwrap(), expected);
    }

    #[tokio::test]
    async fn accepts_and_configures_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut acceptor = TcpAcceptor::new(listener).with_nodelay(true);

        let client = tokio::spawn(TcpStream::connect(addr));
        let (stream, peer) = acceptor.accept().await.unwrap();
        let _client = client.await.unwrap().unwrap();

        acceptor.configure(&stream, peer).unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
