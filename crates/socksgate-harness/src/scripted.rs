//! Scripted in-memory listener.
//!
//! Tests push connections (and accept failures) through a [`Connector`]; the
//! worker receives them from the paired [`ScriptedListener`] in the order they
//! were pushed. Each connection is a `tokio::io::duplex` pipe: the server half
//! goes to the worker, the client half stays with the test.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    future, io,
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    time::Duration,
};

use socksgate_worker::Listener;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
};

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// First fake client port handed out.
const FIRST_PORT: u16 = 40_000;

type Pending = io::Result<(DuplexStream, SocketAddr)>;
type RejectSet = Rc<RefCell<HashSet<SocketAddr>>>;

/// Create a listener and the connector that feeds it.
pub fn scripted_listener() -> (ScriptedListener, Connector) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rejected = RejectSet::default();

    let listener = ScriptedListener { rx, rejected: Rc::clone(&rejected) };
    let connector = Connector { tx, rejected, next_port: Cell::new(FIRST_PORT) };

    (listener, connector)
}

/// [`Listener`] that yields whatever its [`Connector`] pushed.
#[derive(Debug)]
pub struct ScriptedListener {
    rx: mpsc::UnboundedReceiver<Pending>,
    rejected: RejectSet,
}

impl Listener for ScriptedListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<(DuplexStream, SocketAddr)> {
        match self.rx.recv().await {
            Some(pending) => pending,
            // Connector gone: behave like a socket nobody connects to.
            None => future::pending().await,
        }
    }

    fn configure(&self, _stream: &DuplexStream, peer: SocketAddr) -> io::Result<()> {
        if self.rejected.borrow().contains(&peer) {
            return Err(io::Error::other(format!("scripted configure failure for {peer}")));
        }

        Ok(())
    }
}

/// Test-side control of a [`ScriptedListener`].
#[derive(Debug)]
pub struct Connector {
    tx: mpsc::UnboundedSender<Pending>,
    rejected: RejectSet,
    next_port: Cell<u16>,
}

impl Connector {
    /// Queue a new connection and return its client half.
    pub fn connect(&self) -> ClientEnd {
        let peer = self.next_peer();
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);

        self.push(Ok((server, peer)));
        ClientEnd { stream: client, peer }
    }

    /// Queue a connection whose per-connection setup will fail.
    pub fn connect_unconfigurable(&self) -> ClientEnd {
        let client = self.connect();
        self.rejected.borrow_mut().insert(client.peer);
        client
    }

    /// Queue an accept failure.
    pub fn fail_accept(&self, kind: io::ErrorKind) {
        self.push(Err(io::Error::new(kind, "scripted accept failure")));
    }

    fn next_peer(&self) -> SocketAddr {
        let port = self.next_port.get();
        self.next_port.set(port.wrapping_add(1));
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    fn push(&self, pending: Pending) {
        if self.tx.send(pending).is_err() {
            tracing::debug!("scripted listener dropped, connection discarded");
        }
    }
}

/// Client half of a scripted connection.
#[derive(Debug)]
pub struct ClientEnd {
    /// Client side of the pipe
    pub stream: DuplexStream,
    /// Fake peer address the worker sees
    pub peer: SocketAddr,
}

impl ClientEnd {
    /// Whether the server half has been dropped.
    ///
    /// Reads until end-of-stream, giving up after `wait`.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        let mut buf = [0u8; 256];

        let drain = async {
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {},
                }
            }
        };

        tokio::time::timeout(wait, drain).await.is_ok()
    }

    /// Send bytes and read the echo back.
    pub async fn echo(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        self.stream.write_all(payload).await?;

        let mut reply = vec![0u8; payload.len()];
        self.stream.read_exact(&mut reply).await?;
        Ok(reply)
    }
}
