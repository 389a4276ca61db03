//! Probe sessions.
//!
//! A [`ProbeSession`] behaves like a well-mannered session (echoes what it
//! reads, refreshes liveness on traffic, honours forced wakes) and writes
//! every lifecycle step to a shared [`ProbeLog`] that tests inspect.

use std::{cell::RefCell, future::Future, net::SocketAddr, rc::Rc};

use socksgate_worker::{Session, SessionContext, SessionError, SessionFactory, SessionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Something a probe factory or session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Factory built a session
    Created {
        /// Connection peer
        peer: SocketAddr,
    },
    /// Factory refused a connection
    Rejected {
        /// Connection peer
        peer: SocketAddr,
    },
    /// Session task began running
    Started {
        /// Registry id
        id: SessionId,
        /// Connection peer
        peer: SocketAddr,
        /// Quit flag at start
        quitting: bool,
    },
    /// Session observed a forced wake
    Woken {
        /// Registry id
        id: SessionId,
        /// Liveness when woken
        liveness: i32,
        /// Quit flag when woken
        quitting: bool,
    },
    /// Session finished and released its stream
    Closed {
        /// Registry id
        id: SessionId,
    },
}

/// Shared, append-only record of probe events.
#[derive(Debug, Clone, Default)]
pub struct ProbeLog {
    events: Rc<RefCell<Vec<ProbeEvent>>>,
}

impl ProbeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: ProbeEvent) {
        self.events.borrow_mut().push(event);
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.borrow().clone()
    }

    /// Number of sessions the factory built.
    pub fn created(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Created { .. }))
    }

    /// Number of connections the factory refused.
    pub fn rejected(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Rejected { .. }))
    }

    /// Ids of sessions that started, in start order.
    pub fn started(&self) -> Vec<SessionId> {
        self.filter_ids(|event| match event {
            ProbeEvent::Started { id, .. } => Some(*id),
            _ => None,
        })
    }

    /// Ids of sessions that closed, in close order.
    pub fn closed(&self) -> Vec<SessionId> {
        self.filter_ids(|event| match event {
            ProbeEvent::Closed { id } => Some(*id),
            _ => None,
        })
    }

    /// Quit flag seen by a session when it started.
    pub fn started_quitting(&self, session: SessionId) -> Option<bool> {
        self.events.borrow().iter().find_map(|event| match event {
            ProbeEvent::Started { id, quitting, .. } if *id == session => Some(*quitting),
            _ => None,
        })
    }

    /// `(liveness, quitting)` for each forced wake a session observed.
    pub fn wakes(&self, session: SessionId) -> Vec<(i32, bool)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ProbeEvent::Woken { id, liveness, quitting } if *id == session => {
                    Some((*liveness, *quitting))
                },
                _ => None,
            })
            .collect()
    }

    /// Total forced wakes observed across all sessions.
    pub fn wake_count(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Woken { .. }))
    }

    fn count(&self, pred: impl Fn(&ProbeEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|&event| pred(event)).count()
    }

    fn filter_ids(&self, pick: impl Fn(&ProbeEvent) -> Option<SessionId>) -> Vec<SessionId> {
        self.events.borrow().iter().filter_map(pick).collect()
    }
}

/// What a probe session does when woken with its liveness used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Finish the session
    #[default]
    Close,
    /// Reset liveness and keep serving
    Refresh,
}

/// [`SessionFactory`] producing [`ProbeSession`]s.
#[derive(Debug, Clone)]
pub struct ProbeFactory {
    log: ProbeLog,
    reject: bool,
    expiry: ExpiryPolicy,
}

impl ProbeFactory {
    /// Factory that accepts every connection.
    pub fn new(log: ProbeLog) -> Self {
        Self { log, reject: false, expiry: ExpiryPolicy::Close }
    }

    /// Factory that refuses every connection.
    pub fn rejecting(log: ProbeLog) -> Self {
        Self { reject: true, ..Self::new(log) }
    }

    /// Choose how sessions react to expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }
}

impl SessionFactory<DuplexStream> for ProbeFactory {
    type Session = ProbeSession;

    fn create(&self, stream: DuplexStream, peer: SocketAddr) -> Result<ProbeSession, SessionError> {
        if self.reject {
            self.log.record(ProbeEvent::Rejected { peer });
            return Err(SessionError::Rejected(format!("probe factory refuses {peer}")));
        }

        self.log.record(ProbeEvent::Created { peer });
        Ok(ProbeSession { stream, peer, log: self.log.clone(), expiry: self.expiry })
    }
}

/// Echo session that records its lifecycle.
#[derive(Debug)]
pub struct ProbeSession {
    stream: DuplexStream,
    peer: SocketAddr,
    log: ProbeLog,
    expiry: ExpiryPolicy,
}

impl Session for ProbeSession {
    fn run(self, ctx: SessionContext) -> impl Future<Output = ()> + 'static {
        async move {
            let Self { mut stream, peer, log, expiry } = self;
            let id = ctx.id();

            log.record(ProbeEvent::Started { id, peer, quitting: ctx.is_quitting() });

            if !ctx.is_quitting() {
                serve(&mut stream, &ctx, &log, expiry).await;
            }

            drop(stream);
            log.record(ProbeEvent::Closed { id });
        }
    }
}

async fn serve(stream: &mut DuplexStream, ctx: &SessionContext, log: &ProbeLog, expiry: ExpiryPolicy) {
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    ctx.refresh();
                    if stream.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                },
            },
            () = ctx.woken() => {
                log.record(ProbeEvent::Woken {
                    id: ctx.id(),
                    liveness: ctx.liveness(),
                    quitting: ctx.is_quitting(),
                });

                if ctx.is_quitting() {
                    return;
                }

                if ctx.is_expired() {
                    match expiry {
                        ExpiryPolicy::Close => return,
                        ExpiryPolicy::Refresh => ctx.refresh(),
                    }
                }
            },
        }
    }
}
