use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::{ConnState, Connection, ReplyCallback};
use crate::registry::{ConnectionRegistry, Descriptor};
use mio::{Events, Poll, Token};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Non-blocking connection manager
///
/// Owns the connection registry and the readiness poll. All progress
/// happens synchronously inside [`Client::tick`] calls made from the
/// host's own loop; nothing here blocks beyond the configured poll
/// budget. Single-threaded by design: every mutating entry point takes
/// `&mut self`.
pub struct Client {
    config: Config,
    registry: ConnectionRegistry,
    poll: Poll,
    events: Events,
    read_buf: Vec<u8>,
}

impl Client {
    /// Create a client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let poll = Poll::new()?;
        let read_buf = vec![0u8; config.read_buffer_size];

        Ok(Self {
            config,
            registry: ConnectionRegistry::new(),
            poll,
            events: Events::with_capacity(1024),
            read_buf,
        })
    }

    /// Open a connection to host:port and start a non-blocking connect
    ///
    /// Returns the descriptor for the new slot. Duplicate endpoints and
    /// the open-connection ceiling are rejected before anything is
    /// allocated; a synchronous connect failure releases the slot again.
    pub fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<Descriptor> {
        if self.registry.len() >= self.config.max_open {
            warn!(
                "open {}:{} rejected, {} connections already open",
                host,
                port,
                self.registry.len()
            );
            return Err(Error::MaxOpenReached(self.config.max_open));
        }

        if self.registry.contains_endpoint(host, port) {
            warn!("open rejected, endpoint {}:{} duplicate", host, port);
            return Err(Error::DuplicateEndpoint(host.to_string(), port));
        }

        let conn = Connection::new(host, port, timeout, self.config.tcp_nodelay);
        let d = self.registry.insert(conn);

        let mio_registry = self.poll.registry();
        let conn = self.registry.get_mut(d)?;
        if let Err(err) = conn.connect(mio_registry, Token(d.index())) {
            // No partial state survives a synchronous connect failure
            let _ = self.registry.remove(d);
            return Err(err);
        }

        info!("opened {} to {}:{}", d, host, port);
        Ok(d)
    }

    /// Close a descriptor, dropping its queued callbacks uninvoked
    pub fn close(&mut self, d: Descriptor) -> Result<()> {
        let mio_registry = self.poll.registry();
        let mut conn = self.registry.remove(d)?;
        conn.disconnect(mio_registry);
        info!("closed {} ({} connections remain)", d, self.registry.len());
        Ok(())
    }

    /// Current lifecycle state of a connection
    pub fn state(&self, d: Descriptor) -> Result<ConnState> {
        Ok(self.registry.get(d)?.state())
    }

    /// Start a fresh connect attempt to the stored endpoint
    ///
    /// Legal only while not connected. Everything still queued on the
    /// pipeline is dropped without invocation.
    pub fn reconnect(&mut self, d: Descriptor) -> Result<()> {
        let mio_registry = self.poll.registry();
        let conn = self.registry.get_mut(d)?;
        if conn.state() == ConnState::Connected {
            warn!("reconnect rejected, {} is connected", d);
            return Err(Error::AlreadyConnected(d));
        }
        conn.disconnect(mio_registry);
        conn.connect(mio_registry, Token(d.index()))
    }

    /// Issue a command on a connected descriptor
    ///
    /// The callback (if any) fires during a later tick, once the matching
    /// reply arrives; `private` is copied and handed back to it untouched.
    pub fn exec(
        &mut self,
        d: Descriptor,
        command: &str,
        callback: Option<ReplyCallback>,
        private: &[u8],
    ) -> Result<()> {
        let conn = self.registry.get_mut(d)?;
        if conn.state() != ConnState::Connected {
            warn!(
                "exec rejected, {} not connected (state {:?})",
                d,
                conn.state()
            );
            return Err(Error::NotConnected(d));
        }

        debug!("exec on {}: {}", d, command);
        conn.enqueue(command, callback, private)
    }

    /// One multiplexed pass over every registered connection
    ///
    /// Advances in-flight connects, flushes pending writes, then issues a
    /// single readiness poll bounded by the configured budget and drains
    /// and dispatches every socket it reports ready.
    pub fn tick(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            return Ok(());
        }

        // First pass: connect deadlines and write flush
        {
            let mio_registry = self.poll.registry();
            for index in self.registry.occupied() {
                let Some(conn) = self.registry.conn_mut_at(index) else {
                    continue;
                };
                match conn.state() {
                    ConnState::Connecting if conn.deadline_expired() => {
                        error!("connect timeout on {}:{}", conn.host(), conn.port());
                        conn.abort_connect(mio_registry);
                    }
                    ConnState::Connected => conn.flush(),
                    _ => {}
                }
            }
        }

        // One readiness poll amortized across all connections
        let budget = Duration::from_millis(self.config.poll_budget_ms);
        if let Err(err) = self.poll.poll(&mut self.events, Some(budget)) {
            if err.kind() == ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        // Second pass: resolve connectors, drain readers, dispatch replies
        let mio_registry = self.poll.registry();
        for (token, readable, writable) in ready {
            let Some(conn) = self.registry.conn_mut_at(token.0) else {
                continue;
            };

            if conn.state() == ConnState::Connecting && (readable || writable) {
                conn.complete_connect(mio_registry);
            }

            if conn.state() == ConnState::Connected && readable {
                conn.read_and_dispatch(mio_registry, &mut self.read_buf);
            }
        }

        Ok(())
    }

    /// Number of open connections
    pub fn open_count(&self) -> usize {
        self.registry.len()
    }
}
