use crate::error::{Error, Result};
use crate::protocol::resp::{encode_command, RespParser, RespValue};
use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Connection lifecycle state, observable through `Client::state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Nothing has happened yet
    Idle,
    /// Non-blocking connect in flight
    Connecting,
    /// Connect attempt failed or timed out
    Failed,
    /// Established, commands may be issued
    Connected,
    /// Server closed the connection
    Closed,
}

/// Result category handed to a reply callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Empty,
}

/// Reply callback: (outcome, reply arguments, private payload)
///
/// Invoked synchronously on the tick's calling stack; must not block.
/// The return value of the closure body is ignored by design.
pub type ReplyCallback = Box<dyn FnMut(Outcome, &[Bytes], &[u8])>;

/// Private payloads at or below this size are stored inline
const INLINE_PAYLOAD: usize = 64;

enum Payload {
    Empty,
    Inline { len: usize, buf: [u8; INLINE_PAYLOAD] },
    Heap(Vec<u8>),
}

impl Payload {
    fn copy_from(data: &[u8]) -> Self {
        if data.is_empty() {
            Payload::Empty
        } else if data.len() <= INLINE_PAYLOAD {
            let mut buf = [0u8; INLINE_PAYLOAD];
            buf[..data.len()].copy_from_slice(data);
            Payload::Inline {
                len: data.len(),
                buf,
            }
        } else {
            Payload::Heap(data.to_vec())
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Empty => &[],
            Payload::Inline { len, buf } => &buf[..*len],
            Payload::Heap(v) => v,
        }
    }
}

/// One issued-but-unanswered command
///
/// Always queued, even without a callback, so the pipeline stays 1:1 with
/// issued commands and replies match up in order.
struct PendingCall {
    callback: Option<ReplyCallback>,
    payload: Payload,
}

/// One managed server connection: state machine, socket and pipeline
pub struct Connection {
    host: String,
    port: u16,
    timeout: Duration,
    deadline: Instant,
    nodelay: bool,
    state: ConnState,
    stream: Option<TcpStream>,
    parser: RespParser,
    write_buffer: Vec<u8>,
    write_position: usize,
    pipeline: VecDeque<PendingCall>,
}

impl Connection {
    pub(crate) fn new(host: &str, port: u16, timeout: Duration, nodelay: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            deadline: Instant::now(),
            nodelay,
            state: ConnState::Idle,
            stream: None,
            parser: RespParser::new(),
            write_buffer: Vec::new(),
            write_position: 0,
            pipeline: VecDeque::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Start a non-blocking connect to the stored endpoint
    ///
    /// Resolution or socket failure is a synchronous error and leaves the
    /// state untouched.
    pub(crate) fn connect(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", self.host),
                ))
            })?;

        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(self.nodelay)?;
        registry.register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;

        self.deadline = Instant::now() + self.timeout;
        self.state = ConnState::Connecting;
        self.stream = Some(stream);

        info!(
            "connect to {}:{} in progress, expires in {:?}",
            self.host, self.port, self.timeout
        );
        Ok(())
    }

    /// Whether the in-flight connect attempt has outlived its deadline
    pub(crate) fn deadline_expired(&self) -> bool {
        self.state == ConnState::Connecting && Instant::now() >= self.deadline
    }

    /// Resolve an in-flight connect after a readiness event
    ///
    /// A pending socket error means the attempt failed; otherwise the peer
    /// address tells connected apart from still-in-progress.
    pub(crate) fn complete_connect(&mut self, registry: &Registry) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };

        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(err)) => {
                error!("connect to {}:{} failed: {}", self.host, self.port, err);
                self.abort_connect(registry);
                return;
            }
            Err(err) => {
                error!(
                    "reading socket error on {}:{} failed: {}",
                    self.host, self.port, err
                );
                self.abort_connect(registry);
                return;
            }
        }

        match stream.peer_addr() {
            Ok(_) => {
                info!("connected to {}:{}", self.host, self.port);
                self.state = ConnState::Connected;
            }
            Err(err)
                if err.kind() == ErrorKind::NotConnected
                    || err.kind() == ErrorKind::WouldBlock =>
            {
                trace!("connect to {}:{} not ready yet", self.host, self.port);
            }
            Err(err) => {
                error!("connect to {}:{} failed: {}", self.host, self.port, err);
                self.abort_connect(registry);
            }
        }
    }

    /// Fail the in-flight connect attempt
    pub(crate) fn abort_connect(&mut self, registry: &Registry) {
        warn!("giving up connect to {}:{}", self.host, self.port);
        self.disconnect(registry);
        self.state = ConnState::Failed;
    }

    /// Release the socket and codec state and drop the whole pipeline
    ///
    /// Queued callbacks are discarded without invocation. Idempotent.
    pub(crate) fn disconnect(&mut self, registry: &Registry) {
        if let Some(mut stream) = self.stream.take() {
            let _ = registry.deregister(&mut stream);
        }
        self.parser.reset();
        self.write_buffer.clear();
        self.write_position = 0;
        let dropped = self.pipeline.len();
        self.pipeline.clear();
        if dropped > 0 {
            debug!(
                "dropped {} pending calls on disconnect from {}:{}",
                dropped, self.host, self.port
            );
        }
    }

    /// Queue one command and its callback on the pipeline
    ///
    /// The pending entry is pushed before encoding; if encoding fails the
    /// entry intentionally remains queued, matching command/reply pairing
    /// for anything that did reach the wire.
    pub(crate) fn enqueue(
        &mut self,
        command: &str,
        callback: Option<ReplyCallback>,
        private: &[u8],
    ) -> Result<()> {
        self.pipeline.push_back(PendingCall {
            callback,
            payload: Payload::copy_from(private),
        });

        let bytes = encode_command(command)?;

        // Only reclaim the buffer once all previous writes are consumed
        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }
        self.write_buffer.extend_from_slice(&bytes);

        trace!(
            "queued command on {}:{} ({} pending)",
            self.host,
            self.port,
            self.pipeline.len()
        );
        Ok(())
    }

    /// Push buffered output to the socket without blocking
    ///
    /// Stops when the buffer empties or the kernel cannot accept more right
    /// now; leftovers are retried on the next tick.
    pub(crate) fn flush(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        while self.write_position < self.write_buffer.len() {
            match stream.write(&self.write_buffer[self.write_position..]) {
                Ok(0) => break,
                Ok(n) => self.write_position += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    trace!(
                        "send buffer full on {}:{}, will write again",
                        self.host,
                        self.port
                    );
                    break;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("flush on {}:{} failed: {}", self.host, self.port, err);
                    break;
                }
            }
        }

        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }
    }

    /// Drain readable bytes, feed the parser and dispatch complete replies
    ///
    /// A zero-byte read is a peer-initiated close: the connection moves to
    /// `Closed` and its resources are released.
    pub(crate) fn read_and_dispatch(&mut self, registry: &Registry, buf: &mut [u8]) {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };

            match stream.read(buf) {
                Ok(0) => {
                    info!("server closed connection {}:{}", self.host, self.port);
                    self.disconnect(registry);
                    self.state = ConnState::Closed;
                    return;
                }
                Ok(n) => {
                    self.parser.feed(&buf[..n]);
                    loop {
                        match self.parser.parse_next() {
                            Ok(Some(reply)) => self.dispatch(reply),
                            Ok(None) => break,
                            Err(err) => {
                                error!(
                                    "reply parse on {}:{} failed: {}",
                                    self.host, self.port, err
                                );
                                return;
                            }
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("read on {}:{} failed: {}", self.host, self.port, err);
                    return;
                }
            }
        }
    }

    /// Hand one parsed reply to the oldest pending callback
    fn dispatch(&mut self, reply: RespValue) {
        let Some(mut call) = self.pipeline.pop_front() else {
            warn!(
                "reply with no pending call on {}:{}, dropping (pipeline desync)",
                self.host, self.port
            );
            return;
        };

        let (outcome, args) = map_reply(&reply);

        match call.callback.as_mut() {
            Some(callback) => {
                trace!("invoking callback on {}:{}", self.host, self.port);
                callback(outcome, &args, call.payload.as_slice());
            }
            None => trace!("no callback on {}:{}", self.host, self.port),
        }
        // call and its payload are released here
    }
}

/// Map a parsed reply to the generic (outcome, arguments) callback contract
fn map_reply(reply: &RespValue) -> (Outcome, Vec<Bytes>) {
    match reply {
        RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => {
            (Outcome::Success, vec![s.clone()])
        }
        RespValue::Integer(n) => {
            let mut num_buf = itoa::Buffer::new();
            (
                Outcome::Success,
                vec![Bytes::copy_from_slice(num_buf.format(*n).as_bytes())],
            )
        }
        RespValue::Error(msg) => (Outcome::Error, vec![Bytes::copy_from_slice(msg.as_bytes())]),
        // Both nil forms collapse to an empty result
        RespValue::BulkString(None) | RespValue::Array(None) => (Outcome::Empty, Vec::new()),
        RespValue::Array(Some(elems)) => {
            let args = elems.iter().map(flatten_element).collect();
            (Outcome::Success, args)
        }
    }
}

/// Flatten one array element to its argument bytes
///
/// The callback contract is flat; nested array elements are unsupported
/// and yield an empty argument.
fn flatten_element(elem: &RespValue) -> Bytes {
    match elem {
        RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => s.clone(),
        RespValue::Integer(n) => {
            let mut num_buf = itoa::Buffer::new();
            Bytes::copy_from_slice(num_buf.format(*n).as_bytes())
        }
        RespValue::Error(msg) => Bytes::copy_from_slice(msg.as_bytes()),
        RespValue::BulkString(None) => Bytes::new(),
        RespValue::Array(_) => {
            warn!("nested array element in reply is unsupported, yielding empty argument");
            Bytes::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_single_success_arg() {
        let reply = RespValue::SimpleString(Bytes::from_static(b"OK"));
        let (outcome, args) = map_reply(&reply);
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(args.len(), 1);
        assert_eq!(&args[0][..], b"OK");
    }

    #[test]
    fn bulk_string_preserves_length() {
        let reply = RespValue::BulkString(Some(Bytes::from_static(b"hello world")));
        let (outcome, args) = map_reply(&reply);
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(args[0].len(), 11);
    }

    #[test]
    fn integer_maps_to_decimal_text() {
        let (outcome, args) = map_reply(&RespValue::Integer(-1234567890));
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(&args[0][..], b"-1234567890");
    }

    #[test]
    fn error_maps_to_error_outcome() {
        let reply = RespValue::Error("ERR no such key".to_string());
        let (outcome, args) = map_reply(&reply);
        assert_eq!(outcome, Outcome::Error);
        assert_eq!(&args[0][..], b"ERR no such key");
    }

    #[test]
    fn nil_maps_to_empty_with_no_args() {
        let (outcome, args) = map_reply(&RespValue::BulkString(None));
        assert_eq!(outcome, Outcome::Empty);
        assert!(args.is_empty());

        let (outcome, args) = map_reply(&RespValue::Array(None));
        assert_eq!(outcome, Outcome::Empty);
        assert!(args.is_empty());
    }

    #[test]
    fn array_maps_one_arg_per_element() {
        let reply = RespValue::Array(Some(vec![
            RespValue::BulkString(Some(Bytes::from_static(b"pear"))),
            RespValue::Integer(3),
            RespValue::BulkString(None),
        ]));
        let (outcome, args) = map_reply(&reply);
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(args.len(), 3);
        assert_eq!(&args[0][..], b"pear");
        assert_eq!(&args[1][..], b"3");
        assert!(args[2].is_empty());
    }

    #[test]
    fn nested_array_element_yields_empty_arg() {
        let reply = RespValue::Array(Some(vec![RespValue::Array(Some(vec![
            RespValue::Integer(1),
        ]))]));
        let (outcome, args) = map_reply(&reply);
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(args.len(), 1);
        assert!(args[0].is_empty());
    }

    #[test]
    fn small_payload_is_stored_inline() {
        let data = [7u8; INLINE_PAYLOAD];
        let payload = Payload::copy_from(&data);
        assert!(matches!(payload, Payload::Inline { .. }));
        assert_eq!(payload.as_slice(), &data);
    }

    #[test]
    fn large_payload_is_stored_on_heap() {
        let data = vec![9u8; INLINE_PAYLOAD + 1];
        let payload = Payload::copy_from(&data);
        assert!(matches!(payload, Payload::Heap(_)));
        assert_eq!(payload.as_slice(), &data[..]);
    }

    #[test]
    fn empty_payload_has_empty_slice() {
        let payload = Payload::copy_from(&[]);
        assert!(matches!(payload, Payload::Empty));
        assert!(payload.as_slice().is_empty());
    }
}
