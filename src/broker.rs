//! The dsv broker: three bound endpoints and the forward pipeline.
//!
//! A single-threaded event loop polls the signal self-pipe and the three
//! sockets. Ingest messages (create/set/array mutations, plus the
//! fire-and-forget save/restore/track) are validated against the registry
//! and, on success, re-emitted on the fan-out socket framed with the full
//! name as topic. XPUB subscription events trigger a last-value replay so
//! late joiners see the current value. Requests always get a reply, errors
//! in-band. A signal breaks the loop and runs a final save.
//!
//! Client-side protocol errors are logged and dropped; only transport-level
//! failures (bind, poll) are fatal.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::low_level::pipe;
use tracing::{debug, error, info, warn};

use crate::config::DsvConfig;
use crate::discovery::{self, Beacon, PROBE_TIMEOUT};
use crate::error::{code, DsvError, Result};
use crate::registry::{Entry, Registry};
use crate::store;
use crate::wire::{self, Opcode};

/// Poll granularity; the loop notices a stop request within this window.
const POLL_INTERVAL_MS: i64 = 100;

/// The broker process state: bound sockets, signal pipe, and the registry.
pub struct Broker {
    config: DsvConfig,
    _ctx: zmq::Context,
    ingest: zmq::Socket,
    fanout: zmq::Socket,
    reply: zmq::Socket,
    signal_rx: UnixStream,
    registry: Registry,
    stop: Arc<AtomicBool>,
    _beacon: Option<Beacon>,
}

impl Broker {
    /// Probe for an existing broker, start the beacon, and bind the three
    /// endpoints. Any failure here is fatal at startup.
    pub fn bind(config: DsvConfig) -> Result<Broker> {
        let beacon = if config.beacon_enabled {
            if discovery::probe(config.beacon_port, PROBE_TIMEOUT)?.is_some() {
                return Err(DsvError::AlreadyExists(
                    "a dsv server is already running on the network".into(),
                ));
            }
            Some(Beacon::spawn(config.beacon_port)?)
        } else {
            None
        };

        let ctx = zmq::Context::new();

        let ingest = ctx.socket(zmq::SUB)?;
        ingest.bind(&DsvConfig::bind_endpoint(config.ingest_port))?;
        ingest.set_subscribe(b"")?;

        let fanout = ctx.socket(zmq::XPUB)?;
        // every subscriber's subscription must reach the loop, duplicates
        // included, or only the first late joiner would get the LVC replay
        fanout.set_xpub_verbose(true)?;
        fanout.bind(&DsvConfig::bind_endpoint(config.fanout_port))?;

        let reply = ctx.socket(zmq::REP)?;
        reply.bind(&DsvConfig::bind_endpoint(config.request_port))?;

        let (signal_rx, signal_tx) = UnixStream::pair()?;
        signal_rx.set_nonblocking(true)?;
        signal_tx.set_nonblocking(true)?;
        pipe::register(SIGINT, signal_tx.try_clone()?)?;
        pipe::register(SIGTERM, signal_tx)?;

        info!(
            ingest = config.ingest_port,
            fanout = config.fanout_port,
            request = config.request_port,
            "dsv server bound"
        );

        Ok(Broker {
            config,
            _ctx: ctx,
            ingest,
            fanout,
            reply,
            signal_rx,
            registry: Registry::new(),
            stop: Arc::new(AtomicBool::new(false)),
            _beacon: beacon,
        })
    }

    /// A flag that stops the loop from another thread; the signal pipe is
    /// the production path, this is for embedding and tests.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the event loop until a signal or stop request arrives, then
    /// perform the final save.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let (signaled, ingest_ready, sub_ready, req_ready) = {
                let mut items = [
                    zmq::PollItem::from_fd(self.signal_rx.as_raw_fd(), zmq::POLLIN),
                    self.ingest.as_poll_item(zmq::POLLIN),
                    self.fanout.as_poll_item(zmq::POLLIN),
                    self.reply.as_poll_item(zmq::POLLIN),
                ];
                // poll failure is a transport error and fatal
                zmq::poll(&mut items, POLL_INTERVAL_MS)?;
                (
                    items[0].is_readable(),
                    items[1].is_readable(),
                    items[2].is_readable(),
                    items[3].is_readable(),
                )
            };

            if signaled {
                let mut drain = [0u8; 16];
                use std::io::Read;
                let _ = (&self.signal_rx).read(&mut drain);
                warn!("interrupt received, shutting down");
                break;
            }
            if self.stop.load(Ordering::Relaxed) {
                debug!("stop requested, shutting down");
                break;
            }

            if ingest_ready {
                self.handle_ingest();
            }
            if sub_ready {
                self.handle_subscription();
            }
            if req_ready {
                self.handle_request();
            }
        }

        if let Err(err) = store::save(&mut self.registry, &self.config.save_path) {
            warn!(error = %err, "final save failed");
        }
        Ok(())
    }

    /// One message off the ingest socket: mutate, then forward on success.
    /// Ingest has no reply channel, so failures are logged and dropped.
    fn handle_ingest(&mut self) {
        let frame = match self.ingest.recv_bytes(0) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "ingest recv failed");
                return;
            }
        };
        match self.dispatch_ingest(&frame) {
            Ok(Some(forward)) => {
                if let Err(err) = self.fanout.send(&forward[..], 0) {
                    error!(error = %err, "forward send failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "ingest frame dropped"),
        }
    }

    fn dispatch_ingest(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        let req = wire::parse_request(frame)?;
        match req.opcode {
            Opcode::Create => {
                let create = wire::parse_create(req.payload)?;
                let handle = self.registry.create(create)?;
                let entry = self.registry.entry(handle)?;
                debug!(name = %entry.name, ty = %entry.ty, "created");
                Ok(Some(forward_frame(entry)))
            }
            Opcode::Set => {
                let (handle, bytes) = wire::parse_set(req.payload)?;
                let entry = self.registry.set_from_wire(handle, bytes)?;
                Ok(Some(forward_frame(entry)))
            }
            Opcode::AddItem => {
                let (handle, value) = wire::parse_add_item(req.payload)?;
                let entry = self.registry.add_item(handle, value)?;
                Ok(Some(forward_frame(entry)))
            }
            Opcode::InsItem => {
                let (handle, index, value) = wire::parse_indexed_item(req.payload)?;
                let entry = self.registry.ins_item(handle, index, value)?;
                Ok(Some(forward_frame(entry)))
            }
            Opcode::SetItem => {
                let (handle, index, value) = wire::parse_indexed_item(req.payload)?;
                let entry = self.registry.set_item(handle, index, value)?;
                Ok(Some(forward_frame(entry)))
            }
            Opcode::DelItem => {
                let (handle, index) = wire::parse_item_index(req.payload)?;
                let entry = self.registry.del_item(handle, index)?;
                Ok(Some(forward_frame(entry)))
            }
            Opcode::Save => {
                store::save(&mut self.registry, &self.config.save_path)?;
                Ok(None)
            }
            Opcode::Restore => {
                store::restore(&mut self.registry, &self.config.save_path)?;
                Ok(None)
            }
            Opcode::Track => {
                let (handle, enable) = wire::parse_track(req.payload)?;
                self.registry.set_track(handle, enable)?;
                Ok(None)
            }
            other => Err(DsvError::Invalid(format!(
                "opcode {other:?} not valid on the ingest socket"
            ))),
        }
    }

    /// A subscription event off the XPUB socket: one marker byte, then the
    /// topic bytes (the full name with its NUL). On subscribe, replay the
    /// entry's current value so the late joiner starts from known state.
    fn handle_subscription(&mut self) {
        let event = match self.fanout.recv_bytes(0) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "subscription recv failed");
                return;
            }
        };
        if event.first() != Some(&1) {
            return; // unsubscribe, or an empty event
        }
        let topic = &event[1..];
        let name_bytes = topic.strip_suffix(&[0u8]).unwrap_or(topic);
        let Ok(name) = std::str::from_utf8(name_bytes) else {
            warn!("subscription topic is not UTF-8");
            return;
        };
        match self.registry.entry_by_name(name) {
            Some(entry) => {
                debug!(name, "replaying last value to new subscriber");
                let forward = forward_frame(entry);
                if let Err(err) = self.fanout.send(&forward[..], 0) {
                    error!(error = %err, "lvc send failed");
                }
            }
            None => debug!(name, "subscription before create, nothing to replay"),
        }
    }

    /// One request off the REP socket. A reply always goes back, carrying
    /// the error kind when the operation failed.
    fn handle_request(&mut self) {
        let frame = match self.reply.recv_bytes(0) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "request recv failed");
                return;
            }
        };
        let reply = match self.dispatch_request(&frame) {
            Ok(payload) => wire::encode_reply(code::OK, &payload),
            Err(err) => {
                debug!(error = %err, "request failed");
                wire::encode_reply(err.code(), &[])
            }
        };
        if let Err(err) = self.reply.send(&reply[..], 0) {
            error!(error = %err, "reply send failed");
        }
    }

    fn dispatch_request(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let req = wire::parse_request(frame)?;
        match req.opcode {
            Opcode::GetHandle => {
                let name = wire::parse_name(req.payload)?;
                let handle = self.registry.handle_of(name)?;
                Ok(wire::reply_handle(handle))
            }
            Opcode::GetType => {
                let handle = wire::parse_handle(req.payload)?;
                Ok(wire::reply_type(self.registry.entry(handle)?.ty))
            }
            Opcode::GetLen => {
                let handle = wire::parse_handle(req.payload)?;
                Ok(wire::reply_len(self.registry.entry(handle)?.byte_len() as u64))
            }
            Opcode::Get => {
                let handle = wire::parse_handle(req.payload)?;
                self.registry.read(handle)
            }
            Opcode::GetNext => {
                let (last_index, search) = wire::parse_get_next(req.payload)?;
                match self.registry.get_next(last_index, search) {
                    Some((index, entry)) => Ok(wire::reply_get_next(
                        index,
                        &entry.name,
                        &entry.value.to_string(),
                    )),
                    None => Err(DsvError::NotFound(format!("no more matches for {search:?}"))),
                }
            }
            Opcode::GetItem => {
                let (handle, index) = wire::parse_item_index(req.payload)?;
                Ok(wire::reply_item(self.registry.get_item(handle, index)?))
            }
            other => Err(DsvError::Invalid(format!(
                "opcode {other:?} not valid on the request socket"
            ))),
        }
    }
}

fn forward_frame(entry: &Entry) -> Vec<u8> {
    wire::encode_forward(&entry.name, &entry.value.to_wire())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::AtomicU16;

    static NEXT_PORT: AtomicU16 = AtomicU16::new(45100);

    fn test_config() -> DsvConfig {
        let base = NEXT_PORT.fetch_add(3, Ordering::Relaxed);
        DsvConfig {
            request_port: base,
            fanout_port: base + 1,
            ingest_port: base + 2,
            beacon_enabled: false,
            save_path: std::env::temp_dir().join(format!("dsv-broker-test-{base}.save")),
            ..DsvConfig::default()
        }
    }

    fn broker_with_entry(name: &str, value: Value) -> Broker {
        let mut broker = Broker::bind(test_config()).unwrap();
        let frame = wire::encode_create(1, 0, name, "", "", &value);
        broker.dispatch_ingest(&frame).unwrap();
        broker
    }

    #[test]
    fn ingest_create_produces_forward_frame() {
        let mut broker = Broker::bind(test_config()).unwrap();
        let frame = wire::encode_create(1, 0, "[1]/SYS/A", "", "", &Value::U32(7));
        let forward = broker.dispatch_ingest(&frame).unwrap().unwrap();
        let (topic, payload) = wire::parse_forward(&forward).unwrap();
        assert_eq!(topic, "[1]/SYS/A");
        assert_eq!(payload, 7u32.to_le_bytes());
    }

    #[test]
    fn ingest_duplicate_create_is_rejected() {
        let mut broker = broker_with_entry("[1]/SYS/A", Value::U32(7));
        let frame = wire::encode_create(1, 0, "[1]/SYS/A", "", "", &Value::U32(9));
        assert!(broker.dispatch_ingest(&frame).is_err());
    }

    #[test]
    fn ingest_set_forwards_new_value() {
        let mut broker = broker_with_entry("[1]/SYS/A", Value::U32(7));
        let handle = broker.registry.handle_of("[1]/SYS/A").unwrap();
        let forward = broker
            .dispatch_ingest(&wire::encode_set(handle, &Value::U32(42)))
            .unwrap()
            .unwrap();
        let (topic, payload) = wire::parse_forward(&forward).unwrap();
        assert_eq!(topic, "[1]/SYS/A");
        assert_eq!(payload, 42u32.to_le_bytes());
    }

    #[test]
    fn request_opcodes_answer() {
        let mut broker = broker_with_entry("[1]/SYS/A", Value::U32(7));

        let payload = broker
            .dispatch_request(&wire::encode_get_handle("[1]/SYS/A"))
            .unwrap();
        let handle = wire::parse_reply_handle(&payload).unwrap();

        let payload = broker
            .dispatch_request(&wire::encode_handle_request(Opcode::GetType, handle))
            .unwrap();
        assert_eq!(wire::parse_reply_type(&payload).unwrap(), crate::value::DsvType::U32);

        let payload = broker
            .dispatch_request(&wire::encode_handle_request(Opcode::GetLen, handle))
            .unwrap();
        assert_eq!(wire::parse_reply_len(&payload).unwrap(), 4);

        let payload = broker
            .dispatch_request(&wire::encode_handle_request(Opcode::Get, handle))
            .unwrap();
        assert_eq!(Value::from_wire(crate::value::DsvType::U32, &payload).unwrap(), Value::U32(7));
    }

    #[test]
    fn request_for_unknown_name_is_not_found() {
        let mut broker = Broker::bind(test_config()).unwrap();
        let err = broker
            .dispatch_request(&wire::encode_get_handle("[1]/GHOST"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn mutating_opcodes_rejected_on_request_socket() {
        let mut broker = broker_with_entry("[1]/SYS/A", Value::U32(7));
        let handle = broker.registry.handle_of("[1]/SYS/A").unwrap();
        let err = broker
            .dispatch_request(&wire::encode_set(handle, &Value::U32(1)))
            .unwrap_err();
        assert!(matches!(err, DsvError::Invalid(_)));
    }

    #[test]
    fn read_only_opcodes_rejected_on_ingest_socket() {
        let mut broker = broker_with_entry("[1]/SYS/A", Value::U32(7));
        let err = broker
            .dispatch_ingest(&wire::encode_get_handle("[1]/SYS/A"))
            .unwrap_err();
        assert!(matches!(err, DsvError::Invalid(_)));
    }

    #[test]
    fn garbage_frame_is_invalid_not_fatal() {
        let mut broker = Broker::bind(test_config()).unwrap();
        assert!(broker.dispatch_ingest(&[1, 2, 3]).is_err());
        assert!(broker.dispatch_request(&[]).is_err());
    }
}
