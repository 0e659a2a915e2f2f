//! The dsv client library: connection setup, typed accessors, and
//! subscriptions.
//!
//! A client owns three sockets: REQ for queries, PUB into the broker's
//! ingest endpoint for mutations, SUB from the fan-out endpoint for
//! notifications. Calls are synchronous; setters return once the frame is
//! handed to the transport, getters when the reply arrives. The wire layout
//! never leaks through this API.
//!
//! The sockets are not safe to share across threads without external mutual
//! exclusion; a `DsvClient` is intentionally not `Sync`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::batch;
use crate::config::DsvConfig;
use crate::discovery::{self, PROBE_TIMEOUT};
use crate::error::{code, DsvError, Result};
use crate::name;
use crate::registry::Flags;
use crate::value::{DsvType, Value};
use crate::wire::{self, Handle, Opcode};

/// Wait after connecting the publish socket so the broker's ingest filter
/// table includes this peer before an immediate send. Without it the first
/// publication can be silently dropped by the pub/sub transport.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Descriptor for a new dsv; the path is joined with the instance id into
/// the canonical full name at create time.
#[derive(Debug, Clone)]
pub struct NewDsv {
    pub path: String,
    pub description: String,
    pub tags: String,
    pub flags: Flags,
    pub value: Value,
}

impl NewDsv {
    pub fn new(path: impl Into<String>, value: Value) -> NewDsv {
        NewDsv {
            path: path.into(),
            description: String::new(),
            tags: String::new(),
            flags: Flags::default(),
            value,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> NewDsv {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> NewDsv {
        self.tags = tags.into();
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> NewDsv {
        self.flags = flags;
        self
    }
}

/// One delivered forward frame: the full name and the raw value bytes.
#[derive(Debug, Clone)]
pub struct Notification {
    pub name: String,
    pub payload: Vec<u8>,
}

impl Notification {
    /// Decode the payload once the entry's type is known (e.g. from
    /// [`DsvClient::type_of`]).
    pub fn decode(&self, ty: DsvType) -> Result<Value> {
        Value::from_wire(ty, &self.payload)
    }
}

/// One result of a fuzzy name iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatch {
    /// Cursor to pass back as `last_index` to continue the iteration.
    pub index: i32,
    pub name: String,
    /// The entry's value in string form.
    pub value: String,
}

/// A connection to the dsv server.
pub struct DsvClient {
    _ctx: zmq::Context,
    request: zmq::Socket,
    publish: zmq::Socket,
    subscribe: zmq::Socket,
    handles: RefCell<HashMap<String, Handle>>,
    config: DsvConfig,
}

impl DsvClient {
    /// Probe the LAN for a broker beacon and connect to the first one that
    /// answers. Fails with `not found` when the network stays quiet.
    pub fn open(config: DsvConfig) -> Result<DsvClient> {
        let ip = discovery::probe(config.beacon_port, PROBE_TIMEOUT)?
            .ok_or_else(|| DsvError::NotFound("no dsv server found on the network".into()))?;
        Self::open_at(&ip.to_string(), config)
    }

    /// Connect to a broker at a known host, bypassing discovery.
    pub fn open_at(host: &str, config: DsvConfig) -> Result<DsvClient> {
        let ctx = zmq::Context::new();

        let request = ctx.socket(zmq::REQ)?;
        request.connect(&DsvConfig::connect_endpoint(host, config.request_port))?;

        let publish = ctx.socket(zmq::PUB)?;
        publish.connect(&DsvConfig::connect_endpoint(host, config.ingest_port))?;

        let subscribe = ctx.socket(zmq::SUB)?;
        subscribe.connect(&DsvConfig::connect_endpoint(host, config.fanout_port))?;

        std::thread::sleep(SETTLE_DELAY);
        debug!(host, "connected to dsv server");

        Ok(DsvClient {
            _ctx: ctx,
            request,
            publish,
            subscribe,
            handles: RefCell::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &DsvConfig {
        &self.config
    }

    /// Bound how long [`notification`](Self::notification) blocks; a quiet
    /// subscription then returns a transport error instead of hanging.
    pub fn set_notification_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let ms = timeout.map_or(-1, |t| t.as_millis() as i32);
        self.subscribe.set_rcvtimeo(ms)?;
        Ok(())
    }

    fn roundtrip(&self, frame: &[u8], context: &str) -> Result<Vec<u8>> {
        self.request.send(frame, 0)?;
        let reply = self.request.recv_bytes(0)?;
        let (result, payload) = wire::parse_reply(&reply)?;
        if result != code::OK {
            return Err(DsvError::from_code(result, context));
        }
        Ok(payload.to_vec())
    }

    fn publish_frame(&self, frame: &[u8]) -> Result<()> {
        self.publish.send(frame, 0)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Request creation of one dsv. Returns the canonical full name the
    /// entry was created under. Like every ingest operation this is
    /// fire-and-forget: a conflict is only observable broker-side.
    pub fn create(&self, instance_id: u32, dsv: &NewDsv) -> Result<String> {
        let full_name = name::full_name(instance_id, &dsv.path);
        let frame = wire::encode_create(
            instance_id,
            dsv.flags.bits(),
            &full_name,
            &dsv.description,
            &dsv.tags,
            &dsv.value,
        );
        self.publish_frame(&frame)?;
        Ok(full_name)
    }

    /// Create a batch of dsvs from a JSON file of entry descriptors.
    pub fn create_with_json(&self, instance_id: u32, file: &Path) -> Result<usize> {
        batch::create_from_file(self, instance_id, file)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Look up the opaque handle for a full name. Handles are cached
    /// per name; they stay valid for the broker's lifetime.
    pub fn handle(&self, full_name: &str) -> Result<Handle> {
        let canonical = name::canonicalize(full_name);
        if let Some(handle) = self.handles.borrow().get(&canonical) {
            return Ok(*handle);
        }
        let payload = self.roundtrip(&wire::encode_get_handle(&canonical), &canonical)?;
        let handle = wire::parse_reply_handle(&payload)?;
        self.handles.borrow_mut().insert(canonical, handle);
        Ok(handle)
    }

    pub fn type_of(&self, handle: Handle) -> Result<DsvType> {
        let payload =
            self.roundtrip(&wire::encode_handle_request(Opcode::GetType, handle), "get-type")?;
        wire::parse_reply_type(&payload)
    }

    pub fn len_of(&self, handle: Handle) -> Result<u64> {
        let payload =
            self.roundtrip(&wire::encode_handle_request(Opcode::GetLen, handle), "get-len")?;
        wire::parse_reply_len(&payload)
    }

    /// Read the current value, decoding by the entry's reported type.
    pub fn value_of(&self, handle: Handle) -> Result<Value> {
        let ty = self.type_of(handle)?;
        let payload = self.roundtrip(&wire::encode_handle_request(Opcode::Get, handle), "get")?;
        Value::from_wire(ty, &payload)
    }

    /// Typed scalar read; the caller names the expected type.
    pub fn get<T: Scalar>(&self, handle: Handle) -> Result<T> {
        let payload = self.roundtrip(&wire::encode_handle_request(Opcode::Get, handle), "get")?;
        let value = Value::from_wire(T::TYPE, &payload)?;
        T::try_from_value(&value)
            .ok_or_else(|| DsvError::Internal("scalar decode produced wrong variant".into()))
    }

    pub fn get_string(&self, handle: Handle) -> Result<String> {
        match self.value_of(handle)? {
            Value::Str(s) => Ok(s),
            other => Err(DsvError::Invalid(format!("entry is {}, not string", other.dsv_type()))),
        }
    }

    pub fn get_array(&self, handle: Handle) -> Result<Vec<i32>> {
        match self.value_of(handle)? {
            Value::IntArray(items) => Ok(items),
            other => Err(DsvError::Invalid(format!("entry is {}, not int_array", other.dsv_type()))),
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Typed scalar write.
    pub fn set<T: Scalar>(&self, handle: Handle, value: T) -> Result<()> {
        self.publish_frame(&wire::encode_set(handle, &value.into_value()))
    }

    pub fn set_string(&self, handle: Handle, value: &str) -> Result<()> {
        self.publish_frame(&wire::encode_set(handle, &Value::Str(value.to_string())))
    }

    pub fn set_array(&self, handle: Handle, items: &[i32]) -> Result<()> {
        self.publish_frame(&wire::encode_set(handle, &Value::IntArray(items.to_vec())))
    }

    /// Set from a string form, whatever the entry's type: queries
    /// `get-type` first, then serializes accordingly.
    pub fn set_thru_str(&self, handle: Handle, value: &str) -> Result<()> {
        let ty = self.type_of(handle)?;
        let value = Value::parse(ty, value)?;
        self.publish_frame(&wire::encode_set(handle, &value))
    }

    /// Read in string form, whatever the entry's type.
    pub fn get_thru_str(&self, handle: Handle) -> Result<String> {
        Ok(self.value_of(handle)?.to_string())
    }

    /// Helper routing `get-handle` then `set_thru_str`. Not for the hot
    /// path; the handle round trip is cached but the type query is not.
    pub fn set_by_name(&self, full_name: &str, value: &str) -> Result<()> {
        let handle = self.handle(full_name)?;
        self.set_thru_str(handle, value)
    }

    /// Helper routing `get-handle` then `get_thru_str`.
    pub fn get_by_name(&self, full_name: &str) -> Result<String> {
        let handle = self.handle(full_name)?;
        self.get_thru_str(handle)
    }

    // ------------------------------------------------------------------
    // Array items
    // ------------------------------------------------------------------

    pub fn add_item(&self, handle: Handle, value: i32) -> Result<()> {
        self.publish_frame(&wire::encode_add_item(handle, value))
    }

    pub fn ins_item(&self, handle: Handle, index: i32, value: i32) -> Result<()> {
        self.publish_frame(&wire::encode_indexed_item(Opcode::InsItem, handle, index, value))
    }

    pub fn set_item(&self, handle: Handle, index: i32, value: i32) -> Result<()> {
        self.publish_frame(&wire::encode_indexed_item(Opcode::SetItem, handle, index, value))
    }

    pub fn del_item(&self, handle: Handle, index: i32) -> Result<()> {
        self.publish_frame(&wire::encode_item_index(Opcode::DelItem, handle, index))
    }

    pub fn get_item(&self, handle: Handle, index: i32) -> Result<i32> {
        let payload = self.roundtrip(
            &wire::encode_item_index(Opcode::GetItem, handle, index),
            "get-item",
        )?;
        wire::parse_reply_item(&payload)
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Subscribe to change notifications for a full name. The topic is the
    /// name plus its trailing NUL, so `[1]/A` never matches `[1]/AB`. The
    /// broker replays the current value immediately when the entry exists.
    pub fn subscribe(&self, full_name: &str) -> Result<()> {
        let canonical = name::canonicalize(full_name);
        self.subscribe.set_subscribe(&wire::subscription_topic(&canonical))?;
        Ok(())
    }

    pub fn unsubscribe(&self, full_name: &str) -> Result<()> {
        let canonical = name::canonicalize(full_name);
        self.subscribe.set_unsubscribe(&wire::subscription_topic(&canonical))?;
        Ok(())
    }

    /// Block until the next forward frame for any subscribed name arrives
    /// and split it into name and value bytes.
    pub fn notification(&self) -> Result<Notification> {
        let frame = self.subscribe.recv_bytes(0)?;
        let (name, payload) = wire::parse_forward(&frame)?;
        Ok(Notification {
            name: name.to_string(),
            payload: payload.to_vec(),
        })
    }

    // ------------------------------------------------------------------
    // Iteration & maintenance
    // ------------------------------------------------------------------

    /// Fetch the next entry whose full name contains `search`, starting
    /// past `last_index` (use `-1` to begin). `Ok(None)` marks the end of
    /// the iteration.
    pub fn get_by_name_fuzzy(&self, search: &str, last_index: i32) -> Result<Option<FuzzyMatch>> {
        match self.roundtrip(&wire::encode_get_next(last_index, search), search) {
            Ok(payload) => {
                let (index, name, value) = wire::parse_reply_get_next(&payload)?;
                Ok(Some(FuzzyMatch { index, name, value }))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Ask the broker to persist dirty SAVE-flagged entries.
    pub fn save(&self) -> Result<()> {
        self.publish_frame(&wire::encode_bare(Opcode::Save))
    }

    /// Ask the broker to re-apply the save file to existing entries.
    pub fn restore(&self) -> Result<()> {
        self.publish_frame(&wire::encode_bare(Opcode::Restore))
    }

    /// Toggle the TRACK flag on an entry.
    pub fn track(&self, handle: Handle, enable: bool) -> Result<()> {
        self.publish_frame(&wire::encode_track(handle, enable))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Scalar types a dsv can hold, mapping Rust primitives to their dsv type
/// tags. Sealed: exactly the eight integer widths and two floats.
pub trait Scalar: sealed::Sealed + Copy {
    const TYPE: DsvType;
    fn into_value(self) -> Value;
    fn try_from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Scalar for $ty {
                const TYPE: DsvType = DsvType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn try_from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_scalar! {
    u8 => U8,
    i8 => S8,
    u16 => U16,
    i16 => S16,
    u32 => U32,
    i32 => S32,
    u64 => U64,
    i64 => S64,
    f32 => F32,
    f64 => F64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_type_mapping() {
        assert_eq!(u8::TYPE, DsvType::U8);
        assert_eq!(i16::TYPE, DsvType::S16);
        assert_eq!(u32::TYPE, DsvType::U32);
        assert_eq!(f64::TYPE, DsvType::F64);
    }

    #[test]
    fn scalar_value_round_trip() {
        assert_eq!(42u32.into_value(), Value::U32(42));
        assert_eq!(u32::try_from_value(&Value::U32(42)), Some(42));
        assert_eq!(u32::try_from_value(&Value::S32(42)), None);
        assert_eq!((-1.5f64).into_value(), Value::F64(-1.5));
    }

    #[test]
    fn new_dsv_builder() {
        let dsv = NewDsv::new("/SYS/TEST", Value::U32(1))
            .with_description("a test")
            .with_tags("sys,test")
            .with_flags(Flags::SAVE);
        assert_eq!(dsv.path, "/SYS/TEST");
        assert_eq!(dsv.description, "a test");
        assert_eq!(dsv.tags, "sys,test");
        assert!(dsv.flags.contains(Flags::SAVE));
    }

    #[test]
    fn notification_decode() {
        let n = Notification {
            name: "[1]/SYS/A".into(),
            payload: Value::IntArray(vec![0]).to_wire(),
        };
        assert_eq!(n.decode(DsvType::IntArray).unwrap(), Value::IntArray(vec![0]));
        assert!(n.decode(DsvType::Str).is_err());
    }
}
