use smart_default::SmartDefault;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::marker::{ObjectType, classify};
use crate::registry::{Entry, UnpackHandler, UnpackRegistry, resolve_unpack_entry};
use crate::value::Value;

const DEFAULT_STACK_CAPACITY: usize = 128;

/// Tunables for a fresh [`Unpacker`].
#[derive(Debug, Clone, SmartDefault)]
pub struct UnpackerConfig {
    #[default(DEFAULT_STACK_CAPACITY)]
    pub stack_capacity: usize,
    #[default(false)]
    pub symbolize_keys: bool,
}

/// The one-byte lookahead that lets every read point in the state machine
/// fail with EOF uniformly and be resumed without re-reading a byte that
/// was already consumed from the input buffer.
#[derive(Debug, Clone, Copy)]
enum Lookahead {
    Need,
    Have(u8),
}

#[derive(Debug, Clone, Copy)]
enum RawMode {
    Str,
    Bin,
    Ext(i8),
}

/// Extension elements need one extra byte (the typecode) read after the
/// length header and before the payload. This sub-state exists so that
/// fragmentation landing exactly between those two reads resumes at the
/// right place instead of skipping the typecode read.
#[derive(Debug, Clone, Copy)]
enum RawPhase {
    NeedTypecode,
    Collecting(RawMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameType {
    Array,
    MapKey,
    MapValue,
}

enum ContainerBuilder {
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl ContainerBuilder {
    fn into_value(self) -> Value {
        match self {
            ContainerBuilder::Array(items) => Value::Array(items),
            ContainerBuilder::Map(pairs) => Value::Map(pairs),
        }
    }
}

struct Frame {
    kind: FrameType,
    remaining: u64,
    container: ContainerBuilder,
    pending_key: Option<Value>,
}

enum PrimitiveOutcome {
    Eof,
    /// A container header was consumed and a frame pushed; the driver
    /// should loop back into `read_primitive` for the first element.
    Pushed,
    Complete(Value),
}

/// Resumable, byte-fed MessagePack decoder.
///
/// Feed it bytes with [`Unpacker::feed`] and call [`Unpacker::read`]
/// repeatedly; `Ok(None)` means the buffer ran out mid-element and is not
/// an error — feed more bytes and call `read` again.
pub struct Unpacker {
    buf: ByteBuffer,
    head: Lookahead,
    raw_remaining: usize,
    raw_phase: Option<RawPhase>,
    raw_buf: Option<Vec<u8>>,
    stack: Vec<Frame>,
    stack_capacity: usize,
    symbolize_keys: bool,
    registry: UnpackRegistry,
}

impl Default for Unpacker {
    fn default() -> Self {
        Self::with_config(UnpackerConfig::default())
    }
}

impl Unpacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UnpackerConfig) -> Self {
        Self {
            buf: ByteBuffer::new(),
            head: Lookahead::Need,
            raw_remaining: 0,
            raw_phase: None,
            raw_buf: None,
            stack: Vec::new(),
            stack_capacity: config.stack_capacity,
            symbolize_keys: config.symbolize_keys,
            registry: UnpackRegistry::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.append(bytes);
    }

    /// Completes one top-level element, or returns `Ok(None)` if the
    /// buffer runs out mid-element.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn read(&mut self) -> Result<Option<Value>> {
        loop {
            match self.read_primitive()? {
                PrimitiveOutcome::Eof => return Ok(None),
                PrimitiveOutcome::Pushed => continue,
                PrimitiveOutcome::Complete(mut value) => loop {
                    let Some(top) = self.stack.last_mut() else {
                        return Ok(Some(value));
                    };
                    match top.kind {
                        FrameType::Array => {
                            if let ContainerBuilder::Array(items) = &mut top.container {
                                items.push(value);
                            }
                        }
                        FrameType::MapKey => {
                            let key = if self.symbolize_keys {
                                symbolize(value)
                            } else {
                                value
                            };
                            top.pending_key = Some(key);
                            top.kind = FrameType::MapValue;
                        }
                        FrameType::MapValue => {
                            let key = top
                                .pending_key
                                .take()
                                .expect("a MAP_VALUE frame always has a pending key");
                            if let ContainerBuilder::Map(pairs) = &mut top.container {
                                pairs.push((key, value));
                            }
                            top.kind = FrameType::MapKey;
                        }
                    }
                    top.remaining -= 1;
                    if top.remaining == 0 {
                        let frame = self
                            .stack
                            .pop()
                            .expect("the frame just matched above is still on top");
                        value = frame.container.into_value();
                        continue;
                    }
                    break;
                },
            }
        }
    }

    /// As [`Self::read`] but discards the built value.
    pub fn skip(&mut self) -> Result<Option<()>> {
        Ok(self.read()?.map(|_| ()))
    }

    pub fn peek_next_object_type(&mut self) -> Result<Option<ObjectType>> {
        let b = match self.get_head_byte() {
            Some(b) => b,
            None => return Ok(None),
        };
        match classify(b) {
            Some(t) => Ok(Some(t)),
            None => Err(Error::InvalidByte(b)),
        }
    }

    pub fn skip_nil(&mut self) -> Result<bool> {
        match self.get_head_byte() {
            Some(0xc0) => {
                self.reset_head();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Consumes an array header only, without reading any elements. Fails
    /// with `UnexpectedType` (without consuming the head byte) if the next
    /// element is not an array.
    pub fn read_array_header(&mut self) -> Result<Option<u64>> {
        let b = match self.get_head_byte() {
            Some(b) => b,
            None => return Ok(None),
        };
        match b {
            0x90..=0x9f => {
                self.reset_head();
                Ok(Some((b & 0x0f) as u64))
            }
            0xdc => self.finish_len_header(2, "array"),
            0xdd => self.finish_len_header(4, "array"),
            _ => Err(Error::UnexpectedType {
                expected: "array",
                found: found_name(b),
            }),
        }
    }

    /// Consumes a map header only, returning the number of entries (not
    /// slots). Fails with `UnexpectedType` without consuming the head byte
    /// if the next element is not a map.
    pub fn read_map_header(&mut self) -> Result<Option<u64>> {
        let b = match self.get_head_byte() {
            Some(b) => b,
            None => return Ok(None),
        };
        match b {
            0x80..=0x8f => {
                self.reset_head();
                Ok(Some((b & 0x0f) as u64))
            }
            0xde => self.finish_len_header(2, "map"),
            0xdf => self.finish_len_header(4, "map"),
            _ => Err(Error::UnexpectedType {
                expected: "map",
                found: found_name(b),
            }),
        }
    }

    fn finish_len_header(&mut self, size_bytes: usize, _expected: &'static str) -> Result<Option<u64>> {
        match self.buf.read_exact_block(size_bytes) {
            None => Ok(None),
            Some(bytes) => {
                self.reset_head();
                Ok(Some(be_len(&bytes) as u64))
            }
        }
    }

    pub fn register_exttype(&mut self, typecode: i8, handler: UnpackHandler) -> Result<()> {
        if !(0..=127).contains(&typecode) {
            return Err(Error::RangeError(format!(
                "extension typecode {typecode} outside the 0..=127 range"
            )));
        }
        self.registry.set(typecode, Some(Entry::Bind(handler)));
        Ok(())
    }

    pub fn refuse_exttype(&mut self, typecode: i8) {
        self.registry.set(typecode, Some(Entry::Refuse));
    }

    pub fn set_default(&mut self, entry: Option<Entry<UnpackHandler>>) {
        self.registry.set_default(entry);
    }

    fn get_head_byte(&mut self) -> Option<u8> {
        match self.head {
            Lookahead::Have(b) => Some(b),
            Lookahead::Need => {
                let b = self.buf.read_1()?;
                self.head = Lookahead::Have(b);
                Some(b)
            }
        }
    }

    fn reset_head(&mut self) {
        self.head = Lookahead::Need;
    }

    fn read_primitive(&mut self) -> Result<PrimitiveOutcome> {
        if self.raw_phase.is_some() {
            return self.resume_raw();
        }
        let b = match self.get_head_byte() {
            Some(b) => b,
            None => return Ok(PrimitiveOutcome::Eof),
        };
        match b {
            0x00..=0x7f => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(Value::Int(b as i64)))
            }
            0xe0..=0xff => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(Value::Int((b as i8) as i64)))
            }
            0x80..=0x8f => {
                let n = (b & 0x0f) as usize;
                self.reset_head();
                self.start_map(n)
            }
            0x90..=0x9f => {
                let n = (b & 0x0f) as usize;
                self.reset_head();
                self.start_array(n)
            }
            0xa0..=0xbf => {
                let n = (b & 0x1f) as usize;
                self.reset_head();
                self.begin_raw(n, RawMode::Str)
            }
            0xc0 => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(Value::Nil))
            }
            0xc2 => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(Value::Bool(false)))
            }
            0xc3 => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(Value::Bool(true)))
            }
            0xc4 => self.read_len_then_raw(1, RawMode::Bin),
            0xc5 => self.read_len_then_raw(2, RawMode::Bin),
            0xc6 => self.read_len_then_raw(4, RawMode::Bin),
            0xc7 => self.read_len_then_ext(1),
            0xc8 => self.read_len_then_ext(2),
            0xc9 => self.read_len_then_ext(4),
            0xca => self.read_scalar(4, |b| {
                Value::F32(f32::from_be_bytes(b.try_into().expect("4 bytes")))
            }),
            0xcb => self.read_scalar(8, |b| {
                Value::F64(f64::from_be_bytes(b.try_into().expect("8 bytes")))
            }),
            0xcc => self.read_scalar(1, |b| Value::UInt(b[0] as u64)),
            0xcd => self.read_scalar(2, |b| {
                Value::UInt(u16::from_be_bytes(b.try_into().expect("2 bytes")) as u64)
            }),
            0xce => self.read_scalar(4, |b| {
                Value::UInt(u32::from_be_bytes(b.try_into().expect("4 bytes")) as u64)
            }),
            0xcf => self.read_scalar(8, |b| {
                Value::UInt(u64::from_be_bytes(b.try_into().expect("8 bytes")))
            }),
            0xd0 => self.read_scalar(1, |b| Value::Int(b[0] as i8 as i64)),
            0xd1 => self.read_scalar(2, |b| {
                Value::Int(i16::from_be_bytes(b.try_into().expect("2 bytes")) as i64)
            }),
            0xd2 => self.read_scalar(4, |b| {
                Value::Int(i32::from_be_bytes(b.try_into().expect("4 bytes")) as i64)
            }),
            0xd3 => self.read_scalar(8, |b| {
                Value::Int(i64::from_be_bytes(b.try_into().expect("8 bytes")))
            }),
            0xd4..=0xd8 => {
                let len = 1usize << (b - 0xd4);
                self.begin_ext(len)
            }
            0xd9 => self.read_len_then_raw(1, RawMode::Str),
            0xda => self.read_len_then_raw(2, RawMode::Str),
            0xdb => self.read_len_then_raw(4, RawMode::Str),
            0xdc => self.read_len_then_array(2),
            0xdd => self.read_len_then_array(4),
            0xde => self.read_len_then_map(2),
            0xdf => self.read_len_then_map(4),
            _ => Err(Error::InvalidByte(b)),
        }
    }

    fn read_scalar(
        &mut self,
        n: usize,
        build: impl FnOnce(&[u8]) -> Value,
    ) -> Result<PrimitiveOutcome> {
        match self.buf.read_exact_block(n) {
            None => Ok(PrimitiveOutcome::Eof),
            Some(bytes) => {
                self.reset_head();
                Ok(PrimitiveOutcome::Complete(build(&bytes)))
            }
        }
    }

    fn read_len_then_raw(&mut self, size_bytes: usize, mode: RawMode) -> Result<PrimitiveOutcome> {
        match self.buf.read_exact_block(size_bytes) {
            None => Ok(PrimitiveOutcome::Eof),
            Some(bytes) => {
                self.reset_head();
                self.begin_raw(be_len(&bytes), mode)
            }
        }
    }

    fn read_len_then_ext(&mut self, size_bytes: usize) -> Result<PrimitiveOutcome> {
        match self.buf.read_exact_block(size_bytes) {
            None => Ok(PrimitiveOutcome::Eof),
            Some(bytes) => {
                self.reset_head();
                self.begin_ext(be_len(&bytes))
            }
        }
    }

    fn read_len_then_array(&mut self, size_bytes: usize) -> Result<PrimitiveOutcome> {
        match self.buf.read_exact_block(size_bytes) {
            None => Ok(PrimitiveOutcome::Eof),
            Some(bytes) => {
                self.reset_head();
                self.start_array(be_len(&bytes))
            }
        }
    }

    fn read_len_then_map(&mut self, size_bytes: usize) -> Result<PrimitiveOutcome> {
        match self.buf.read_exact_block(size_bytes) {
            None => Ok(PrimitiveOutcome::Eof),
            Some(bytes) => {
                self.reset_head();
                self.start_map(be_len(&bytes))
            }
        }
    }

    fn start_array(&mut self, n: usize) -> Result<PrimitiveOutcome> {
        if n == 0 {
            return Ok(PrimitiveOutcome::Complete(Value::Array(Vec::new())));
        }
        self.push_frame(
            FrameType::Array,
            n as u64,
            ContainerBuilder::Array(Vec::with_capacity(n.min(4096))),
        )
    }

    fn start_map(&mut self, n: usize) -> Result<PrimitiveOutcome> {
        if n == 0 {
            return Ok(PrimitiveOutcome::Complete(Value::Map(Vec::new())));
        }
        self.push_frame(
            FrameType::MapKey,
            (n as u64) * 2,
            ContainerBuilder::Map(Vec::with_capacity(n.min(4096))),
        )
    }

    fn push_frame(
        &mut self,
        kind: FrameType,
        remaining: u64,
        container: ContainerBuilder,
    ) -> Result<PrimitiveOutcome> {
        if self.stack.len() >= self.stack_capacity {
            return Err(Error::StackTooDeep {
                capacity: self.stack_capacity,
            });
        }
        self.stack.push(Frame {
            kind,
            remaining,
            container,
            pending_key: None,
        });
        Ok(PrimitiveOutcome::Pushed)
    }

    fn begin_raw(&mut self, len: usize, mode: RawMode) -> Result<PrimitiveOutcome> {
        self.raw_remaining = len;
        self.raw_buf = None;
        self.raw_phase = Some(RawPhase::Collecting(mode));
        self.resume_raw()
    }

    fn begin_ext(&mut self, len: usize) -> Result<PrimitiveOutcome> {
        self.raw_remaining = len;
        self.raw_buf = None;
        self.raw_phase = Some(RawPhase::NeedTypecode);
        self.resume_raw()
    }

    fn resume_raw(&mut self) -> Result<PrimitiveOutcome> {
        loop {
            match self.raw_phase {
                Some(RawPhase::NeedTypecode) => match self.buf.read_1() {
                    Some(b) => {
                        self.raw_phase = Some(RawPhase::Collecting(RawMode::Ext(b as i8)));
                    }
                    None => return Ok(PrimitiveOutcome::Eof),
                },
                Some(RawPhase::Collecting(mode)) => {
                    let remaining = self.raw_remaining;
                    if self.buf.top_readable_size() >= remaining {
                        let tail = self.buf.read_top_as_bytes(remaining);
                        let full = match self.raw_buf.take() {
                            Some(mut partial) => {
                                partial.extend_from_slice(&tail);
                                partial
                            }
                            None => tail.to_vec(),
                        };
                        self.raw_remaining = 0;
                        self.raw_phase = None;
                        return Ok(PrimitiveOutcome::Complete(self.finish_raw(mode, full)?));
                    }
                    let avail = self.buf.top_readable_size();
                    let mut partial = self.raw_buf.take().unwrap_or_default();
                    let mut tail = Vec::new();
                    let copied = self.buf.read_to_vec(&mut tail, avail);
                    partial.extend_from_slice(&tail[..copied]);
                    self.raw_remaining -= copied;
                    self.raw_buf = Some(partial);
                    return Ok(PrimitiveOutcome::Eof);
                }
                None => {
                    return Err(Error::from_debug("resume_raw called with no raw phase active"));
                }
            }
        }
    }

    fn finish_raw(&mut self, mode: RawMode, bytes: Vec<u8>) -> Result<Value> {
        match mode {
            RawMode::Str => {
                // str payloads are carried as plain bytes on the wire, same
                // as msgpack-ruby tags a raw buffer's encoding without
                // validating it; invalid UTF-8 is replaced rather than
                // rejected so a wire-valid str element never fails to
                // decode.
                let s = match simdutf8::basic::from_utf8(&bytes) {
                    Ok(valid) => valid.to_string(),
                    Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
                };
                Ok(Value::Str(s))
            }
            RawMode::Bin => Ok(Value::Bin(bytes)),
            RawMode::Ext(typecode) => match resolve_unpack_entry(&self.registry, typecode) {
                Some(Entry::Bind(handler)) => handler(typecode, &bytes),
                Some(Entry::Refuse) | None => Err(Error::UnknownExtType(typecode)),
            },
        }
    }
}

/// Bridges an [`Unpacker`] into a `tokio_util` framed transport: each call
/// drains whatever the transport has buffered into the unpacker's own
/// buffer and attempts one element, matching the `Ok(None)`-means-"need
/// more bytes" contract the two share.
impl tokio_util::codec::Decoder for Unpacker {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Value>> {
        let chunk = src.split_to(src.len());
        self.feed(&chunk);
        self.read()
    }
}

fn symbolize(v: Value) -> Value {
    match v {
        Value::Str(s) => Value::Symbol(s),
        other => other,
    }
}

fn be_len(bytes: &[u8]) -> usize {
    match bytes.len() {
        1 => bytes[0] as usize,
        2 => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
        4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize,
        other => unreachable!("length prefix width is always 1, 2 or 4 bytes, got {other}"),
    }
}

fn found_name(head: u8) -> &'static str {
    match classify(head) {
        Some(ObjectType::Nil) => "nil",
        Some(ObjectType::Boolean) => "boolean",
        Some(ObjectType::Integer) => "integer",
        Some(ObjectType::Float) => "float",
        Some(ObjectType::Raw) => "string or binary",
        Some(ObjectType::Array) => "array",
        Some(ObjectType::Map) => "map",
        Some(ObjectType::Ext) => "extension",
        None => "invalid byte",
    }
}
