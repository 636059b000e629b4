// ABOUTME: Framing codec for the broker control protocol
// ABOUTME: 2-byte command tags, versioned JSON bodies, newline terminator, chunked data frames

//! Control protocol framing.
//!
//! ```text
//! request:  ┌──────────┬────────────────────────────┬────┐
//!           │ tag (2B) │ JSON body {"v":1, ...}     │ \n │
//!           └──────────┴────────────────────────────┴────┘
//! reply:    ┌─────────────────────────────────────────┬────┐
//!           │ JSON body {"v":1, "status": ..., ...}   │ \n │
//!           └─────────────────────────────────────────┴────┘
//! ```
//!
//! Compact JSON never contains a raw newline, so the terminator cannot occur
//! inside a body. Byte payloads travel as base64 strings. A `fetch-data`
//! payload larger than the chunk size is split into several `data` frames
//! carrying `seq` and `more`; [`Reassembler`] puts them back together and
//! refuses gaps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::registry::HandleId;

/// Byte closing every frame
pub const TERMINATOR: u8 = b'\n';

/// Schema version written into, and required from, every body
pub const PROTOCOL_VERSION: u16 = 1;

/// Passthrough keyword map attached to a handle
pub type Options = serde_json::Map<String, Value>;

// === Codec Errors ===

/// Errors raised while encoding, decoding or reassembling frames
#[derive(Debug, Error)]
pub enum CodecError {
    /// Request shorter than the 2-byte command tag
    #[error("Frame too short: {0} bytes")]
    Truncated(usize),

    /// Tag outside the fixed command set
    #[error("Unknown command tag: {0:?}")]
    UnknownCommand(String),

    /// Body carries a schema version this build does not speak
    #[error("Unsupported protocol version {found}")]
    Version { found: u64 },

    /// Body is valid JSON but not an object
    #[error("Body is not a JSON object")]
    NotAnObject,

    /// Body failed to (de)serialize
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// Data frame for another handle arrived while reassembling
    #[error("Chunk for {found} does not belong to {expected}")]
    ForeignChunk { expected: HandleId, found: HandleId },

    /// Data frames arrived out of order or one is missing
    #[error("Chunk sequence gap: expected {expected}, got {found}")]
    SequenceGap { expected: u32, found: u32 },

    /// Another data frame arrived after the final one
    #[error("Chunk received after final frame")]
    AfterFinal,
}

// === Commands ===

/// The closed set of control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Create,
    Read,
    Write,
    SetOptions,
    FetchData,
    Close,
    List,
    Log,
    Kill,
}

impl Command {
    /// Every command, in wire-table order
    pub const ALL: [Self; 9] = [
        Self::Create,
        Self::Read,
        Self::Write,
        Self::SetOptions,
        Self::FetchData,
        Self::Close,
        Self::List,
        Self::Log,
        Self::Kill,
    ];

    /// Two ASCII bytes identifying the command on the wire
    pub const fn tag(self) -> &'static [u8; 2] {
        match self {
            Self::Create => b"in",
            Self::Read => b"rd",
            Self::Write => b"wt",
            Self::SetOptions => b"op",
            Self::FetchData => b"da",
            Self::Close => b"cl",
            Self::List => b"ls",
            Self::Log => b"lo",
            Self::Kill => b"ki",
        }
    }

    /// Look up a command by its wire tag
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Write => "write",
            Self::SetOptions => "set-options",
            Self::FetchData => "fetch-data",
            Self::Close => "close",
            Self::List => "list",
            Self::Log => "log",
            Self::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// Transport of a brokered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
        };
        f.write_str(name)
    }
}

// === Request Bodies ===

/// Body of a `create` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub protocol: Protocol,
    /// Host name or address; the full URL for HTTP
    pub host: String,
    /// Ignored for HTTP
    #[serde(default)]
    pub port: u16,
    /// Open two independent handles to the same target
    #[serde(default)]
    pub dual_link: bool,
    /// UDP only: datagram sent right after opening
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub message: Option<Vec<u8>>,
}

impl CreateRequest {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            dual_link: false,
            message: None,
        }
    }
}

/// A decoded control request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Create(CreateRequest),
    SetOptions { id: HandleId, options: Options },
    Read { id: HandleId },
    Write { id: HandleId, data: Vec<u8> },
    FetchData { id: HandleId },
    Close { id: HandleId },
    List,
    Log,
    Kill,
}

impl Request {
    pub const fn command(&self) -> Command {
        match self {
            Self::Create(_) => Command::Create,
            Self::SetOptions { .. } => Command::SetOptions,
            Self::Read { .. } => Command::Read,
            Self::Write { .. } => Command::Write,
            Self::FetchData { .. } => Command::FetchData,
            Self::Close { .. } => Command::Close,
            Self::List => Command::List,
            Self::Log => Command::Log,
            Self::Kill => Command::Kill,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IdBody {
    id: HandleId,
}

#[derive(Serialize, Deserialize)]
struct OptionsBody {
    id: HandleId,
    #[serde(default)]
    options: Options,
}

#[derive(Serialize, Deserialize)]
struct WriteBody {
    id: HandleId,
    #[serde(with = "b64")]
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EmptyBody {}

// === Replies ===

/// Classification carried by a `failed` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Connect,
    ReadTimeout,
    HttpStatus,
    RetryExhausted,
    Codec,
    Unsupported,
    Internal,
}

/// One `fetch-data` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFrame {
    pub id: HandleId,
    #[serde(with = "b64_opt")]
    pub data: Option<Vec<u8>>,
    /// Position of this frame, starting at 0
    #[serde(default)]
    pub seq: u32,
    /// More frames follow this one
    #[serde(default)]
    pub more: bool,
}

/// Live handles grouped by protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub tcp: Vec<HandleId>,
    pub udp: Vec<HandleId>,
    pub http: Vec<HandleId>,
}

impl Listing {
    pub fn len(&self) -> usize {
        self.tcp.len() + self.udp.len() + self.http.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &HandleId) -> bool {
        self.tcp.contains(id) || self.udp.contains(id) || self.http.contains(id)
    }
}

/// A reply frame body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Created {
        id: HandleId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id2: Option<HandleId>,
    },
    Options {
        id: HandleId,
        options: Options,
    },
    Accepted {
        id: HandleId,
    },
    Data(DataFrame),
    Listing(Listing),
    Log {
        msg: Option<String>,
    },
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<HandleId>,
        kind: FailureKind,
        reason: String,
    },
}

impl Reply {
    pub fn failed(id: Option<HandleId>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            id,
            kind,
            reason: reason.into(),
        }
    }
}

// === Encoding ===

fn versioned<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    let mut value = serde_json::to_value(body)?;
    let Value::Object(map) = &mut value else {
        return Err(CodecError::NotAnObject);
    };
    map.insert("v".to_string(), Value::from(PROTOCOL_VERSION));
    Ok(serde_json::to_vec(&value)?)
}

fn unversioned(bytes: &[u8]) -> Result<Value, CodecError> {
    let bytes = bytes.strip_suffix(&[TERMINATOR]).unwrap_or(bytes);
    let mut value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(map) = &mut value else {
        return Err(CodecError::NotAnObject);
    };
    let found = map.remove("v").and_then(|v| v.as_u64()).unwrap_or(0);
    if found != u64::from(PROTOCOL_VERSION) {
        return Err(CodecError::Version { found });
    }
    Ok(value)
}

/// Encode a request as `tag + body + terminator`
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    let body = match request {
        Request::Create(create) => versioned(create)?,
        Request::SetOptions { id, options } => versioned(&OptionsBody {
            id: id.clone(),
            options: options.clone(),
        })?,
        Request::Write { id, data } => versioned(&WriteBody {
            id: id.clone(),
            data: data.clone(),
        })?,
        Request::Read { id } | Request::FetchData { id } | Request::Close { id } => {
            versioned(&IdBody { id: id.clone() })?
        }
        Request::List | Request::Log | Request::Kill => versioned(&EmptyBody {})?,
    };

    let mut frame = Vec::with_capacity(body.len() + 3);
    frame.extend_from_slice(request.command().tag());
    frame.extend_from_slice(&body);
    frame.push(TERMINATOR);
    Ok(frame)
}

/// Decode a request frame; the trailing terminator is optional
pub fn decode_request(frame: &[u8]) -> Result<Request, CodecError> {
    if frame.len() < 2 {
        return Err(CodecError::Truncated(frame.len()));
    }
    let (tag, body) = frame.split_at(2);
    let command = Command::from_tag(tag)
        .ok_or_else(|| CodecError::UnknownCommand(String::from_utf8_lossy(tag).into_owned()))?;
    let value = unversioned(body)?;

    let request = match command {
        Command::Create => Request::Create(serde_json::from_value(value)?),
        Command::SetOptions => {
            let body: OptionsBody = serde_json::from_value(value)?;
            Request::SetOptions {
                id: body.id,
                options: body.options,
            }
        }
        Command::Write => {
            let body: WriteBody = serde_json::from_value(value)?;
            Request::Write {
                id: body.id,
                data: body.data,
            }
        }
        Command::Read => Request::Read {
            id: serde_json::from_value::<IdBody>(value)?.id,
        },
        Command::FetchData => Request::FetchData {
            id: serde_json::from_value::<IdBody>(value)?.id,
        },
        Command::Close => Request::Close {
            id: serde_json::from_value::<IdBody>(value)?.id,
        },
        Command::List => Request::List,
        Command::Log => Request::Log,
        Command::Kill => Request::Kill,
    };
    Ok(request)
}

/// Encode a reply as `body + terminator`
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, CodecError> {
    let mut frame = versioned(reply)?;
    frame.push(TERMINATOR);
    Ok(frame)
}

/// Decode one reply frame; the trailing terminator is optional
pub fn decode_reply(frame: &[u8]) -> Result<Reply, CodecError> {
    Ok(serde_json::from_value(unversioned(frame)?)?)
}

// === Chunking ===

/// Split a payload into `data` frames of at most `chunk_size` bytes.
///
/// A missing or small payload yields exactly one frame with `more = false`.
pub fn chunk_data(id: &HandleId, data: Option<&[u8]>, chunk_size: usize) -> Vec<DataFrame> {
    let chunk_size = chunk_size.max(1);
    match data {
        Some(bytes) if bytes.len() > chunk_size => {
            let count = bytes.len().div_ceil(chunk_size);
            bytes
                .chunks(chunk_size)
                .enumerate()
                .map(|(i, chunk)| DataFrame {
                    id: id.clone(),
                    data: Some(chunk.to_vec()),
                    seq: u32::try_from(i).unwrap_or(u32::MAX),
                    more: i + 1 < count,
                })
                .collect()
        }
        _ => vec![DataFrame {
            id: id.clone(),
            data: data.map(<[u8]>::to_vec),
            seq: 0,
            more: false,
        }],
    }
}

/// Client-side reassembly of chunked `data` frames
#[derive(Debug)]
pub struct Reassembler {
    id: HandleId,
    next_seq: u32,
    buffer: Option<Vec<u8>>,
    done: bool,
}

impl Reassembler {
    pub const fn new(id: HandleId) -> Self {
        Self {
            id,
            next_seq: 0,
            buffer: None,
            done: false,
        }
    }

    /// Add the next frame; returns `true` once the final frame is in
    pub fn push(&mut self, frame: DataFrame) -> Result<bool, CodecError> {
        if self.done {
            return Err(CodecError::AfterFinal);
        }
        if frame.id != self.id {
            return Err(CodecError::ForeignChunk {
                expected: self.id.clone(),
                found: frame.id,
            });
        }
        if frame.seq != self.next_seq {
            return Err(CodecError::SequenceGap {
                expected: self.next_seq,
                found: frame.seq,
            });
        }

        if let Some(chunk) = frame.data {
            self.buffer.get_or_insert_with(Vec::new).extend_from_slice(&chunk);
        }
        self.next_seq += 1;
        self.done = !frame.more;
        Ok(self.done)
    }

    pub const fn is_complete(&self) -> bool {
        self.done
    }

    /// The assembled payload; `None` when the handle had no data
    pub fn finish(self) -> Option<Vec<u8>> {
        self.buffer
    }
}

// === Serde helpers ===

/// Serde helper for bytes as a base64 string
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for optional bytes as a base64 string or null
mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> HandleId {
        HandleId::from(s)
    }

    #[test]
    fn test_command_tags_are_unique_and_ascii() {
        for (i, a) in Command::ALL.iter().enumerate() {
            assert!(a.tag().is_ascii());
            assert_eq!(Command::from_tag(a.tag()), Some(*a));
            for b in &Command::ALL[i + 1..] {
                assert_ne!(a.tag(), b.tag(), "{a} and {b} share a tag");
            }
        }
        assert_eq!(Command::from_tag(b"zz"), None);
    }

    #[test]
    fn test_request_frame_layout() {
        let frame = encode_request(&Request::Read { id: id("1-a") }).unwrap();
        assert_eq!(&frame[..2], b"rd");
        assert_eq!(frame.last(), Some(&TERMINATOR));

        let body: Value = serde_json::from_slice(&frame[2..frame.len() - 1]).unwrap();
        assert_eq!(body["v"], 1);
        assert_eq!(body["id"], "1-a");
    }

    #[test]
    fn test_payload_with_newlines_never_leaks_terminator() {
        let data = b"line one\nline two\n\n{__end__}".to_vec();
        let frame = encode_request(&Request::Write {
            id: id("1-a"),
            data: data.clone(),
        })
        .unwrap();

        assert_eq!(frame.iter().filter(|b| **b == TERMINATOR).count(), 1);
        assert_eq!(
            decode_request(&frame).unwrap(),
            Request::Write { id: id("1-a"), data }
        );
    }

    #[test]
    fn test_decode_create_defaults() {
        let frame = br#"in{"v":1,"protocol":"http","host":"http://example.test/ok"}"#;
        let request = decode_request(frame).unwrap();
        assert_eq!(
            request,
            Request::Create(CreateRequest::new(
                Protocol::Http,
                "http://example.test/ok",
                0
            ))
        );
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(decode_request(b"r"), Err(CodecError::Truncated(1))));
        assert!(matches!(
            decode_request(br#"zz{"v":1}"#),
            Err(CodecError::UnknownCommand(tag)) if tag == "zz"
        ));
        assert!(matches!(
            decode_request(br#"rd{"v":2,"id":"x"}"#),
            Err(CodecError::Version { found: 2 })
        ));
        assert!(matches!(
            decode_request(br#"rd{"id":"x"}"#),
            Err(CodecError::Version { found: 0 })
        ));
        assert!(matches!(decode_request(b"rd[1,2]"), Err(CodecError::NotAnObject)));
        assert!(matches!(decode_request(br#"rd{"v":1}"#), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_reply_wire_shape() {
        let frame = encode_reply(&Reply::failed(
            Some(id("9-z")),
            FailureKind::NotFound,
            "Handle not found: 9-z",
        ))
        .unwrap();
        let body: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(body["status"], "failed");
        assert_eq!(body["kind"], "not_found");
        assert_eq!(body["v"], 1);

        let null_data = encode_reply(&Reply::Data(DataFrame {
            id: id("9-z"),
            data: None,
            seq: 0,
            more: false,
        }))
        .unwrap();
        let body: Value = serde_json::from_slice(&null_data).unwrap();
        assert_eq!(body["data"], Value::Null);
    }

    #[test]
    fn test_small_payload_is_single_frame() {
        let frames = chunk_data(&id("1-a"), Some(b"hello"), 32 * 1024);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.as_deref(), Some(&b"hello"[..]));
        assert!(!frames[0].more);

        let frames = chunk_data(&id("1-a"), None, 32 * 1024);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, None);
    }

    #[test]
    fn test_exact_chunk_size_is_single_frame() {
        let data = vec![7u8; 16];
        let frames = chunk_data(&id("1-a"), Some(&data), 16);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].more);
    }

    #[test]
    fn test_chunk_and_reassemble() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let frames = chunk_data(&id("1-a"), Some(&data), 32 * 1024);
        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames.iter().map(|f| f.seq).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(frames[..3].iter().all(|f| f.more));
        assert!(!frames[3].more);

        let mut reassembler = Reassembler::new(id("1-a"));
        let mut complete = false;
        for frame in frames {
            let wire = encode_reply(&Reply::Data(frame)).unwrap();
            let Reply::Data(frame) = decode_reply(&wire).unwrap() else {
                panic!("expected data frame");
            };
            complete = reassembler.push(frame).unwrap();
        }
        assert!(complete);
        assert_eq!(reassembler.finish(), Some(data));
    }

    #[test]
    fn test_reassembler_detects_gap() {
        let data = vec![1u8; 40];
        let mut frames = chunk_data(&id("1-a"), Some(&data), 16);
        frames.remove(1);

        let mut reassembler = Reassembler::new(id("1-a"));
        assert!(!reassembler.push(frames.remove(0)).unwrap());
        assert!(matches!(
            reassembler.push(frames.remove(0)),
            Err(CodecError::SequenceGap {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_reassembler_rejects_foreign_and_late_frames() {
        let mut reassembler = Reassembler::new(id("1-a"));
        let foreign = chunk_data(&id("2-b"), Some(b"x"), 16).remove(0);
        assert!(matches!(
            reassembler.push(foreign),
            Err(CodecError::ForeignChunk { .. })
        ));

        let only = chunk_data(&id("1-a"), Some(b"x"), 16).remove(0);
        assert!(reassembler.push(only.clone()).unwrap());
        assert!(matches!(reassembler.push(only), Err(CodecError::AfterFinal)));
    }
}
