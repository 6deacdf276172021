//! Ledgernet wire format — codec primitives shared by every message type.
//!
//! A session is one TCP connection carrying one request and at most one
//! response. The first two bytes on the wire are the little-endian
//! `RequestType` tag. Everything after the tag is built from three shapes:
//!
//!   - fixed-width little-endian integers (and i8 booleans, non-zero = true)
//!   - 32-byte hashes, left-padded with zeros when the source is shorter
//!   - byte slices framed by a fixed-width little-endian u32 length
//!
//! Changing any width or the byte order here is a breaking protocol change.
//! Fixed-layout headers live in `message.rs` as zerocopy structs; variable
//! parts go through `put_slice` / `read_slice`.

use std::future::Future;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of every hash on the wire.
pub const HASH_SIZE: usize = 32;

/// Width of the slice length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Hard ceiling for an unbounded `read_slice`. Callers that know a tighter
/// limit use `read_slice_with_max`.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Upper bound on blocks returned by one block-collection call.
pub const BLOCKS_PER_REQUEST: usize = 100;

/// A 32-byte block or transaction hash.
pub type Hash = [u8; HASH_SIZE];

/// The all-zero hash. Used as "unknown" in confirmation responses.
pub const ZERO_HASH: Hash = [0u8; HASH_SIZE];

// ── Request types ─────────────────────────────────────────────────────────────

/// Identifies what a session is about. Sent once, before the typed request.
///
/// The numeric values are part of the protocol and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestType {
    /// Block announcement plus transaction hashes from a validating peer.
    FullNodes = 1,
    /// Transaction batch from a non-validating peer.
    NotFullNodes = 2,
    StopNetwork = 3,
    Confirmation = 4,
    BlockCollection = 7,
    MaxBlock = 10,
    PrivateData = 11,
    PrivateFile = 12,
    SubNodeData = 13,
    CandidateVoting = 20,
    NodeConnectionBroadcast = 21,
}

impl RequestType {
    /// Every defined request type. The dispatcher must route all of them.
    pub const ALL: [RequestType; 11] = [
        RequestType::FullNodes,
        RequestType::NotFullNodes,
        RequestType::StopNetwork,
        RequestType::Confirmation,
        RequestType::BlockCollection,
        RequestType::MaxBlock,
        RequestType::PrivateData,
        RequestType::PrivateFile,
        RequestType::SubNodeData,
        RequestType::CandidateVoting,
        RequestType::NodeConnectionBroadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::FullNodes => "full_nodes",
            RequestType::NotFullNodes => "not_full_nodes",
            RequestType::StopNetwork => "stop_network",
            RequestType::Confirmation => "confirmation",
            RequestType::BlockCollection => "block_collection",
            RequestType::MaxBlock => "max_block",
            RequestType::PrivateData => "private_data",
            RequestType::PrivateFile => "private_file",
            RequestType::SubNodeData => "sub_node_data",
            RequestType::CandidateVoting => "candidate_voting",
            RequestType::NodeConnectionBroadcast => "node_connection_broadcast",
        }
    }
}

impl TryFrom<u16> for RequestType {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        RequestType::ALL
            .iter()
            .copied()
            .find(|t| *t as u16 == value)
            .ok_or(WireError::UnknownRequestType(value))
    }
}

impl From<RequestType> for u16 {
    fn from(t: RequestType) -> u16 {
        t as u16
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Message contract ──────────────────────────────────────────────────────────

/// The two-operation contract every message type implements.
///
/// `encode` appends the message to an in-memory buffer; `decode` pulls exactly
/// one message off a stream. A decode error means the stream position is
/// unknown and the connection must be dropped.
pub trait WireMessage: Sized {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError>;

    fn decode<R>(r: &mut R) -> impl Future<Output = Result<Self, WireError>> + Send
    where
        R: AsyncRead + Unpin + Send + ?Sized;

    /// Like `decode`, but a variable-length payload declared longer than
    /// `max` fails with `SizeExceeded` before any of it is read. Messages
    /// without such a payload ignore `max`.
    fn decode_with_max<R>(r: &mut R, max: usize) -> impl Future<Output = Result<Self, WireError>> + Send
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let _ = max;
        Self::decode(r)
    }
}

/// Encode `msg` and write it in one `write_all`.
pub async fn send_message<W, M>(w: &mut W, msg: &M) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
    M: WireMessage + Sync,
{
    let mut out = BytesMut::new();
    msg.encode(&mut out)?;
    w.write_all(&out).await?;
    w.flush().await?;
    Ok(())
}

// ── Type tag ──────────────────────────────────────────────────────────────────

pub async fn write_type_tag<W>(w: &mut W, request_type: RequestType) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    w.write_all(&u16::from(request_type).to_le_bytes()).await?;
    Ok(())
}

/// Read the raw session tag. Unknown values are returned as-is so the
/// dispatcher can log them.
pub async fn read_raw_type_tag<R>(r: &mut R) -> Result<u16, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    Ok(r.read_u16_le().await?)
}

pub async fn read_type_tag<R>(r: &mut R) -> Result<RequestType, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    RequestType::try_from(read_raw_type_tag(r).await?)
}

// ── Slices ────────────────────────────────────────────────────────────────────

/// Append a u32 length prefix followed by `data`.
pub fn put_slice(out: &mut BytesMut, data: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(data.len()).map_err(|_| WireError::SliceTooLong(data.len()))?;
    out.reserve(LENGTH_PREFIX_SIZE + data.len());
    out.put_u32_le(len);
    out.put_slice(data);
    Ok(())
}

pub async fn write_slice<W>(w: &mut W, data: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + data.len());
    put_slice(&mut out, data)?;
    w.write_all(&out).await?;
    Ok(())
}

pub async fn read_slice<R>(r: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let len = r.read_u32_le().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    read_exact_vec(r, len).await
}

/// Like `read_slice`, but refuses a declared length above `max`.
///
/// `SizeExceeded` leaves the payload unread; the caller should treat it as
/// "nothing received" and drop the connection.
pub async fn read_slice_with_max<R>(r: &mut R, max: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let len = r.read_u32_le().await? as usize;
    if len > max {
        return Err(WireError::SizeExceeded { len, max });
    }
    read_exact_vec(r, len).await
}

async fn read_exact_vec<R>(r: &mut R, len: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Split a buffer of back-to-back length-prefixed items.
pub fn split_slices(mut data: &[u8]) -> Result<Vec<&[u8]>, WireError> {
    let mut items = Vec::new();
    while !data.is_empty() {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Err(WireError::Malformed("truncated length prefix"));
        }
        let (prefix, rest) = data.split_at(LENGTH_PREFIX_SIZE);
        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if rest.len() < len {
            return Err(WireError::Malformed("item shorter than its length prefix"));
        }
        let (item, rest) = rest.split_at(len);
        items.push(item);
        data = rest;
    }
    Ok(items)
}

// ── Strings ───────────────────────────────────────────────────────────────────

pub fn put_str(out: &mut BytesMut, s: &str) -> Result<(), WireError> {
    put_slice(out, s.as_bytes())
}

pub async fn read_string<R>(r: &mut R, max: usize) -> Result<String, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let bytes = read_slice_with_max(r, max).await?;
    String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
}

// ── Hashes and flags ──────────────────────────────────────────────────────────

/// Normalize a hash to exactly 32 bytes, zero-padding on the left.
pub fn to_hash(bytes: &[u8]) -> Result<Hash, WireError> {
    if bytes.len() > HASH_SIZE {
        return Err(WireError::HashTooLong(bytes.len()));
    }
    let mut hash = ZERO_HASH;
    hash[HASH_SIZE - bytes.len()..].copy_from_slice(bytes);
    Ok(hash)
}

pub fn put_hash(out: &mut BytesMut, bytes: &[u8]) -> Result<(), WireError> {
    out.put_slice(&to_hash(bytes)?);
    Ok(())
}

pub async fn read_hash<R>(r: &mut R) -> Result<Hash, WireError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut hash = ZERO_HASH;
    r.read_exact(&mut hash).await?;
    Ok(hash)
}

pub fn flag(value: bool) -> i8 {
    i8::from(value)
}

pub fn is_set(flag: i8) -> bool {
    flag != 0
}

// ── Fixed-layout headers ──────────────────────────────────────────────────────

/// Read one zerocopy header straight off the stream.
pub async fn read_fixed<T, R>(r: &mut R) -> Result<T, WireError>
where
    T: AsBytes + FromBytes + Send,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut value = T::new_zeroed();
    r.read_exact(value.as_bytes_mut()).await?;
    Ok(value)
}

pub fn put_fixed<T: AsBytes>(out: &mut BytesMut, value: &T) {
    out.put_slice(value.as_bytes());
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when reading or writing wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("stream ended before the message was complete")]
    UnexpectedEof,

    #[error("i/o error: {0}")]
    Io(std::io::Error),

    #[error("unknown request type: {0}")]
    UnknownRequestType(u16),

    #[error("declared length {len} exceeds maximum {max}")]
    SizeExceeded { len: usize, max: usize },

    #[error("declared frame length {0} exceeds the protocol ceiling")]
    FrameTooLarge(usize),

    #[error("slice of {0} bytes does not fit a u32 length prefix")]
    SliceTooLong(usize),

    #[error("hash of {0} bytes is longer than 32")]
    HashTooLong(usize),

    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    /// Size-limit violations are "nothing received", not faults.
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, WireError::SizeExceeded { .. })
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::UnexpectedEof
        } else {
            WireError::Io(e)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slice_round_trip_including_empty() {
        for payload in [Vec::new(), vec![7u8], vec![0xab; 70_000]] {
            let mut out = BytesMut::new();
            put_slice(&mut out, &payload).unwrap();
            assert_eq!(out.len(), 4 + payload.len());

            let mut reader = &out[..];
            let decoded = read_slice(&mut reader).await.unwrap();
            assert_eq!(decoded, payload);
            assert!(reader.is_empty());
        }
    }

    #[tokio::test]
    async fn length_prefix_is_fixed_width_little_endian() {
        let mut out = BytesMut::new();
        put_slice(&mut out, &[1, 2, 3]).unwrap();
        assert_eq!(&out[..4], &[3, 0, 0, 0]);
    }

    #[tokio::test]
    async fn short_read_is_a_decode_error() {
        // Declares 10 bytes, carries 3.
        let bytes = [10u8, 0, 0, 0, 1, 2, 3];
        let mut reader = &bytes[..];
        let err = read_slice(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof));

        let truncated_prefix = [1u8, 0];
        let mut reader = &truncated_prefix[..];
        assert!(read_slice(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn read_slice_with_max_rejects_oversize() {
        let mut out = BytesMut::new();
        put_slice(&mut out, &[0u8; 64]).unwrap();

        let mut reader = &out[..];
        let err = read_slice_with_max(&mut reader, 63).await.unwrap_err();
        assert!(err.is_size_exceeded());

        let mut reader = &out[..];
        assert_eq!(read_slice_with_max(&mut reader, 64).await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn request_type_round_trip() {
        for t in RequestType::ALL {
            let mut out = Vec::new();
            write_type_tag(&mut out, t).await.unwrap();
            assert_eq!(out.len(), 2);
            let mut reader = &out[..];
            assert_eq!(read_type_tag(&mut reader).await.unwrap(), t);
        }
    }

    #[tokio::test]
    async fn unknown_request_type_is_rejected() {
        let bytes = 999u16.to_le_bytes();
        let mut reader = &bytes[..];
        let err = read_type_tag(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::UnknownRequestType(999)));
    }

    #[test]
    fn request_type_values_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for t in RequestType::ALL {
            assert!(seen.insert(u16::from(t)), "duplicate tag for {t}");
        }
    }

    #[test]
    fn short_hash_is_left_padded() {
        let hash = to_hash(&[0xff, 0xee]).unwrap();
        assert_eq!(&hash[..30], &[0u8; 30]);
        assert_eq!(&hash[30..], &[0xff, 0xee]);
        assert!(matches!(to_hash(&[0u8; 33]), Err(WireError::HashTooLong(33))));
    }

    #[test]
    fn split_slices_walks_concatenated_items() {
        let mut out = BytesMut::new();
        put_slice(&mut out, b"one").unwrap();
        put_slice(&mut out, b"").unwrap();
        put_slice(&mut out, b"three").unwrap();
        let items = split_slices(&out).unwrap();
        assert_eq!(items, vec![&b"one"[..], &b""[..], &b"three"[..]]);

        assert!(split_slices(&out[..out.len() - 1]).is_err());
        assert!(split_slices(&[1, 0]).is_err());
    }

    #[tokio::test]
    async fn invalid_utf8_string_is_rejected() {
        let mut out = BytesMut::new();
        put_slice(&mut out, &[0xff, 0xfe]).unwrap();
        let mut reader = &out[..];
        assert!(matches!(
            read_string(&mut reader, 16).await,
            Err(WireError::InvalidUtf8)
        ));
    }
}
