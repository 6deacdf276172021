//! Message catalogue — every typed request and response on the wire.
//!
//! Each type implements `WireMessage` using only the primitives in `wire`.
//! Fixed-size headers are zerocopy structs with little-endian fields and a
//! compile-time size guard; variable parts are length-prefixed slices.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use static_assertions::assert_eq_size;
use tokio::io::AsyncRead;
use zerocopy::byteorder::{LittleEndian, I64, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::wire::{
    put_fixed, put_hash, put_slice, put_str, read_fixed, read_hash, read_slice,
    read_slice_with_max, read_string, split_slices, Hash, WireError, WireMessage, HASH_SIZE,
    MAX_FRAME_LEN,
};

/// Longest identifier string accepted in relay requests.
pub const MAX_IDENTIFIER_LEN: usize = 4096;

/// Longest JSON document accepted in a vote or tally frame.
pub const MAX_JSON_FRAME_LEN: usize = 1024 * 1024;

// ── Dissemination ─────────────────────────────────────────────────────────────

/// Opaque dissemination payload. For `FullNodes` it carries a `GossipPacket`,
/// for `NotFullNodes` a concatenation of length-prefixed transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisseminationRequest {
    pub data: Vec<u8>,
}

impl WireMessage for DisseminationRequest {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_slice(out, &self.data)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            data: read_slice(r).await?,
        })
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            data: read_slice_with_max(r, max).await?,
        })
    }
}

/// The hashes a receiving peer does not know and wants delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeedTxResponse {
    pub hashes: Vec<Hash>,
}

impl WireMessage for NeedTxResponse {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        let joined: Vec<u8> = self.hashes.iter().flatten().copied().collect();
        put_slice(out, &joined)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let data = read_slice(r).await?;
        Ok(Self {
            hashes: parse_hashes(&data)?,
        })
    }
}

/// Transaction bodies pushed after a need-list: one outer length prefix over
/// back-to-back length-prefixed bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxBodies {
    pub bodies: Vec<Vec<u8>>,
}

impl TxBodies {
    pub fn from_concatenated(data: &[u8]) -> Result<Self, WireError> {
        let bodies = split_slices(data)?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        Ok(Self { bodies })
    }

    pub fn concatenated(&self) -> Result<BytesMut, WireError> {
        let mut inner = BytesMut::new();
        for body in &self.bodies {
            put_slice(&mut inner, body)?;
        }
        Ok(inner)
    }
}

impl WireMessage for TxBodies {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_slice(out, &self.concatenated()?)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_FRAME_LEN).await
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let data = read_slice_with_max(r, max).await?;
        Self::from_concatenated(&data)
    }
}

/// Acknowledges a transaction batch from a non-validating peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct TxBatchAck {
    pub accepted: U32<LittleEndian>,
}

assert_eq_size!(TxBatchAck, [u8; 4]);

impl TxBatchAck {
    pub fn new(accepted: u32) -> Self {
        Self {
            accepted: U32::new(accepted),
        }
    }
}

// ── Gossip packet ─────────────────────────────────────────────────────────────

/// `data_type` value for a packet that announces a block.
pub const GOSSIP_BLOCK: u8 = 0;
/// `data_type` value for a packet that only lists transaction hashes.
pub const GOSSIP_TX_ONLY: u8 = 1;

/// Largest block id that fits the 3-byte announcement field.
pub const MAX_ANNOUNCED_BLOCK_ID: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct GossipHeader {
    sender_position: I64<LittleEndian>,
    data_type: u8,
}

assert_eq_size!(GossipHeader, [u8; 9]);

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct AnnouncementHeader {
    block_id: [u8; 3],
    block_hash: [u8; HASH_SIZE],
}

assert_eq_size!(AnnouncementHeader, [u8; 35]);

/// The block part of a gossip packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnouncedBlock {
    pub block_id: u32,
    pub block_hash: Hash,
}

/// Payload of a `FullNodes` dissemination request.
///
/// Layout: sender position (8) | data type (1) | [block id (3) | block hash (32)]
/// | zero or more 32-byte transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipPacket {
    pub sender_position: i64,
    pub block: Option<AnnouncedBlock>,
    pub tx_hashes: Vec<Hash>,
}

impl GossipPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = BytesMut::with_capacity(
            9 + 35 + self.tx_hashes.len() * HASH_SIZE,
        );
        let header = GossipHeader {
            sender_position: I64::new(self.sender_position),
            data_type: if self.block.is_some() {
                GOSSIP_BLOCK
            } else {
                GOSSIP_TX_ONLY
            },
        };
        put_fixed(&mut out, &header);
        if let Some(block) = &self.block {
            if block.block_id > MAX_ANNOUNCED_BLOCK_ID {
                return Err(WireError::Malformed("block id does not fit 3 bytes"));
            }
            let id = block.block_id.to_le_bytes();
            let announcement = AnnouncementHeader {
                block_id: [id[0], id[1], id[2]],
                block_hash: block.block_hash,
            };
            put_fixed(&mut out, &announcement);
        }
        for hash in &self.tx_hashes {
            out.put_slice(hash);
        }
        Ok(out.to_vec())
    }

    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        let (header, rest) = GossipHeader::read_from_prefix(data)
            .map(|h| (h, &data[std::mem::size_of::<GossipHeader>()..]))
            .ok_or(WireError::Malformed("gossip header truncated"))?;

        let (block, rest) = if header.data_type == GOSSIP_BLOCK {
            let ann = AnnouncementHeader::read_from_prefix(rest)
                .ok_or(WireError::Malformed("block announcement truncated"))?;
            let [a, b, c] = ann.block_id;
            let block = AnnouncedBlock {
                block_id: u32::from_le_bytes([a, b, c, 0]),
                block_hash: ann.block_hash,
            };
            (
                Some(block),
                &rest[std::mem::size_of::<AnnouncementHeader>()..],
            )
        } else {
            (None, rest)
        };

        Ok(Self {
            sender_position: header.sender_position.get(),
            block,
            tx_hashes: parse_hashes(rest)?,
        })
    }
}

fn parse_hashes(data: &[u8]) -> Result<Vec<Hash>, WireError> {
    if data.len() % HASH_SIZE != 0 {
        return Err(WireError::Malformed("hash list is not a multiple of 32 bytes"));
    }
    Ok(data
        .chunks_exact(HASH_SIZE)
        .map(|c| {
            let mut h = [0u8; HASH_SIZE];
            h.copy_from_slice(c);
            h
        })
        .collect())
}

// ── Stop network ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopNetworkRequest {
    pub data: Vec<u8>,
}

impl WireMessage for StopNetworkRequest {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_slice(out, &self.data)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_FRAME_LEN).await
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            data: read_slice_with_max(r, max).await?,
        })
    }
}

/// Carries a single 32-byte hash. Used by stop-network, confirmation and
/// every relay response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashResponse {
    pub hash: Hash,
}

impl WireMessage for HashResponse {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_hash(out, &self.hash)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            hash: read_hash(r).await?,
        })
    }
}

// ── Confirmation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ConfirmRequest {
    pub block_id: U32<LittleEndian>,
}

assert_eq_size!(ConfirmRequest, [u8; 4]);

impl ConfirmRequest {
    pub fn new(block_id: u32) -> Self {
        Self {
            block_id: U32::new(block_id),
        }
    }
}

// ── Block collection ──────────────────────────────────────────────────────────

/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct BlockCollectionRequest {
    pub start_block_id: U32<LittleEndian>,
    /// Non-zero = walk backwards from `start_block_id`.
    pub reverse_order: i8,
}

assert_eq_size!(BlockCollectionRequest, [u8; 5]);

impl BlockCollectionRequest {
    pub fn new(start_block_id: u32, reverse: bool) -> Self {
        Self {
            start_block_id: U32::new(start_block_id),
            reverse_order: crate::wire::flag(reverse),
        }
    }

    pub fn is_reverse(&self) -> bool {
        crate::wire::is_set(self.reverse_order)
    }
}

/// Precedes the block bodies in a block-collection response.
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct BlockCollectionHeader {
    pub block_count: I64<LittleEndian>,
    pub total_len: I64<LittleEndian>,
}

assert_eq_size!(BlockCollectionHeader, [u8; 16]);

impl BlockCollectionHeader {
    pub fn new(block_count: i64, total_len: i64) -> Self {
        Self {
            block_count: I64::new(block_count),
            total_len: I64::new(total_len),
        }
    }
}

// ── Max block ─────────────────────────────────────────────────────────────────

/// Carries no body; the type tag alone asks for the peer's highest block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxBlockRequest;

impl WireMessage for MaxBlockRequest {
    fn encode(&self, _out: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }

    async fn decode<R>(_r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self)
    }
}

/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct MaxBlockResponse {
    pub block_id: I64<LittleEndian>,
}

assert_eq_size!(MaxBlockResponse, [u8; 8]);

impl MaxBlockResponse {
    pub fn new(block_id: i64) -> Self {
        Self {
            block_id: I64::new(block_id),
        }
    }
}

macro_rules! fixed_wire_message {
    ($($ty:ty),* $(,)?) => {$(
        impl WireMessage for $ty {
            fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
                put_fixed(out, self);
                Ok(())
            }

            async fn decode<R>(r: &mut R) -> Result<Self, WireError>
            where
                R: AsyncRead + Unpin + Send + ?Sized,
            {
                read_fixed(r).await
            }
        }
    )*};
}

fixed_wire_message!(
    TxBatchAck,
    ConfirmRequest,
    BlockCollectionRequest,
    BlockCollectionHeader,
    MaxBlockResponse,
);

// ── Private / sharded data relay ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDataRequest {
    pub task_uuid: String,
    pub data_type: String,
    pub data_info: String,
    pub transfer_mode: String,
    pub data: Vec<u8>,
}

impl WireMessage for PrivateDataRequest {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_str(out, &self.task_uuid)?;
        put_str(out, &self.data_type)?;
        put_str(out, &self.data_info)?;
        put_str(out, &self.transfer_mode)?;
        put_slice(out, &self.data)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_FRAME_LEN).await
    }

    /// `max` bounds `data`; identifiers keep their own cap.
    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            task_uuid: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data_type: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data_info: read_string(r, MAX_IDENTIFIER_LEN).await?,
            transfer_mode: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data: read_slice_with_max(r, max).await?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateFileRequest {
    pub task_uuid: String,
    pub task_name: String,
    pub task_sender: String,
    pub task_type: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl WireMessage for PrivateFileRequest {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_str(out, &self.task_uuid)?;
        put_str(out, &self.task_name)?;
        put_str(out, &self.task_sender)?;
        put_str(out, &self.task_type)?;
        put_str(out, &self.file_name)?;
        put_str(out, &self.mime_type)?;
        put_slice(out, &self.data)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_FRAME_LEN).await
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            task_uuid: read_string(r, MAX_IDENTIFIER_LEN).await?,
            task_name: read_string(r, MAX_IDENTIFIER_LEN).await?,
            task_sender: read_string(r, MAX_IDENTIFIER_LEN).await?,
            task_type: read_string(r, MAX_IDENTIFIER_LEN).await?,
            file_name: read_string(r, MAX_IDENTIFIER_LEN).await?,
            mime_type: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data: read_slice_with_max(r, max).await?,
        })
    }
}

/// Shard of source data handed to a sub-node, optionally through an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubNodeDataRequest {
    pub task_uuid: String,
    pub data_uuid: String,
    pub agent_mode: String,
    pub transfer_mode: String,
    pub data_info: String,
    pub data: Vec<u8>,
}

impl WireMessage for SubNodeDataRequest {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_str(out, &self.task_uuid)?;
        put_str(out, &self.data_uuid)?;
        put_str(out, &self.agent_mode)?;
        put_str(out, &self.transfer_mode)?;
        put_str(out, &self.data_info)?;
        put_slice(out, &self.data)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_FRAME_LEN).await
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            task_uuid: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data_uuid: read_string(r, MAX_IDENTIFIER_LEN).await?,
            agent_mode: read_string(r, MAX_IDENTIFIER_LEN).await?,
            transfer_mode: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data_info: read_string(r, MAX_IDENTIFIER_LEN).await?,
            data: read_slice_with_max(r, max).await?,
        })
    }
}

// ── JSON-carrying frames ──────────────────────────────────────────────────────

/// A length-prefixed JSON document. Voting and node-connection broadcast
/// requests and responses all travel this way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFrame<T> {
    pub raw: Vec<u8>,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonFrame<T> {
    pub fn new(value: &T) -> Result<Self, WireError> {
        Ok(Self {
            raw: serde_json::to_vec(value)?,
            _marker: PhantomData,
        })
    }

    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn value(&self) -> Result<T, WireError> {
        Ok(serde_json::from_slice(&self.raw)?)
    }
}

impl<T: Send> WireMessage for JsonFrame<T> {
    fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        put_slice(out, &self.raw)
    }

    async fn decode<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::decode_with_max(r, MAX_JSON_FRAME_LEN).await
    }

    async fn decode_with_max<R>(r: &mut R, max: usize) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Ok(Self {
            raw: read_slice_with_max(r, max).await?,
            _marker: PhantomData,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
