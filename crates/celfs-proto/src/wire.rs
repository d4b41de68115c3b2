//! Length-prefixed bincode frames: a little-endian `u32` payload length
//! followed by the payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{SignedRequest, StorageFault, StorageReply};

/// What a node sends back for one request.
pub type ReplyFrame = Result<StorageReply, StorageFault>;

pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    let payload = bincode::serialize(message)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, bincode::Error> {
    let truncated = || Box::new(bincode::ErrorKind::Custom("truncated frame".to_string()));
    let (len, payload) = frame.split_first_chunk::<4>().ok_or_else(truncated)?;
    let len = u32::from_le_bytes(*len) as usize;
    if payload.len() < len {
        return Err(truncated());
    }
    bincode::deserialize(&payload[..len])
}

pub fn encode_request(request: &SignedRequest) -> Result<Vec<u8>, bincode::Error> {
    encode_frame(request)
}

pub fn decode_request(frame: &[u8]) -> Result<SignedRequest, bincode::Error> {
    decode_frame(frame)
}

pub fn encode_reply(reply: &ReplyFrame) -> Result<Vec<u8>, bincode::Error> {
    encode_frame(reply)
}

pub fn decode_reply(frame: &[u8]) -> Result<ReplyFrame, bincode::Error> {
    decode_frame(frame)
}
