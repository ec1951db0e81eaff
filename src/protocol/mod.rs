//! Protocol module - wire format, framing, and messages.
//!
//! This module implements the binary protocol:
//! - 9-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - Message DTOs and the message codec

mod codec;
mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use codec::MessageCodec;
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{
    Body, DiscoveryQuery, Message, RegistryAction, RegistryCommand, ResponseCode, RpcRequest,
    RpcResponse,
};
pub use wire_format::{
    Header, MessageType, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC, PROTOCOL_VERSION,
};
