//! StripeFS data-transfer protocol
//!
//! The framed TCP protocol storage nodes speak to stream block bytes to
//! each other: a token-authenticated session handshake, a one-shot
//! operation request (read-block or write-block), then a stream of data
//! packets carrying chunked checksums, ending with an empty terminator
//! packet.
//!
//! All integers are big-endian; strings and tokens are length-prefixed.

pub mod handshake;
pub mod message;
pub mod packet;

pub use handshake::{client_handshake, respond, serve_handshake, HANDSHAKE_MAGIC, TRANSFER_VERSION};
pub use message::{
    read_op, BlockStage, ReadBlockRequest, WriteBlockRequest, OP_READ_BLOCK, OP_WRITE_BLOCK,
    STATUS_ACCESS_DENIED, STATUS_ERROR, STATUS_SUCCESS,
};
pub use packet::{
    max_chunks_per_packet, read_packet, write_packet, PacketHeader, PACKET_MAX_BYTES,
    PKT_MAX_HEADER_LEN,
};
