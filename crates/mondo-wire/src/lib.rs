//! Mondo wire - the MongoDB wire protocol front door
//!
//! Frame parsing (`OP_MSG` with document sequences, legacy `OP_QUERY`),
//! command dispatch against the query router, reply shaping with
//! MongoDB-compatible error codes, and the tokio serve loop with the
//! cursor TTL sweep.

mod commands;
mod message;
mod server;


pub use commands::{CommandContext, dispatch};
pub use message::{
    FLAG_CHECKSUM_PRESENT, FLAG_MORE_TO_COME, MAX_MESSAGE_SIZE, MessageHeader, OpCode, OpMsg,
    OpQuery, encode_op_msg, encode_op_reply, parse_op_msg, parse_op_query,
};
pub use server::WireServer;
