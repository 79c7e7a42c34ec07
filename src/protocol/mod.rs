//! RESP wire codec: command encoding and incremental reply parsing

pub mod resp;

pub use resp::{encode_command, RespParser, RespValue};
