//! The wire protocol: primitive byte packing and the opcode-tagged packet
//! codec built on top of it.

pub mod packer;
pub mod packet;

pub use packet::{InPoint, Label, Opcode, Packet, QueryFields, ResultRow, Status, HEADER_LEN};
