//! Protocol module containing message types, the packet codec, and the
//! response classification.

pub mod codec;
pub mod messages;
pub mod response;

pub use codec::{decode_response, encode_message, CodecError};
pub use messages::*;
pub use response::{Response, ResponseError};
