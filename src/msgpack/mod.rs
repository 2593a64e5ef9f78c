//! Pack format: the self-describing binary value encoding used throughout
//! the crate for tuple storage, SQL bind lists, merger source buffers and
//! statistics samples.

mod codec;
mod value;

pub use codec::{
    check, decode, decode_array_header, decode_bin, decode_int, decode_map_header, decode_str,
    decode_uint, encode, encode_array_header, encode_map_header, size_of, skip, DecodeError,
    EncodeError,
};
pub use value::{Ext, OwnedScalar, Value};
