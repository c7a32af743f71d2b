//! Wire-format codec: tag and varint primitives, the buffered reader and the
//! buffered writer.

mod reader;
pub mod wire;
mod writer;

pub use reader::{
    CodedReader, ReaderConfig, DEFAULT_BUFFER_SIZE as DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_RECURSION_LIMIT, DEFAULT_SIZE_LIMIT,
};
pub use wire::{
    int32_size, length_delimited_size, make_tag, tag_size, varint32_size, varint64_size,
    zigzag_decode32, zigzag_decode64, zigzag_encode32, zigzag_encode64, Tag, WireType,
    MAX_FIELD_NUMBER,
};
pub use writer::{
    encode_to_vec, message_set_item_size, CodedWriter,
    DEFAULT_BUFFER_SIZE as DEFAULT_WRITE_BUFFER_SIZE,
};
