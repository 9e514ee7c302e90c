pub mod chunked;
pub mod compression;
pub mod line_reader;
pub mod request_writer;
pub mod response_reader;

pub use chunked::{ChunkedReader, ChunkedWriter};
pub use line_reader::LineReader;
pub use request_writer::write_request;
pub use response_reader::{read_response_head, ResponseHead};
