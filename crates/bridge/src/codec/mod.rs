pub mod frame;
pub mod line;

pub use frame::{encode_frame, read_frame, write_frame};
pub use line::{write_line, LineReader};
