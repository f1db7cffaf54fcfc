//! Capture persistence: data model, log file writer/reader, and the index of
//! recent captures.

mod index;
pub mod model;
mod reader;
mod writer;

pub use index::{CAPTURE_INDEX_LIMIT, CaptureIndex, SharedCaptureIndex, created_at_from_id};
pub use model::{ActiveQueryRecord, CaptureHandle, CaptureRecord, LoadSample, ServerInfo};
pub use reader::{ParseCaptureError, parse_capture, read_capture};
pub use writer::{CAPTURE_FILE_EXT, CAPTURE_FILE_PREFIX, CaptureWriter, WriteError, render_capture};
