mod flusher;

pub use flusher::FlushTask;
