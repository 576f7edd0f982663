// Logs module - Routing child output into timestamped files

mod router;
mod writer;

pub use router::{LogRouter, RouterHandle};
pub use writer::LogWriter;
