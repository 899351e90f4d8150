//! Container format handling
//!
//! Only WebM (the Matroska subset used for web streaming) is supported.

pub mod webm;
