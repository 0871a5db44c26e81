// Pipeline ingestion: folder listings and downloaded archives

pub mod archive;
pub mod listing;
