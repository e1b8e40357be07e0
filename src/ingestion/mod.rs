//! Turning uploaded documents into searchable chunks.
//!
//! Two pieces:
//!
//! * [`chunker`] — fixed-size overlapping text splitting, reversible.
//! * [`ingestor`] — the end-to-end ingest path: validate, chunk, embed with
//!   retry, and transactionally persist.

pub mod chunker;
pub mod ingestor;

pub use chunker::{ChunkSpan, TextChunker};
pub use ingestor::{DocumentIngestor, IngestError, IngestReceipt, IngestStatus, NewDocument};
