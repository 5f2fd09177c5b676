//! Debezium change-event decoding
//!
//! Records on the CDC topic carry row-level changes captured from the
//! PostgreSQL WAL. Only the pre-image identity is load-bearing here; every
//! other field is kept for diagnostics.
mod models;

pub use models::{
    decode, CdcOperation, ChangeEnvelope, DecodeError, Decoded, RowSnapshot, SourceMetadata,
};
