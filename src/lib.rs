// Customs Ingest - Core Library
// Normalized relational loading for malformed customs declaration files

pub mod db;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod references;

// Re-export commonly used types
pub use db::{
    count_declarations, existing_natural_keys, find_declaration, insert_declaration,
    setup_database, Declaration,
};
pub use decoder::{
    DecodeReport, DecodeStrategy, DecodedFile, DroppedLine, RawRow, RowDecoder, SourceEncoding,
};
pub use diagnostics::{diagnose_file, FileDiagnosis, LinePreview};
pub use error::{IngestError, IngestResult};
pub use loader::{
    DeclarationLoader, LoadReport, LoadStatus, PipelineState, RejectReason, RejectionSummary,
};
pub use normalize::{clean_text, parse_date, parse_decimal, strip_diacritics, NumericField};
pub use references::{count_persisted, ReferenceKind, ReferenceResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
