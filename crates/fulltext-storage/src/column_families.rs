//! Column family definitions for RocksDB.
//!
//! - doc_states: DocIndexState records keyed by doc id
//! - class_index: `{class}\0{doc_id}` -> empty, for class-scoped listing
//! - documents: source documents keyed by doc id (compressed)
//! - attached_index: `{parent}\0{child}` -> empty, for child lookup

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for per-document index state
pub const CF_DOC_STATES: &str = "doc_states";

/// Column family name for the class -> doc id index
pub const CF_CLASS_INDEX: &str = "class_index";

/// Column family name for source documents
pub const CF_DOCUMENTS: &str = "documents";

/// Column family name for the parent -> attached child index
pub const CF_ATTACHED_INDEX: &str = "attached_index";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_DOC_STATES, CF_CLASS_INDEX, CF_DOCUMENTS, CF_ATTACHED_INDEX];

/// Source documents carry the bulk of the bytes
fn documents_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_DOC_STATES, Options::default()),
        ColumnFamilyDescriptor::new(CF_CLASS_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, documents_options()),
        ColumnFamilyDescriptor::new(CF_ATTACHED_INDEX, Options::default()),
    ]
}
