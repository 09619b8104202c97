//! The persisted project state record shared by every build stage.
//!
//! Stages never talk to each other directly: each one reads its inputs from,
//! and merges its outputs into, a [`StateStore`] that is persisted atomically
//! as `.weld/state.toml` after every stage transition.

#![warn(missing_docs)]

pub mod error;
pub mod records;
pub mod settings;
pub mod stage;
pub mod store;

pub use error::StateError;
pub use records::{
    BinaryRecord, CompileRecord, DiscoveryRecord, ExportedSymbol, FileSets, GraphNodeRecord,
    LinkRecord, StageData, StageRecord, SymbolKind, SymbolsRecord, Visibility,
};
pub use settings::{LibraryKind, OptLevel, PipelineSettings};
pub use stage::Stage;
pub use store::{
    parse_state, render_state, BuildState, ProjectMeta, StateStore, STATE_DIR, STATE_FILE,
    STATE_FORMAT_VERSION,
};
