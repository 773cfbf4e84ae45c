//! `geomerge-conflate`: conflation engine for official datasets.
//!
//! Reconciles geolocated records from an authoritative source with the
//! equivalent features of a crowdsourced map, and produces review issues plus
//! CSV reports. The spatial store is reached through an explicit [`Session`].

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod geodesy;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod store;
pub mod summary;
pub mod text;

pub use config::DatasetConfig;
pub use engine::{run, write_reports};
pub use error::ConflateError;
pub use model::{ConflateResult, MapItem, MatchOutcome, OfficialRecord};
pub use store::Session;
