//! Track library: keys, feature snapshots and the store contracts

pub mod key;
pub mod store;
pub mod track;

pub use key::{HarmonicKey, Mode};
pub use store::{FeatureStore, Library, LibrarySnapshot, VectorIndex};
pub use track::{FeatureSnapshot, TrackId, TrackRecord};
