pub mod coglets;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod local_index;
pub mod schema;
pub mod store;
pub mod upstash;

pub use coglets::{CogletStore, NewCoglet};
pub use config::{IndexBackend, IndexSettings, Settings, default_data_dir};
pub use engine::{ActivationEngine, RefreshFailure, RefreshReport};
pub use error::{IndexError, Result, StoreError};
pub use index::{IndexHit, IndexQuery, IndexRecord, VectorIndex};
pub use local_index::LocalIndex;
pub use store::MetadataStore;
pub use upstash::{UpstashConfig, UpstashIndex};
