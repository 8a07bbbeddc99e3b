//! netds: transactional, versioned configuration datastore.
//!
//! A [`Datastore`] fronts one managed device:
//! - named candidates stage changes against a snapshot of the main config tree
//! - commit pushes a candidate's changes to the device through a [`Target`]
//! - a reconciliation loop merges device notifications into the main config
//!   or state tree, as classified by a remote schema server

pub mod audit;
pub mod config;
pub mod datastore;
pub mod error;
pub mod proto;
pub mod schema;
pub mod target;
pub mod tree;
pub mod types;

pub use audit::DatastoreAuditLogger;
pub use config::{Config, ConfigError, DatastoreConfig};
pub use datastore::{DataSource, DataType, Datastore, GetRequest};
pub use error::{DatastoreError, SchemaError, TargetError};
pub use schema::{Classification, GrpcSchemaClient, SchemaKind, SchemaLookup};
pub use target::{ConnectionState, SyncUpdate, Target};
pub use tree::{TreeError, VersionedTree};
pub use types::{Notification, Path, PathElem, SchemaId, SetRequest, SetResponse, Update, Value};
