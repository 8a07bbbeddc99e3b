//! Generated protobuf types for netds.

#![allow(clippy::enum_variant_names)]

/// gNMI subset (southbound device sessions)
pub mod gnmi {
    tonic::include_proto!("gnmi");
}

/// Schema server lookup
pub mod schema {
    pub mod proto {
        tonic::include_proto!("schema.proto");
    }

    pub use self::proto::*;
}

/// Conversions to and from the core data model
pub mod convert;
