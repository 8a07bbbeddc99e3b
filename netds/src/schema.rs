//! Remote schema classification.
//!
//! The reconciliation loop asks the schema server whether a path is config or
//! state. A node is state if the schema reports `is_state` for its kind
//! (container, field or leaf-list); anything else is config.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::SchemaError;
use crate::proto::gnmi;
use crate::proto::schema::schema_server_client::SchemaServerClient;
use crate::proto::schema::{get_schema_response, GetSchemaRequest};
use crate::types::{Path, SchemaId};

/// Kind of schema node a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Container,
    Field,
    LeafList,
}

/// Schema server answer for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: SchemaKind,
    pub is_state: bool,
}

impl Classification {
    pub fn config(kind: SchemaKind) -> Self {
        Self {
            kind,
            is_state: false,
        }
    }

    pub fn state(kind: SchemaKind) -> Self {
        Self {
            kind,
            is_state: true,
        }
    }
}

/// Remote lookup of a path's schema classification.
#[async_trait]
pub trait SchemaLookup: Send + Sync {
    async fn get_schema(&self, path: &Path, schema: &SchemaId)
        -> Result<Classification, SchemaError>;
}

/// Schema lookup backed by the schema server's gRPC API.
#[derive(Debug, Clone)]
pub struct GrpcSchemaClient {
    client: SchemaServerClient<Channel>,
}

impl GrpcSchemaClient {
    /// Create a client without waiting for the server; connection errors
    /// surface on the first lookup. Both connecting and each lookup are
    /// bounded by `timeout`.
    pub fn connect_lazy(address: &str, timeout: Duration) -> Result<Self, SchemaError> {
        let channel: Channel = Endpoint::from_shared(address.to_string())
            .map_err(|e| SchemaError::InvalidAddress(format!("{}: {}", address, e)))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: SchemaServerClient::new(channel),
        })
    }
}

#[async_trait]
impl SchemaLookup for GrpcSchemaClient {
    async fn get_schema(
        &self,
        path: &Path,
        schema: &SchemaId,
    ) -> Result<Classification, SchemaError> {
        let request = GetSchemaRequest {
            path: Some(gnmi::Path::from(path)),
            schema: Some(schema.into()),
        };
        let response = self.client.clone().get_schema(request).await?.into_inner();
        debug!(path = %path, schema = %schema, "schema lookup answered");
        classify(response.schema).ok_or_else(|| SchemaError::Empty(path.to_string()))
    }
}

fn classify(schema: Option<get_schema_response::Schema>) -> Option<Classification> {
    Some(match schema? {
        get_schema_response::Schema::Container(c) => Classification {
            kind: SchemaKind::Container,
            is_state: c.is_state,
        },
        get_schema_response::Schema::Field(f) => Classification {
            kind: SchemaKind::Field,
            is_state: f.is_state,
        },
        get_schema_response::Schema::Leaflist(l) => Classification {
            kind: SchemaKind::LeafList,
            is_state: l.is_state,
        },
    })
}
