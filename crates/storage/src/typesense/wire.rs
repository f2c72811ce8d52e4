//! Response bodies returned by the Typesense REST API

use serde::{Deserialize, Serialize};

/// Entry of `GET /collections`
#[derive(Debug, Deserialize)]
pub(crate) struct CollectionSummary {
    pub name: String,
}

/// Body of `GET /aliases/{name}` and request of `PUT /aliases/{name}`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AliasBody {
    pub collection_name: String,
}

/// Body of `DELETE /collections/{name}/documents`
#[derive(Debug, Deserialize)]
pub(crate) struct DeleteByFilterResponse {
    #[serde(default)]
    pub num_deleted: u64,
}

/// Error body returned on non-success statuses
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}
