//! Default values and functions for configuration

// Default constants
pub(crate) const DEFAULT_SERVICE_URL: &str = "http://localhost:8108";
pub(crate) const DEFAULT_IDENTITY_FIELD: &str = "id";
pub(crate) const DEFAULT_TIMESTAMP_FIELD: &str = "doc_updated_at";
pub(crate) const DEFAULT_IMPORT_ACTION: &str = "upsert";

pub(crate) fn default_service_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_documents_per_batch() -> usize {
    100
}

pub(crate) fn default_max_parallel() -> usize {
    4
}

pub(crate) fn default_import_action() -> String {
    DEFAULT_IMPORT_ACTION.to_string()
}

pub(crate) fn default_identity_field() -> String {
    DEFAULT_IDENTITY_FIELD.to_string()
}

pub(crate) fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

pub(crate) fn default_max_split_depth() -> u32 {
    4
}

pub(crate) fn default_retry_attempts() -> u32 {
    3
}

pub(crate) fn default_retry_base_delay_ms() -> u64 {
    500
}

pub(crate) fn default_retry_max_delay_ms() -> u64 {
    5_000
}

pub(crate) fn default_retry_jitter_fraction() -> f64 {
    0.2
}

pub(crate) fn default_retention() -> usize {
    2
}

pub(crate) fn default_cascade_enabled() -> bool {
    true
}
