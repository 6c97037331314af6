//! Per-request data injected by middleware.

#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}
