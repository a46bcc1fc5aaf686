use uuid::Uuid;

// ============================================================================
// Request Context
// ============================================================================

/// Per-request context threaded explicitly through every call into store,
/// cache, and publisher. The trace id is taken from the transport's
/// X-Request-ID header when present, generated otherwise, and stamped into
/// outgoing event envelopes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
