// Override store
pub const OVERRIDE_WRITES_COUNTER: &str = "flag_overrides_writes_total";
pub const OVERRIDE_CLEARS_COUNTER: &str = "flag_overrides_clears_total";
pub const OVERRIDE_REJECTED_COUNTER: &str = "flag_overrides_rejected_total";

// Evaluation
pub const OVERRIDE_HITS_COUNTER: &str = "flag_overrides_hits_total";
pub const EVALUATION_REQUESTS_COUNTER: &str = "flag_overrides_evaluation_requests_total";
pub const EVALUATION_ERRORS_COUNTER: &str = "flag_overrides_evaluation_errors_total";

// Client-side sync
pub const SYNC_PUSHES_COUNTER: &str = "flag_overrides_sync_pushes_total";
pub const SYNC_FAILURES_COUNTER: &str = "flag_overrides_sync_failures_total";
