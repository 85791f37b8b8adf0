/// OpenAPI documentation generation.
pub mod documentation;
/// Race finalization: record, flag, reset/advance and totals.
pub mod finalize_service;
/// Health check service.
pub mod health_service;
/// Points matrix loading, seeding and replacement.
pub mod matrix_service;
/// Reactions to store change notifications.
pub mod observer;
/// Race board, race detail and active race views.
pub mod race_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Store connection supervision and degraded mode.
pub mod storage_supervisor;
/// Rank submissions, overlay corrections, doubled flags and bonus awards.
pub mod submission_service;
/// Totals recomputation and views.
pub mod totals_service;
