/// OpenAPI documentation generation.
pub mod documentation;
/// Background retirement of expired current quizzes.
pub mod expiry_reaper;
/// Health check service.
pub mod health_service;
/// Wallet-style identity session.
pub mod identity_service;
/// Quiz creation, ending and expiry reconciliation.
pub mod lifecycle_service;
/// Live tallies and the results export document.
pub mod results_service;
/// Backoff between conditional-write retries.
pub mod retry;
/// Server-Sent Events streaming of sync snapshots.
pub mod sse_service;
/// Storage connection supervisor with exponential backoff.
pub mod storage_supervisor;
/// Polling sync loop and countdown.
pub mod sync_service;
/// Vote casting with revision-checked writes.
pub mod voting_service;
