//! The sync engine: cache consultation, revalidation and recovery.

mod collaborators;
mod error;
mod orchestrator;
mod pending;

pub use collaborators::{
  CustomerAuthRefresher, ErrorReporter, NoTokenRefresh, NoopSession, Notifier, SessionListener,
  TokenRefresher, TracingNotifier, TracingReporter,
};
pub use error::SyncError;
pub use orchestrator::{
  CallObserver, CallOptions, CallOutcome, CallReport, DeliverySource, RequestParams, SyncOrchestrator,
  SyncPolicy,
};
pub use pending::{CallPromise, PendingCall};
