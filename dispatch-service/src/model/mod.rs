//! Domain types for dispatch requests and their outcomes.

pub mod types;

pub use types::{
    BatchReport, BatchSummary, DispatchOutcome, DispatchStatus, ErrorKind, NormalizedMessage,
    RecipientRequest, StartupInvite, TeamInvite, TemplateKind, TemplatePayload, Welcome,
};
