//! Request, message and outcome types shared by the validator, the worker pool
//! and the HTTP layer.
//!
//! Inbound requests carry free-form string fields. Once validated they become a
//! [`NormalizedMessage`] holding a tagged [`TemplatePayload`], so nothing past
//! the boundary reads fields by name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound Request Types
// =============================================================================

/// Transactional template a recipient should receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    #[serde(rename = "startup-invite", alias = "startup_invite", alias = "StartupInvite")]
    StartupInvite,
    #[serde(rename = "team-invite", alias = "team_invite", alias = "TeamInvite")]
    TeamInvite,
    #[serde(rename = "welcome", alias = "Welcome")]
    Welcome,
}

impl TemplateKind {
    /// Template alias registered with the mail provider.
    pub fn template_alias(self) -> &'static str {
        match self {
            TemplateKind::StartupInvite => "startup-invite",
            TemplateKind::TeamInvite => "team-invite",
            TemplateKind::Welcome => "welcome",
        }
    }

    /// Fields that must be present and non-blank, in reporting order.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            TemplateKind::StartupInvite => &["startupName", "programName", "inviteCode"],
            TemplateKind::TeamInvite => &["startupName", "inviterName", "inviteCode"],
            TemplateKind::Welcome => &["name"],
        }
    }
}

/// One addressee of a dispatch call, as received at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientRequest {
    #[serde(alias = "email", alias = "to")]
    pub address: String,
    #[serde(alias = "type", alias = "template")]
    pub template_kind: TemplateKind,
    #[serde(default, alias = "data")]
    pub fields: BTreeMap<String, String>,
}

impl RecipientRequest {
    pub fn new(address: impl Into<String>, template_kind: TemplateKind) -> Self {
        Self {
            address: address.into(),
            template_kind,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

// =============================================================================
// Normalized Message Types
// =============================================================================

/// Startup program invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupInvite {
    pub startup_name: String,
    pub program_name: String,
    pub invite_code: String,
    pub invite_link: String,
    pub expiry_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
}

/// Invitation to join an existing startup team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInvite {
    pub startup_name: String,
    pub inviter_name: String,
    pub invite_code: String,
    pub role: String,
    pub invite_link: String,
    pub expiry_date: String,
}

/// Welcome mail after sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub name: String,
    pub dashboard_link: String,
}

/// Template data, one variant per [`TemplateKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TemplatePayload {
    StartupInvite(StartupInvite),
    TeamInvite(TeamInvite),
    Welcome(Welcome),
}

impl TemplatePayload {
    pub fn kind(&self) -> TemplateKind {
        match self {
            TemplatePayload::StartupInvite(_) => TemplateKind::StartupInvite,
            TemplatePayload::TeamInvite(_) => TemplateKind::TeamInvite,
            TemplatePayload::Welcome(_) => TemplateKind::Welcome,
        }
    }

    /// Flatten the payload back into wire field names.
    fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |name: &str, value: &str| {
            fields.insert(name.to_string(), value.to_string());
        };

        match self {
            TemplatePayload::StartupInvite(p) => {
                put("startupName", &p.startup_name);
                put("programName", &p.program_name);
                put("inviteCode", &p.invite_code);
                put("inviteLink", &p.invite_link);
                put("expiryDate", &p.expiry_date);
                if let Some(name) = &p.recipient_name {
                    put("recipientName", name);
                }
            }
            TemplatePayload::TeamInvite(p) => {
                put("startupName", &p.startup_name);
                put("inviterName", &p.inviter_name);
                put("inviteCode", &p.invite_code);
                put("role", &p.role);
                put("inviteLink", &p.invite_link);
                put("expiryDate", &p.expiry_date);
            }
            TemplatePayload::Welcome(p) => {
                put("name", &p.name);
                put("dashboardLink", &p.dashboard_link);
            }
        }

        fields
    }
}

/// A recipient that passed validation and is ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub address: String,
    pub payload: TemplatePayload,
}

impl NormalizedMessage {
    pub fn kind(&self) -> TemplateKind {
        self.payload.kind()
    }

    /// Convert back into a request with every defaulted field filled in.
    pub fn to_request(&self) -> RecipientRequest {
        RecipientRequest {
            address: self.address.clone(),
            template_kind: self.kind(),
            fields: self.payload.to_fields(),
        }
    }
}

// =============================================================================
// Outcome Types
// =============================================================================

/// Terminal status of one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchStatus {
    Sent,
    Rejected,
    Failed,
}

/// Why a recipient was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidAddress,
    MissingField,
    ProviderRejected,
    ProviderUnavailable,
    Timeout,
    DeadlineExceeded,
    Internal,
}

/// Terminal outcome for one recipient.
///
/// Built only through [`DispatchOutcome::sent`], [`DispatchOutcome::rejected`]
/// and [`DispatchOutcome::failed`]: a sent outcome always has a provider
/// message id and never an error kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    address: String,
    status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    detail: String,
}

impl DispatchOutcome {
    pub fn sent(address: impl Into<String>, provider_message_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: DispatchStatus::Sent,
            provider_message_id: Some(provider_message_id.into()),
            error_kind: None,
            detail: "Email sent".to_string(),
        }
    }

    pub fn rejected(address: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::unsent(address, DispatchStatus::Rejected, kind, detail)
    }

    pub fn failed(address: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::unsent(address, DispatchStatus::Failed, kind, detail)
    }

    fn unsent(
        address: impl Into<String>,
        status: DispatchStatus,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            status,
            provider_message_id: None,
            error_kind: Some(kind),
            detail: detail.into(),
        }
    }

    /// Report this outcome under `address`, typically as the caller wrote it.
    pub fn for_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> DispatchStatus {
        self.status
    }

    pub fn provider_message_id(&self) -> Option<&str> {
        self.provider_message_id.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_sent(&self) -> bool {
        self.status == DispatchStatus::Sent
    }
}

/// Per-batch counts. `successful + failed == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[DispatchOutcome]) -> Self {
        let successful = outcomes.iter().filter(|o| o.is_sent()).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
        }
    }
}

/// Outcomes in request order plus their summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<DispatchOutcome>,
    pub summary: BatchSummary,
}
