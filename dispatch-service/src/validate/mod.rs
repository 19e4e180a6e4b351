//! Recipient validation.
//!
//! Turns a [`RecipientRequest`] into a [`NormalizedMessage`] or a
//! [`ValidationError`]. Validation is pure: the only time-dependent input is
//! [`ValidationContext::today`], which the caller fixes once per batch.
//!
//! ## Processing Flow
//!
//! ```text
//! RecipientRequest → address check → required fields → defaults → NormalizedMessage
//! ```

pub mod address;

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::model::{
    ErrorKind, NormalizedMessage, RecipientRequest, StartupInvite, TeamInvite, TemplateKind,
    TemplatePayload, Welcome,
};

pub use address::normalize_address;

/// Role assigned to team invitees when the request names none.
pub const DEFAULT_TEAM_ROLE: &str = "member";

/// Why a recipient was rejected before reaching the provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid email address: {0:?}")]
    InvalidAddress(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            ValidationError::MissingField(_) => ErrorKind::MissingField,
        }
    }
}

/// Inputs for filling in optional fields.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    invite_base_url: Url,
    invite_expiry_days: u64,
    today: NaiveDate,
}

impl ValidationContext {
    /// Build a context, normalizing the base URL so relative joins append to it.
    pub fn new(
        invite_base_url: &str,
        invite_expiry_days: u64,
        today: NaiveDate,
    ) -> Result<Self, url::ParseError> {
        let mut base = invite_base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            invite_base_url: Url::parse(&base)?,
            invite_expiry_days,
            today,
        })
    }

    /// The same context evaluated on another day.
    pub fn at(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    fn default_expiry(&self) -> String {
        self.today
            .checked_add_days(Days::new(self.invite_expiry_days))
            .unwrap_or(self.today)
            .format("%Y-%m-%d")
            .to_string()
    }

    fn link(&self, path: &str, code: Option<&str>) -> String {
        let mut url = match self.invite_base_url.join(path) {
            Ok(url) => url,
            Err(_) => self.invite_base_url.clone(),
        };

        if let Some(code) = code {
            url.query_pairs_mut().append_pair("code", code);
        }

        url.to_string()
    }
}

/// Validate one recipient against its template kind.
pub fn validate(
    request: &RecipientRequest,
    ctx: &ValidationContext,
) -> Result<NormalizedMessage, ValidationError> {
    let address = normalize_address(&request.address)
        .ok_or_else(|| ValidationError::InvalidAddress(request.address.clone()))?;

    let kind = request.template_kind;
    let fields = &request.fields;

    for &name in kind.required_fields() {
        if optional(fields, name).is_none() {
            debug!(
                address = %address,
                template = kind.template_alias(),
                field = name,
                "validation_missing_field"
            );
            return Err(ValidationError::MissingField(name));
        }
    }

    let payload = match kind {
        TemplateKind::StartupInvite => {
            let invite_code = required(fields, "inviteCode")?;
            TemplatePayload::StartupInvite(StartupInvite {
                startup_name: required(fields, "startupName")?,
                program_name: required(fields, "programName")?,
                invite_link: optional(fields, "inviteLink")
                    .unwrap_or_else(|| ctx.link("invite/accept", Some(&invite_code))),
                expiry_date: optional(fields, "expiryDate")
                    .unwrap_or_else(|| ctx.default_expiry()),
                recipient_name: optional(fields, "recipientName"),
                invite_code,
            })
        }
        TemplateKind::TeamInvite => {
            let invite_code = required(fields, "inviteCode")?;
            TemplatePayload::TeamInvite(TeamInvite {
                startup_name: required(fields, "startupName")?,
                inviter_name: required(fields, "inviterName")?,
                role: optional(fields, "role").unwrap_or_else(|| DEFAULT_TEAM_ROLE.to_string()),
                invite_link: optional(fields, "inviteLink")
                    .unwrap_or_else(|| ctx.link("team/join", Some(&invite_code))),
                expiry_date: optional(fields, "expiryDate")
                    .unwrap_or_else(|| ctx.default_expiry()),
                invite_code,
            })
        }
        TemplateKind::Welcome => TemplatePayload::Welcome(Welcome {
            name: required(fields, "name")?,
            dashboard_link: optional(fields, "dashboardLink")
                .unwrap_or_else(|| ctx.link("dashboard", None)),
        }),
    };

    Ok(NormalizedMessage { address, payload })
}

/// Trimmed, non-blank value of an optional field.
fn optional(fields: &BTreeMap<String, String>, name: &str) -> Option<String> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Value of a field already checked against `required_fields`.
fn required(
    fields: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<String, ValidationError> {
    optional(fields, name).ok_or(ValidationError::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ValidationContext {
        ValidationContext::new(
            "https://app.example.com",
            30,
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        )
        .unwrap()
    }

    fn startup_invite() -> RecipientRequest {
        RecipientRequest::new("founder@acme.io", TemplateKind::StartupInvite)
            .with_field("startupName", "Acme")
            .with_field("programName", "Seed Cohort")
            .with_field("inviteCode", "INV 42")
    }

    #[test]
    fn test_invalid_address_rejected() {
        let request = RecipientRequest::new("not-an-email", TemplateKind::Welcome)
            .with_field("name", "A");

        let err = validate(&request, &ctx()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidAddress("not-an-email".to_string()));
        assert_eq!(err.kind(), ErrorKind::InvalidAddress);
    }

    #[test]
    fn test_missing_required_field() {
        let mut request = startup_invite();
        request.fields.remove("inviteCode");

        let err = validate(&request, &ctx()).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("inviteCode"));
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn test_blank_field_counts_as_missing() {
        let request = RecipientRequest::new("a@x.com", TemplateKind::Welcome).with_field("name", "   ");

        assert_eq!(
            validate(&request, &ctx()).unwrap_err(),
            ValidationError::MissingField("name")
        );
    }

    #[test]
    fn test_first_missing_field_reported() {
        let request = RecipientRequest::new("a@x.com", TemplateKind::TeamInvite)
            .with_field("inviteCode", "T1");

        assert_eq!(
            validate(&request, &ctx()).unwrap_err(),
            ValidationError::MissingField("startupName")
        );
    }

    #[test]
    fn test_startup_invite_defaults() {
        let message = validate(&startup_invite(), &ctx()).unwrap();

        match message.payload {
            TemplatePayload::StartupInvite(invite) => {
                assert_eq!(invite.startup_name, "Acme");
                assert_eq!(invite.expiry_date, "2026-02-14");
                assert_eq!(
                    invite.invite_link,
                    "https://app.example.com/invite/accept?code=INV+42"
                );
                assert_eq!(invite.recipient_name, None);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_provided_optional_fields_kept() {
        let request = startup_invite()
            .with_field("inviteLink", "https://custom.example/join")
            .with_field("expiryDate", "2026-03-01")
            .with_field("recipientName", " Jo ");

        let message = validate(&request, &ctx()).unwrap();
        match message.payload {
            TemplatePayload::StartupInvite(invite) => {
                assert_eq!(invite.invite_link, "https://custom.example/join");
                assert_eq!(invite.expiry_date, "2026-03-01");
                assert_eq!(invite.recipient_name.as_deref(), Some("Jo"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_team_invite_defaults() {
        let request = RecipientRequest::new("dev@acme.io", TemplateKind::TeamInvite)
            .with_field("startupName", "Acme")
            .with_field("inviterName", "Sam")
            .with_field("inviteCode", "T-7");

        let message = validate(&request, &ctx()).unwrap();
        match message.payload {
            TemplatePayload::TeamInvite(invite) => {
                assert_eq!(invite.role, DEFAULT_TEAM_ROLE);
                assert_eq!(invite.invite_link, "https://app.example.com/team/join?code=T-7");
                assert_eq!(invite.expiry_date, "2026-02-14");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_welcome_dashboard_link_respects_base_path() {
        let ctx = ValidationContext::new(
            "https://example.com/app",
            30,
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        )
        .unwrap();
        let request = RecipientRequest::new("a@x.com", TemplateKind::Welcome).with_field("name", "A");

        let message = validate(&request, &ctx).unwrap();
        assert_eq!(
            message.payload,
            TemplatePayload::Welcome(Welcome {
                name: "A".to_string(),
                dashboard_link: "https://example.com/app/dashboard".to_string(),
            })
        );
    }

    #[test]
    fn test_address_normalized() {
        let request = RecipientRequest::new(" Someone@Example.COM ", TemplateKind::Welcome)
            .with_field("name", "S");

        assert_eq!(validate(&request, &ctx()).unwrap().address, "Someone@example.com");
    }

    #[test]
    fn test_revalidating_normalized_message_is_noop() {
        let requests = vec![
            startup_invite(),
            RecipientRequest::new("Dev@Acme.IO", TemplateKind::TeamInvite)
                .with_field("startupName", "Acme")
                .with_field("inviterName", "Sam")
                .with_field("inviteCode", "T-7"),
            RecipientRequest::new("a@x.com", TemplateKind::Welcome).with_field("name", " A "),
        ];

        for request in requests {
            let first = validate(&request, &ctx()).unwrap();
            let second = validate(&first.to_request(), &ctx()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_validation_is_deterministic() {
        let request = startup_invite();
        assert_eq!(validate(&request, &ctx()), validate(&request, &ctx()));
    }
}
