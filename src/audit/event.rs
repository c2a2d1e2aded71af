//! Audit Events
//!
//! The caller-supplied description of something that happened. Events are
//! validated and then turned into chain-linked [`AuditEntry`] records.
//!
//! [`AuditEntry`]: crate::audit::entry::AuditEntry

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_OUTCOME: &str = "success";

fn default_outcome() -> String {
    DEFAULT_OUTCOME.to_string()
}

/// A single field-level change: old and new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    #[serde(default)]
    pub old_value: Value,
    #[serde(default)]
    pub new_value: Value,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// Who did what, to what, with what outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub action: String,
    #[serde(default = "default_outcome")]
    pub outcome: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    #[serde(default)]
    pub reason_for_change: Option<String>,
    #[serde(default)]
    pub business_justification: Option<String>,
    #[serde(default)]
    pub supervisor_approval: Option<String>,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    #[serde(default)]
    pub user_signature: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        user_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            user_role: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            action: action.into(),
            outcome: default_outcome(),
            details: BTreeMap::new(),
            reason_for_change: None,
            business_justification: None,
            supervisor_approval: None,
            changes: Vec::new(),
            user_signature: None,
        }
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_change(mut self, change: FieldChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_session(
        mut self,
        user_role: impl Into<String>,
        session_id: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.user_role = Some(user_role.into());
        self.session_id = Some(session_id.into());
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_justification(
        mut self,
        reason_for_change: impl Into<String>,
        business_justification: impl Into<String>,
    ) -> Self {
        self.reason_for_change = Some(reason_for_change.into());
        self.business_justification = Some(business_justification.into());
        self
    }

    pub fn with_supervisor_approval(mut self, approval: impl Into<String>) -> Self {
        self.supervisor_approval = Some(approval.into());
        self
    }

    pub fn with_user_signature(mut self, signature: impl Into<String>) -> Self {
        self.user_signature = Some(signature.into());
        self
    }

    /// Check the correlation fields every entry must carry.
    pub fn validate(&self) -> LedgerResult<()> {
        let required = [
            ("eventType", &self.event_type),
            ("resourceType", &self.resource_type),
            ("resourceId", &self.resource_id),
            ("userId", &self.user_id),
            ("action", &self.action),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(LedgerError::missing_field(name));
            }
        }

        if self.outcome.trim().is_empty() {
            return Err(LedgerError::missing_field("outcome"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_defaults_to_success() {
        let event: AuditEvent = serde_json::from_value(json!({
            "eventType": "data_access",
            "resourceType": "sample",
            "resourceId": "S-1",
            "userId": "u1",
            "action": "read"
        }))
        .unwrap();

        assert_eq!(event.outcome, "success");
        assert!(event.details.is_empty());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_missing_user_is_rejected() {
        let event = AuditEvent::new("data_access", "sample", "S-1", "  ", "read");
        match event.validate() {
            Err(LedgerError::ValidationError(msg)) => assert!(msg.contains("userId")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let event = AuditEvent::new("data_change", "sample", "S-1", "u1", "update")
            .with_outcome("failure")
            .with_detail("reason", json!("instrument offline"))
            .with_change(FieldChange::new("status", json!("queued"), json!("failed")))
            .with_supervisor_approval("sup-7");

        assert_eq!(event.outcome, "failure");
        assert_eq!(event.details["reason"], json!("instrument offline"));
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.supervisor_approval.as_deref(), Some("sup-7"));
    }
}
