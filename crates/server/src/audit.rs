use leadline_core::audit::{AuditEvent, AuditSink};
use tracing::info;

/// Writes audit events to the structured log; there is no audit table.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = "audit.event",
            audit_event = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            tenant_id = %event.tenant_id,
            lead_id = ?event.lead_id.as_ref().map(ToString::to_string),
            conversation_id = ?event.conversation_id,
            correlation_id = %event.correlation_id,
            actor = %event.actor,
            metadata = %metadata,
        );
    }
}
