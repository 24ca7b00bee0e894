use crate::Request;

/// Records requests before they are processed. Auditing is best effort and
/// cannot stop a request.
pub trait Auditor: Send + Sync {
    fn audit_request(&self, request: &Request);
}

/// Writes one structured log line per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditor;

impl Auditor for LogAuditor {
    fn audit_request(&self, request: &Request) {
        tracing::info!(
            requestid = %request.uniqid,
            caller = %request.caller,
            sender = %request.sender,
            agent = %request.agent,
            action = %request.action,
            "audit"
        );
    }
}

/// Discards audit records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditor;

impl Auditor for NoopAuditor {
    fn audit_request(&self, _request: &Request) {}
}
