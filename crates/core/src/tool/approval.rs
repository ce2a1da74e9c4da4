use std::fmt::{self, Debug, Display};

/// The user's answer to an [`Approval`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalResult {
    /// Whether the call may run.
    pub approved: bool,
    /// Why it was rejected, if the user said so.
    pub why: Option<String>,
}

/// Approval for a tool call request.
///
/// Dropping an approval without answering it rejects the call.
pub struct Approval {
    what: String,
    justification: String,
    on_result: Option<Box<dyn FnOnce(ApprovalResult) + Send>>,
}

impl Approval {
    /// Creates a new approval.
    #[inline]
    pub fn new<S1: Into<String>, S2: Into<String>>(
        what: S1,
        justification: S2,
    ) -> Self {
        Self {
            what: what.into(),
            justification: justification.into(),
            on_result: None,
        }
    }

    pub(crate) fn set_responder(
        &mut self,
        on_result: impl FnOnce(ApprovalResult) + Send + 'static,
    ) {
        self.on_result = Some(Box::new(on_result));
    }

    /// Returns what the approval is for.
    #[inline]
    pub fn what(&self) -> &str {
        &self.what
    }

    /// Returns the justification for the approval.
    #[inline]
    pub fn justification(&self) -> &str {
        &self.justification
    }

    /// Approves the request.
    #[inline]
    pub fn approve(self) {
        self.respond(ApprovalResult {
            approved: true,
            why: None,
        });
    }

    /// Rejects the request with an optional reason.
    #[inline]
    pub fn reject(self, reason: Option<String>) {
        self.respond(ApprovalResult {
            approved: false,
            why: reason,
        });
    }

    fn respond(self, result: ApprovalResult) {
        if let Some(on_result) = self.on_result {
            on_result(result);
        }
    }
}

impl Debug for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Approval")
            .field("what", &self.what)
            .field("justification", &self.justification)
            .finish_non_exhaustive()
    }
}

impl Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{} ({})", self.what, self.justification))
    }
}
