use serde::{Deserialize, Serialize};

/// Payment status.
///
/// `Pending -> Authorized -> Captured` on success, `Pending -> Rejected |
/// Failed` on failure. `Captured`, `Rejected`, `Failed` and `Canceled` are
/// terminal; events that would move a terminal payment are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Authorized,
    Captured,
    Rejected,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Captured
                | PaymentStatus::Rejected
                | PaymentStatus::Failed
                | PaymentStatus::Canceled
        )
    }

    /// Money has been (or will be) collected.
    pub fn is_success(&self) -> bool {
        matches!(self, PaymentStatus::Authorized | PaymentStatus::Captured)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Rejected | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    /// Parses a provider-reported status, case-insensitively.
    pub fn parse(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "authorized" => Some(PaymentStatus::Authorized),
            "captured" => Some(PaymentStatus::Captured),
            "rejected" => Some(PaymentStatus::Rejected),
            "failed" => Some(PaymentStatus::Failed),
            "canceled" | "cancelled" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_provider_spellings() {
        assert_eq!(PaymentStatus::parse("CAPTURED"), Some(PaymentStatus::Captured));
        assert_eq!(PaymentStatus::parse("cancelled"), Some(PaymentStatus::Canceled));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }

    #[test]
    fn authorized_is_success_but_not_terminal() {
        assert!(PaymentStatus::Authorized.is_success());
        assert!(!PaymentStatus::Authorized.is_terminal());
        assert!(PaymentStatus::Captured.is_terminal());
    }
}
