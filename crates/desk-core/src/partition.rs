use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition key for records created through the invite/guest channel.
/// Guest-authored records land here so the support view merges them exactly
/// like authenticated client records.
pub const GUEST_PARTITION: &str = "client:guest";

/// Partition key for the shared support-side view.
pub const SUPPORT_PARTITION: &str = "support";

/// Viewer session as supplied by the authentication collaborator. The sync
/// engine never derives identity itself; it only maps a session to the
/// partition its records live in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "role")]
pub enum ViewerSession {
    Support,
    Client {
        #[serde(rename = "companyId")]
        company_id: String,
    },
    Guest {
        #[serde(rename = "inviteCode")]
        invite_code: String,
    },
}

impl ViewerSession {
    /// Pure derivation of the partition key from role and identity.
    pub fn partition_key(&self) -> String {
        match self {
            ViewerSession::Support => SUPPORT_PARTITION.to_string(),
            ViewerSession::Client { company_id } => {
                format!("client:{}", normalize_company_id(company_id))
            }
            // Guests share one well-known partition regardless of invite
            // code; the code only scopes the chat channel, not the data.
            ViewerSession::Guest { .. } => GUEST_PARTITION.to_string(),
        }
    }

    pub fn is_support(&self) -> bool {
        matches!(self, ViewerSession::Support)
    }
}

impl fmt::Display for ViewerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerSession::Support => f.write_str("support"),
            ViewerSession::Client { company_id } => write!(f, "client:{company_id}"),
            ViewerSession::Guest { invite_code } => write!(f, "guest:{invite_code}"),
        }
    }
}

fn normalize_company_id(company_id: &str) -> String {
    company_id.trim().to_lowercase()
}
