//! Verification report model
//!
//! Reports are produced by the backend. The client never trusts the reported
//! overall status on its own: it is combined with the status derived from the
//! individual checks and the worse of the two is shown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

/// Overall verdict, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    Warning,
    Failed,
}

/// Result of looking the anchor up on chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainVerification {
    pub verified: bool,
    pub chain_name: String,
    pub contract_address: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorCheck {
    pub status: CheckStatus,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub on_chain: Option<OnChainVerification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub manifest_structure: CheckStatus,
    pub signature_valid: CheckStatus,
    pub hash_match: CheckStatus,
    #[serde(default)]
    pub blockchain_anchor: Option<AnchorCheck>,
}

impl VerificationChecks {
    /// Whether the manifest records an anchor that can be looked up on chain
    pub fn has_anchor(&self) -> bool {
        matches!(
            &self.blockchain_anchor,
            Some(AnchorCheck { status: CheckStatus::Pass, .. })
        )
    }

    pub fn on_chain(&self) -> Option<&OnChainVerification> {
        self.blockchain_anchor.as_ref().and_then(|a| a.on_chain.as_ref())
    }

    /// Status implied by the checks alone.
    ///
    /// A failed signature, hash or manifest check is FAILED. A skipped core
    /// check, a failed anchor check or an unverified on-chain lookup is
    /// WARNING.
    pub fn derive_status(&self) -> VerificationStatus {
        let core = [self.manifest_structure, self.signature_valid, self.hash_match];

        if core.contains(&CheckStatus::Fail) {
            return VerificationStatus::Failed;
        }
        if core.contains(&CheckStatus::Skip) {
            return VerificationStatus::Warning;
        }
        if let Some(anchor) = &self.blockchain_anchor {
            if anchor.status == CheckStatus::Fail {
                return VerificationStatus::Warning;
            }
            if anchor.on_chain.as_ref().map(|v| !v.verified).unwrap_or(false) {
                return VerificationStatus::Warning;
            }
        }
        VerificationStatus::Verified
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub video_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub public_key_fingerprint: Option<String>,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: DateTime<Utc>,
    pub status: VerificationStatus,
    pub checks: VerificationChecks,
    #[serde(default)]
    pub recording_info: RecordingSummary,
    #[serde(default)]
    pub signature_info: SignatureInfo,
}

impl VerificationReport {
    /// The worse of the reported status and the one derived from the checks
    pub fn effective_status(&self) -> VerificationStatus {
        self.status.max(self.checks.derive_status())
    }

    pub(crate) fn strip_on_chain(&mut self) {
        if let Some(anchor) = self.checks.blockchain_anchor.as_mut() {
            anchor.on_chain = None;
        }
    }
}
