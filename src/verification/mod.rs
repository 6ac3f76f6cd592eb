//! Recording verification

pub mod flow;
pub mod report;

pub use flow::{VerificationError, VerificationPhase, VerificationSession};
pub use report::{
    AnchorCheck, CheckStatus, OnChainVerification, RecordingSummary, SignatureInfo,
    VerificationChecks, VerificationReport, VerificationStatus,
};
