//! Registration snapshots and the audit log kept on their originating project
use chrono::Utc;

use crate::types::{Action, SanctionKind, TimeStamp};

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Registration {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub registered_from: String, // id of the project this snapshot was taken from
    #[n(2)]
    pub registered_date: TimeStamp<Utc>,
    #[n(3)]
    pub is_public: bool,
    #[n(4)]
    pub is_deleted: bool,
    #[n(5)]
    pub is_retracted: bool,
    #[n(6)]
    pub is_pending_embargo: bool,
    #[n(7)]
    pub registration_approval: Option<String>,
    #[n(8)]
    pub embargo: Option<String>,
    #[n(9)]
    pub retraction: Option<String>,
}

impl Registration {
    pub fn new(id: String, registered_from: String, registered_date: TimeStamp<Utc>) -> Self {
        Self {
            id,
            registered_from,
            registered_date,
            is_public: false,
            is_deleted: false,
            is_retracted: false,
            is_pending_embargo: false,
            registration_approval: None,
            embargo: None,
            retraction: None,
        }
    }

    pub fn sanction_id(&self, kind: SanctionKind) -> Option<&str> {
        match kind {
            SanctionKind::RegistrationApproval => self.registration_approval.as_deref(),
            SanctionKind::Embargo => self.embargo.as_deref(),
            SanctionKind::Retraction => self.retraction.as_deref(),
        }
    }

    pub fn set_sanction(&mut self, kind: SanctionKind, sanction_id: String) {
        let slot = match kind {
            SanctionKind::RegistrationApproval => &mut self.registration_approval,
            SanctionKind::Embargo => &mut self.embargo,
            SanctionKind::Retraction => &mut self.retraction,
        };
        *slot = Some(sanction_id);
    }

    /// Listed among recent registrations: public, live, not withdrawn or
    /// waiting on an embargo.
    pub fn is_listable(&self) -> bool {
        self.is_public && !self.is_deleted && !self.is_retracted && !self.is_pending_embargo
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum LogAction {
    #[n(0)]
    RegistrationApprovalInitiated,
    #[n(1)]
    RegistrationApprovalApproved,
    #[n(2)]
    RegistrationApprovalCancelled,
    #[n(3)]
    EmbargoInitiated,
    #[n(4)]
    EmbargoApproved,
    #[n(5)]
    EmbargoCancelled,
    #[n(6)]
    EmbargoCompleted,
    #[n(7)]
    RetractionInitiated,
    #[n(8)]
    RetractionApproved,
    #[n(9)]
    RetractionCancelled,
}

impl LogAction {
    pub fn initiated(kind: SanctionKind) -> Self {
        match kind {
            SanctionKind::RegistrationApproval => Self::RegistrationApprovalInitiated,
            SanctionKind::Embargo => Self::EmbargoInitiated,
            SanctionKind::Retraction => Self::RetractionInitiated,
        }
    }

    pub fn resolved(kind: SanctionKind, action: Action) -> Self {
        match (kind, action) {
            (SanctionKind::RegistrationApproval, Action::Approve) => {
                Self::RegistrationApprovalApproved
            }
            (SanctionKind::RegistrationApproval, Action::Reject) => {
                Self::RegistrationApprovalCancelled
            }
            (SanctionKind::Embargo, Action::Approve) => Self::EmbargoApproved,
            (SanctionKind::Embargo, Action::Reject) => Self::EmbargoCancelled,
            (SanctionKind::Retraction, Action::Approve) => Self::RetractionApproved,
            (SanctionKind::Retraction, Action::Reject) => Self::RetractionCancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationApprovalInitiated => "REGISTRATION_APPROVAL_INITIATED",
            Self::RegistrationApprovalApproved => "REGISTRATION_APPROVAL_APPROVED",
            Self::RegistrationApprovalCancelled => "REGISTRATION_APPROVAL_CANCELLED",
            Self::EmbargoInitiated => "EMBARGO_INITIATED",
            Self::EmbargoApproved => "EMBARGO_APPROVED",
            Self::EmbargoCancelled => "EMBARGO_CANCELLED",
            Self::EmbargoCompleted => "EMBARGO_COMPLETED",
            Self::RetractionInitiated => "RETRACTION_INITIATED",
            Self::RetractionApproved => "RETRACTION_APPROVED",
            Self::RetractionCancelled => "RETRACTION_CANCELLED",
        }
    }
}

/// Audit entry appended to the originating project. `user` is `None` for
/// transitions made by the sweeper.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct NodeLog {
    #[n(0)]
    pub project_id: String,
    #[n(1)]
    pub action: LogAction,
    #[n(2)]
    pub registration_id: String,
    #[n(3)]
    pub sanction_id: String,
    #[n(4)]
    pub user: Option<String>,
    #[n(5)]
    pub date: TimeStamp<Utc>,
}

impl NodeLog {
    pub fn new(
        registration: &Registration,
        action: LogAction,
        sanction_id: &str,
        user: Option<&str>,
    ) -> Self {
        Self {
            project_id: registration.registered_from.clone(),
            action,
            registration_id: registration.id.clone(),
            sanction_id: sanction_id.to_string(),
            user: user.map(str::to_string),
            date: TimeStamp::new(),
        }
    }

    /// CBOR encoding of this entry together with its sha256 digest.
    pub fn build(&self) -> Result<(String, Vec<u8>), minicbor::encode::Error<std::convert::Infallible>> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
