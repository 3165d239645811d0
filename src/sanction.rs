//! Sanction records and their approval state machine
use chrono::Utc;

use crate::error::SanctionError;
use crate::types::{Action, ApprovalMode, Resolution, SanctionKind, SanctionState, TimeStamp};

/// A user whose approval is required, with the tokens emailed to them.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Authorizer {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub approval_token: String,
    #[n(2)]
    pub rejection_token: String,
    #[n(3)]
    pub has_approved: bool,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Sanction {
    #[n(0)]
    pub id: String, // bech32, prefixed by kind
    #[n(1)]
    pub kind: SanctionKind,
    #[n(2)]
    pub state: SanctionState,
    #[n(3)]
    pub initiation_date: TimeStamp<Utc>,
    #[n(4)]
    pub end_date: Option<TimeStamp<Utc>>, // embargoes only
    #[n(5)]
    pub initiated_by: String,
    #[n(6)]
    pub mode: ApprovalMode,
    #[n(7)]
    pub authorizers: Vec<Authorizer>,
    #[n(8)]
    pub justification: Option<String>, // retractions only
}

/// Outcome of a successful approve/reject call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approved,
    Rejected,
    // approval noted, other authorizers still pending
    Recorded,
}

impl Transition {
    pub fn changes_state(&self) -> bool {
        !matches!(self, Self::Recorded)
    }
}

impl Sanction {
    pub fn new(
        id: String,
        kind: SanctionKind,
        initiated_by: String,
        initiation_date: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            state: SanctionState::Unapproved,
            initiation_date,
            end_date: None,
            initiated_by,
            mode: ApprovalMode::default(),
            authorizers: vec![],
            justification: None,
        }
    }

    pub fn with_end_date(mut self, end_date: TimeStamp<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_mode(mut self, mode: ApprovalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_justification(mut self, justification: String) -> Self {
        self.justification = Some(justification);
        self
    }

    pub fn add_authorizer(&mut self, user_id: String, approval_token: String, rejection_token: String) {
        self.authorizers.push(Authorizer {
            user_id,
            approval_token,
            rejection_token,
            has_approved: false,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.state == SanctionState::Unapproved
    }

    pub fn is_approved(&self) -> bool {
        self.state == SanctionState::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.state == SanctionState::Rejected
    }

    pub fn is_completed(&self) -> bool {
        self.state == SanctionState::Completed
    }

    /// `None` while pending. A completed embargo counts as approved.
    pub fn resolution(&self) -> Option<Resolution> {
        match self.state {
            SanctionState::Unapproved => None,
            SanctionState::Approved | SanctionState::Completed => Some(Resolution::Approved),
            SanctionState::Rejected => Some(Resolution::Rejected),
        }
    }

    /// Fails with `AlreadyResolved` unless the sanction is still pending.
    pub fn ensure_pending(&self) -> Result<(), SanctionError> {
        match self.resolution() {
            None => Ok(()),
            Some(resolution) => Err(SanctionError::AlreadyResolved {
                kind: self.kind,
                sanction_id: self.id.clone(),
                resolution,
            }),
        }
    }

    pub fn approve(&mut self, user_id: &str, token: &str) -> Result<Transition, SanctionError> {
        self.ensure_pending()?;
        let display = self.kind.display_name();
        let mode = self.mode;
        let authorizer = self.authorizer_mut(user_id, Action::Approve)?;
        if authorizer.approval_token != token {
            return Err(SanctionError::Token {
                message_short: "Invalid token".to_string(),
                message_long: format!("This {display} approval link is invalid."),
            });
        }
        authorizer.has_approved = true;

        let everyone_approved = self.authorizers.iter().all(|a| a.has_approved);
        if mode == ApprovalMode::Any || everyone_approved {
            self.transition(SanctionState::Approved)?;
            return Ok(Transition::Approved);
        }
        Ok(Transition::Recorded)
    }

    pub fn reject(&mut self, user_id: &str, token: &str) -> Result<Transition, SanctionError> {
        self.ensure_pending()?;
        let display = self.kind.display_name();
        let authorizer = self.authorizer_mut(user_id, Action::Reject)?;
        if authorizer.rejection_token != token {
            return Err(SanctionError::Token {
                message_short: "Invalid token".to_string(),
                message_long: format!("This {display} disapproval link is invalid."),
            });
        }
        self.transition(SanctionState::Rejected)?;
        Ok(Transition::Rejected)
    }

    /// Replaces an authorizer's tokens while the sanction is pending. The old
    /// tokens stop matching; an approval already recorded is kept.
    pub fn reissue_tokens(
        &mut self,
        user_id: &str,
        approval_token: String,
        rejection_token: String,
    ) -> Result<(), SanctionError> {
        self.ensure_pending()?;
        let authorizer = self.authorizer_mut(user_id, Action::Approve)?;
        authorizer.approval_token = approval_token;
        authorizer.rejection_token = rejection_token;
        Ok(())
    }

    /// Approval on behalf of nobody, once the pending window has elapsed.
    pub fn auto_approve(&mut self) -> Result<(), SanctionError> {
        self.transition(SanctionState::Approved)
    }

    /// Marks an elapsed embargo as over.
    pub fn complete(&mut self) -> Result<(), SanctionError> {
        if self.kind != SanctionKind::Embargo {
            return Err(SanctionError::InvalidTransition {
                from: self.state,
                to: SanctionState::Completed,
            });
        }
        self.transition(SanctionState::Completed)
    }

    /// Rejects without a token, used when the registration was deleted
    /// before the sanction resolved.
    pub fn forcibly_reject(&mut self) -> Result<(), SanctionError> {
        self.transition(SanctionState::Rejected)
    }

    fn transition(&mut self, next: SanctionState) -> Result<(), SanctionError> {
        if !self.state.can_transition_to(next) {
            return Err(SanctionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn authorizer_mut(&mut self, user_id: &str, action: Action) -> Result<&mut Authorizer, SanctionError> {
        self.authorizers
            .iter_mut()
            .find(|a| a.user_id == user_id)
            .ok_or_else(|| SanctionError::Permissions {
                user_id: user_id.to_string(),
                action,
            })
    }
}
