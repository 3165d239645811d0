//! Core sanction vocabulary: kinds, states, actions and timestamps
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SanctionError;

pub const BAD_REQUEST: u16 = 400;
pub const UNAUTHORIZED: u16 = 401;
pub const NOT_FOUND: u16 = 404;
pub const GONE: u16 = 410;
pub const INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
pub enum SanctionKind {
    #[n(0)]
    #[serde(rename = "registration")]
    RegistrationApproval,
    #[n(1)]
    #[serde(rename = "embargo")]
    Embargo,
    #[n(2)]
    #[serde(rename = "retraction")]
    Retraction,
}

/// Sanction state. `Completed` is only reachable by embargoes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionState {
    #[n(0)]
    Unapproved,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Approve,
    Reject,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalMode {
    // first valid approval wins
    #[n(0)]
    #[default]
    Any,
    #[n(1)]
    Unanimous,
}

/// How an already terminal sanction was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Approved,
    Rejected,
}

/// Which node a successful action redirects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    Registration,
    OriginalProject,
}

impl SanctionKind {
    pub const ALL: [SanctionKind; 3] = [
        SanctionKind::RegistrationApproval,
        SanctionKind::Embargo,
        SanctionKind::Retraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationApproval => "registration",
            Self::Embargo => "embargo",
            Self::Retraction => "retraction",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RegistrationApproval => "approval",
            Self::Embargo => "embargo",
            Self::Retraction => "retraction",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::RegistrationApproval => "approval_",
            Self::Embargo => "embargo_",
            Self::Retraction => "retraction_",
        }
    }

    /// Kind named by a sanction id's prefix.
    pub fn from_id(sanction_id: &str) -> Option<SanctionKind> {
        Self::ALL
            .into_iter()
            .find(|kind| sanction_id.starts_with(kind.id_prefix()))
    }

    /// Whether the sweeper approves this kind once the pending window elapsed.
    pub fn auto_approves(&self) -> bool {
        match self {
            Self::RegistrationApproval | Self::Embargo => true,
            Self::Retraction => false,
        }
    }

    /// Retractions redirect the other way round: approval lands on the
    /// original project, rejection on the registration.
    pub fn redirect_target(&self, action: Action) -> RedirectTarget {
        match (*self, action) {
            (Self::RegistrationApproval, Action::Approve) => RedirectTarget::Registration,
            (Self::RegistrationApproval, Action::Reject) => RedirectTarget::OriginalProject,
            (Self::Embargo, Action::Approve) => RedirectTarget::Registration,
            (Self::Embargo, Action::Reject) => RedirectTarget::OriginalProject,
            (Self::Retraction, Action::Approve) => RedirectTarget::OriginalProject,
            (Self::Retraction, Action::Reject) => RedirectTarget::Registration,
        }
    }

    /// Status code returned when an action targets an already resolved
    /// sanction. The 400/410 split is swapped for retractions.
    pub fn already_resolved_status(&self, resolution: Resolution) -> u16 {
        match (*self, resolution) {
            (Self::RegistrationApproval, Resolution::Approved) => BAD_REQUEST,
            (Self::RegistrationApproval, Resolution::Rejected) => GONE,
            (Self::Embargo, Resolution::Approved) => BAD_REQUEST,
            (Self::Embargo, Resolution::Rejected) => GONE,
            (Self::Retraction, Resolution::Approved) => GONE,
            (Self::Retraction, Resolution::Rejected) => BAD_REQUEST,
        }
    }
}

impl fmt::Display for SanctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SanctionKind {
    type Err = SanctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(Self::RegistrationApproval),
            "embargo" => Ok(Self::Embargo),
            "retraction" => Ok(Self::Retraction),
            other => Err(SanctionError::UnsupportedHandlerKind(other.to_string())),
        }
    }
}

impl SanctionState {
    /// Edges of the sanction state graph. Nothing ever returns to `Unapproved`.
    pub fn can_transition_to(&self, next: SanctionState) -> bool {
        matches!(
            (*self, next),
            (Self::Unapproved, Self::Approved)
                | (Self::Unapproved, Self::Rejected)
                | (Self::Approved, Self::Completed)
                | (Self::Approved, Self::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = SanctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(SanctionError::Token {
                message_short: "Invalid action".to_string(),
                message_long: format!("'{other}' is not a valid sanction action."),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// `Utc` has no ordering of its own, so order by the instant.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Time elapsed between this timestamp and `now`
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp<Utc> {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
