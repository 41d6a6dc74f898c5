//! User snapshot types.
//!
//! A [`UserSnapshot`] is the subset of a user record the bot reads on almost
//! every message. It is what the session cache stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Timestamp, UserId, ValidationError};

/// Which persona the user chatted with last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPreference {
    #[default]
    Female,
    Male,
}

impl GenderPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Female => "female",
            Self::Male => "male",
        }
    }
}

impl fmt::Display for GenderPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenderPreference {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "female" => Ok(Self::Female),
            "male" => Ok(Self::Male),
            other => Err(ValidationError::InvalidValue {
                field: "gender_preference".to_string(),
                reason: format!("unknown preference '{}'", other),
            }),
        }
    }
}

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Free,
    Premium,
}

impl SubscriptionStatus {
    pub fn is_premium(&self) -> bool {
        matches!(self, Self::Premium)
    }
}

/// Cached view of a user record.
///
/// `daily_message_count` is carried for display only. Quota checks always
/// read the store, and the session cache zeroes it on insert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub consent_given: bool,
    pub gender_preference: GenderPreference,
    pub subscription_status: SubscriptionStatus,
    pub subscription_expires_at: Option<Timestamp>,
    pub daily_message_count: u32,
    /// One-shot guard for the restart command.
    pub is_restarted: bool,
    /// One-shot guard for the stop / delete-me command.
    pub is_stopped: bool,
}

impl UserSnapshot {
    /// A zero-value snapshot for a user the bot knows nothing about.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Whether the subscription is premium and not yet expired at `now`.
    pub fn has_active_subscription(&self, now: Timestamp) -> bool {
        self.subscription_status.is_premium()
            && self.subscription_expires_at.is_none_or(|exp| exp > now)
    }
}

/// A single mutable snapshot field with its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserField {
    Username(Option<String>),
    FirstName(Option<String>),
    LastName(Option<String>),
    ConsentGiven(bool),
    GenderPreference(GenderPreference),
    SubscriptionStatus(SubscriptionStatus),
    SubscriptionExpiresAt(Option<Timestamp>),
    IsRestarted(bool),
    IsStopped(bool),
}

impl UserField {
    /// Write this field into `snapshot`.
    pub fn apply(self, snapshot: &mut UserSnapshot) {
        match self {
            Self::Username(v) => snapshot.username = v,
            Self::FirstName(v) => snapshot.first_name = v,
            Self::LastName(v) => snapshot.last_name = v,
            Self::ConsentGiven(v) => snapshot.consent_given = v,
            Self::GenderPreference(v) => snapshot.gender_preference = v,
            Self::SubscriptionStatus(v) => snapshot.subscription_status = v,
            Self::SubscriptionExpiresAt(v) => snapshot.subscription_expires_at = v,
            Self::IsRestarted(v) => snapshot.is_restarted = v,
            Self::IsStopped(v) => snapshot.is_stopped = v,
        }
    }

    /// Field name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Username(_) => "username",
            Self::FirstName(_) => "first_name",
            Self::LastName(_) => "last_name",
            Self::ConsentGiven(_) => "consent_given",
            Self::GenderPreference(_) => "gender_preference",
            Self::SubscriptionStatus(_) => "subscription_status",
            Self::SubscriptionExpiresAt(_) => "subscription_expires_at",
            Self::IsRestarted(_) => "is_restarted",
            Self::IsStopped(_) => "is_stopped",
        }
    }
}

/// Update payload for user records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub consent_given: Option<bool>,
    pub gender_preference: Option<GenderPreference>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub subscription_expires_at: Option<Timestamp>,
}

impl UserUpdate {
    /// The snapshot fields this update touches.
    pub fn fields(&self) -> Vec<UserField> {
        let mut fields = Vec::new();
        if let Some(v) = self.consent_given {
            fields.push(UserField::ConsentGiven(v));
        }
        if let Some(v) = self.gender_preference {
            fields.push(UserField::GenderPreference(v));
        }
        if let Some(v) = self.subscription_status {
            fields.push(UserField::SubscriptionStatus(v));
        }
        if let Some(v) = self.subscription_expires_at {
            fields.push(UserField::SubscriptionExpiresAt(Some(v)));
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}
