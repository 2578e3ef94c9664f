use serde::{Deserialize, Serialize};

use crate::entities::{CancelOutcome, ReserveOutcome};
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Success,
    Info,
    Error,
}

/// A user-dismissable notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub kind: AlertKind,
}

impl Alert {
    pub fn new(title: &str, message: &str, kind: AlertKind) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn success(title: &str, message: &str) -> Self {
        Self::new(title, message, AlertKind::Success)
    }

    pub fn info(title: &str, message: &str) -> Self {
        Self::new(title, message, AlertKind::Info)
    }

    pub fn error(title: &str, message: &str) -> Self {
        Self::new(title, message, AlertKind::Error)
    }

    /// Errors written for people keep their message; everything else shows
    /// `fallback`.
    pub fn from_error(title: &str, err: &Error, fallback: &str) -> Self {
        match err.is_displayable() {
            true => Self::error(title, &err.message),
            false => Self::error(title, fallback),
        }
    }

    pub fn reservation(outcome: ReserveOutcome) -> Self {
        match outcome {
            ReserveOutcome::Reserved => Self::success(
                "Reservation Confirmed",
                "You have successfully reserved a spot",
            ),
            ReserveOutcome::AlreadyReserved => Self::info(
                "Already Reserved",
                "You already have a reservation for this event",
            ),
            ReserveOutcome::Full => Self::info("Event Full", "This event is now at capacity"),
            ReserveOutcome::Error => {
                Self::error("Error", "Failed to reserve spot. Please try again.")
            }
        }
    }

    pub fn cancellation(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::Canceled => Self::success(
                "Reservation Canceled",
                "Your reservation has been canceled",
            ),
            CancelOutcome::NotAttending => {
                Self::info("Not Attending", "You are not registered for this event")
            }
            CancelOutcome::Error => Self::error(
                "Error",
                "Failed to cancel reservation. Please try again.",
            ),
        }
    }
}

#[test]
fn outcomes_have_fixed_alerts() {
    let alert = Alert::reservation(ReserveOutcome::Full);
    assert_eq!(alert.title, "Event Full");
    assert_eq!(alert.kind, AlertKind::Info);

    let alert = Alert::cancellation(CancelOutcome::Error);
    assert_eq!(alert.kind, AlertKind::Error);
    assert_eq!(alert.message, "Failed to cancel reservation. Please try again.");
}

#[test]
fn internal_errors_are_not_shown() {
    use crate::error::{database_error, wrong_password_error};

    let alert = Alert::from_error(
        "Error",
        &database_error("connection reset"),
        "Failed to update profile. Please try again.",
    );
    assert_eq!(alert.message, "Failed to update profile. Please try again.");

    let alert = Alert::from_error("Sign In Error", &wrong_password_error(), "unused");
    assert_eq!(alert.message, "Incorrect password");
}

#[test]
fn condition_errors_show_the_fallback() {
    use crate::error::{
        invalid_state_error, not_found_error, unauthorized_error, validation_error,
    };

    let fallback = "Failed to update profile. Please try again.";

    for err in [unauthorized_error(), not_found_error(), invalid_state_error()] {
        assert_eq!(Alert::from_error("Error", &err, fallback).message, fallback);
    }

    let err = validation_error("Company is required".into());
    assert_eq!(
        Alert::from_error("Error", &err, fallback).message,
        "Company is required"
    );
}
