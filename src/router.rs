use serde::{Deserialize, Serialize};

use crate::entities::MembershipStatus;
use crate::session::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Loading,
    Unauthenticated,
    /// `not_applied`: the membership application flow.
    ApplicationStart,
    /// `pending`: waiting on an admin decision.
    ApplicationReview,
    /// `approved`: the members area.
    Members,
    Rejected,
}

impl Screen {
    pub fn name(&self) -> String {
        match self {
            Self::Loading => "LOADING".into(),
            Self::Unauthenticated => "UNAUTHENTICATED".into(),
            Self::ApplicationStart => "APPLICATION_START".into(),
            Self::ApplicationReview => "APPLICATION_REVIEW".into(),
            Self::Members => "MEMBERS".into(),
            Self::Rejected => "REJECTED".into(),
        }
    }
}

pub fn route(state: &SessionState) -> Screen {
    if state.loading {
        return Screen::Loading;
    }

    let identity = match &state.identity {
        Some(identity) => identity,
        None => return Screen::Unauthenticated,
    };

    let status = state
        .profile
        .as_ref()
        .map(|profile| profile.membership_status.clone())
        .unwrap_or_else(MembershipStatus::missing);

    match status {
        MembershipStatus::NotApplied => Screen::ApplicationStart,
        MembershipStatus::Pending => Screen::ApplicationReview,
        MembershipStatus::Approved => Screen::Members,
        MembershipStatus::Rejected => Screen::Rejected,
        MembershipStatus::Unrecognized(raw) => {
            // lenient fallback; the members area still enforces approval per call
            tracing::warn!(
                "unrecognized membership status {:?} for {}, routing to members",
                raw,
                identity.id
            );
            Screen::Members
        }
    }
}

#[cfg(test)]
fn signed_in(status: Option<MembershipStatus>) -> SessionState {
    use crate::entities::{Identity, Profile};

    let identity = Identity::new("u1", None, None);
    let profile = status.map(|status| {
        let mut profile = Profile::new_default(&identity, "Miami");
        profile.membership_status = status;
        profile
    });

    SessionState {
        identity: Some(identity),
        profile,
        loading: false,
        submitting: false,
    }
}

#[test]
fn each_status_has_its_screen() {
    let cases = [
        (MembershipStatus::NotApplied, Screen::ApplicationStart),
        (MembershipStatus::Pending, Screen::ApplicationReview),
        (MembershipStatus::Approved, Screen::Members),
        (MembershipStatus::Rejected, Screen::Rejected),
    ];

    for (status, screen) in cases {
        assert_eq!(route(&signed_in(Some(status))), screen);
    }
}

#[test]
fn unknown_or_missing_status_falls_back_to_members() {
    let unknown = signed_in(Some(MembershipStatus::Unrecognized("vip".into())));
    assert_eq!(route(&unknown), Screen::Members);

    let missing = signed_in(Some(MembershipStatus::missing()));
    assert_eq!(route(&missing), Screen::Members);

    assert_eq!(route(&signed_in(None)), Screen::Members);
}

#[test]
fn transient_states() {
    assert_eq!(route(&SessionState::default()), Screen::Loading);

    let signed_out = SessionState {
        loading: false,
        ..SessionState::default()
    };
    assert_eq!(route(&signed_out), Screen::Unauthenticated);

    let mut loading = signed_in(Some(MembershipStatus::Approved));
    loading.loading = true;
    assert_eq!(route(&loading), Screen::Loading);
}
