mod application;
mod event;
mod identity;
mod profile;
mod showcase;

pub use application::{canonical_handle, ApplicationForm, Field, ValidationErrors};
pub use event::{
    normalize_category, CancelOutcome, Event, EventDraft, EventPatch, EventStatus,
    ReserveOutcome, Rsvp,
};
pub use identity::{is_valid_email, Identity, UserId};
pub use profile::{
    invite_code_for, Application, Decision, MembershipStatus, MembershipType, Profile,
    ProfilePatch, Role,
};
pub use showcase::{catalog as showcase_catalog, ShowcaseEntry, ShowcaseEvent};

#[cfg(test)]
pub(crate) use application::sample_form;
#[cfg(test)]
pub(crate) use event::sample_event;
#[cfg(test)]
pub(crate) use profile::sample_application;
