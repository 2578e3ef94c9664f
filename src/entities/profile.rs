use chrono::{DateTime, Duration, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};

use crate::entities::{Identity, UserId};
use crate::error::{invalid_state_error, Error};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MembershipStatus {
    NotApplied,
    Pending,
    Approved,
    Rejected,
    /// Any stored value this client does not know, including a missing one.
    Unrecognized(String),
}

impl MembershipStatus {
    pub fn name(&self) -> String {
        match self {
            Self::NotApplied => "not_applied".into(),
            Self::Pending => "pending".into(),
            Self::Approved => "approved".into(),
            Self::Rejected => "rejected".into(),
            Self::Unrecognized(raw) => raw.clone(),
        }
    }

    pub fn missing() -> Self {
        Self::Unrecognized(String::new())
    }
}

impl From<String> for MembershipStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "not_applied" => Self::NotApplied,
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<MembershipStatus> for String {
    fn from(status: MembershipStatus) -> Self {
        status.name()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn name(&self) -> String {
        match self {
            Self::Member => "member".into(),
            Self::Admin => "admin".into(),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Member
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipType {
    Founding,
    Standard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, PolarClass)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[polar(attribute)]
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub city: Option<String>,
    pub instagram_handle: Option<String>,
    #[serde(default = "MembershipStatus::missing")]
    pub membership_status: MembershipStatus,
    pub membership_type: Option<MembershipType>,
    pub membership_started_at: Option<DateTime<Utc>>,
    pub membership_valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    // application fields
    pub position_title: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    pub education_level: Option<String>,
    pub university: Option<String>,
    pub annual_income_range: Option<String>,
    pub age: Option<u32>,
    pub heard_about_us: Option<String>,

    pub invite_code: Option<String>,
    pub invited_by: Option<UserId>,
    pub invited_at: Option<DateTime<Utc>>,

    // social fields
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    pub hobbies: Option<String>,
    pub favorite_movie: Option<String>,
    pub favorite_restaurant: Option<String>,
    pub favorite_coffee_spot: Option<String>,
}

/// Fields a member may change on their own profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub city: Option<String>,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    pub hobbies: Option<String>,
    pub favorite_movie: Option<String>,
    pub favorite_restaurant: Option<String>,
    pub favorite_coffee_spot: Option<String>,
}

/// A validated membership application, ready to be stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub position_title: String,
    pub company: String,
    pub industry: String,
    pub education_level: String,
    pub university: Option<String>,
    pub annual_income_range: String,
    pub city: String,
    pub age: u32,
    pub instagram_handle: String,
    pub heard_about_us: Option<String>,
    pub invited_by: Option<UserId>,
    pub invited_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Profile synthesized when an authenticated identity has no document yet.
    pub fn new_default(identity: &Identity, default_city: &str) -> Self {
        let full_name = identity
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "User".into());

        let mut profile = Self::blank(identity, full_name);
        profile.city = Some(default_city.into());
        profile.membership_type = Some(MembershipType::Founding);
        profile
    }

    /// Profile written at sign-up time.
    pub fn registered(identity: &Identity, full_name: String) -> Self {
        Self::blank(identity, full_name)
    }

    fn blank(identity: &Identity, full_name: String) -> Self {
        Self {
            id: identity.id.clone(),
            full_name,
            email: identity.email.clone().unwrap_or_default(),
            city: None,
            instagram_handle: None,
            membership_status: MembershipStatus::NotApplied,
            membership_type: None,
            membership_started_at: None,
            membership_valid_until: None,
            role: Role::Member,
            created_at: Utc::now(),
            updated_at: None,
            position_title: None,
            company: None,
            industry: None,
            education_level: None,
            university: None,
            annual_income_range: None,
            age: None,
            heard_about_us: None,
            invite_code: Some(invite_code_for(&identity.id)),
            invited_by: None,
            invited_at: None,
            photo_url: None,
            bio: None,
            hobbies: None,
            favorite_movie: None,
            favorite_restaurant: None,
            favorite_coffee_spot: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn apply(&mut self, patch: ProfilePatch) {
        let ProfilePatch {
            full_name,
            city,
            photo_url,
            bio,
            hobbies,
            favorite_movie,
            favorite_restaurant,
            favorite_coffee_spot,
        } = patch;

        if let Some(full_name) = full_name {
            self.full_name = full_name;
        }
        if city.is_some() {
            self.city = city;
        }
        if photo_url.is_some() {
            self.photo_url = photo_url;
        }
        if bio.is_some() {
            self.bio = bio;
        }
        if hobbies.is_some() {
            self.hobbies = hobbies;
        }
        if favorite_movie.is_some() {
            self.favorite_movie = favorite_movie;
        }
        if favorite_restaurant.is_some() {
            self.favorite_restaurant = favorite_restaurant;
        }
        if favorite_coffee_spot.is_some() {
            self.favorite_coffee_spot = favorite_coffee_spot;
        }

        self.updated_at = Some(Utc::now());
    }

    #[tracing::instrument(skip(self, application), fields(id = %self.id))]
    pub fn submit_application(&mut self, application: Application) -> Result<(), Error> {
        match self.membership_status {
            MembershipStatus::NotApplied => {
                self.position_title = Some(application.position_title);
                self.company = Some(application.company);
                self.industry = Some(application.industry);
                self.education_level = Some(application.education_level);
                self.university = application.university;
                self.annual_income_range = Some(application.annual_income_range);
                self.city = Some(application.city);
                self.age = Some(application.age);
                self.instagram_handle = Some(application.instagram_handle);
                self.heard_about_us = application.heard_about_us;
                self.invited_by = application.invited_by;
                self.invited_at = application.invited_at;

                self.membership_status = MembershipStatus::Pending;
                self.updated_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// Admin review. Any current status may be overridden.
    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub fn review(&mut self, decision: Decision) {
        let now = Utc::now();

        match decision {
            Decision::Approve => {
                self.membership_status = MembershipStatus::Approved;
                self.membership_started_at = Some(now);
                self.membership_valid_until = Some(now + Duration::days(365));
            }
            Decision::Reject => {
                self.membership_status = MembershipStatus::Rejected;
                self.membership_started_at = None;
                self.membership_valid_until = None;
            }
        }

        self.updated_at = Some(now);
    }
}

/// Deterministic invite code derived from the account id.
pub fn invite_code_for(id: &str) -> String {
    let suffix: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();

    format!("CASA-{}", suffix)
}

#[cfg(test)]
pub(crate) fn sample_application() -> Application {
    Application {
        position_title: "Product Manager".into(),
        company: "Acme".into(),
        industry: "Tech".into(),
        education_level: "MBA".into(),
        university: None,
        annual_income_range: "$150k - $200k".into(),
        city: "Miami".into(),
        age: 30,
        instagram_handle: "@acme".into(),
        heard_about_us: Some("Instagram".into()),
        invited_by: None,
        invited_at: None,
    }
}

#[test]
fn status_round_trips_through_its_name() {
    let status: MembershipStatus = serde_json::from_str("\"pending\"").unwrap();
    assert_eq!(status, MembershipStatus::Pending);
    assert_eq!(serde_json::to_string(&status).unwrap(), "\"pending\"");

    let status: MembershipStatus = serde_json::from_str("\"suspended\"").unwrap();
    assert_eq!(status, MembershipStatus::Unrecognized("suspended".into()));
}

#[test]
fn missing_status_is_unrecognized() {
    let identity = Identity::new("abc123", None, None);
    let mut doc = serde_json::to_value(Profile::new_default(&identity, "Miami")).unwrap();
    doc.as_object_mut().unwrap().remove("membershipStatus");

    let profile: Profile = serde_json::from_value(doc).unwrap();
    assert_eq!(profile.membership_status, MembershipStatus::missing());
}

#[test]
fn default_profile() {
    let identity = Identity::new("u1-xyz9876", Some("ana@example.com".into()), None);
    let profile = Profile::new_default(&identity, "Miami");

    assert_eq!(profile.full_name, "User");
    assert_eq!(profile.email, "ana@example.com");
    assert_eq!(profile.city.as_deref(), Some("Miami"));
    assert_eq!(profile.membership_status, MembershipStatus::NotApplied);
    assert_eq!(profile.membership_type, Some(MembershipType::Founding));
    assert_eq!(profile.role, Role::Member);
    assert_eq!(profile.invite_code.as_deref(), Some("CASA-U1XYZ9"));
}

#[test]
fn application_moves_not_applied_to_pending_once() {
    let identity = Identity::new("u1", None, Some("Ana".into()));
    let mut profile = Profile::registered(&identity, "Ana".into());

    profile.submit_application(sample_application()).unwrap();
    assert_eq!(profile.membership_status, MembershipStatus::Pending);
    assert_eq!(profile.age, Some(30));
    assert_eq!(profile.instagram_handle.as_deref(), Some("@acme"));

    let err = profile.submit_application(sample_application()).unwrap_err();
    assert_eq!(err, invalid_state_error());
}

#[test]
fn review_stamps_membership_window() {
    let identity = Identity::new("u1", None, None);
    let mut profile = Profile::registered(&identity, "Ana".into());
    profile.submit_application(sample_application()).unwrap();

    profile.review(Decision::Approve);
    assert_eq!(profile.membership_status, MembershipStatus::Approved);
    let started = profile.membership_started_at.unwrap();
    assert_eq!(
        profile.membership_valid_until.unwrap() - started,
        Duration::days(365)
    );

    profile.review(Decision::Reject);
    assert_eq!(profile.membership_status, MembershipStatus::Rejected);
    assert!(profile.membership_valid_until.is_none());
}

#[test]
fn patch_only_touches_present_fields() {
    let identity = Identity::new("u1", None, None);
    let mut profile = Profile::new_default(&identity, "Miami");

    profile.apply(ProfilePatch {
        bio: Some("Salsa on Sundays".into()),
        ..ProfilePatch::default()
    });

    assert_eq!(profile.bio.as_deref(), Some("Salsa on Sundays"));
    assert_eq!(profile.city.as_deref(), Some("Miami"));
    assert!(profile.updated_at.is_some());
}
