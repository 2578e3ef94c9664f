use chrono::{DateTime, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::UserId;
use crate::error::{validation_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, PolarClass)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[polar(attribute)]
    pub id: Uuid,
    pub title: String,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub date: DateTime<Utc>,
    pub location: String,
    pub city: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub capacity: u32,
    /// Treated as a set: no id appears twice.
    #[serde(default)]
    pub attendees: Vec<UserId>,
    #[serde(default)]
    pub members_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub title: String,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub location: String,
    pub city: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub capacity: u32,
    pub members_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub capacity: Option<u32>,
    pub members_only: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Attending,
    Full,
    Available,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rsvp {
    Going,
    Went,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveOutcome {
    Reserved,
    AlreadyReserved,
    Full,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Canceled,
    NotAttending,
    Error,
}

const REQUIRED_FIELDS_MESSAGE: &str = "Please fill in all required fields";

impl Event {
    pub fn new(draft: EventDraft) -> Result<Self, Error> {
        if draft.title.trim().is_empty() || draft.location.trim().is_empty() || draft.capacity == 0
        {
            return Err(validation_error(REQUIRED_FIELDS_MESSAGE.into()));
        }

        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            title: draft.title,
            subtitle: draft.subtitle,
            image: draft.image,
            date: draft.date.unwrap_or(now),
            location: draft.location,
            city: draft.city,
            category: draft.category.map(|c| normalize_category(&c)),
            description: draft.description,
            price: draft.price,
            capacity: draft.capacity,
            attendees: vec![],
            members_only: draft.members_only,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn spots_remaining(&self) -> u32 {
        self.capacity
            .saturating_sub(self.attendees.len().try_into().unwrap_or(u32::MAX))
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.date < now
    }

    pub fn is_attending(&self, uid: &str) -> bool {
        self.attendees.iter().any(|id| id == uid)
    }

    pub fn status(&self, uid: Option<&str>) -> EventStatus {
        if uid.map_or(false, |uid| self.is_attending(uid)) {
            return EventStatus::Attending;
        }

        if self.spots_remaining() == 0 {
            return EventStatus::Full;
        }

        EventStatus::Available
    }

    pub fn rsvp(&self, uid: &str, now: DateTime<Utc>) -> Option<Rsvp> {
        if !self.is_attending(uid) {
            return None;
        }

        match self.is_past(now) {
            true => Some(Rsvp::Went),
            false => Some(Rsvp::Going),
        }
    }

    /// Case-insensitive substring match over title, location and city.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }

        self.title.to_lowercase().contains(&query)
            || self.location.to_lowercase().contains(&query)
            || self
                .city
                .as_ref()
                .map_or(false, |city| city.to_lowercase().contains(&query))
    }

    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub fn reserve(&mut self, uid: &str) -> ReserveOutcome {
        if self.is_attending(uid) {
            return ReserveOutcome::AlreadyReserved;
        }

        if self.spots_remaining() == 0 {
            return ReserveOutcome::Full;
        }

        self.attendees.push(uid.into());
        self.updated_at = Utc::now();
        ReserveOutcome::Reserved
    }

    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub fn cancel(&mut self, uid: &str) -> CancelOutcome {
        if !self.is_attending(uid) {
            return CancelOutcome::NotAttending;
        }

        self.attendees.retain(|id| id != uid);
        self.updated_at = Utc::now();
        CancelOutcome::Canceled
    }

    pub fn apply(&mut self, patch: EventPatch) -> Result<(), Error> {
        let EventPatch {
            title,
            subtitle,
            image,
            date,
            location,
            city,
            category,
            description,
            price,
            capacity,
            members_only,
        } = patch;

        let title_is_blank = title.as_ref().map_or(false, |t| t.trim().is_empty());
        let location_is_blank = location.as_ref().map_or(false, |l| l.trim().is_empty());

        if title_is_blank || location_is_blank || capacity == Some(0) {
            return Err(validation_error(REQUIRED_FIELDS_MESSAGE.into()));
        }

        if let Some(title) = title {
            self.title = title;
        }
        if subtitle.is_some() {
            self.subtitle = subtitle;
        }
        if image.is_some() {
            self.image = image;
        }
        if let Some(date) = date {
            self.date = date;
        }
        if let Some(location) = location {
            self.location = location;
        }
        if city.is_some() {
            self.city = city;
        }
        if let Some(category) = category {
            self.category = Some(normalize_category(&category));
        }
        if description.is_some() {
            self.description = description;
        }
        if price.is_some() {
            self.price = price;
        }
        if let Some(capacity) = capacity {
            self.capacity = capacity;
        }
        if let Some(members_only) = members_only {
            self.members_only = members_only;
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

/// `"Arte & Vino"` becomes `"ARTE_VINO"`.
pub fn normalize_category(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let mut normalized = String::with_capacity(upper.len());

    for c in upper.chars() {
        let c = if c.is_whitespace() || c == '&' { '_' } else { c };

        if c == '_' && normalized.ends_with('_') {
            continue;
        }

        normalized.push(c);
    }

    normalized
}

#[cfg(test)]
pub(crate) fn sample_event(capacity: u32, date: DateTime<Utc>) -> Event {
    let mut event = Event::new(EventDraft {
        title: "Noche de Cocteles".into(),
        location: "Brickell".into(),
        city: Some("Miami".into()),
        capacity,
        date: Some(date),
        ..EventDraft::default()
    })
    .unwrap();
    event.date = date;
    event
}

#[test]
fn reserve_respects_capacity() {
    let mut event = sample_event(1, Utc::now());

    assert_eq!(event.reserve("a"), ReserveOutcome::Reserved);
    assert_eq!(event.attendees, vec!["a".to_string()]);

    assert_eq!(event.reserve("b"), ReserveOutcome::Full);
    assert_eq!(event.attendees, vec!["a".to_string()]);

    assert_eq!(event.reserve("a"), ReserveOutcome::AlreadyReserved);
    assert_eq!(event.spots_remaining(), 0);
}

#[test]
fn cancel_twice() {
    let mut event = sample_event(3, Utc::now());
    event.reserve("a");

    assert_eq!(event.cancel("a"), CancelOutcome::Canceled);
    assert_eq!(event.cancel("a"), CancelOutcome::NotAttending);
    assert!(event.attendees.is_empty());
}

#[test]
fn spots_remaining_never_underflows() {
    let mut event = sample_event(1, Utc::now());
    event.attendees = vec!["a".into(), "b".into()];

    assert_eq!(event.spots_remaining(), 0);
    assert_eq!(event.status(Some("c")), EventStatus::Full);
    assert_eq!(event.status(Some("b")), EventStatus::Attending);
    assert_eq!(event.status(None), EventStatus::Full);
}

#[test]
fn rsvp_label_depends_on_time() {
    let now = Utc::now();
    let mut past = sample_event(5, now - chrono::Duration::days(1));
    let mut future = sample_event(5, now + chrono::Duration::days(1));
    past.reserve("a");
    future.reserve("a");

    assert_eq!(past.rsvp("a", now), Some(Rsvp::Went));
    assert_eq!(future.rsvp("a", now), Some(Rsvp::Going));
    assert_eq!(future.rsvp("b", now), None);
}

#[test]
fn draft_requires_title_location_and_capacity() {
    let err = Event::new(EventDraft {
        title: "Brunch".into(),
        location: " ".into(),
        capacity: 10,
        ..EventDraft::default()
    })
    .unwrap_err();
    assert_eq!(err.message, REQUIRED_FIELDS_MESSAGE);

    let err = Event::new(EventDraft {
        title: "Brunch".into(),
        location: "Key Biscayne".into(),
        capacity: 0,
        ..EventDraft::default()
    })
    .unwrap_err();
    assert_eq!(err.code, 104);
}

#[test]
fn patch_validates_and_normalizes() {
    let mut event = sample_event(5, Utc::now());

    assert!(event
        .apply(EventPatch {
            capacity: Some(0),
            ..EventPatch::default()
        })
        .is_err());
    assert_eq!(event.capacity, 5);

    event
        .apply(EventPatch {
            category: Some("Música en vivo".into()),
            capacity: Some(8),
            ..EventPatch::default()
        })
        .unwrap();
    assert_eq!(event.category.as_deref(), Some("MÚSICA_EN_VIVO"));
    assert_eq!(event.capacity, 8);
}

#[test]
fn category_normalization() {
    assert_eq!(normalize_category("Arte & Vino"), "ARTE_VINO");
    assert_eq!(normalize_category("Cóctel íntimo"), "CÓCTEL_ÍNTIMO");
    assert_eq!(normalize_category("Networking"), "NETWORKING");
    assert_eq!(normalize_category("a  &&  b"), "A_B");
}

#[test]
fn search_is_case_insensitive() {
    let event = sample_event(5, Utc::now());

    assert!(event.matches("cocteles"));
    assert!(event.matches("BRICK"));
    assert!(event.matches("miami"));
    assert!(event.matches(""));
    assert!(!event.matches("wynwood"));
}
