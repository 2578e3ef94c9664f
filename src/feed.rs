use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    api::DynAPI,
    auth::User,
    entities::{CancelOutcome, Event, ReserveOutcome},
    error::Error,
    subscription::Subscription,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpFilter {
    #[default]
    All,
    Going,
    Went,
}

/// Events not yet started, soonest first.
pub fn upcoming(events: &[Event], now: DateTime<Utc>) -> Vec<Event> {
    let mut upcoming: Vec<Event> = events
        .iter()
        .filter(|event| !event.is_past(now))
        .cloned()
        .collect();

    upcoming.sort_by_key(|event| event.date);
    upcoming
}

pub fn going(events: &[Event], uid: &str, now: DateTime<Utc>) -> Vec<Event> {
    upcoming(events, now)
        .into_iter()
        .filter(|event| event.is_attending(uid))
        .collect()
}

/// Past events the user attended, most recent first.
pub fn went(events: &[Event], uid: &str, now: DateTime<Utc>) -> Vec<Event> {
    let mut went: Vec<Event> = events
        .iter()
        .filter(|event| event.is_past(now) && event.is_attending(uid))
        .cloned()
        .collect();

    went.sort_by(|a, b| b.date.cmp(&a.date));
    went
}

pub fn search(events: Vec<Event>, query: &str) -> Vec<Event> {
    events
        .into_iter()
        .filter(|event| event.matches(query))
        .collect()
}

pub fn view(
    events: &[Event],
    filter: RsvpFilter,
    uid: &str,
    query: &str,
    now: DateTime<Utc>,
) -> Vec<Event> {
    let events = match filter {
        RsvpFilter::All => upcoming(events, now),
        RsvpFilter::Going => going(events, uid, now),
        RsvpFilter::Went => went(events, uid, now),
    };

    search(events, query)
}

/// Live event collection of one member, with reserve and cancel.
///
/// Every snapshot from the event store replaces the previous one wholesale.
pub struct EventFeed {
    api: DynAPI,
    user: User,
    events: Arc<watch::Sender<Vec<Event>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl EventFeed {
    #[tracing::instrument(name = "EventFeed::open", skip(api))]
    pub async fn open(api: DynAPI, user: User) -> Result<Self, Error> {
        let (events, _) = watch::channel(Vec::new());
        let events = Arc::new(events);

        let subscription = {
            let events = events.clone();

            api.subscribe_events(
                user.clone(),
                Box::new(move |snapshot| {
                    events.send_replace(snapshot);
                }),
            )
            .await?
        };

        Ok(Self {
            api,
            user,
            events,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<Vec<Event>> {
        self.events.subscribe()
    }

    pub fn view(&self, filter: RsvpFilter, query: &str, now: DateTime<Utc>) -> Vec<Event> {
        view(&self.events.borrow(), filter, &self.user.id, query, now)
    }

    async fn lookup(&self, id: Uuid) -> Result<Event, Error> {
        let cached = self
            .events
            .borrow()
            .iter()
            .find(|event| event.id == id)
            .cloned();

        match cached {
            Some(event) => Ok(event),
            None => self.api.find_event(self.user.clone(), id).await,
        }
    }

    /// Mirrors a confirmed write until the next snapshot replaces it.
    fn apply_locally<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut Event, &str),
    {
        let uid = self.user.id.clone();

        self.events.send_if_modified(|events| {
            match events.iter_mut().find(|event| event.id == id) {
                Some(event) => {
                    f(event, &uid);
                    true
                }
                None => false,
            }
        });
    }

    /// Checks the local snapshot first, then lets the store decide.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, id: Uuid) -> ReserveOutcome {
        let event = match self.lookup(id).await {
            Ok(event) => event,
            Err(err) => {
                tracing::error!("cannot reserve {}: {}", id, err);
                return ReserveOutcome::Error;
            }
        };

        if event.is_attending(&self.user.id) {
            return ReserveOutcome::AlreadyReserved;
        }

        if event.spots_remaining() == 0 {
            return ReserveOutcome::Full;
        }

        match self.api.reserve_event(self.user.clone(), id).await {
            Ok(outcome) => {
                if outcome == ReserveOutcome::Reserved {
                    self.apply_locally(id, |event, uid| {
                        event.reserve(uid);
                    });
                }
                outcome
            }
            Err(err) => {
                tracing::error!("failed to reserve {}: {}", id, err);
                ReserveOutcome::Error
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> CancelOutcome {
        let event = match self.lookup(id).await {
            Ok(event) => event,
            Err(err) => {
                tracing::error!("cannot cancel {}: {}", id, err);
                return CancelOutcome::Error;
            }
        };

        if !event.is_attending(&self.user.id) {
            return CancelOutcome::NotAttending;
        }

        match self.api.cancel_reservation(self.user.clone(), id).await {
            Ok(outcome) => {
                if outcome == CancelOutcome::Canceled {
                    self.apply_locally(id, |event, uid| {
                        event.cancel(uid);
                    });
                }
                outcome
            }
            Err(err) => {
                tracing::error!("failed to cancel {}: {}", id, err);
                CancelOutcome::Error
            }
        }
    }

    pub fn dispose(&self) {
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.cancel();
        }
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
use crate::entities::sample_event;
#[cfg(test)]
use chrono::Duration;

#[cfg(test)]
fn approved(id: &str) -> User {
    User {
        id: id.into(),
        roles: vec!["member".into()],
        membership: crate::entities::MembershipStatus::Approved,
    }
}

#[test]
fn upcoming_excludes_past_and_sorts() {
    let now = Utc::now();
    let yesterday = sample_event(5, now - Duration::days(1));
    let tomorrow = sample_event(5, now + Duration::days(1));
    let soon = sample_event(5, now + Duration::hours(1));

    let events = vec![yesterday, tomorrow.clone(), soon.clone()];
    let ids: Vec<Uuid> = upcoming(&events, now).iter().map(|e| e.id).collect();

    assert_eq!(ids, vec![soon.id, tomorrow.id]);
}

#[test]
fn going_and_went_partition_attendance() {
    let now = Utc::now();
    let mut past = sample_event(5, now - Duration::days(2));
    let mut future = sample_event(5, now + Duration::days(2));
    past.reserve("a");
    future.reserve("a");

    let events = vec![past.clone(), future.clone()];

    let going_ids: Vec<Uuid> = going(&events, "a", now).iter().map(|e| e.id).collect();
    let went_ids: Vec<Uuid> = went(&events, "a", now).iter().map(|e| e.id).collect();
    assert_eq!(going_ids, vec![future.id]);
    assert_eq!(went_ids, vec![past.id]);

    assert!(going(&events, "b", now).is_empty());
    assert!(went(&events, "b", now).is_empty());
}

#[test]
fn went_is_most_recent_first() {
    let now = Utc::now();
    let mut older = sample_event(5, now - Duration::days(10));
    let mut newer = sample_event(5, now - Duration::days(1));
    older.reserve("a");
    newer.reserve("a");

    let ids: Vec<Uuid> = went(&[older.clone(), newer.clone()], "a", now)
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[test]
fn views_apply_search() {
    let now = Utc::now();
    let mut brunch = sample_event(5, now + Duration::days(1));
    brunch.title = "Brunch Exclusivo".into();
    brunch.location = "Key Biscayne".into();
    let cocteles = sample_event(5, now + Duration::days(2));

    let events = vec![brunch.clone(), cocteles];

    let found = view(&events, RsvpFilter::All, "a", "KEY", now);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, brunch.id);

    assert_eq!(view(&events, RsvpFilter::All, "a", "", now).len(), 2);
    assert!(view(&events, RsvpFilter::Going, "a", "", now).is_empty());
}

#[tokio::test]
async fn reserve_and_cancel_through_the_feed() {
    use crate::memory::MemoryBackend;

    let backend = Arc::new(MemoryBackend::new().unwrap());
    let event = sample_event(1, Utc::now() + Duration::days(1));
    let id = event.id;
    backend.insert_event(event);

    let a = EventFeed::open(backend.clone(), approved("a")).await.unwrap();
    let b = EventFeed::open(backend.clone(), approved("b")).await.unwrap();

    assert_eq!(a.reserve(id).await, ReserveOutcome::Reserved);

    // b's snapshot may still be stale; the store decides then
    assert_eq!(b.reserve(id).await, ReserveOutcome::Full);
    assert_eq!(a.reserve(id).await, ReserveOutcome::AlreadyReserved);

    assert_eq!(a.cancel(id).await, CancelOutcome::Canceled);
    assert_eq!(a.cancel(id).await, CancelOutcome::NotAttending);

    assert_eq!(a.reserve(Uuid::new_v4()).await, ReserveOutcome::Error);

    a.dispose();
    b.dispose();
}

#[tokio::test]
async fn snapshots_replace_state_and_failures_become_errors() {
    use crate::memory::MemoryBackend;

    let backend = Arc::new(MemoryBackend::new().unwrap());
    let feed = EventFeed::open(backend.clone(), approved("a")).await.unwrap();

    let event = sample_event(3, Utc::now() + Duration::days(1));
    let id = event.id;
    backend.insert_event(event);

    let mut changes = feed.changes();
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while changes.borrow_and_update().is_empty() {
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(feed.snapshot().len(), 1);

    backend.fail_writes(true);
    assert_eq!(feed.reserve(id).await, ReserveOutcome::Error);
    assert!(feed.snapshot()[0].attendees.is_empty());
}
