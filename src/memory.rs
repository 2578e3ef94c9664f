use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use oso::Oso;
use uuid::Uuid;

use crate::{
    api::{EventAPI, IdentityAPI, ProfileAPI, StorageAPI, API},
    auth::{
        authorizor::{self, authorize_object, guard_profile_write},
        Club, User,
    },
    entities::{
        is_valid_email, Application, CancelOutcome, Decision, Event, EventDraft, EventPatch,
        Identity, Profile, ProfilePatch, ReserveOutcome, UserId,
    },
    error::{
        email_exists_error, invalid_email_error, not_found_error, unauthenticated_error,
        unauthorized_error, user_not_found_error, weak_password_error, write_failed_error,
        wrong_password_error, Error,
    },
    subscription::{Callback, Hub, Subscription},
};

pub const MINIMUM_PASSWORD_LENGTH: usize = 6;

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct State {
    /// Keyed by lower-cased email.
    accounts: HashMap<String, Account>,
    current: Option<Identity>,
    profiles: HashMap<UserId, Profile>,
    events: HashMap<Uuid, Event>,
    objects: BTreeMap<String, Vec<u8>>,
}

impl State {
    fn feed(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.values().cloned().collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        events
    }
}

/// In-process backend with the same contract as the hosted services.
///
/// Every mutation and its change notification happen under one lock, so
/// subscribers observe writes in commit order and capacity checks are atomic.
pub struct MemoryBackend {
    authorizor: Oso,
    state: Mutex<State>,
    fail_writes: AtomicBool,
    /// Milliseconds every profile write waits before it is applied.
    write_latency: AtomicU64,
    identities: Hub<(), Option<Identity>>,
    profiles: Hub<UserId, Option<Profile>>,
    events: Hub<Uuid, Option<Event>>,
    feed: Hub<(), Vec<Event>>,
}

impl MemoryBackend {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            authorizor: authorizor::new()?,
            state: Mutex::new(State::default()),
            fail_writes: AtomicBool::new(false),
            write_latency: AtomicU64::new(0),
            identities: Hub::new(),
            profiles: Hub::new(),
            events: Hub::new(),
            feed: Hub::new(),
        })
    }

    /// While set, every document and object write fails.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, latency: Duration) {
        self.write_latency
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn latency(&self) {
        let millis = self.write_latency.load(Ordering::SeqCst);

        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// Seeds an event without going through authorization.
    pub fn insert_event(&self, event: Event) {
        let id = event.id;
        let mut state = self.lock();
        state.events.insert(id, event.clone());
        self.events.publish(&id, Some(event));
        self.feed.publish(&(), state.feed());
    }

    /// Seeds or overwrites a profile without going through authorization.
    pub fn insert_profile(&self, profile: Profile) {
        let id = profile.id.clone();
        let mut state = self.lock();
        state.profiles.insert(id.clone(), profile.clone());
        self.profiles.publish(&id, Some(profile));
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writes(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            tracing::warn!("rejecting write");
            return Err(write_failed_error());
        }

        Ok(())
    }

    fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        authorizor::authorize(&self.authorizor, actor, action, resource)
    }

    /// Applies `f` to a stored profile and announces the result.
    fn modify_profile<F>(&self, user: User, id: UserId, action: &str, f: F) -> Result<Profile, Error>
    where
        F: FnOnce(&mut Profile) -> Result<(), Error>,
    {
        let mut state = self.lock();

        let mut profile = state
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(not_found_error)?;

        self.authorize(user, action, profile.clone())?;
        self.check_writes()?;

        f(&mut profile)?;

        state.profiles.insert(id.clone(), profile.clone());
        self.profiles.publish(&id, Some(profile.clone()));

        Ok(profile)
    }

    fn modify_event<F, R>(&self, user: User, id: Uuid, action: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Event) -> Result<(R, bool), Error>,
    {
        let mut state = self.lock();

        let mut event = state.events.get(&id).cloned().ok_or_else(not_found_error)?;

        self.authorize(user, action, event.clone())?;
        self.check_writes()?;

        let (result, changed) = f(&mut event)?;

        if changed {
            state.events.insert(id, event.clone());
            self.events.publish(&id, Some(event));
            self.feed.publish(&(), state.feed());
        }

        Ok(result)
    }
}

#[async_trait]
impl IdentityAPI for MemoryBackend {
    #[tracing::instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: String,
        password: String,
        full_name: String,
    ) -> Result<Identity, Error> {
        if !is_valid_email(&email) {
            return Err(invalid_email_error());
        }

        if password.chars().count() < MINIMUM_PASSWORD_LENGTH {
            return Err(weak_password_error());
        }

        let mut state = self.lock();
        let key = email.trim().to_lowercase();

        if state.accounts.contains_key(&key) {
            return Err(email_exists_error());
        }

        self.check_writes()?;

        let identity = Identity::new(
            Uuid::new_v4().simple().to_string(),
            Some(email.trim().into()),
            Some(full_name.clone()),
        );
        let profile = Profile::registered(&identity, full_name);

        state.accounts.insert(
            key,
            Account {
                password,
                identity: identity.clone(),
            },
        );
        state.profiles.insert(identity.id.clone(), profile.clone());
        self.profiles.publish(&identity.id, Some(profile));

        state.current = Some(identity.clone());
        self.identities.publish(&(), Some(identity.clone()));

        tracing::info!("account {} created", identity.id);

        Ok(identity)
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in(&self, email: String, password: String) -> Result<Identity, Error> {
        if !is_valid_email(&email) {
            return Err(invalid_email_error());
        }

        let mut state = self.lock();

        let account = state
            .accounts
            .get(&email.trim().to_lowercase())
            .ok_or_else(user_not_found_error)?;

        if account.password != password {
            return Err(wrong_password_error());
        }

        let identity = account.identity.clone();
        state.current = Some(identity.clone());
        self.identities.publish(&(), Some(identity.clone()));

        Ok(identity)
    }

    #[tracing::instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), Error> {
        let mut state = self.lock();

        if state.current.take().is_some() {
            self.identities.publish(&(), None);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_account(&self, user: User) -> Result<(), Error> {
        let mut state = self.lock();

        let current = state.current.as_ref().ok_or_else(unauthenticated_error)?;
        if current.id != user.id {
            return Err(unauthorized_error());
        }

        self.check_writes()?;

        state.accounts.retain(|_, account| account.identity.id != user.id);
        state.current = None;
        self.identities.publish(&(), None);

        tracing::info!("account {} deleted", user.id);

        Ok(())
    }

    fn subscribe_identity(&self, callback: Callback<Option<Identity>>) -> Subscription {
        let state = self.lock();
        self.identities.subscribe((), state.current.clone(), callback)
    }
}

#[async_trait]
impl ProfileAPI for MemoryBackend {
    #[tracing::instrument(skip(self))]
    async fn find_profile(&self, user: User, id: UserId) -> Result<Option<Profile>, Error> {
        let state = self.lock();

        match state.profiles.get(&id) {
            Some(profile) => {
                self.authorize(user, "read", profile.clone())?;
                Ok(Some(profile.clone()))
            }
            None if user.id == id || user.is_admin() => Ok(None),
            None => Err(unauthorized_error()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_profile_by_invite_code(
        &self,
        user: User,
        code: String,
    ) -> Result<Option<Profile>, Error> {
        self.authorize(user, "lookup_invite", Club::default())?;

        let code = code.trim().to_uppercase();
        let state = self.lock();

        Ok(state
            .profiles
            .values()
            .find(|profile| profile.invite_code.as_deref() == Some(code.as_str()))
            .cloned())
    }

    #[tracing::instrument(skip(self, profile), fields(id = %profile.id))]
    async fn set_profile(&self, user: User, profile: Profile) -> Result<Profile, Error> {
        self.latency().await;

        let mut state = self.lock();

        self.authorize(user.clone(), "create", profile.clone())?;
        guard_profile_write(&user, state.profiles.get(&profile.id), &profile)?;
        self.check_writes()?;

        state.profiles.insert(profile.id.clone(), profile.clone());
        self.profiles.publish(&profile.id, Some(profile.clone()));

        Ok(profile)
    }

    #[tracing::instrument(skip(self))]
    async fn merge_profile(
        &self,
        user: User,
        id: UserId,
        patch: ProfilePatch,
    ) -> Result<Profile, Error> {
        self.latency().await;

        self.modify_profile(user, id, "update", |profile| {
            profile.apply(patch);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, application))]
    async fn submit_application(
        &self,
        user: User,
        id: UserId,
        application: Application,
    ) -> Result<Profile, Error> {
        self.latency().await;

        self.modify_profile(user, id, "apply", |profile| {
            profile.submit_application(application)
        })
    }

    #[tracing::instrument(skip(self))]
    async fn review_application(
        &self,
        user: User,
        id: UserId,
        decision: Decision,
    ) -> Result<Profile, Error> {
        self.latency().await;

        self.modify_profile(user, id, "review", |profile| {
            profile.review(decision);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_profile(&self, user: User, id: UserId) -> Result<(), Error> {
        let mut state = self.lock();

        let profile = state.profiles.get(&id).cloned().ok_or_else(not_found_error)?;
        self.authorize(user, "delete", profile)?;
        self.check_writes()?;

        state.profiles.remove(&id);
        self.profiles.publish(&id, None);

        Ok(())
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_profile(
        &self,
        user: User,
        id: UserId,
        callback: Callback<Option<Profile>>,
    ) -> Result<Subscription, Error> {
        let state = self.lock();
        let current = state.profiles.get(&id).cloned();

        match &current {
            Some(profile) => self.authorize(user, "read", profile.clone())?,
            None if user.id == id || user.is_admin() => {}
            None => return Err(unauthorized_error()),
        }

        Ok(self.profiles.subscribe(id, current, callback))
    }
}

#[async_trait]
impl EventAPI for MemoryBackend {
    #[tracing::instrument(skip(self))]
    async fn list_events(&self, user: User) -> Result<Vec<Event>, Error> {
        self.authorize(user, "list_events", Club::default())?;

        Ok(self.lock().feed())
    }

    #[tracing::instrument(skip(self))]
    async fn find_event(&self, user: User, id: Uuid) -> Result<Event, Error> {
        let event = self
            .lock()
            .events
            .get(&id)
            .cloned()
            .ok_or_else(not_found_error)?;

        self.authorize(user, "read", event.clone())?;

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn create_event(&self, user: User, draft: EventDraft) -> Result<Event, Error> {
        self.authorize(user, "create_event", Club::default())?;

        let event = Event::new(draft)?;

        let mut state = self.lock();
        self.check_writes()?;

        state.events.insert(event.id, event.clone());
        self.events.publish(&event.id, Some(event.clone()));
        self.feed.publish(&(), state.feed());

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn update_event(&self, user: User, id: Uuid, patch: EventPatch) -> Result<Event, Error> {
        self.modify_event(user, id, "update", |event| {
            event.apply(patch)?;
            Ok((event.clone(), true))
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_event(&self, user: User, id: Uuid) -> Result<(), Error> {
        let mut state = self.lock();

        let event = state.events.get(&id).cloned().ok_or_else(not_found_error)?;
        self.authorize(user, "delete", event)?;
        self.check_writes()?;

        state.events.remove(&id);
        self.events.publish(&id, None);
        self.feed.publish(&(), state.feed());

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reserve_event(&self, user: User, id: Uuid) -> Result<ReserveOutcome, Error> {
        let uid = user.id.clone();

        self.modify_event(user, id, "reserve", |event| {
            let outcome = event.reserve(&uid);
            Ok((outcome, outcome == ReserveOutcome::Reserved))
        })
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_reservation(&self, user: User, id: Uuid) -> Result<CancelOutcome, Error> {
        let uid = user.id.clone();

        self.modify_event(user, id, "cancel", |event| {
            let outcome = event.cancel(&uid);
            Ok((outcome, outcome == CancelOutcome::Canceled))
        })
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_event(
        &self,
        user: User,
        id: Uuid,
        callback: Callback<Option<Event>>,
    ) -> Result<Subscription, Error> {
        self.authorize(user, "list_events", Club::default())?;

        let state = self.lock();
        Ok(self
            .events
            .subscribe(id, state.events.get(&id).cloned(), callback))
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_events(
        &self,
        user: User,
        callback: Callback<Vec<Event>>,
    ) -> Result<Subscription, Error> {
        self.authorize(user, "list_events", Club::default())?;

        let state = self.lock();
        Ok(self.feed.subscribe((), state.feed(), callback))
    }
}

#[async_trait]
impl StorageAPI for MemoryBackend {
    #[tracing::instrument(skip(self, bytes))]
    async fn upload_object(
        &self,
        user: User,
        path: String,
        bytes: Vec<u8>,
        _content_type: String,
    ) -> Result<String, Error> {
        authorize_object(&user, &path)?;

        let mut state = self.lock();
        self.check_writes()?;

        state.objects.insert(path.clone(), bytes);

        Ok(format!("memory://{}", path))
    }

    #[tracing::instrument(skip(self))]
    async fn delete_object(&self, user: User, path: String) -> Result<(), Error> {
        authorize_object(&user, &path)?;

        let mut state = self.lock();
        self.check_writes()?;

        state.objects.remove(&path).ok_or_else(not_found_error)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_objects(&self, user: User, prefix: String) -> Result<Vec<String>, Error> {
        authorize_object(&user, &prefix)?;

        let state = self.lock();

        Ok(state
            .objects
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

impl API for MemoryBackend {}

#[cfg(test)]
fn approved(id: &str) -> User {
    User {
        id: id.into(),
        roles: vec!["member".into()],
        membership: crate::entities::MembershipStatus::Approved,
    }
}

#[test]
fn sign_up_creates_profile_and_maps_errors() {
    tokio_test::block_on(async {
        let backend = MemoryBackend::new().unwrap();

        let identity = backend
            .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
            .await
            .unwrap();

        let owner = User::from_identity(&identity);
        let profile = backend
            .find_profile(owner, identity.id.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.full_name, "Ana");
        assert_eq!(profile.email, "ana@casa.club");

        let result = backend
            .sign_up("ANA@casa.club".into(), "secret1".into(), "Ana".into())
            .await;
        assert_eq!(result.unwrap_err(), email_exists_error());

        let result = backend
            .sign_up("nope".into(), "secret1".into(), "X".into())
            .await;
        assert_eq!(result.unwrap_err(), invalid_email_error());

        let result = backend
            .sign_up("bea@casa.club".into(), "12345".into(), "Bea".into())
            .await;
        assert_eq!(result.unwrap_err(), weak_password_error());

        let result = backend.sign_in("ana@casa.club".into(), "wrong".into()).await;
        assert_eq!(result.unwrap_err(), wrong_password_error());

        let result = backend.sign_in("zoe@casa.club".into(), "secret1".into()).await;
        assert_eq!(result.unwrap_err(), user_not_found_error());
    });
}

#[test]
fn members_cannot_touch_other_profiles() {
    tokio_test::block_on(async {
        let backend = MemoryBackend::new().unwrap();
        let identity = Identity::new("a", None, None);
        backend.insert_profile(Profile::new_default(&identity, "Miami"));

        let result = backend.find_profile(approved("b"), "a".into()).await;
        assert_eq!(result.unwrap_err(), unauthorized_error());

        let result = backend
            .review_application(approved("a"), "a".into(), Decision::Approve)
            .await;
        assert_eq!(result.unwrap_err(), unauthorized_error());

        let admin = User::new_admin_user("admin");
        let profile = backend
            .review_application(admin, "a".into(), Decision::Approve)
            .await
            .unwrap();
        assert!(profile.membership_valid_until.is_some());
    });
}

#[test]
fn reservations_are_atomic_at_capacity() {
    tokio_test::block_on(async {
        let backend = MemoryBackend::new().unwrap();
        let event = crate::entities::sample_event(1, chrono::Utc::now());
        let id = event.id;
        backend.insert_event(event);

        let outcome = backend.reserve_event(approved("a"), id).await.unwrap();
        assert_eq!(outcome, ReserveOutcome::Reserved);

        let outcome = backend.reserve_event(approved("b"), id).await.unwrap();
        assert_eq!(outcome, ReserveOutcome::Full);

        let outcome = backend.reserve_event(approved("a"), id).await.unwrap();
        assert_eq!(outcome, ReserveOutcome::AlreadyReserved);

        let event = backend.find_event(approved("a"), id).await.unwrap();
        assert_eq!(event.attendees, vec!["a".to_string()]);

        backend.fail_writes(true);
        let result = backend.cancel_reservation(approved("a"), id).await;
        assert_eq!(result.unwrap_err(), write_failed_error());
    });
}

#[test]
fn objects_are_scoped_to_their_owner() {
    tokio_test::block_on(async {
        let backend = MemoryBackend::new().unwrap();
        let owner = approved("a");

        backend
            .upload_object(
                owner.clone(),
                "profiles/a/profile_1.jpg".into(),
                vec![1, 2, 3],
                "image/jpeg".into(),
            )
            .await
            .unwrap();

        let listed = backend
            .list_objects(owner.clone(), "profiles/a/".into())
            .await
            .unwrap();
        assert_eq!(listed, vec!["profiles/a/profile_1.jpg".to_string()]);

        let result = backend
            .list_objects(approved("b"), "profiles/a/".into())
            .await;
        assert_eq!(result.unwrap_err(), unauthorized_error());
    });
}

#[tokio::test]
async fn admins_manage_events_and_subscribers_follow() {
    use std::sync::Arc;

    let backend = MemoryBackend::new().unwrap();
    let admin = User::new_admin_user("admin");
    let draft = EventDraft {
        title: "Noche de Salsa".into(),
        location: "Little Havana".into(),
        category: Some("Música & Baile".into()),
        capacity: 20,
        ..EventDraft::default()
    };

    let result = backend.create_event(approved("a"), draft.clone()).await;
    assert_eq!(result.unwrap_err(), unauthorized_error());

    let result = backend
        .create_event(
            admin.clone(),
            EventDraft {
                capacity: 0,
                ..draft.clone()
            },
        )
        .await;
    assert_eq!(result.unwrap_err().message, "Please fill in all required fields");

    let event = backend.create_event(admin.clone(), draft).await.unwrap();
    assert_eq!(event.category.as_deref(), Some("MÚSICA_BAILE"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let seen = seen.clone();
        backend
            .subscribe_event(
                approved("a"),
                event.id,
                Box::new(move |event| seen.lock().unwrap().push(event)),
            )
            .await
            .unwrap()
    };

    let listed = backend.list_events(approved("a")).await.unwrap();
    assert_eq!(listed.len(), 1);

    let patch = EventPatch {
        capacity: Some(30),
        ..EventPatch::default()
    };
    let result = backend
        .update_event(approved("a"), event.id, patch.clone())
        .await;
    assert_eq!(result.unwrap_err(), unauthorized_error());
    let result = backend.delete_event(approved("a"), event.id).await;
    assert_eq!(result.unwrap_err(), unauthorized_error());

    let updated = backend
        .update_event(admin.clone(), event.id, patch)
        .await
        .unwrap();
    assert_eq!(updated.capacity, 30);

    backend.delete_event(admin.clone(), event.id).await.unwrap();
    let result = backend.find_event(admin, event.id).await;
    assert_eq!(result.unwrap_err(), not_found_error());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let capacities: Vec<Option<u32>> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|event| event.as_ref().map(|event| event.capacity))
        .collect();
    assert_eq!(capacities, vec![Some(20), Some(30), None]);

    subscription.cancel();
}

#[tokio::test]
async fn seeded_documents_reach_subscribers() {
    use std::sync::Arc;

    let backend = MemoryBackend::new().unwrap();
    let feed = Arc::new(Mutex::new(Vec::new()));

    let subscription = {
        let feed = feed.clone();
        backend
            .subscribe_events(
                approved("a"),
                Box::new(move |events| *feed.lock().unwrap() = events),
            )
            .await
            .unwrap()
    };

    let event = crate::entities::sample_event(5, chrono::Utc::now());
    let id = event.id;
    backend.insert_event(event);

    let identity = Identity::new("a", None, None);
    backend.insert_profile(Profile::new_default(&identity, "Miami"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let ids: Vec<Uuid> = feed.lock().unwrap().iter().map(|event| event.id).collect();
    assert_eq!(ids, vec![id]);

    let profile = backend.find_profile(approved("a"), "a".into()).await.unwrap();
    assert_eq!(profile.map(|p| p.id), Some("a".to_string()));

    subscription.cancel();
}
