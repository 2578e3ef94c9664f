use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    api::{user_object_prefix, DynAPI},
    auth::User,
    config::Config,
    entities::{Application, ApplicationForm, Identity, Profile, ProfilePatch, UserId},
    error::{unauthenticated_error, Error},
    router::{self, Screen},
    subscription::{Callback, Subscription},
};

/// Snapshot of who is signed in and what their profile says.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
    /// An application submission is in flight.
    pub submitting: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
            submitting: false,
        }
    }
}

impl SessionState {
    /// The principal for collaborator calls, richest form available.
    pub fn user(&self) -> Option<User> {
        match (&self.profile, &self.identity) {
            (Some(profile), _) => Some(User::from_profile(profile)),
            (None, Some(identity)) => Some(User::from_identity(identity)),
            (None, None) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub default_city: String,
    /// After this long the submitting flag is cleared even if the write is
    /// still outstanding. The write itself is never canceled.
    pub submission_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_city: "Miami".into(),
            submission_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_city: config.default_city.clone(),
            submission_timeout: config.submission_timeout,
        }
    }
}

struct Shared {
    api: DynAPI,
    config: SessionConfig,
    state: Arc<watch::Sender<SessionState>>,
    profile_subscription: Mutex<Option<Subscription>>,
}

/// Session/membership context handed to every consumer.
///
/// `init` subscribes to identity changes; each change is processed to
/// completion before the next one is looked at. `dispose` (or dropping the
/// provider) tears every subscription down.
pub struct SessionProvider {
    shared: Arc<Shared>,
    auth_subscription: Mutex<Option<Subscription>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionProvider {
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(name = "SessionProvider::init", skip_all)]
    pub fn init(api: DynAPI, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::default());

        let shared = Arc::new(Shared {
            api,
            config,
            state: Arc::new(state),
            profile_subscription: Mutex::new(None),
        });

        let (sender, receiver) = async_channel::unbounded::<Option<Identity>>();

        let auth_subscription = shared.api.subscribe_identity(Box::new(move |identity| {
            let _ = sender.try_send(identity);
        }));

        let worker = {
            let shared = shared.clone();

            tokio::spawn(async move {
                while let Ok(identity) = receiver.recv().await {
                    shared.on_identity(identity).await;
                }
            })
        };

        Self {
            shared,
            auth_subscription: Mutex::new(Some(auth_subscription)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn route(&self) -> Screen {
        router::route(&self.shared.state.borrow())
    }

    fn current(&self) -> Result<(User, Identity), Error> {
        let state = self.shared.state.borrow();

        let identity = state.identity.clone().ok_or_else(unauthenticated_error)?;
        let user = state.user().ok_or_else(unauthenticated_error)?;

        Ok((user, identity))
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: String,
        password: String,
        full_name: String,
    ) -> Result<Identity, Error> {
        self.shared
            .api
            .sign_up(email, password, full_name.trim().into())
            .await
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, email: String, password: String) -> Result<Identity, Error> {
        self.shared.api.sign_in(email, password).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), Error> {
        self.shared.api.sign_out().await?;

        self.shared.cancel_profile_subscription();
        self.shared.state.send_modify(|state| {
            state.identity = None;
            state.profile = None;
            state.loading = false;
            state.submitting = false;
        });

        Ok(())
    }

    /// Merges `patch` locally at once and remotely after; a failed remote write
    /// restores the previous local profile.
    #[tracing::instrument(skip(self))]
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, Error> {
        let (user, identity) = self.current()?;
        let previous = self.shared.state.borrow().profile.clone();

        self.shared.state.send_modify(|state| {
            if let Some(profile) = state.profile.as_mut() {
                profile.apply(patch.clone());
            }
        });

        match self
            .shared
            .api
            .merge_profile(user, identity.id.clone(), patch)
            .await
        {
            Ok(profile) => {
                self.shared.hold_profile(&identity.id, profile.clone());
                Ok(profile)
            }
            Err(err) => {
                tracing::error!("failed to update profile {}: {}", identity.id, err);
                self.shared.restore_profile(&identity.id, previous);
                Err(err)
            }
        }
    }

    /// Validates the form, resolves the optional invite code and moves the
    /// profile to `pending`.
    #[tracing::instrument(skip(self, form))]
    pub async fn submit_application(
        &self,
        form: ApplicationForm,
        invite_code: Option<String>,
    ) -> Result<Profile, Error> {
        let application = form.into_application()?;
        let (user, identity) = self.current()?;

        self.shared.state.send_modify(|state| state.submitting = true);

        let safety = {
            let state = self.shared.state.clone();
            let timeout = self.shared.config.submission_timeout;

            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("application submission still pending, clearing indicator");
                state.send_modify(|state| state.submitting = false);
            })
        };

        let result = self
            .shared
            .submit_application(user, identity, application, invite_code)
            .await;

        safety.abort();
        self.shared
            .state
            .send_modify(|state| state.submitting = false);

        result
    }

    /// Replaces every stored photo of the user with `bytes` and records the
    /// new URL on the profile.
    #[tracing::instrument(skip(self, bytes))]
    pub async fn upload_photo(&self, bytes: Vec<u8>) -> Result<String, Error> {
        let (user, identity) = self.current()?;

        self.shared.purge_objects(user.clone(), &identity.id).await?;

        let path = format!(
            "{}profile_{}.jpg",
            user_object_prefix(&identity.id),
            Utc::now().timestamp_millis()
        );

        let url = self
            .shared
            .api
            .upload_object(user, path, bytes, "image/jpeg".into())
            .await?;

        self.update_profile(ProfilePatch {
            photo_url: Some(url.clone()),
            ..ProfilePatch::default()
        })
        .await?;

        Ok(url)
    }

    /// Purges photos, then the profile document, then the identity itself.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<(), Error> {
        let (user, identity) = self.current()?;

        self.shared.purge_objects(user.clone(), &identity.id).await?;

        self.shared.cancel_profile_subscription();
        self.shared
            .api
            .delete_profile(user.clone(), identity.id.clone())
            .await?;

        self.shared.api.delete_account(user).await?;

        self.shared.state.send_modify(|state| {
            state.identity = None;
            state.profile = None;
            state.loading = false;
            state.submitting = false;
        });

        Ok(())
    }

    pub fn dispose(&self) {
        if let Some(subscription) = self
            .auth_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.cancel();
        }

        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.abort();
        }

        self.shared.cancel_profile_subscription();
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    #[tracing::instrument(skip(self))]
    async fn on_identity(&self, identity: Option<Identity>) {
        self.cancel_profile_subscription();

        let identity = match identity {
            Some(identity) => identity,
            None => {
                tracing::info!("no active session");
                self.state.send_modify(|state| {
                    state.identity = None;
                    state.profile = None;
                    state.loading = false;
                    state.submitting = false;
                });
                return;
            }
        };

        self.state.send_modify(|state| {
            state.identity = Some(identity.clone());
            state.profile = None;
            state.loading = true;
        });

        let profile = match self.load_profile(&identity).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::error!("failed to load profile {}: {}", identity.id, err);
                None
            }
        };

        self.state.send_modify(|state| {
            state.profile = profile.clone();
            state.loading = false;
        });

        if let Some(profile) = profile {
            self.watch_profile(&profile).await;
        }
    }

    /// Fetches the profile, synthesizing and persisting a default one when the
    /// identity has none yet.
    async fn load_profile(&self, identity: &Identity) -> Result<Profile, Error> {
        let user = User::from_identity(identity);

        if let Some(profile) = self
            .api
            .find_profile(user.clone(), identity.id.clone())
            .await?
        {
            return Ok(profile);
        }

        tracing::info!("no profile for {}, creating the default one", identity.id);
        let profile = Profile::new_default(identity, &self.config.default_city);

        match self.api.set_profile(user, profile.clone()).await {
            Ok(profile) => Ok(profile),
            Err(err) => {
                // still usable locally; the next sign-in retries the write
                tracing::error!("failed to persist default profile {}: {}", identity.id, err);
                Ok(profile)
            }
        }
    }

    async fn watch_profile(&self, profile: &Profile) {
        let id = profile.id.clone();

        match self
            .api
            .subscribe_profile(
                User::from_profile(profile),
                id.clone(),
                self.profile_callback(id.clone()),
            )
            .await
        {
            Ok(subscription) => {
                let previous = self
                    .profile_subscription
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(subscription);

                if let Some(previous) = previous {
                    previous.cancel();
                }
            }
            Err(err) => tracing::error!("failed to watch profile {}: {}", id, err),
        }
    }

    /// Remote snapshots replace the local profile of the same identity.
    fn profile_callback(&self, id: UserId) -> Callback<Option<Profile>> {
        let state = self.state.clone();

        Box::new(move |profile| match profile {
            Some(profile) => {
                state.send_if_modified(|state| {
                    let same_identity = state.identity.as_ref().map(|i| &i.id) == Some(&id);

                    if !same_identity || state.profile.as_ref() == Some(&profile) {
                        return false;
                    }

                    state.profile = Some(profile);
                    true
                });
            }
            None => tracing::info!("profile {} was removed remotely", id),
        })
    }

    fn cancel_profile_subscription(&self) {
        let previous = self
            .profile_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn hold_profile(&self, id: &str, profile: Profile) {
        self.state.send_if_modified(|state| {
            if state.identity.as_ref().map(|i| i.id.as_str()) != Some(id) {
                return false;
            }

            state.profile = Some(profile);
            true
        });
    }

    fn restore_profile(&self, id: &str, previous: Option<Profile>) {
        self.state.send_if_modified(|state| {
            if state.identity.as_ref().map(|i| i.id.as_str()) != Some(id) {
                return false;
            }

            state.profile = previous;
            true
        });
    }

    async fn submit_application(
        &self,
        user: User,
        identity: Identity,
        mut application: Application,
        invite_code: Option<String>,
    ) -> Result<Profile, Error> {
        let invite_code = invite_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        if let Some(code) = invite_code {
            match self
                .api
                .find_profile_by_invite_code(user.clone(), code.clone())
                .await?
            {
                Some(inviter) => application = application.with_inviter(&inviter),
                None => tracing::info!("invite code {} matched no member", code),
            }
        }

        let previous = self.state.borrow().profile.clone();

        self.state.send_modify(|state| {
            if let Some(profile) = state.profile.as_mut() {
                if let Err(err) = profile.submit_application(application.clone()) {
                    tracing::warn!("local profile cannot take the application: {}", err);
                }
            }
        });

        match self
            .api
            .submit_application(user, identity.id.clone(), application.clone())
            .await
        {
            Ok(profile) => {
                tracing::info!("application submitted for {}", identity.id);
                self.hold_profile(&identity.id, profile.clone());
                Ok(profile)
            }
            Err(err) => {
                tracing::error!("failed to submit application {}: {}", identity.id, err);
                self.restore_profile(&identity.id, previous);
                Err(err)
            }
        }
    }

    async fn purge_objects(&self, user: User, id: &str) -> Result<(), Error> {
        let paths = self
            .api
            .list_objects(user.clone(), user_object_prefix(id))
            .await?;

        let deletes = paths.iter().map(|path| {
            let user = user.clone();
            async move {
                if let Err(err) = self.api.delete_object(user, path.clone()).await {
                    tracing::warn!("failed to delete {}: {}", path, err);
                }
            }
        });

        futures::future::join_all(deletes).await;

        Ok(())
    }
}

#[cfg(test)]
use crate::memory::MemoryBackend;

#[cfg(test)]
async fn reach<F>(session: &SessionProvider, done: F) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    let mut changes = session.changes();

    tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            let state = changes.borrow_and_update().clone();
            if done(&state) {
                return state;
            }

            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap()
}

#[cfg(test)]
fn start() -> (Arc<MemoryBackend>, SessionProvider) {
    let backend = Arc::new(MemoryBackend::new().unwrap());
    let session = SessionProvider::init(backend.clone(), SessionConfig::default());

    (backend, session)
}

#[tokio::test]
async fn starts_unauthenticated() {
    let (_, session) = start();

    reach(&session, |state| !state.loading).await;
    assert_eq!(session.route(), Screen::Unauthenticated);

    session.dispose();
}

#[tokio::test]
async fn sign_up_lands_on_application_start() {
    let (_, session) = start();

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), " Ana ".into())
        .await
        .unwrap();

    let state = reach(&session, |state| state.profile.is_some() && !state.loading).await;
    assert_eq!(state.profile.unwrap().full_name, "Ana");
    assert_eq!(session.route(), Screen::ApplicationStart);

    session.sign_out().await.unwrap();
    reach(&session, |state| state.identity.is_none()).await;
    assert_eq!(session.route(), Screen::Unauthenticated);
}

#[tokio::test]
async fn missing_profile_is_synthesized() {
    use crate::api::{IdentityAPI, ProfileAPI};

    let backend = Arc::new(MemoryBackend::new().unwrap());

    let identity = backend
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    backend
        .delete_profile(User::from_identity(&identity), identity.id.clone())
        .await
        .unwrap();

    let session = SessionProvider::init(backend.clone(), SessionConfig::default());

    let state = reach(&session, |state| state.profile.is_some() && !state.loading).await;
    let profile = state.profile.unwrap();
    assert_eq!(profile.full_name, "Ana");
    assert_eq!(profile.city.as_deref(), Some("Miami"));
    assert_eq!(
        profile.invite_code,
        Some(crate::entities::invite_code_for(&identity.id))
    );

    let stored = backend
        .find_profile(User::from_identity(&identity), identity.id.clone())
        .await
        .unwrap();
    assert_eq!(stored, Some(profile));
}

#[tokio::test]
async fn application_flow_follows_admin_review() {
    use crate::api::ProfileAPI;
    use crate::entities::{sample_form, Decision};

    let (backend, session) = start();

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    let state = reach(&session, |state| state.profile.is_some() && !state.loading).await;
    let id = state.identity.unwrap().id;

    let invalid = ApplicationForm {
        age: "20".into(),
        ..sample_form()
    };
    let err = session.submit_application(invalid, None).await.unwrap_err();
    assert_eq!(err.message, "Must be 21 or older");
    assert_eq!(session.route(), Screen::ApplicationStart);

    let profile = session
        .submit_application(sample_form(), None)
        .await
        .unwrap();
    assert_eq!(profile.instagram_handle.as_deref(), Some("@acme"));
    assert!(!session.state().submitting);
    reach(&session, |state| router::route(state) == Screen::ApplicationReview).await;

    backend
        .review_application(User::new_admin_user("admin"), id, Decision::Approve)
        .await
        .unwrap();

    reach(&session, |state| router::route(state) == Screen::Members).await;
}

#[tokio::test]
async fn submitting_clears_after_timeout_while_write_is_pending() {
    use crate::api::ProfileAPI;
    use crate::entities::{sample_form, MembershipStatus};

    let backend = Arc::new(MemoryBackend::new().unwrap());
    let session = SessionProvider::init(
        backend.clone(),
        SessionConfig {
            submission_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        },
    );

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    let state = reach(&session, |state| state.profile.is_some() && !state.loading).await;
    let user = state.user().unwrap();
    let id = state.identity.unwrap().id;
    tokio::time::sleep(Duration::from_millis(20)).await;

    backend.delay_writes(Duration::from_millis(400));

    let submit = session.submit_application(sample_form(), None);
    let observe = async {
        reach(&session, |state| {
            !state.submitting
                && state.profile.as_ref().map(|p| &p.membership_status)
                    == Some(&MembershipStatus::Pending)
        })
        .await;

        backend.find_profile(user.clone(), id.clone()).await.unwrap()
    };

    let (submitted, stored_meanwhile) = tokio::join!(submit, observe);

    assert_eq!(
        stored_meanwhile.unwrap().membership_status,
        MembershipStatus::NotApplied
    );
    assert_eq!(submitted.unwrap().membership_status, MembershipStatus::Pending);
    assert!(!session.state().submitting);

    let stored = backend.find_profile(user, id).await.unwrap().unwrap();
    assert_eq!(stored.membership_status, MembershipStatus::Pending);
}

#[tokio::test]
async fn invite_codes_credit_the_inviter() {
    let (backend, session) = start();

    let inviter_identity = Identity::new("inviter-1", None, Some("Lucía".into()));
    let inviter = Profile::new_default(&inviter_identity, "Miami");
    let code = inviter.invite_code.clone().unwrap();
    backend.insert_profile(inviter);

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    reach(&session, |state| state.profile.is_some() && !state.loading).await;

    let profile = session
        .submit_application(crate::entities::sample_form(), Some(code.to_lowercase()))
        .await
        .unwrap();

    assert_eq!(profile.invited_by.as_deref(), Some("inviter-1"));
    assert_eq!(profile.heard_about_us.as_deref(), Some("Invited by Lucía"));
    assert!(profile.invited_at.is_some());
}

#[tokio::test]
async fn failed_profile_update_is_reverted() {
    let (backend, session) = start();

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    let before = reach(&session, |state| state.profile.is_some() && !state.loading).await;

    backend.fail_writes(true);

    let result = session
        .update_profile(ProfilePatch {
            bio: Some("Arquitecta".into()),
            ..ProfilePatch::default()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(session.state().profile, before.profile);
    assert!(!session.state().submitting);

    backend.fail_writes(false);

    let profile = session
        .update_profile(ProfilePatch {
            bio: Some("Arquitecta".into()),
            ..ProfilePatch::default()
        })
        .await
        .unwrap();
    assert_eq!(profile.bio.as_deref(), Some("Arquitecta"));
}

#[tokio::test]
async fn photo_upload_replaces_previous_photos() {
    let (backend, session) = start();

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    let state = reach(&session, |state| state.profile.is_some() && !state.loading).await;
    let id = state.identity.unwrap().id;

    session.upload_photo(vec![1]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let url = session.upload_photo(vec![2]).await.unwrap();

    let paths = backend.object_paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with(&format!("profiles/{}/profile_", id)));

    reach(&session, |state| {
        state.profile.as_ref().and_then(|p| p.photo_url.clone()) == Some(url.clone())
    })
    .await;
}

#[tokio::test]
async fn delete_account_removes_everything() {
    use crate::api::IdentityAPI;
    use crate::error::user_not_found_error;

    let (backend, session) = start();

    session
        .sign_up("ana@casa.club".into(), "secret1".into(), "Ana".into())
        .await
        .unwrap();
    reach(&session, |state| state.profile.is_some() && !state.loading).await;
    session.upload_photo(vec![1]).await.unwrap();

    session.delete_account().await.unwrap();

    reach(&session, |state| state.identity.is_none() && !state.loading).await;
    assert!(backend.object_paths().is_empty());

    let result = backend
        .sign_in("ana@casa.club".into(), "secret1".into())
        .await;
    assert_eq!(result.unwrap_err(), user_not_found_error());
}
