use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::User;
use crate::entities::{
    Application, CancelOutcome, Decision, Event, EventDraft, EventPatch, Identity, Profile,
    ProfilePatch, ReserveOutcome, UserId,
};
use crate::error::Error;
use crate::subscription::{Callback, Subscription};

#[async_trait]
pub trait IdentityAPI {
    /// Creates the account and its profile document, then announces the sign-in.
    async fn sign_up(&self, email: String, password: String, full_name: String)
        -> Result<Identity, Error>;
    async fn sign_in(&self, email: String, password: String) -> Result<Identity, Error>;
    async fn sign_out(&self) -> Result<(), Error>;
    async fn delete_account(&self, user: User) -> Result<(), Error>;

    /// Emits the current identity (or none) immediately, then every change.
    fn subscribe_identity(&self, callback: Callback<Option<Identity>>) -> Subscription;
}

#[async_trait]
pub trait ProfileAPI {
    async fn find_profile(&self, user: User, id: UserId) -> Result<Option<Profile>, Error>;
    async fn find_profile_by_invite_code(
        &self,
        user: User,
        code: String,
    ) -> Result<Option<Profile>, Error>;
    async fn set_profile(&self, user: User, profile: Profile) -> Result<Profile, Error>;
    async fn merge_profile(
        &self,
        user: User,
        id: UserId,
        patch: ProfilePatch,
    ) -> Result<Profile, Error>;
    async fn submit_application(
        &self,
        user: User,
        id: UserId,
        application: Application,
    ) -> Result<Profile, Error>;
    async fn review_application(
        &self,
        user: User,
        id: UserId,
        decision: Decision,
    ) -> Result<Profile, Error>;
    async fn delete_profile(&self, user: User, id: UserId) -> Result<(), Error>;
    async fn subscribe_profile(
        &self,
        user: User,
        id: UserId,
        callback: Callback<Option<Profile>>,
    ) -> Result<Subscription, Error>;
}

#[async_trait]
pub trait EventAPI {
    async fn list_events(&self, user: User) -> Result<Vec<Event>, Error>;
    async fn find_event(&self, user: User, id: Uuid) -> Result<Event, Error>;
    async fn create_event(&self, user: User, draft: EventDraft) -> Result<Event, Error>;
    async fn update_event(&self, user: User, id: Uuid, patch: EventPatch) -> Result<Event, Error>;
    async fn delete_event(&self, user: User, id: Uuid) -> Result<(), Error>;
    async fn reserve_event(&self, user: User, id: Uuid) -> Result<ReserveOutcome, Error>;
    async fn cancel_reservation(&self, user: User, id: Uuid) -> Result<CancelOutcome, Error>;
    async fn subscribe_event(
        &self,
        user: User,
        id: Uuid,
        callback: Callback<Option<Event>>,
    ) -> Result<Subscription, Error>;
    async fn subscribe_events(
        &self,
        user: User,
        callback: Callback<Vec<Event>>,
    ) -> Result<Subscription, Error>;
}

#[async_trait]
pub trait StorageAPI {
    /// Returns a publicly resolvable URL for the stored object.
    async fn upload_object(
        &self,
        user: User,
        path: String,
        bytes: Vec<u8>,
        content_type: String,
    ) -> Result<String, Error>;
    async fn delete_object(&self, user: User, path: String) -> Result<(), Error>;
    async fn list_objects(&self, user: User, prefix: String) -> Result<Vec<String>, Error>;
}

pub trait API: IdentityAPI + ProfileAPI + EventAPI + StorageAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;

/// Every object of a user lives under this prefix.
pub fn user_object_prefix(id: &str) -> String {
    format!("profiles/{}/", id)
}
