use super::helpers::{delete_profile, fetch_profile, fetch_profile_for_update, upsert_profile};
use super::{Engine, Seed};

use async_trait::async_trait;
use sqlx::{types::Json, Executor, Row};

use crate::{
    api::ProfileAPI,
    auth::{authorizor::guard_profile_write, Club, User},
    entities::{Application, Decision, Profile, ProfilePatch, UserId},
    error::{not_found_error, unauthorized_error, Error},
    subscription::{Callback, Subscription},
};

impl Engine {
    /// Locks the profile, applies `f` and commits the result.
    async fn modify_profile<F>(
        &self,
        user: User,
        id: UserId,
        action: &str,
        f: F,
    ) -> Result<Profile, Error>
    where
        F: FnOnce(&mut Profile) -> Result<(), Error> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let mut profile = fetch_profile_for_update(&mut tx, &id)
            .await?
            .ok_or_else(|| not_found_error())?;

        self.authorize(user.clone(), action, profile.clone())?;

        f(&mut profile)?;

        upsert_profile(&mut tx, &profile).await?;
        tx.commit().await?;

        Ok(profile)
    }

    /// A missing document may only be looked up by its owner or an admin.
    fn authorize_missing_profile(&self, user: &User, id: &str) -> Result<(), Error> {
        if user.id == id || user.is_admin() {
            return Ok(());
        }

        Err(unauthorized_error())
    }
}

#[async_trait]
impl ProfileAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn find_profile(&self, user: User, id: UserId) -> Result<Option<Profile>, Error> {
        match fetch_profile(&self.pool, &id).await? {
            Some(profile) => {
                self.authorize(user.clone(), "read", profile.clone())?;
                Ok(Some(profile))
            }
            None => {
                self.authorize_missing_profile(&user, &id)?;
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_profile_by_invite_code(
        &self,
        user: User,
        code: String,
    ) -> Result<Option<Profile>, Error> {
        self.authorize(user.clone(), "lookup_invite", Club::default())?;

        let mut conn = self.pool.acquire().await?;

        let maybe_result = conn
            .fetch_optional(
                sqlx::query("SELECT data FROM profiles WHERE invite_code = $1 LIMIT 1")
                    .bind(code.trim().to_uppercase()),
            )
            .await?;

        match maybe_result {
            Some(result) => {
                let Json(profile): Json<Profile> = result.try_get("data")?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, profile), fields(id = %profile.id))]
    async fn set_profile(&self, user: User, profile: Profile) -> Result<Profile, Error> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_profile_for_update(&mut tx, &profile.id).await?;

        self.authorize(user.clone(), "create", profile.clone())?;
        guard_profile_write(&user, existing.as_ref(), &profile)?;

        upsert_profile(&mut tx, &profile).await?;
        tx.commit().await?;

        Ok(profile)
    }

    #[tracing::instrument(skip(self))]
    async fn merge_profile(
        &self,
        user: User,
        id: UserId,
        patch: ProfilePatch,
    ) -> Result<Profile, Error> {
        self.modify_profile(user, id, "update", move |profile| {
            profile.apply(patch);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, application))]
    async fn submit_application(
        &self,
        user: User,
        id: UserId,
        application: Application,
    ) -> Result<Profile, Error> {
        self.modify_profile(user, id, "apply", move |profile| {
            profile.submit_application(application)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn review_application(
        &self,
        user: User,
        id: UserId,
        decision: Decision,
    ) -> Result<Profile, Error> {
        self.modify_profile(user, id, "review", move |profile| {
            profile.review(decision);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_profile(&self, user: User, id: UserId) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let profile = fetch_profile_for_update(&mut tx, &id)
            .await?
            .ok_or_else(|| not_found_error())?;

        self.authorize(user.clone(), "delete", profile)?;

        delete_profile(&mut tx, &id).await?;
        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_profile(
        &self,
        user: User,
        id: UserId,
        callback: Callback<Option<Profile>>,
    ) -> Result<Subscription, Error> {
        match fetch_profile(&self.pool, &id).await? {
            Some(profile) => self.authorize(user.clone(), "read", profile)?,
            None => self.authorize_missing_profile(&user, &id)?,
        }

        // registered before the seed is queued, so no commit in between goes unseen
        let (sender, receiver) = self.hubs.profiles.register(id.clone());
        self.seed(Seed::Profile(id, sender))?;

        Ok(Subscription::spawn(receiver, callback))
    }
}
