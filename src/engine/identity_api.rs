use super::helpers::upsert_profile;
use super::Engine;

use async_trait::async_trait;

use crate::{
    api::IdentityAPI,
    auth::User,
    entities::{Identity, Profile},
    error::{unauthenticated_error, unauthorized_error, Error},
    subscription::{Callback, Subscription},
};

#[async_trait]
impl IdentityAPI for Engine {
    #[tracing::instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: String,
        password: String,
        full_name: String,
    ) -> Result<Identity, Error> {
        let session = self
            .identity
            .create_account(&email, &password, &full_name)
            .await?;

        // the profile exists before anyone hears about the new identity
        let profile = Profile::registered(&session.identity, full_name);

        let mut tx = self.pool.begin().await?;
        upsert_profile(&mut tx, &profile).await?;
        tx.commit().await?;

        let identity = session.identity.clone();
        self.identity.activate(session);

        tracing::info!("account {} created", identity.id);

        Ok(identity)
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in(&self, email: String, password: String) -> Result<Identity, Error> {
        self.identity.sign_in(&email, &password).await
    }

    #[tracing::instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), Error> {
        self.identity.sign_out();

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_account(&self, user: User) -> Result<(), Error> {
        let session = self.identity.current().ok_or_else(unauthenticated_error)?;

        if session.identity.id != user.id {
            return Err(unauthorized_error());
        }

        self.identity.delete_account().await?;

        tracing::info!("account {} deleted", user.id);

        Ok(())
    }

    fn subscribe_identity(&self, callback: Callback<Option<Identity>>) -> Subscription {
        self.identity.subscribe(callback)
    }
}
