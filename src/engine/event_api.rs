use super::helpers::{
    delete_event, fetch_event, fetch_event_for_update, fetch_events, insert_event, update_event,
};
use super::{Engine, Seed};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::EventAPI,
    auth::{Club, User},
    entities::{CancelOutcome, Event, EventDraft, EventPatch, ReserveOutcome},
    error::{not_found_error, Error},
    subscription::{Callback, Subscription},
};

#[async_trait]
impl EventAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn list_events(&self, user: User) -> Result<Vec<Event>, Error> {
        self.authorize(user.clone(), "list_events", Club::default())?;

        fetch_events(&self.pool).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_event(&self, user: User, id: Uuid) -> Result<Event, Error> {
        let event = fetch_event(&self.pool, &id)
            .await?
            .ok_or_else(|| not_found_error())?;

        self.authorize(user.clone(), "read", event.clone())?;

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn create_event(&self, user: User, draft: EventDraft) -> Result<Event, Error> {
        self.authorize(user.clone(), "create_event", Club::default())?;

        let event = Event::new(draft)?;

        let mut tx = self.pool.begin().await?;
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!("event {} created", event.id);

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn update_event(&self, user: User, id: Uuid, patch: EventPatch) -> Result<Event, Error> {
        let mut tx = self.pool.begin().await?;
        let mut event = fetch_event_for_update(&mut tx, &id).await?;

        self.authorize(user.clone(), "update", event.clone())?;

        event.apply(patch)?;

        update_event(&mut tx, &event).await?;
        tx.commit().await?;

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_event(&self, user: User, id: Uuid) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        let event = fetch_event_for_update(&mut tx, &id).await?;

        self.authorize(user.clone(), "delete", event)?;

        delete_event(&mut tx, &id).await?;
        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reserve_event(&self, user: User, id: Uuid) -> Result<ReserveOutcome, Error> {
        let mut tx = self.pool.begin().await?;

        // the row lock serializes concurrent reservations on this event
        let mut event = fetch_event_for_update(&mut tx, &id).await?;

        self.authorize(user.clone(), "reserve", event.clone())?;

        let outcome = event.reserve(&user.id);

        if outcome == ReserveOutcome::Reserved {
            update_event(&mut tx, &event).await?;
        }

        tx.commit().await?;

        tracing::info!("reserve on {}: {:?}", id, outcome);

        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_reservation(&self, user: User, id: Uuid) -> Result<CancelOutcome, Error> {
        let mut tx = self.pool.begin().await?;
        let mut event = fetch_event_for_update(&mut tx, &id).await?;

        self.authorize(user.clone(), "cancel", event.clone())?;

        let outcome = event.cancel(&user.id);

        if outcome == CancelOutcome::Canceled {
            update_event(&mut tx, &event).await?;
        }

        tx.commit().await?;

        tracing::info!("cancel on {}: {:?}", id, outcome);

        Ok(outcome)
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_event(
        &self,
        user: User,
        id: Uuid,
        callback: Callback<Option<Event>>,
    ) -> Result<Subscription, Error> {
        self.authorize(user.clone(), "list_events", Club::default())?;

        let (sender, receiver) = self.hubs.events.register(id);
        self.seed(Seed::Event(id, sender))?;

        Ok(Subscription::spawn(receiver, callback))
    }

    #[tracing::instrument(skip(self, callback))]
    async fn subscribe_events(
        &self,
        user: User,
        callback: Callback<Vec<Event>>,
    ) -> Result<Subscription, Error> {
        self.authorize(user.clone(), "list_events", Club::default())?;

        let (sender, receiver) = self.hubs.feed.register(());
        self.seed(Seed::Feed(sender))?;

        Ok(Subscription::spawn(receiver, callback))
    }
}
