use super::{Change, Database, CHANGES_CHANNEL};

use sqlx::{types::Json, Executor, Row, Transaction};
use uuid::Uuid;

use crate::{
    entities::{Event, Profile},
    error::{not_found_error, Error},
};

#[tracing::instrument(skip(executor))]
pub async fn fetch_profile<'e, E>(executor: E, id: &str) -> Result<Option<Profile>, Error>
where
    E: Executor<'e, Database = Database>,
{
    let maybe_result = executor
        .fetch_optional(sqlx::query("SELECT data FROM profiles WHERE id = $1").bind(id.to_owned()))
        .await?;

    match maybe_result {
        Some(result) => {
            let Json(profile): Json<Profile> = result.try_get("data")?;
            Ok(Some(profile))
        }
        None => Ok(None),
    }
}

#[tracing::instrument(skip(executor))]
pub async fn fetch_event<'e, E>(executor: E, id: &Uuid) -> Result<Option<Event>, Error>
where
    E: Executor<'e, Database = Database>,
{
    let maybe_result = executor
        .fetch_optional(sqlx::query("SELECT data FROM events WHERE id = $1").bind(*id))
        .await?;

    match maybe_result {
        Some(result) => {
            let Json(event): Json<Event> = result.try_get("data")?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

#[tracing::instrument(skip(executor))]
pub async fn fetch_events<'e, E>(executor: E) -> Result<Vec<Event>, Error>
where
    E: Executor<'e, Database = Database>,
{
    let results = executor
        .fetch_all(sqlx::query("SELECT data FROM events ORDER BY date ASC, id ASC"))
        .await?;

    let mut events = Vec::with_capacity(results.len());
    for result in results.iter() {
        let Json(event): Json<Event> = result.try_get("data")?;
        events.push(event);
    }

    Ok(events)
}

#[tracing::instrument(skip(tx))]
pub async fn fetch_profile_for_update(
    tx: &mut Transaction<'_, Database>,
    id: &str,
) -> Result<Option<Profile>, Error> {
    let maybe_result = tx
        .fetch_optional(sqlx::query("SELECT data FROM profiles WHERE id = $1 FOR UPDATE").bind(id))
        .await?;

    match maybe_result {
        Some(result) => {
            let Json(profile): Json<Profile> = result.try_get("data")?;
            Ok(Some(profile))
        }
        None => Ok(None),
    }
}

#[tracing::instrument(skip(tx))]
pub async fn fetch_event_for_update(
    tx: &mut Transaction<'_, Database>,
    id: &Uuid,
) -> Result<Event, Error> {
    let Json(event): Json<Event> = tx
        .fetch_optional(sqlx::query("SELECT data FROM events WHERE id = $1 FOR UPDATE").bind(id))
        .await?
        .ok_or_else(|| not_found_error())?
        .try_get("data")?;

    Ok(event)
}

#[tracing::instrument(skip(tx, profile), fields(id = %profile.id))]
pub async fn upsert_profile(
    tx: &mut Transaction<'_, Database>,
    profile: &Profile,
) -> Result<(), Error> {
    tx.execute(
        sqlx::query(
            "INSERT INTO profiles (id, status, invite_code, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, invite_code = EXCLUDED.invite_code, data = EXCLUDED.data",
        )
        .bind(&profile.id)
        .bind(profile.membership_status.name())
        .bind(&profile.invite_code)
        .bind(Json(profile)),
    )
    .await?;

    notify(tx, &Change::Profile(profile.id.clone())).await
}

#[tracing::instrument(skip(tx))]
pub async fn delete_profile(tx: &mut Transaction<'_, Database>, id: &str) -> Result<(), Error> {
    tx.execute(sqlx::query("DELETE FROM profiles WHERE id = $1").bind(id))
        .await?;

    notify(tx, &Change::Profile(id.into())).await
}

#[tracing::instrument(skip(tx, event), fields(id = %event.id))]
pub async fn insert_event(tx: &mut Transaction<'_, Database>, event: &Event) -> Result<(), Error> {
    tx.execute(
        sqlx::query("INSERT INTO events (id, date, data) VALUES ($1, $2, $3)")
            .bind(&event.id)
            .bind(&event.date)
            .bind(Json(event)),
    )
    .await?;

    notify(tx, &Change::Event(event.id)).await
}

#[tracing::instrument(skip(tx, event), fields(id = %event.id))]
pub async fn update_event(tx: &mut Transaction<'_, Database>, event: &Event) -> Result<(), Error> {
    tx.execute(
        sqlx::query("UPDATE events SET date = $2, data = $3 WHERE id = $1")
            .bind(&event.id)
            .bind(&event.date)
            .bind(Json(event)),
    )
    .await?;

    notify(tx, &Change::Event(event.id)).await
}

#[tracing::instrument(skip(tx))]
pub async fn delete_event(tx: &mut Transaction<'_, Database>, id: &Uuid) -> Result<(), Error> {
    tx.execute(sqlx::query("DELETE FROM events WHERE id = $1").bind(id))
        .await?;

    notify(tx, &Change::Event(*id)).await
}

/// Delivered to listeners only once the surrounding transaction commits.
async fn notify(tx: &mut Transaction<'_, Database>, change: &Change) -> Result<(), Error> {
    let payload = serde_json::to_string(change)?;

    tx.execute(
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGES_CHANNEL)
            .bind(payload),
    )
    .await?;

    Ok(())
}
