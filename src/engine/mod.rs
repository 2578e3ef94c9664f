mod event_api;
mod helpers;
mod identity_api;
mod profile_api;
mod storage_api;

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use oso::Oso;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgListener, Executor, Pool, Postgres};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    api::API,
    auth::authorizor,
    config::Config,
    entities::{Event, Profile, UserId},
    error::{unexpected_error, Error},
    external::{cloud_storage::CloudStorage, identity_toolkit::IdentityToolkit},
    subscription::Hub,
};

type Database = Postgres;

/// Notification channel every committed document write is announced on.
const CHANGES_CHANNEL: &str = "casa_changes";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
enum Change {
    Profile(UserId),
    Event(Uuid),
}

/// First snapshot of a new subscriber, read in line with the change relay so
/// it can never overtake a newer one.
enum Seed {
    Profile(UserId, Sender<Option<Profile>>),
    Event(Uuid, Sender<Option<Event>>),
    Feed(Sender<Vec<Event>>),
}

/// Relay work, handled one at a time in arrival order.
enum Job {
    Changed(Change),
    Seed(Seed),
}

#[derive(Default)]
struct Hubs {
    profiles: Hub<UserId, Option<Profile>>,
    events: Hub<Uuid, Option<Event>>,
    feed: Hub<(), Vec<Event>>,
}

pub struct Engine {
    pool: Pool<Database>,
    authorizor: Oso,
    identity: IdentityToolkit,
    storage: CloudStorage,
    hubs: Arc<Hubs>,
    jobs: Sender<Job>,
    listener: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub async fn new(pool: Pool<Database>, config: &Config) -> Result<Self, Error> {
        // profile documents, keyed by the identity provider's account id
        pool.execute("CREATE TABLE IF NOT EXISTS profiles (id VARCHAR PRIMARY KEY, status VARCHAR NOT NULL, invite_code VARCHAR, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE INDEX IF NOT EXISTS profiles_invite_code ON profiles (invite_code)")
            .await?;

        // event documents
        pool.execute("CREATE TABLE IF NOT EXISTS events (id UUID PRIMARY KEY, date TIMESTAMPTZ NOT NULL, data JSONB NOT NULL)")
            .await?;

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGES_CHANNEL).await?;

        let hubs = Arc::new(Hubs::default());
        let (jobs, queue) = async_channel::unbounded();

        let listener = tokio::spawn(listen_for_changes(listener, jobs.clone()));
        let relay = tokio::spawn(relay_changes(queue, pool.clone(), hubs.clone()));

        Ok(Self {
            pool,
            authorizor: authorizor::new()?,
            identity: IdentityToolkit::new(config),
            storage: CloudStorage::new(config),
            hubs,
            jobs,
            listener,
            relay,
        })
    }
}

impl Engine {
    pub fn authorize<Actor, Action, Resource>(
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

    /// Queues the first snapshot of a subscriber behind every change already
    /// announced.
    fn seed(&self, seed: Seed) -> Result<(), Error> {
        self.jobs
            .try_send(Job::Seed(seed))
            .map_err(|_| unexpected_error())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.listener.abort();
        self.relay.abort();
    }
}

impl API for Engine {}

async fn listen_for_changes(mut listener: PgListener, jobs: Sender<Job>) {
    loop {
        let notification = match listener.recv().await {
            Ok(notification) => notification,
            Err(err) => {
                // the listener reconnects on the next recv
                tracing::error!("change listener failed: {:?}", err);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let change: Change = match serde_json::from_str(notification.payload()) {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!("ignoring malformed change {:?}: {}", notification.payload(), err);
                continue;
            }
        };

        if jobs.send(Job::Changed(change)).await.is_err() {
            break;
        }
    }
}

/// Re-reads every announced document and fans the fresh snapshot out.
///
/// Seeds share the queue, so each subscriber sees its snapshots in the order
/// they were read.
async fn relay_changes(queue: Receiver<Job>, pool: Pool<Database>, hubs: Arc<Hubs>) {
    while let Ok(job) = queue.recv().await {
        match job {
            Job::Changed(change) => {
                if let Err(err) = relay(&change, &pool, &hubs).await {
                    tracing::error!("failed to relay {:?}: {}", change, err);
                }
            }
            Job::Seed(seed) => {
                if let Err(err) = deliver_seed(seed, &pool).await {
                    tracing::error!("failed to read initial snapshot: {}", err);
                }
            }
        }
    }
}

async fn relay(change: &Change, pool: &Pool<Database>, hubs: &Hubs) -> Result<(), Error> {
    match change {
        Change::Profile(id) => {
            let profile = helpers::fetch_profile(pool, id).await?;
            hubs.profiles.publish(id, profile);
        }
        Change::Event(id) => {
            let event = helpers::fetch_event(pool, id).await?;
            hubs.events.publish(id, event);

            let feed = helpers::fetch_events(pool).await?;
            hubs.feed.publish(&(), feed);
        }
    }

    Ok(())
}

async fn deliver_seed(seed: Seed, pool: &Pool<Database>) -> Result<(), Error> {
    // a closed sender means the subscriber is already gone
    match seed {
        Seed::Profile(id, sender) => {
            let _ = sender.try_send(helpers::fetch_profile(pool, &id).await?);
        }
        Seed::Event(id, sender) => {
            let _ = sender.try_send(helpers::fetch_event(pool, &id).await?);
        }
        Seed::Feed(sender) => {
            let _ = sender.try_send(helpers::fetch_events(pool).await?);
        }
    }

    Ok(())
}

#[test]
fn change_payloads() {
    let change = Change::Profile("u1".into());
    let payload = serde_json::to_string(&change).unwrap();

    assert_eq!(payload, r#"{"kind":"profile","id":"u1"}"#);
    assert_eq!(serde_json::from_str::<Change>(&payload).unwrap(), change);
}

#[cfg(test)]
fn test_config(database_url: String) -> Config {
    Config {
        database_url,
        database_max_connections: 5,
        firebase_api_key: "unused".into(),
        firebase_storage_bucket: "unused".into(),
        identity_api_base: "identitytoolkit.googleapis.com".into(),
        storage_api_base: "firebasestorage.googleapis.com".into(),
        default_city: "Miami".into(),
        submission_timeout: Duration::from_secs(30),
        local_store_path: "casa-local.json".into(),
    }
}

#[test]
#[ignore = "needs a Postgres instance at DATABASE_URL"]
fn concurrent_reservations_respect_capacity() {
    use crate::api::EventAPI;
    use crate::auth::User;
    use crate::entities::{EventDraft, MembershipStatus, ReserveOutcome};

    tokio_test::block_on(async {
        let config = test_config(std::env::var("DATABASE_URL").unwrap());
        let crate::db::PgPool(pool) = crate::db::PgPool::new(&config.database_url, 5)
            .await
            .unwrap();
        let engine = Arc::new(Engine::new(pool, &config).await.unwrap());

        let admin = User::new_admin_user("admin");
        let event = engine
            .create_event(
                admin,
                EventDraft {
                    title: "Cena Privada".into(),
                    location: "Wynwood".into(),
                    capacity: 1,
                    ..EventDraft::default()
                },
            )
            .await
            .unwrap();

        let member = |id: &str| User {
            id: id.into(),
            roles: vec!["member".into()],
            membership: MembershipStatus::Approved,
        };

        let (a, b) = futures::join!(
            engine.reserve_event(member("a"), event.id),
            engine.reserve_event(member("b"), event.id)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|outcome| *outcome == ReserveOutcome::Full);

        assert_eq!(outcomes, vec![ReserveOutcome::Reserved, ReserveOutcome::Full]);

        let stored = engine.find_event(member("a"), event.id).await.unwrap();
        assert_eq!(stored.attendees.len(), 1);
    });
}

#[test]
#[ignore = "needs a Postgres instance at DATABASE_URL"]
fn subscriptions_settle_on_the_latest_commit() {
    use std::sync::Mutex;

    use crate::api::ProfileAPI;
    use crate::auth::User;
    use crate::entities::{Identity, ProfilePatch};

    tokio_test::block_on(async {
        let config = test_config(std::env::var("DATABASE_URL").unwrap());
        let crate::db::PgPool(pool) = crate::db::PgPool::new(&config.database_url, 5)
            .await
            .unwrap();
        let engine = Arc::new(Engine::new(pool, &config).await.unwrap());

        let admin = User::new_admin_user("admin");
        let id = format!("settle-{}", Uuid::new_v4());
        let profile = Profile::registered(&Identity::new(id.clone(), None, None), "Ana".into());
        engine.set_profile(admin.clone(), profile).await.unwrap();

        // writes race the subscription's first read
        let writer = {
            let engine = engine.clone();
            let admin = admin.clone();
            let id = id.clone();
            tokio::spawn(async move {
                for n in 0..20 {
                    let patch = ProfilePatch {
                        bio: Some(format!("bio {}", n)),
                        ..ProfilePatch::default()
                    };
                    engine.merge_profile(admin.clone(), id.clone(), patch).await.unwrap();
                }
            })
        };

        let last = Arc::new(Mutex::new(None));
        let subscription = {
            let last = last.clone();
            engine
                .subscribe_profile(
                    admin.clone(),
                    id.clone(),
                    Box::new(move |profile| *last.lock().unwrap() = profile),
                )
                .await
                .unwrap()
        };

        writer.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stored = engine.find_profile(admin, id).await.unwrap();
        assert_eq!(*last.lock().unwrap(), stored);
        assert_eq!(stored.unwrap().bio.as_deref(), Some("bio 19"));

        subscription.cancel();
    });
}
