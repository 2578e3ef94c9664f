use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::entities::{showcase_catalog, ShowcaseEntry};
use crate::error::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contents {
    #[serde(default)]
    cache_cleared: bool,
    #[serde(default)]
    showcase_rsvps: BTreeSet<String>,
}

/// Small JSON file of client-side housekeeping flags.
pub struct LocalStore {
    path: PathBuf,
    contents: Mutex<Contents>,
}

impl LocalStore {
    /// A missing or unreadable file starts out empty.
    #[tracing::instrument(name = "LocalStore::open")]
    pub async fn open(path: &Path) -> Result<Self, Error> {
        let contents = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!("discarding malformed local store: {}", err);
                Contents::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Contents::default(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.into(),
            contents: Mutex::new(contents),
        })
    }

    /// True exactly once per store: the caller should clear its caches now.
    pub async fn take_cache_clear(&self) -> Result<bool, Error> {
        let mut contents = self.contents.lock().await;

        if contents.cache_cleared {
            return Ok(false);
        }

        contents.cache_cleared = true;
        self.persist(&contents).await?;

        Ok(true)
    }

    /// Flips the local RSVP of a showcase event and returns the new value.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_showcase_rsvp(&self, id: &str) -> Result<bool, Error> {
        let mut contents = self.contents.lock().await;

        let going = match contents.showcase_rsvps.remove(id) {
            true => false,
            false => contents.showcase_rsvps.insert(id.into()),
        };

        self.persist(&contents).await?;

        Ok(going)
    }

    pub async fn is_showcase_rsvp(&self, id: &str) -> bool {
        self.contents.lock().await.showcase_rsvps.contains(id)
    }

    /// The showcase catalog annotated with the local RSVPs.
    pub async fn showcase(&self) -> Vec<ShowcaseEntry> {
        let contents = self.contents.lock().await;

        showcase_catalog()
            .into_iter()
            .map(|event| ShowcaseEntry {
                going: contents.showcase_rsvps.contains(&event.id),
                event,
            })
            .collect()
    }

    async fn persist(&self, contents: &Contents) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(contents)?;

        // replaced atomically
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[test]
fn cache_clear_happens_once_across_reopens() {
    tokio_test::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casa-local.json");

        let store = LocalStore::open(&path).await.unwrap();
        assert!(store.take_cache_clear().await.unwrap());
        assert!(!store.take_cache_clear().await.unwrap());

        let reopened = LocalStore::open(&path).await.unwrap();
        assert!(!reopened.take_cache_clear().await.unwrap());
    });
}

#[test]
fn showcase_rsvps_toggle_and_persist() {
    tokio_test::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casa-local.json");

        let store = LocalStore::open(&path).await.unwrap();
        assert!(store.toggle_showcase_rsvp("showcase-2").await.unwrap());

        let reopened = LocalStore::open(&path).await.unwrap();
        assert!(reopened.is_showcase_rsvp("showcase-2").await);

        let entries = reopened.showcase().await;
        let entry = entries
            .iter()
            .find(|entry| entry.event.id == "showcase-2")
            .unwrap();
        assert!(entry.going);
        assert_eq!(entry.spots_remaining(), 7);

        assert!(!reopened.toggle_showcase_rsvp("showcase-2").await.unwrap());
        assert!(!reopened.is_showcase_rsvp("showcase-2").await);
    });
}

#[test]
fn malformed_file_starts_empty() {
    tokio_test::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casa-local.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = LocalStore::open(&path).await.unwrap();
        assert!(store.take_cache_clear().await.unwrap());
    });
}
