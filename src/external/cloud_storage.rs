use reqwest::Url;
use serde::Deserialize;

use super::check_status;
use crate::{
    config::Config,
    error::{not_found_error, unexpected_error, upstream_error, Error},
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    download_tokens: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectMetadata>,
}

/// REST client of the hosted object storage bucket.
pub struct CloudStorage {
    client: reqwest::Client,
    api_base: String,
    bucket: String,
}

impl CloudStorage {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.storage_api_base.clone(),
            bucket: config.firebase_storage_bucket.clone(),
        }
    }

    /// `.../v0/b/<bucket>/o`, optionally followed by the object name as one
    /// escaped segment.
    fn object_url(&self, path: Option<&str>) -> Result<Url, Error> {
        let mut url = Url::parse(&format!(
            "https://{}/v0/b/{}/o",
            self.api_base, self.bucket
        ))
        .map_err(|_| unexpected_error())?;

        if let Some(path) = path {
            url.path_segments_mut()
                .map_err(|_| unexpected_error())?
                .push(path);
        }

        Ok(url)
    }

    #[tracing::instrument(skip(self, id_token, bytes))]
    pub async fn upload(
        &self,
        id_token: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, Error> {
        let res = self
            .client
            .post(self.object_url(None)?)
            .query(&[("uploadType", "media"), ("name", path)])
            .bearer_auth(id_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        check_status(res.status().as_u16())?;

        let metadata: ObjectMetadata = res.json().await?;
        let token = metadata
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next())
            .ok_or_else(upstream_error)?;

        let mut url = self.object_url(Some(&metadata.name))?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", token);

        Ok(url.into())
    }

    #[tracing::instrument(skip(self, id_token))]
    pub async fn delete(&self, id_token: &str, path: &str) -> Result<(), Error> {
        let res = self
            .client
            .delete(self.object_url(Some(path))?)
            .bearer_auth(id_token)
            .send()
            .await?;

        let status_code = res.status().as_u16();
        if status_code == 404 {
            return Err(not_found_error());
        }

        // successful deletes answer 204
        if status_code != 204 {
            check_status(status_code)?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, id_token))]
    pub async fn list(&self, id_token: &str, prefix: &str) -> Result<Vec<String>, Error> {
        let res = self
            .client
            .get(self.object_url(None)?)
            .query(&[("prefix", prefix)])
            .bearer_auth(id_token)
            .send()
            .await?;

        check_status(res.status().as_u16())?;

        let data: ListResponse = res.json().await?;

        Ok(data.items.into_iter().map(|item| item.name).collect())
    }
}

#[cfg(test)]
fn storage() -> CloudStorage {
    CloudStorage {
        client: reqwest::Client::new(),
        api_base: "firebasestorage.googleapis.com".into(),
        bucket: "casa.appspot.com".into(),
    }
}

#[test]
fn object_names_are_one_escaped_segment() {
    let url = storage()
        .object_url(Some("profiles/u1/profile_1.jpg"))
        .unwrap();

    assert_eq!(
        url.as_str(),
        "https://firebasestorage.googleapis.com/v0/b/casa.appspot.com/o/profiles%2Fu1%2Fprofile_1.jpg"
    );
}
