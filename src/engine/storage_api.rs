use super::Engine;

use async_trait::async_trait;

use crate::{
    api::StorageAPI,
    auth::{authorizor::authorize_object, User},
    error::Error,
};

#[async_trait]
impl StorageAPI for Engine {
    #[tracing::instrument(skip(self, bytes))]
    async fn upload_object(
        &self,
        user: User,
        path: String,
        bytes: Vec<u8>,
        content_type: String,
    ) -> Result<String, Error> {
        authorize_object(&user, &path)?;

        let id_token = self.identity.id_token()?;
        self.storage
            .upload(&id_token, &path, bytes, &content_type)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_object(&self, user: User, path: String) -> Result<(), Error> {
        authorize_object(&user, &path)?;

        let id_token = self.identity.id_token()?;
        self.storage.delete(&id_token, &path).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_objects(&self, user: User, prefix: String) -> Result<Vec<String>, Error> {
        authorize_object(&user, &prefix)?;

        let id_token = self.identity.id_token()?;
        self.storage.list(&id_token, &prefix).await
    }
}
