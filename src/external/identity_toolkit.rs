use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::check_status;
use crate::{
    config::Config,
    entities::Identity,
    error::{
        email_exists_error, invalid_email_error, sign_in_error, sign_up_error,
        unauthenticated_error, upstream_error, user_not_found_error, weak_password_error,
        wrong_password_error, Error,
    },
    subscription::{Callback, Hub, Subscription},
};

/// A signed-in identity together with the bearer token for follow-up calls.
#[derive(Clone, Debug)]
pub struct Session {
    pub identity: Identity,
    pub id_token: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    id_token: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Clone, Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    SignUp,
    SignIn,
}

/// Maps a provider error code such as `"WEAK_PASSWORD : Password should be..."`
/// onto the fixed user-facing error of the flow that produced it.
fn map_provider_error(flow: Flow, message: &str) -> Error {
    let code = message.split(':').next().unwrap_or_default().trim();

    match (flow, code) {
        (Flow::SignUp, "EMAIL_EXISTS") => email_exists_error(),
        (Flow::SignUp, "WEAK_PASSWORD") => weak_password_error(),
        (Flow::SignIn, "EMAIL_NOT_FOUND") => user_not_found_error(),
        (Flow::SignIn, "INVALID_PASSWORD") | (Flow::SignIn, "INVALID_LOGIN_CREDENTIALS") => {
            wrong_password_error()
        }
        (_, "INVALID_EMAIL") => invalid_email_error(),
        (Flow::SignUp, _) => sign_up_error(),
        (Flow::SignIn, _) => sign_in_error(),
    }
}

/// Keeps the fixed user-facing errors and folds everything else into the
/// generic failure of the flow.
fn settle(flow: Flow, err: Error) -> Error {
    match err.code {
        110..=116 => err,
        _ => match flow {
            Flow::SignUp => sign_up_error(),
            Flow::SignIn => sign_in_error(),
        },
    }
}

/// REST client of the hosted identity provider. Holds the one active session.
pub struct IdentityToolkit {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    session: Mutex<Option<Session>>,
    hub: Hub<(), Option<Identity>>,
}

impl IdentityToolkit {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.identity_api_base.clone(),
            api_key: config.firebase_api_key.clone(),
            session: Mutex::new(None),
            hub: Hub::new(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("https://{}/v1/accounts:{}", self.api_base, method)
    }

    async fn password_call(
        &self,
        flow: Flow,
        email: &str,
        password: &str,
    ) -> Result<Session, Error> {
        let method = match flow {
            Flow::SignUp => "signUp",
            Flow::SignIn => "signInWithPassword",
        };

        let res = self
            .client
            .post(self.url(method))
            .query(&[("key", &self.api_key)])
            .json(&PasswordRequest {
                email: email.trim(),
                password,
                return_secure_token: true,
            })
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if status_code == 400 {
            let body: ErrorResponse = res.json().await?;
            tracing::info!("identity provider rejected {}: {}", method, body.error.message);
            return Err(map_provider_error(flow, &body.error.message));
        }

        check_status(status_code)?;

        let data: AccountResponse = res.json().await?;
        let id_token = data.id_token.ok_or_else(upstream_error)?;

        Ok(Session {
            identity: Identity::new(data.local_id, data.email, data.display_name),
            id_token,
        })
    }

    /// Creates the account and names it, without announcing the session yet.
    #[tracing::instrument(skip(self, password))]
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session, Error> {
        let mut session = self
            .password_call(Flow::SignUp, email, password)
            .await
            .map_err(|err| settle(Flow::SignUp, err))?;

        self.set_display_name(&session.id_token, display_name)
            .await
            .map_err(|err| settle(Flow::SignUp, err))?;

        session.identity.display_name = Some(display_name.into());
        Ok(session)
    }

    async fn set_display_name(&self, id_token: &str, display_name: &str) -> Result<(), Error> {
        let res = self
            .client
            .post(self.url("update"))
            .query(&[("key", &self.api_key)])
            .json(&UpdateRequest {
                id_token,
                display_name,
                return_secure_token: false,
            })
            .send()
            .await?;

        check_status(res.status().as_u16())
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let session = self
            .password_call(Flow::SignIn, email, password)
            .await
            .map_err(|err| settle(Flow::SignIn, err))?;
        let identity = session.identity.clone();

        self.activate(session);

        Ok(identity)
    }

    /// Makes `session` current and announces it to every identity subscriber.
    pub fn activate(&self, session: Session) {
        let mut current = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let identity = session.identity.clone();

        *current = Some(session);
        self.hub.publish(&(), Some(identity));
    }

    pub fn sign_out(&self) {
        let mut current = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        if current.take().is_some() {
            self.hub.publish(&(), None);
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn id_token(&self) -> Result<String, Error> {
        self.current()
            .map(|session| session.id_token)
            .ok_or_else(unauthenticated_error)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<(), Error> {
        let id_token = self.id_token()?;

        let res = self
            .client
            .post(self.url("delete"))
            .query(&[("key", &self.api_key)])
            .json(&DeleteRequest {
                id_token: &id_token,
            })
            .send()
            .await?;

        check_status(res.status().as_u16())?;

        self.sign_out();

        Ok(())
    }

    pub fn subscribe(&self, callback: Callback<Option<Identity>>) -> Subscription {
        let current = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let identity = current.as_ref().map(|session| session.identity.clone());

        self.hub.subscribe((), identity, callback)
    }
}

#[test]
fn provider_errors_map_to_fixed_messages() {
    assert_eq!(
        map_provider_error(Flow::SignUp, "EMAIL_EXISTS"),
        email_exists_error()
    );
    assert_eq!(
        map_provider_error(
            Flow::SignUp,
            "WEAK_PASSWORD : Password should be at least 6 characters"
        ),
        weak_password_error()
    );
    assert_eq!(
        map_provider_error(Flow::SignIn, "INVALID_EMAIL"),
        invalid_email_error()
    );
    assert_eq!(
        map_provider_error(Flow::SignIn, "INVALID_LOGIN_CREDENTIALS"),
        wrong_password_error()
    );
    assert_eq!(
        map_provider_error(Flow::SignIn, "EMAIL_NOT_FOUND"),
        user_not_found_error()
    );
    assert_eq!(
        map_provider_error(Flow::SignIn, "TOO_MANY_ATTEMPTS_TRY_LATER"),
        sign_in_error()
    );
    assert_eq!(
        map_provider_error(Flow::SignUp, "OPERATION_NOT_ALLOWED"),
        sign_up_error()
    );
}

#[test]
fn transport_failures_become_generic() {
    assert_eq!(settle(Flow::SignUp, upstream_error()), sign_up_error());
    assert_eq!(settle(Flow::SignIn, upstream_error()), sign_in_error());
    assert_eq!(
        settle(Flow::SignIn, wrong_password_error()),
        wrong_password_error()
    );
}
