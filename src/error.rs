use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    /// Whether the message was written for people: validation, sign-in and
    /// sign-up failures. Internal failures carry a code below 100 and, like
    /// the remaining codes, only name the condition.
    pub fn is_displayable(&self) -> bool {
        matches!(self.code, 104 | 105 | 110..=116)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        authorizor_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        io_error(err)
    }
}

pub fn invalid_state_error() -> Error {
    Error {
        code: 100,
        message: "invalid state".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: 101,
        message: "invalid input".into(),
    }
}

pub fn unauthorized_error() -> Error {
    Error {
        code: 102,
        message: "unauthorized".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: 103,
        message: "not found".into(),
    }
}

pub fn validation_error(message: String) -> Error {
    Error { code: 104, message }
}

pub fn unauthenticated_error() -> Error {
    Error {
        code: 105,
        message: "You must be logged in to continue".into(),
    }
}

pub fn email_exists_error() -> Error {
    Error {
        code: 110,
        message: "An account with this email already exists".into(),
    }
}

pub fn invalid_email_error() -> Error {
    Error {
        code: 111,
        message: "Invalid email address".into(),
    }
}

pub fn weak_password_error() -> Error {
    Error {
        code: 112,
        message: "Password is too weak. Please use at least 6 characters".into(),
    }
}

pub fn user_not_found_error() -> Error {
    Error {
        code: 113,
        message: "No account found with this email".into(),
    }
}

pub fn wrong_password_error() -> Error {
    Error {
        code: 114,
        message: "Incorrect password".into(),
    }
}

pub fn sign_up_error() -> Error {
    Error {
        code: 115,
        message: "Failed to create account. Please try again.".into(),
    }
}

pub fn sign_in_error() -> Error {
    Error {
        code: 116,
        message: "Failed to sign in. Please try again.".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    tracing::error!("database error: {:?}", err);

    Error {
        code: 2,
        message: "database error".into(),
    }
}

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::error!("reqwest error: {:?}", err);

    Error {
        code: 3,
        message: "reqwest error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

pub fn authorizor_error(err: oso::OsoError) -> Error {
    tracing::error!("authorizor error: {:?}", err);

    Error {
        code: 6,
        message: "authorizor error".into(),
    }
}

pub fn serialization_error(_: serde_json::Error) -> Error {
    Error {
        code: 7,
        message: "serialization error".into(),
    }
}

pub fn io_error(_: std::io::Error) -> Error {
    Error {
        code: 8,
        message: "io error".into(),
    }
}

pub fn write_failed_error() -> Error {
    Error {
        code: 9,
        message: "write failed".into(),
    }
}

#[test]
fn internal_codes_are_hidden() {
    assert!(!database_error("boom").is_displayable());
    assert!(!upstream_error().is_displayable());
    assert!(!not_found_error().is_displayable());
    assert!(wrong_password_error().is_displayable());
    assert_eq!(
        weak_password_error().message,
        "Password is too weak. Please use at least 6 characters"
    );
}
