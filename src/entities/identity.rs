use serde::{Deserialize, Serialize};

pub type UserId = String;

/// An authenticated account as reported by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, email: Option<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            display_name,
        }
    }
}

/// Shape check only: a non-empty local part and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();

    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split('.')
                    .filter(|label| !label.is_empty())
                    .count()
                    >= 2
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[test]
fn email_shapes() {
    assert!(is_valid_email("ana@casa.club"));
    assert!(is_valid_email(" ana@mail.casa.club "));
    assert!(!is_valid_email("ana"));
    assert!(!is_valid_email("@casa.club"));
    assert!(!is_valid_email("ana@casa"));
    assert!(!is_valid_email("ana@@casa.club"));
    assert!(!is_valid_email("ana maria@casa.club"));
}
