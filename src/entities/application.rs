use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entities::{Application, Profile};
use crate::error::{validation_error, Error};

pub const MINIMUM_AGE: i64 = 21;

/// Raw, unvalidated input of the membership application form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationForm {
    pub position: String,
    pub company: String,
    pub industry: String,
    pub education_level: String,
    pub income_range: String,
    pub city: String,
    pub age: String,
    pub instagram_handle: String,
    pub university: Option<String>,
    pub referral_source: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Position,
    Company,
    Industry,
    EducationLevel,
    IncomeRange,
    City,
    Age,
    InstagramHandle,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Company => "company",
            Self::Industry => "industry",
            Self::EducationLevel => "educationLevel",
            Self::IncomeRange => "incomeRange",
            Self::City => "city",
            Self::Age => "age",
            Self::InstagramHandle => "instagramHandle",
        }
    }
}

/// Field to message. Empty means the form is valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<Field, &'static str>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<&'static str> {
        self.0.get(&field).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &'static str)> + '_ {
        self.0.iter().map(|(field, message)| (*field, *message))
    }

    /// One line per violated rule, for a single aggregated alert.
    pub fn summary(&self) -> String {
        self.0.values().copied().collect::<Vec<_>>().join("\n")
    }

    fn insert(&mut self, field: Field, message: &'static str) {
        self.0.insert(field, message);
    }
}

impl ApplicationForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();

        let required = [
            (Field::Position, &self.position, "Position is required"),
            (Field::Company, &self.company, "Company/Employer is required"),
            (Field::Industry, &self.industry, "Industry is required"),
            (
                Field::EducationLevel,
                &self.education_level,
                "Education level is required",
            ),
            (Field::IncomeRange, &self.income_range, "Income range is required"),
            (Field::City, &self.city, "City is required"),
        ];

        for (field, value, message) in required {
            if value.trim().is_empty() {
                errors.insert(field, message);
            }
        }

        if self.age.trim().is_empty() {
            errors.insert(Field::Age, "Age is required");
        } else if parse_age(&self.age).is_none() {
            errors.insert(Field::Age, "Must be 21 or older");
        }

        if self.instagram_handle.trim().is_empty() {
            errors.insert(Field::InstagramHandle, "Instagram handle is required");
        } else if strip_handle(&self.instagram_handle).is_empty() {
            errors.insert(
                Field::InstagramHandle,
                "Please enter a valid Instagram handle",
            );
        }

        errors
    }

    /// Validates and converts into the stored shape, canonicalizing the handle.
    pub fn into_application(self) -> Result<Application, Error> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(validation_error(errors.summary()));
        }

        let age = parse_age(&self.age)
            .ok_or_else(|| validation_error("Must be 21 or older".into()))?;

        Ok(Application {
            position_title: self.position.trim().into(),
            company: self.company.trim().into(),
            industry: self.industry.trim().into(),
            education_level: self.education_level.trim().into(),
            university: non_blank(self.university),
            annual_income_range: self.income_range.trim().into(),
            city: self.city.trim().into(),
            age,
            instagram_handle: canonical_handle(&self.instagram_handle),
            heard_about_us: non_blank(self.referral_source),
            invited_by: None,
            invited_at: None,
        })
    }
}

impl Application {
    /// Records the inviter and rewrites the referral source accordingly.
    pub fn with_inviter(mut self, inviter: &Profile) -> Self {
        self.invited_by = Some(inviter.id.clone());
        self.invited_at = Some(Utc::now());
        self.heard_about_us = Some(format!("Invited by {}", inviter.full_name));
        self
    }
}

fn parse_age(raw: &str) -> Option<u32> {
    let age: i64 = raw.trim().parse().ok()?;

    if age < MINIMUM_AGE {
        return None;
    }

    age.try_into().ok()
}

fn strip_handle(raw: &str) -> &str {
    raw.trim().trim_start_matches('@').trim()
}

pub fn canonical_handle(raw: &str) -> String {
    format!("@{}", strip_handle(raw))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) fn sample_form() -> ApplicationForm {
    ApplicationForm {
        position: "Product Manager".into(),
        company: "Acme".into(),
        industry: "Tech".into(),
        education_level: "MBA".into(),
        income_range: "$150k - $200k".into(),
        city: "Miami".into(),
        age: "30".into(),
        instagram_handle: "acme".into(),
        university: None,
        referral_source: Some("Instagram".into()),
    }
}

#[test]
fn validation_is_idempotent() {
    let form = ApplicationForm {
        age: "abc".into(),
        company: " ".into(),
        ..sample_form()
    };

    assert_eq!(form.validate(), form.validate());
    assert_eq!(form.validate().len(), 2);
}

#[test]
fn age_boundary() {
    let at = |age: &str| ApplicationForm {
        age: age.into(),
        ..sample_form()
    };

    assert_eq!(at("21").validate().get(Field::Age), None);
    assert_eq!(at("20").validate().get(Field::Age), Some("Must be 21 or older"));
    assert_eq!(at("abc").validate().get(Field::Age), Some("Must be 21 or older"));
    assert_eq!(at("").validate().get(Field::Age), Some("Age is required"));
}

#[test]
fn instagram_handles_canonicalize() {
    for raw in ["@foo", "foo", "@@foo"] {
        let form = ApplicationForm {
            instagram_handle: raw.into(),
            ..sample_form()
        };

        assert!(form.validate().is_empty());
        assert_eq!(form.into_application().unwrap().instagram_handle, "@foo");
    }

    let form = ApplicationForm {
        instagram_handle: "@@@".into(),
        ..sample_form()
    };
    assert_eq!(
        form.validate().get(Field::InstagramHandle),
        Some("Please enter a valid Instagram handle")
    );
}

#[test]
fn every_required_field_reports() {
    let errors = ApplicationForm::default().validate();

    assert_eq!(errors.len(), 8);
    assert_eq!(errors.get(Field::Position), Some("Position is required"));
    assert_eq!(errors.get(Field::City), Some("City is required"));
    assert_eq!(errors.summary().lines().count(), 8);
}

#[test]
fn optional_fields_never_error() {
    let form = ApplicationForm {
        university: Some("".into()),
        referral_source: None,
        ..sample_form()
    };

    assert!(form.validate().is_empty());

    let application = form.into_application().unwrap();
    assert_eq!(application.university, None);
    assert_eq!(application.heard_about_us, None);
    assert_eq!(application.age, 30);
}

#[test]
fn invalid_form_does_not_convert() {
    let err = ApplicationForm::default().into_application().unwrap_err();

    assert_eq!(err.code, 104);
    assert!(err.message.contains("Instagram handle is required"));
}
