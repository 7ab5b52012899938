//! Per-field validation of JSON request bodies.
//!
//! Handlers accept the body as a raw [`Value`] and pull fields out of it one by
//! one through a [`FieldReader`], so that every problem with a body is reported
//! together, keyed by the field name the client sent.

use crate::error::{MatriculaError, MatriculaResult};
use email_address::EmailAddress;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, str::FromStr};
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<&'static str, Vec<String>>);

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    pub fn into_result(self) -> MatriculaResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MatriculaError::Validation { errors: self })
        }
    }

    /// First message, plus a count of the rest.
    pub fn summary(&self) -> String {
        let mut messages = self.0.values().flatten();
        let Some(first) = messages.next() else {
            return "The given data was invalid.".to_string();
        };

        match messages.count() {
            0 => first.clone(),
            1 => format!("{first} (and 1 more error)"),
            n => format!("{first} (and {n} more errors)"),
        }
    }
}

/// Whether a field has to be present in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    /// Only validated when present. `null` counts as absent.
    Sometimes,
}

pub struct FieldReader<'a> {
    object: Option<&'a Map<String, Value>>,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    pub fn new(body: &'a Value) -> Self {
        Self {
            object: body.as_object(),
            errors: ValidationErrors::default(),
        }
    }

    pub fn reject(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    pub fn finish(self) -> ValidationErrors {
        self.errors
    }

    fn raw(&mut self, field: &'static str, presence: Presence) -> Option<&'a Value> {
        match self.object.and_then(|object| object.get(field)) {
            Some(Value::Null) | None => {
                if presence == Presence::Required {
                    self.reject(field, format!("The {field} field is required."));
                }
                None
            }
            Some(value) => Some(value),
        }
    }

    pub fn string(
        &mut self,
        field: &'static str,
        presence: Presence,
        max_len: usize,
    ) -> Option<String> {
        let value = self.raw(field, presence)?;

        let Some(s) = value.as_str() else {
            self.reject(field, format!("The {field} field must be a string."));
            return None;
        };
        let s = s.trim();

        if s.is_empty() {
            self.reject(field, format!("The {field} field is required."));
            return None;
        }
        if s.chars().count() > max_len {
            self.reject(
                field,
                format!("The {field} field must not be greater than {max_len} characters."),
            );
            return None;
        }

        Some(s.to_string())
    }

    pub fn date(&mut self, field: &'static str, presence: Presence) -> Option<Date> {
        let s = self.string(field, presence, usize::MAX)?;

        if let Ok(date) = Date::parse(&s, DATE_FORMAT) {
            Some(date)
        } else {
            self.reject(field, format!("The {field} field must match the format Y-m-d."));
            None
        }
    }

    pub fn email(&mut self, field: &'static str, presence: Presence) -> Option<EmailAddress> {
        let s = self.string(field, presence, 255)?;

        if let Ok(email) = EmailAddress::from_str(&s) {
            Some(email)
        } else {
            self.reject(
                field,
                format!("The {field} field must be a valid email address."),
            );
            None
        }
    }

    /// Reads a string field and hands it to `parse`, rejecting it with `invalid` on `None`.
    pub fn parsed<T>(
        &mut self,
        field: &'static str,
        presence: Presence,
        max_len: usize,
        invalid: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Option<T> {
        let s = self.string(field, presence, max_len)?;

        let parsed = parse(&s);
        if parsed.is_none() {
            self.reject(field, invalid);
        }
        parsed
    }
}
