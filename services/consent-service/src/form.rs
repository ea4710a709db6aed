//! Leave-consent form validation
//!
//! The browser renders the PDF; the service checks the submission and hands
//! back the display strings and download name it should use.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::profile::Profile;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Submitted form. Dates are `YYYY-MM-DD` as produced by date inputs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentForm {
    pub student_name: String,
    pub student_id: String,
    pub bhawan: String,
    pub leave_from: String,
    pub leave_to: String,
    pub parent_name: String,
    pub place: String,
    pub date: String,
    pub mobile: String,
    pub signature_data_url: Option<String>,
}

/// One problem with one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// A form that passed validation, with dates in display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedForm {
    pub student_name: String,
    pub student_id: String,
    pub bhawan: String,
    pub leave_from: String,
    pub leave_to: String,
    pub parent_name: String,
    pub place: String,
    pub date: String,
    pub mobile: String,
    pub file_name: String,
}

/// `DD MMM YYYY` with an upper-case month, e.g. `05 NOV 2025`.
pub fn format_date_short(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.format("%d"),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

/// `<studentId>_<dd><mon>.pdf` for the day the form is generated.
pub fn file_name(student_id: &str, today: NaiveDate) -> String {
    format!(
        "{}_{}{}.pdf",
        student_id.trim(),
        today.format("%d"),
        MONTHS[today.month0() as usize].to_lowercase()
    )
}

fn parse_date(field: &'static str, value: &str, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errors.push(FieldError::new(field, "must be a date (YYYY-MM-DD)"));
            None
        }
    }
}

impl ConsentForm {
    /// Check the form. All problems are reported together.
    pub fn validate(&self, today: NaiveDate) -> Result<ValidatedForm, Vec<FieldError>> {
        let mut errors = Vec::new();

        let required: [(&'static str, &str); 9] = [
            ("studentName", &self.student_name),
            ("studentId", &self.student_id),
            ("bhawan", &self.bhawan),
            ("leaveFrom", &self.leave_from),
            ("leaveTo", &self.leave_to),
            ("parentName", &self.parent_name),
            ("place", &self.place),
            ("date", &self.date),
            ("mobile", &self.mobile),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, "is required"));
            }
        }

        let mobile = self.mobile.trim();
        if !mobile.is_empty() && !(mobile.len() == 10 && mobile.bytes().all(|b| b.is_ascii_digit()))
        {
            errors.push(FieldError::new("mobile", "must be a 10-digit number"));
        }

        let has_signature = self
            .signature_data_url
            .as_deref()
            .is_some_and(|s| s.trim().starts_with("data:image/"));
        if !has_signature {
            errors.push(FieldError::new("signature", "upload a signature image"));
        }

        let leave_from = (!self.leave_from.trim().is_empty())
            .then(|| parse_date("leaveFrom", &self.leave_from, &mut errors))
            .flatten();
        let leave_to = (!self.leave_to.trim().is_empty())
            .then(|| parse_date("leaveTo", &self.leave_to, &mut errors))
            .flatten();
        let date = (!self.date.trim().is_empty())
            .then(|| parse_date("date", &self.date, &mut errors))
            .flatten();

        if let (Some(from), Some(to)) = (leave_from, leave_to) {
            if to < from {
                errors.push(FieldError::new("leaveTo", "must not be before leaveFrom"));
            }
        }

        match (errors.is_empty(), leave_from, leave_to, date) {
            (true, Some(from), Some(to), Some(date)) => Ok(ValidatedForm {
                student_name: self.student_name.trim().to_string(),
                student_id: self.student_id.trim().to_string(),
                bhawan: self.bhawan.trim().to_string(),
                leave_from: format_date_short(from),
                leave_to: format_date_short(to),
                parent_name: self.parent_name.trim().to_string(),
                place: self.place.trim().to_string(),
                date: format_date_short(date),
                mobile: mobile.to_string(),
                file_name: file_name(&self.student_id, today),
            }),
            _ => Err(errors),
        }
    }

    /// The raw values as a profile patch, for prefilling the next visit.
    pub fn to_profile(&self) -> Profile {
        Profile {
            student_name: Some(self.student_name.clone()),
            student_id: Some(self.student_id.clone()),
            bhawan: Some(self.bhawan.clone()),
            leave_from: Some(self.leave_from.clone()),
            leave_to: Some(self.leave_to.clone()),
            parent_name: Some(self.parent_name.clone()),
            place: Some(self.place.clone()),
            date: Some(self.date.clone()),
            mobile: Some(self.mobile.clone()),
            signature_data_url: self.signature_data_url.clone(),
            updated_at: None,
        }
    }
}
