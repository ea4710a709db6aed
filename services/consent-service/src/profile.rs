//! Saved form profiles
//!
//! One document per signed-in user holding the last submitted form values and
//! the signature data URL, so the next visit can prefill the form. Users are
//! identified by the `x-user-email` header the upstream identity provider sets.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ApiError;

/// Header carrying the authenticated user's email.
pub const IDENTITY_HEADER: &str = "x-user-email";

/// Last-used form values. Every field is optional; a `PUT` only overwrites the
/// fields it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bhawan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Overlay the fields present in `patch`. `updatedAt` is never taken from
    /// the client.
    pub fn merge(&mut self, patch: Profile) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if patch.$field.is_some() {
                    self.$field = patch.$field;
                })*
            };
        }
        take!(
            student_name,
            student_id,
            bhawan,
            leave_from,
            leave_to,
            parent_name,
            place,
            date,
            mobile,
            signature_data_url
        );
    }
}

/// Normalized identity from the request headers, or 401.
pub fn identity(headers: &HeaderMap) -> Result<String, ApiError> {
    let email = headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Unauthenticated);
    }
    Ok(email)
}

/// JSON-file backed profile store keyed by email.
pub struct ProfileStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Profile>>,
}

impl ProfileStore {
    /// Load profiles from `path`, creating an empty file if missing.
    pub async fn load(path: PathBuf) -> common::Result<Self> {
        let state: BTreeMap<String, Profile> = common::fs::load_or_init(&path).await?;
        info!(path = %path.display(), profiles = state.len(), "loaded profile store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, email: &str) -> Option<Profile> {
        self.state.lock().await.get(email).cloned()
    }

    /// Merge `patch` into the stored profile (creating it), stamp `updatedAt`
    /// and persist. Returns the stored document.
    pub async fn merge(
        &self,
        email: &str,
        patch: Profile,
        now: DateTime<Utc>,
    ) -> common::Result<Profile> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let profile = next.entry(email.to_string()).or_default();
        profile.merge(patch);
        profile.updated_at = Some(now);
        let stored = profile.clone();

        common::fs::write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(profiles = state.len(), "saved profile");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 14, 10, 0, 0).unwrap()
    }

    fn headers(email: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, email.parse().unwrap());
        headers
    }

    #[test]
    fn identity_is_trimmed_and_lowercased() {
        assert_eq!(
            identity(&headers("  Student@Example.COM ")).unwrap(),
            "student@example.com"
        );
    }

    #[test]
    fn missing_or_malformed_identity_is_rejected() {
        assert!(matches!(
            identity(&HeaderMap::new()),
            Err(ApiError::Unauthenticated)
        ));
        assert!(identity(&headers("not-an-email")).is_err());
        assert!(identity(&headers("   ")).is_err());
    }

    #[test]
    fn merge_only_overwrites_present_fields() {
        let mut profile = Profile {
            student_name: Some("Asha".into()),
            mobile: Some("9876543210".into()),
            ..Profile::default()
        };
        profile.merge(Profile {
            mobile: Some("9123456780".into()),
            place: Some("Jaipur".into()),
            updated_at: Some(now()),
            ..Profile::default()
        });

        assert_eq!(profile.student_name.as_deref(), Some("Asha"));
        assert_eq!(profile.mobile.as_deref(), Some("9123456780"));
        assert_eq!(profile.place.as_deref(), Some("Jaipur"));
        assert!(profile.updated_at.is_none(), "client timestamps are ignored");
    }

    #[test]
    fn wire_format_is_camel_case() {
        let profile = Profile {
            student_id: Some("2021A7PS0001P".into()),
            signature_data_url: Some("data:image/png;base64,AAAA".into()),
            ..Profile::default()
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["studentId"], "2021A7PS0001P");
        assert_eq!(json["signatureDataUrl"], "data:image/png;base64,AAAA");
        assert!(json.get("studentName").is_none());
    }

    #[tokio::test]
    async fn merge_persists_and_stamps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let store = ProfileStore::load(path.clone()).await.unwrap();
        assert!(store.get("a@b.c").await.is_none());

        let stored = store
            .merge(
                "a@b.c",
                Profile {
                    bhawan: Some("Meera".into()),
                    ..Profile::default()
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(stored.updated_at, Some(now()));

        let reloaded = ProfileStore::load(path).await.unwrap();
        let profile = reloaded.get("a@b.c").await.unwrap();
        assert_eq!(profile.bhawan.as_deref(), Some("Meera"));
        assert_eq!(profile.updated_at, Some(now()));
    }

    #[tokio::test]
    async fn profiles_are_isolated_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json"))
            .await
            .unwrap();

        store
            .merge(
                "one@x.in",
                Profile {
                    place: Some("Pilani".into()),
                    ..Profile::default()
                },
                now(),
            )
            .await
            .unwrap();

        assert!(store.get("two@x.in").await.is_none());
        assert_eq!(
            store.get("one@x.in").await.unwrap().place.as_deref(),
            Some("Pilani")
        );
    }
}
