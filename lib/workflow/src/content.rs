//! The external content API seam.
//!
//! Sources fetch collections through `ContentApi` and side-effecting
//! operations write back through it. The engine never knows how the API is
//! reached; the worker binary supplies an HTTP implementation and tests use
//! [`InMemoryContentApi`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// A single track in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub popularity: u8,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

impl Track {
    /// Creates a track with the given id and name and neutral metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artists: Vec::new(),
            album: String::new(),
            duration_ms: 0,
            popularity: 0,
            explicit: false,
            added_at: None,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artists.push(artist.into());
        self
    }

    #[must_use]
    pub fn with_popularity(mut self, popularity: u8) -> Self {
        self.popularity = popularity;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    #[must_use]
    pub fn with_added_at(mut self, added_at: DateTime<Utc>) -> Self {
        self.added_at = Some(added_at);
        self
    }

    /// The first listed artist, or an empty string.
    #[must_use]
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map_or("", String::as_str)
    }
}

/// The value flowing along each edge of a workflow.
pub type Collection = Vec<Track>;

/// Time window for personal top tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Short,
    Medium,
    Long,
}

impl TimeRange {
    /// The query value the content API expects.
    #[must_use]
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Short => "short_term",
            Self::Medium => "medium_term",
            Self::Long => "long_term",
        }
    }
}

/// A caller-supplied access credential for the content API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
}

impl Credentials {
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// The kind of external resource a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Playlist,
    Track,
    User,
}

impl ResourceKind {
    /// Human label used in aggregated error lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Playlist => "Playlist",
            Self::Track => "Track",
            Self::User => "User",
        }
    }
}

/// Errors returned by the content API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The credential is expired or was revoked.
    AuthExpired,
    /// The API is throttling this caller.
    RateLimited { retry_after_secs: Option<u64> },
    /// The requested resource does not exist.
    NotFound { resource: ResourceKind, id: String },
    /// Any other failure reaching or reading from the API.
    Transient { reason: String },
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "access credential expired"),
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => write!(f, "rate limited, retry after {secs}s"),
            Self::RateLimited {
                retry_after_secs: None,
            } => write!(f, "rate limited"),
            Self::NotFound { resource, id } => {
                write!(f, "{} '{id}' not found", resource.label().to_lowercase())
            }
            Self::Transient { reason } => write!(f, "transient failure: {reason}"),
        }
    }
}

impl std::error::Error for ContentError {}

/// Access to external collections on behalf of one credential.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Fetches every track of a playlist, in playlist order.
    async fn playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
    ) -> Result<Collection, ContentError>;

    /// Fetches the caller's saved tracks, most recently saved first.
    async fn saved_tracks(
        &self,
        credentials: &Credentials,
        limit: usize,
    ) -> Result<Collection, ContentError>;

    /// Fetches the caller's top tracks over a time window.
    async fn top_tracks(
        &self,
        credentials: &Credentials,
        time_range: TimeRange,
        limit: usize,
    ) -> Result<Collection, ContentError>;

    /// Replaces the contents of a playlist.
    async fn replace_playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ContentError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    playlists: HashMap<String, Collection>,
    saved: Collection,
    top: HashMap<TimeRange, Collection>,
    failures: HashMap<String, ContentError>,
    expired_token: Option<String>,
    calls: Vec<String>,
    written: HashMap<String, Vec<String>>,
}

/// A content API backed by in-process data.
///
/// Calls are recorded by key (`playlist:<id>`, `saved`, `top:<range>`,
/// `write:<id>`); a failure registered under a key is returned instead of
/// data.
#[derive(Debug, Default)]
pub struct InMemoryContentApi {
    state: Mutex<InMemoryState>,
}

impl InMemoryContentApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_playlist(self, playlist_id: &str, tracks: Collection) -> Self {
        self.lock().playlists.insert(playlist_id.to_string(), tracks);
        self
    }

    #[must_use]
    pub fn with_saved_tracks(self, tracks: Collection) -> Self {
        self.lock().saved = tracks;
        self
    }

    #[must_use]
    pub fn with_top_tracks(self, time_range: TimeRange, tracks: Collection) -> Self {
        self.lock().top.insert(time_range, tracks);
        self
    }

    /// Makes every call recorded under `key` fail with `error`.
    #[must_use]
    pub fn with_failure(self, key: &str, error: ContentError) -> Self {
        self.lock().failures.insert(key.to_string(), error);
        self
    }

    /// Makes every call using `token` fail with `AuthExpired`.
    #[must_use]
    pub fn with_expired_token(self, token: &str) -> Self {
        self.lock().expired_token = Some(token.to_string());
        self
    }

    /// Keys of every call made so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Track ids last written to a playlist.
    #[must_use]
    pub fn written(&self, playlist_id: &str) -> Option<Vec<String>> {
        self.lock().written.get(playlist_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(
        &self,
        credentials: &Credentials,
        key: String,
    ) -> Result<InMemoryGuard<'_>, ContentError> {
        let mut state = self.lock();
        state.calls.push(key.clone());
        if state.expired_token.as_deref() == Some(credentials.access_token()) {
            return Err(ContentError::AuthExpired);
        }
        if let Some(error) = state.failures.get(&key) {
            return Err(error.clone());
        }
        Ok(InMemoryGuard { state })
    }
}

struct InMemoryGuard<'a> {
    state: std::sync::MutexGuard<'a, InMemoryState>,
}

#[async_trait]
impl ContentApi for InMemoryContentApi {
    async fn playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
    ) -> Result<Collection, ContentError> {
        let guard = self.begin(credentials, format!("playlist:{playlist_id}"))?;
        guard
            .state
            .playlists
            .get(playlist_id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound {
                resource: ResourceKind::Playlist,
                id: playlist_id.to_string(),
            })
    }

    async fn saved_tracks(
        &self,
        credentials: &Credentials,
        limit: usize,
    ) -> Result<Collection, ContentError> {
        let guard = self.begin(credentials, "saved".to_string())?;
        Ok(guard.state.saved.iter().take(limit).cloned().collect())
    }

    async fn top_tracks(
        &self,
        credentials: &Credentials,
        time_range: TimeRange,
        limit: usize,
    ) -> Result<Collection, ContentError> {
        let guard = self.begin(credentials, format!("top:{}", time_range.as_api_str()))?;
        Ok(guard
            .state
            .top
            .get(&time_range)
            .map(|tracks| tracks.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ContentError> {
        let mut guard = self.begin(credentials, format!("write:{playlist_id}"))?;
        guard
            .state
            .written
            .insert(playlist_id.to_string(), track_ids.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::bearer("token")
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let debug = format!("{:?}", Credentials::bearer("super-secret"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn track_serializes_camel_case() {
        let track = Track::new("t1", "Song").with_duration_ms(1000);
        let value = serde_json::to_value(&track).expect("serialize");
        assert_eq!(value["durationMs"], 1000);
        assert!(value.get("addedAt").is_none());
    }

    #[tokio::test]
    async fn missing_playlist_is_not_found() {
        let api = InMemoryContentApi::new();
        let err = api.playlist_tracks(&creds(), "nope").await.unwrap_err();
        assert_eq!(
            err,
            ContentError::NotFound {
                resource: ResourceKind::Playlist,
                id: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn expired_token_fails_every_call() {
        let api = InMemoryContentApi::new()
            .with_playlist("p", vec![Track::new("t", "T")])
            .with_expired_token("old");
        let err = api
            .playlist_tracks(&Credentials::bearer("old"), "p")
            .await
            .unwrap_err();
        assert_eq!(err, ContentError::AuthExpired);
        assert!(api.playlist_tracks(&creds(), "p").await.is_ok());
    }

    #[tokio::test]
    async fn registered_failure_is_returned() {
        let api = InMemoryContentApi::new().with_failure(
            "saved",
            ContentError::RateLimited {
                retry_after_secs: Some(3),
            },
        );
        let err = api.saved_tracks(&creds(), 10).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited, retry after 3s");
        assert_eq!(api.calls(), vec!["saved".to_string()]);
    }

    #[tokio::test]
    async fn saved_tracks_respects_limit() {
        let api = InMemoryContentApi::new().with_saved_tracks(vec![
            Track::new("a", "A"),
            Track::new("b", "B"),
            Track::new("c", "C"),
        ]);
        let tracks = api.saved_tracks(&creds(), 2).await.expect("saved");
        assert_eq!(tracks.len(), 2);
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let api = InMemoryContentApi::new();
        api.replace_playlist_tracks(&creds(), "out", &["a".to_string()])
            .await
            .expect("write");
        assert_eq!(api.written("out"), Some(vec!["a".to_string()]));
    }
}
