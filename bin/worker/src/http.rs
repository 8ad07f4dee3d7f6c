//! HTTP implementation of the content API.
//!
//! Paths are joined onto the configured base URL:
//!
//! - `GET playlists/{id}/tracks` (paged through `next`)
//! - `GET me/tracks?limit=`
//! - `GET me/top/tracks?time_range=&limit=`
//! - `PUT playlists/{id}/tracks` then `POST` for each further chunk of ids

use crate::config::ContentApiConfig;
use crate::error::StartupError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mixtape_workflow::{
    Collection, ContentApi, ContentError, Credentials, ResourceKind, TimeRange, Track,
};
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode, Url};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

/// Tracks requested per playlist page.
const PAGE_SIZE: usize = 100;

/// Upper bound on followed pages for one playlist.
const MAX_PAGES: usize = 100;

/// Track ids sent per write request.
const WRITE_CHUNK: usize = 100;

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    added_at: Option<DateTime<Utc>>,
    /// Null for entries the API can no longer resolve.
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<ApiNamed>,
    #[serde(default)]
    album: Option<ApiNamed>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    popularity: u8,
    #[serde(default)]
    explicit: bool,
}

#[derive(Debug, Deserialize)]
struct ApiNamed {
    name: String,
}

impl ApiTrack {
    fn into_track(self, added_at: Option<DateTime<Utc>>) -> Track {
        Track {
            id: self.id,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album: self.album.map(|a| a.name).unwrap_or_default(),
            duration_ms: self.duration_ms,
            popularity: self.popularity.min(100),
            explicit: self.explicit,
            added_at,
        }
    }
}

/// Content API client over HTTP with bearer-token auth.
#[derive(Debug, Clone)]
pub struct HttpContentApi {
    base_url: Url,
    http: HttpClient,
}

impl HttpContentApi {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::HttpClient` if the base URL is not an absolute
    /// http(s) URL or the client cannot be built.
    pub fn new(config: &ContentApiConfig) -> Result<Self, Report<StartupError>> {
        let base_url = parse_base_url(&config.base_url)
            .map_err(|details| StartupError::HttpClient { details })?;
        let http = HttpClient::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StartupError::HttpClient {
                details: e.to_string(),
            })?;
        Ok(Self { base_url, http })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ContentError> {
        endpoint(&self.base_url, segments)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        credentials: &Credentials,
        resource: ResourceKind,
        id: &str,
    ) -> Result<Response, ContentError> {
        let response = request
            .bearer_auth(credentials.access_token())
            .send()
            .await
            .map_err(|e| ContentError::Transient {
                reason: e.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        debug!(%status, "content API request failed");
        Err(status_error(status, response.headers().get(RETRY_AFTER), resource, id))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        credentials: &Credentials,
        resource: ResourceKind,
        id: &str,
    ) -> Result<T, ContentError> {
        self.send(self.http.get(url), credentials, resource, id)
            .await?
            .json()
            .await
            .map_err(|e| ContentError::Transient {
                reason: format!("malformed response: {e}"),
            })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid base URL '{raw}': {e}"))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(format!("base URL must be an http(s) URL, got '{raw}'"));
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ContentError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ContentError::Transient {
            reason: "base URL cannot carry a path".to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Parses a `next` link, which must stay on the base URL's origin.
fn next_page_url(base: &Url, raw: &str) -> Result<Url, ContentError> {
    let url = Url::parse(raw).map_err(|e| ContentError::Transient {
        reason: format!("invalid next page URL: {e}"),
    })?;
    if url.origin() != base.origin() {
        return Err(ContentError::Transient {
            reason: format!("next page URL leaves the API origin: {raw}"),
        });
    }
    Ok(url)
}

fn status_error(
    status: StatusCode,
    retry_after: Option<&HeaderValue>,
    resource: ResourceKind,
    id: &str,
) -> ContentError {
    match status {
        StatusCode::UNAUTHORIZED => ContentError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => ContentError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        StatusCode::NOT_FOUND => ContentError::NotFound {
            resource,
            id: id.to_string(),
        },
        other => ContentError::Transient {
            reason: format!("unexpected status {other}"),
        },
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    #[instrument(skip(self, credentials))]
    async fn playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
    ) -> Result<Collection, ContentError> {
        let mut url = self.endpoint(&["playlists", playlist_id, "tracks"])?;
        url.query_pairs_mut().append_pair("limit", &PAGE_SIZE.to_string());

        let mut tracks = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                warn!(pages, count = tracks.len(), "playlist truncated at page limit");
                break;
            }
            pages += 1;
            let page: Page<PlaylistItem> = self
                .get_json(url, credentials, ResourceKind::Playlist, playlist_id)
                .await?;
            tracks.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| item.track.map(|t| t.into_track(item.added_at))),
            );
            next = page
                .next
                .map(|raw| next_page_url(&self.base_url, &raw))
                .transpose()?;
        }
        debug!(count = tracks.len(), "fetched playlist");
        Ok(tracks)
    }

    #[instrument(skip(self, credentials))]
    async fn saved_tracks(
        &self,
        credentials: &Credentials,
        limit: usize,
    ) -> Result<Collection, ContentError> {
        let mut url = self.endpoint(&["me", "tracks"])?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        let page: Page<PlaylistItem> = self
            .get_json(url, credentials, ResourceKind::User, "me")
            .await?;
        Ok(page
            .items
            .into_iter()
            .filter_map(|item| item.track.map(|t| t.into_track(item.added_at)))
            .collect())
    }

    #[instrument(skip(self, credentials))]
    async fn top_tracks(
        &self,
        credentials: &Credentials,
        time_range: TimeRange,
        limit: usize,
    ) -> Result<Collection, ContentError> {
        let mut url = self.endpoint(&["me", "top", "tracks"])?;
        url.query_pairs_mut()
            .append_pair("time_range", time_range.as_api_str())
            .append_pair("limit", &limit.to_string());
        let page: Page<ApiTrack> = self
            .get_json(url, credentials, ResourceKind::User, "me")
            .await?;
        Ok(page.items.into_iter().map(|t| t.into_track(None)).collect())
    }

    #[instrument(skip(self, credentials, track_ids), fields(count = track_ids.len()))]
    async fn replace_playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ContentError> {
        let url = self.endpoint(&["playlists", playlist_id, "tracks"])?;
        let mut chunks = track_ids.chunks(WRITE_CHUNK);

        // The first request replaces the playlist, even when it is empty.
        let first = chunks.next().unwrap_or(&[]);
        let request = self
            .http
            .put(url.clone())
            .json(&serde_json::json!({ "ids": first }));
        self.send(request, credentials, ResourceKind::Playlist, playlist_id)
            .await?;

        for chunk in chunks {
            let request = self
                .http
                .post(url.clone())
                .json(&serde_json::json!({ "ids": chunk }));
            self.send(request, credentials, ResourceKind::Playlist, playlist_id)
                .await?;
        }
        Ok(())
    }
}
