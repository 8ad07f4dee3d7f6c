//! Built-in source kinds.

use crate::content::{Collection, TimeRange};
use crate::error::{NodeError, ParamError};
use crate::node::{Arity, ExecutionContext, NodeKind, NodeRole, parse_params};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Largest page a source may request.
pub const MAX_SOURCE_LIMIT: usize = 50;

const DEFAULT_SOURCE_LIMIT: usize = 50;

fn check_limit(limit: Option<usize>) -> Result<usize, ParamError> {
    match limit {
        None => Ok(DEFAULT_SOURCE_LIMIT),
        Some(0) => Err(ParamError::new("limit must be at least 1")),
        Some(n) if n > MAX_SOURCE_LIMIT => Err(ParamError::new(format!(
            "limit must be at most {MAX_SOURCE_LIMIT}"
        ))),
        Some(n) => Ok(n),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlaylistParams {
    playlist_id: String,
}

impl PlaylistParams {
    fn parse(params: &JsonValue) -> Result<Self, ParamError> {
        let parsed: Self = parse_params(params)?;
        if parsed.playlist_id.trim().is_empty() {
            return Err(ParamError::new("playlistId must not be empty"));
        }
        Ok(parsed)
    }
}

/// Every track of one playlist.
#[derive(Debug, Clone, Copy)]
pub struct PlaylistSource;

#[async_trait]
impl NodeKind for PlaylistSource {
    fn type_name(&self) -> &'static str {
        "playlist"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn arity(&self) -> Arity {
        Arity::Zero
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        PlaylistParams::parse(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        _inputs: Vec<Collection>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params = PlaylistParams::parse(params)?;
        Ok(ctx
            .content
            .playlist_tracks(ctx.credentials, &params.playlist_id)
            .await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SavedTracksParams {
    #[serde(default)]
    limit: Option<usize>,
}

/// The caller's saved tracks.
#[derive(Debug, Clone, Copy)]
pub struct SavedTracksSource;

#[async_trait]
impl NodeKind for SavedTracksSource {
    fn type_name(&self) -> &'static str {
        "saved_tracks"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn arity(&self) -> Arity {
        Arity::Zero
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        let parsed: SavedTracksParams = parse_params(params)?;
        check_limit(parsed.limit).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        _inputs: Vec<Collection>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let parsed: SavedTracksParams = parse_params(params)?;
        let limit = check_limit(parsed.limit)?;
        Ok(ctx.content.saved_tracks(ctx.credentials, limit).await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TopTracksParams {
    time_range: TimeRange,
    #[serde(default)]
    limit: Option<usize>,
}

/// The caller's most played tracks over a time window.
#[derive(Debug, Clone, Copy)]
pub struct TopTracksSource;

#[async_trait]
impl NodeKind for TopTracksSource {
    fn type_name(&self) -> &'static str {
        "top_tracks"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn arity(&self) -> Arity {
        Arity::Zero
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        let parsed: TopTracksParams = parse_params(params)?;
        check_limit(parsed.limit).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        _inputs: Vec<Collection>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let parsed: TopTracksParams = parse_params(params)?;
        let limit = check_limit(parsed.limit)?;
        Ok(ctx
            .content
            .top_tracks(ctx.credentials, parsed.time_range, limit)
            .await?)
    }
}
