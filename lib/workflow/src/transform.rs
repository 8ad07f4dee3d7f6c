//! Built-in operation kinds.
//!
//! Every operation except `merge` is unary. Transforms are pure over their
//! inputs apart from `save_to_playlist`, which writes its input to the
//! content API and passes it through unchanged.

use crate::content::{Collection, Track};
use crate::error::{NodeError, ParamError};
use crate::node::{Arity, ExecutionContext, NodeKind, NodeRole, parse_params};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;

fn single_input(mut inputs: Vec<Collection>) -> Result<Collection, NodeError> {
    if inputs.len() != 1 {
        return Err(NodeError::Precondition {
            reason: format!("expected exactly one input, got {}", inputs.len()),
        });
    }
    Ok(inputs.pop().unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

/// Concatenates every upstream collection in declared order.
#[derive(Debug, Clone, Copy)]
pub struct Merge;

#[async_trait]
impl NodeKind for Merge {
    fn type_name(&self) -> &'static str {
        "merge"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::AtLeastOne
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        parse_params::<NoParams>(params).map(|_| ())
    }

    async fn execute(
        &self,
        _params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        if inputs.is_empty() {
            return Err(NodeError::Precondition {
                reason: "merge needs at least one input".to_string(),
            });
        }
        Ok(inputs.into_iter().flatten().collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FilterParams {
    #[serde(default)]
    exclude_explicit: bool,
    min_popularity: Option<u8>,
    max_popularity: Option<u8>,
    min_duration_ms: Option<u64>,
    max_duration_ms: Option<u64>,
    /// Case-insensitive artist name; keeps tracks credited to it.
    artist: Option<String>,
}

impl FilterParams {
    fn parse(params: &JsonValue) -> Result<Self, ParamError> {
        let parsed: Self = parse_params(params)?;
        if let Some(max) = parsed.max_popularity
            && max > 100
        {
            return Err(ParamError::new("maxPopularity must be at most 100"));
        }
        if let (Some(min), Some(max)) = (parsed.min_popularity, parsed.max_popularity)
            && min > max
        {
            return Err(ParamError::new("minPopularity exceeds maxPopularity"));
        }
        if let (Some(min), Some(max)) = (parsed.min_duration_ms, parsed.max_duration_ms)
            && min > max
        {
            return Err(ParamError::new("minDurationMs exceeds maxDurationMs"));
        }
        Ok(parsed)
    }

    fn keeps(&self, track: &Track) -> bool {
        if self.exclude_explicit && track.explicit {
            return false;
        }
        if self.min_popularity.is_some_and(|min| track.popularity < min)
            || self.max_popularity.is_some_and(|max| track.popularity > max)
        {
            return false;
        }
        if self.min_duration_ms.is_some_and(|min| track.duration_ms < min)
            || self.max_duration_ms.is_some_and(|max| track.duration_ms > max)
        {
            return false;
        }
        match &self.artist {
            Some(artist) => track
                .artists
                .iter()
                .any(|a| a.eq_ignore_ascii_case(artist)),
            None => true,
        }
    }
}

/// Keeps tracks matching every given criterion.
#[derive(Debug, Clone, Copy)]
pub struct Filter;

#[async_trait]
impl NodeKind for Filter {
    fn type_name(&self) -> &'static str {
        "filter"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        FilterParams::parse(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params = FilterParams::parse(params)?;
        let input = single_input(inputs)?;
        Ok(input.into_iter().filter(|t| params.keeps(t)).collect())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DedupKey {
    #[default]
    Id,
    NameArtist,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeduplicateParams {
    #[serde(default)]
    by: DedupKey,
}

/// Drops repeated tracks, keeping the first occurrence.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicate;

#[async_trait]
impl NodeKind for Deduplicate {
    fn type_name(&self) -> &'static str {
        "deduplicate"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        parse_params::<DeduplicateParams>(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params: DeduplicateParams = parse_params(params)?;
        let input = single_input(inputs)?;
        let mut seen = HashSet::new();
        Ok(input
            .into_iter()
            .filter(|track| {
                let key = match params.by {
                    DedupKey::Id => track.id.clone(),
                    DedupKey::NameArtist => format!(
                        "{}\u{1f}{}",
                        track.name.to_lowercase(),
                        track.primary_artist().to_lowercase()
                    ),
                };
                seen.insert(key)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SortKey {
    Name,
    Artist,
    Popularity,
    Duration,
    AddedAt,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SortParams {
    by: SortKey,
    #[serde(default)]
    descending: bool,
}

/// Stable sort by one track attribute.
///
/// Tracks without `addedAt` sort before dated ones when ascending.
#[derive(Debug, Clone, Copy)]
pub struct Sort;

#[async_trait]
impl NodeKind for Sort {
    fn type_name(&self) -> &'static str {
        "sort"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        parse_params::<SortParams>(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params: SortParams = parse_params(params)?;
        let mut tracks = single_input(inputs)?;
        tracks.sort_by(|a, b| {
            let ordering = match params.by {
                SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortKey::Artist => a
                    .primary_artist()
                    .to_lowercase()
                    .cmp(&b.primary_artist().to_lowercase()),
                SortKey::Popularity => a.popularity.cmp(&b.popularity),
                SortKey::Duration => a.duration_ms.cmp(&b.duration_ms),
                SortKey::AddedAt => a.added_at.cmp(&b.added_at),
            };
            if params.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Ok(tracks)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitParams {
    count: usize,
}

impl LimitParams {
    fn parse(params: &JsonValue) -> Result<Self, ParamError> {
        let parsed: Self = parse_params(params)?;
        if parsed.count == 0 {
            return Err(ParamError::new("count must be at least 1"));
        }
        Ok(parsed)
    }
}

/// Keeps the first `count` tracks.
#[derive(Debug, Clone, Copy)]
pub struct Limit;

#[async_trait]
impl NodeKind for Limit {
    fn type_name(&self) -> &'static str {
        "limit"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        LimitParams::parse(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params = LimitParams::parse(params)?;
        let mut tracks = single_input(inputs)?;
        tracks.truncate(params.count);
        Ok(tracks)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShuffleParams {
    #[serde(default)]
    seed: Option<u64>,
}

fn shuffle_tracks(tracks: &mut Collection, seed: Option<u64>) {
    match seed {
        Some(seed) => tracks.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => tracks.shuffle(&mut rand::rng()),
    }
}

/// Randomizes order; a seed makes the permutation reproducible.
#[derive(Debug, Clone, Copy)]
pub struct Shuffle;

#[async_trait]
impl NodeKind for Shuffle {
    fn type_name(&self) -> &'static str {
        "shuffle"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        parse_params::<ShuffleParams>(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params: ShuffleParams = parse_params(params)?;
        let mut tracks = single_input(inputs)?;
        shuffle_tracks(&mut tracks, params.seed);
        Ok(tracks)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SaveParams {
    playlist_id: String,
}

impl SaveParams {
    fn parse(params: &JsonValue) -> Result<Self, ParamError> {
        let parsed: Self = parse_params(params)?;
        if parsed.playlist_id.trim().is_empty() {
            return Err(ParamError::new("playlistId must not be empty"));
        }
        Ok(parsed)
    }
}

/// Replaces a playlist's contents with the input and passes it through.
#[derive(Debug, Clone, Copy)]
pub struct SaveToPlaylist;

#[async_trait]
impl NodeKind for SaveToPlaylist {
    fn type_name(&self) -> &'static str {
        "save_to_playlist"
    }

    fn role(&self) -> NodeRole {
        NodeRole::Operation
    }

    fn arity(&self) -> Arity {
        Arity::One
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError> {
        SaveParams::parse(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError> {
        let params = SaveParams::parse(params)?;
        let tracks = single_input(inputs)?;
        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        ctx.content
            .replace_playlist_tracks(ctx.credentials, &params.playlist_id, &ids)
            .await?;
        Ok(tracks)
    }
}
