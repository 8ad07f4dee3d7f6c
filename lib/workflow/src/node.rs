//! Node kinds and the registry that dispatches on a node's `type`.
//!
//! Each source and operation kind implements [`NodeKind`]. The validator
//! asks a kind to check params; the engine asks it to execute. Adding a kind
//! means registering one more implementation with the [`NodeRegistry`].

use crate::content::{Collection, ContentApi, Credentials};
use crate::error::{NodeError, ParamError};
use crate::{source, transform};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Which list of a workflow a kind belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Source,
    Operation,
}

/// How many upstream collections a kind consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No inputs (sources).
    Zero,
    /// Exactly one input.
    One,
    /// One or more inputs, consumed in declared order.
    AtLeastOne,
}

impl Arity {
    #[must_use]
    pub fn accepts(&self, inputs: usize) -> bool {
        match self {
            Self::Zero => inputs == 0,
            Self::One => inputs == 1,
            Self::AtLeastOne => inputs >= 1,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => write!(f, "no inputs"),
            Self::One => write!(f, "exactly one input"),
            Self::AtLeastOne => write!(f, "at least one input"),
        }
    }
}

/// What a node may reach while executing.
pub struct ExecutionContext<'a> {
    pub content: &'a dyn ContentApi,
    pub credentials: &'a Credentials,
}

/// A registrable source or operation kind.
#[async_trait]
pub trait NodeKind: Send + Sync {
    /// The `type` tag this kind is registered under.
    fn type_name(&self) -> &'static str;

    fn role(&self) -> NodeRole;

    fn arity(&self) -> Arity;

    /// Checks params against this kind's schema.
    ///
    /// # Errors
    ///
    /// Returns `ParamError` describing the first violated constraint.
    fn validate_params(&self, params: &JsonValue) -> Result<(), ParamError>;

    /// Produces this node's collection from its upstream outputs.
    ///
    /// # Errors
    ///
    /// Returns `NodeError` if the content API fails or a precondition does
    /// not hold.
    async fn execute(
        &self,
        params: &JsonValue,
        inputs: Vec<Collection>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Collection, NodeError>;
}

/// Decodes params into a kind's typed form.
///
/// # Errors
///
/// Returns `ParamError` with serde's description of the mismatch.
pub fn parse_params<T: DeserializeOwned>(params: &JsonValue) -> Result<T, ParamError> {
    serde_json::from_value(params.clone()).map_err(|e| ParamError::new(e.to_string()))
}

/// Maps type tags to node kinds.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    kinds: HashMap<&'static str, Arc<dyn NodeKind>>,
}

static BUILTIN: LazyLock<Arc<NodeRegistry>> = LazyLock::new(|| Arc::new(NodeRegistry::builtin()));

impl NodeRegistry {
    /// A registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in source and operation registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(source::PlaylistSource);
        registry.register(source::SavedTracksSource);
        registry.register(source::TopTracksSource);
        registry.register(transform::Merge);
        registry.register(transform::Filter);
        registry.register(transform::Deduplicate);
        registry.register(transform::Sort);
        registry.register(transform::Limit);
        registry.register(transform::Shuffle);
        registry.register(transform::SaveToPlaylist);
        registry
    }

    /// A shared handle to the built-in registry.
    #[must_use]
    pub fn shared_builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN)
    }

    /// Registers a kind, replacing any kind with the same tag.
    pub fn register<K: NodeKind + 'static>(&mut self, kind: K) {
        self.kinds.insert(kind.type_name(), Arc::new(kind));
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeKind>> {
        self.kinds.get(type_name).cloned()
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.kinds.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl NodeKind for Echo {
        fn type_name(&self) -> &'static str {
            "echo"
        }

        fn role(&self) -> NodeRole {
            NodeRole::Operation
        }

        fn arity(&self) -> Arity {
            Arity::One
        }

        fn validate_params(&self, _params: &JsonValue) -> Result<(), ParamError> {
            Ok(())
        }

        async fn execute(
            &self,
            _params: &JsonValue,
            mut inputs: Vec<Collection>,
            _ctx: &ExecutionContext<'_>,
        ) -> Result<Collection, NodeError> {
            Ok(inputs.pop().unwrap_or_default())
        }
    }

    #[test]
    fn builtin_registers_all_kinds() {
        let registry = NodeRegistry::builtin();
        assert_eq!(
            registry.type_names(),
            vec![
                "deduplicate",
                "filter",
                "limit",
                "merge",
                "playlist",
                "save_to_playlist",
                "saved_tracks",
                "shuffle",
                "sort",
                "top_tracks",
            ]
        );
    }

    #[test]
    fn custom_kind_can_be_registered() {
        let mut registry = NodeRegistry::empty();
        assert!(registry.get("echo").is_none());
        registry.register(Echo);
        let kind = registry.get("echo").expect("registered");
        assert_eq!(kind.role(), NodeRole::Operation);
    }

    #[test]
    fn arity_accepts_counts() {
        assert!(Arity::Zero.accepts(0));
        assert!(!Arity::One.accepts(2));
        assert!(Arity::AtLeastOne.accepts(3));
        assert!(!Arity::AtLeastOne.accepts(0));
    }

    #[test]
    fn parse_params_reports_type_mismatch() {
        #[derive(Debug, Deserialize)]
        struct P {
            #[allow(dead_code)]
            count: usize,
        }
        assert!(parse_params::<P>(&json!({"count": 3})).is_ok());
        let err = parse_params::<P>(&json!({"count": "three"})).unwrap_err();
        assert!(err.reason.contains("invalid type"));
    }
}
