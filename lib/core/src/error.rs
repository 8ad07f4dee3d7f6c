//! Error handling foundation for mixtape.
//!
//! Every crate keeps its own error enums; this alias pairs them with a
//! rootcause report so store and service signatures stay short.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_alias_carries_typed_context() {
        #[derive(Debug)]
        struct Missing;

        impl std::fmt::Display for Missing {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "missing")
            }
        }

        impl std::error::Error for Missing {}

        let err: Result<i32, Missing> = Err(Missing.into());
        assert!(err.is_err());

        let ok: Result<i32, Missing> = Ok(7);
        assert_eq!(ok.ok(), Some(7));
    }
}
