//! Per-language transformation primitives with a uniform shape
//! `fn(code, filename, options) -> {code, declared_imports, error?}`.
//! Stage ordering is driven by [`crate::pipeline`].

mod minify;
mod parse_sfc;
mod rewrite_imports;
mod transpile;

pub use minify::minify;
pub use parse_sfc::{parse_sfc, ParsedSfc};
pub use rewrite_imports::rewrite_imports;
pub use transpile::transpile_typed_script;

use std::path::PathBuf;

use crate::config::EffectiveOptions;
use crate::error::Error;

/// The uniform return shape every stage produces.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub code: String,
    pub declared_imports: Vec<String>,
}

/// Shared stage context: enough to name the file in error messages and to
/// consult the effective options, without giving stages filesystem access
/// beyond what's explicitly passed in.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub filename: &'a PathBuf,
    pub options: &'a EffectiveOptions,
}

pub(crate) fn transform_error(filename: &PathBuf, stage: &'static str, message: impl Into<String>) -> Error {
    Error::TransformError { file: filename.clone(), stage, message: message.into() }
}
