//! Match criteria: sets of expressions evaluated over a label set
//!
//! `require-all` must all hold, `require-any` needs at least one (and holds
//! vacuously when empty), `require-none` must all fail.

use crate::expression::{ExpressionCache, ExpressionError};
use crate::labels::LabelSet;
use serde::{Deserialize, Serialize};

/// Expression-based match criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default, rename = "require-all", skip_serializing_if = "Vec::is_empty")]
    pub require_all: Vec<String>,

    #[serde(default, rename = "require-any", skip_serializing_if = "Vec::is_empty")]
    pub require_any: Vec<String>,

    #[serde(default, rename = "require-none", skip_serializing_if = "Vec::is_empty")]
    pub require_none: Vec<String>,
}

impl Criteria {
    /// Compile every expression, surfacing the first syntax error.
    pub fn compile(&self, cache: &ExpressionCache) -> Result<(), ExpressionError> {
        for source in self.expressions() {
            cache.get_or_compile(source)?;
        }
        Ok(())
    }

    /// Evaluate the criteria against a label set.
    pub fn matches(&self, labels: &LabelSet, cache: &ExpressionCache) -> Result<bool, ExpressionError> {
        for source in &self.require_all {
            if !cache.get_or_compile(source)?.eval(labels)? {
                return Ok(false);
            }
        }

        if !self.require_any.is_empty() {
            let mut any = false;
            for source in &self.require_any {
                if cache.get_or_compile(source)?.eval(labels)? {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(false);
            }
        }

        for source in &self.require_none {
            if cache.get_or_compile(source)?.eval(labels)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn expressions(&self) -> impl Iterator<Item = &String> {
        self.require_all
            .iter()
            .chain(self.require_any.iter())
            .chain(self.require_none.iter())
    }
}
