//! Template rendering for task inputs and prompts (minijinja).

use crate::error::{Result, WeaveError};
use minijinja::Environment;
use serde::Serialize;

/// Renders `template` against `context`.
///
/// Printing an undefined value yields an empty string.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use weave_core::template::render;
///
/// let text = render("Hello {{ args[0] }}!", &json!({"args": ["world"]})).unwrap();
/// assert_eq!(text, "Hello world!");
/// ```
pub fn render<S: Serialize>(template: &str, context: &S) -> Result<String> {
    let env = Environment::new();
    env.render_str(template, context)
        .map_err(|e| WeaveError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_parent_outputs() {
        let ctx = json!({
            "args": [],
            "parent_outputs": {"a": "alpha", "b": "beta"}
        });
        let text = render("{{ parent_outputs.a }}+{{ parent_outputs['b'] }}", &ctx).unwrap();
        assert_eq!(text, "alpha+beta");
    }

    #[test]
    fn test_missing_value_is_empty() {
        assert_eq!(render("[{{ args[0] }}]", &json!({"args": []})).unwrap(), "[]");
    }

    #[test]
    fn test_syntax_error() {
        let err = render("{{ unclosed", &json!({})).unwrap_err();
        assert!(matches!(err, WeaveError::Template(_)));
    }
}
