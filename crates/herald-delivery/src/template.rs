//! Positional template parameter handling.
//!
//! Recipients carry parameters keyed `"1"`, `"2"`, ... which fill `{{1}}`,
//! `{{2}}`, ... in the template body. The same values are sent to the
//! provider as the body component and substituted locally to produce the
//! stored message content.

use herald_core::TemplateParams;
use serde_json::Value;

/// Highest placeholder index honored unless configured otherwise.
pub const MAX_TEMPLATE_PARAMS: usize = 10;

/// Text form of a parameter value.
///
/// Strings are used verbatim, `null` becomes empty, and every other value
/// uses its JSON text (`42`, `true`, `1.5`).
pub fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ordered body parameters for indices `1..=max_params` that are present.
///
/// Missing indices are skipped rather than sent as blanks.
pub fn body_parameters(params: &TemplateParams, max_params: usize) -> Vec<String> {
    (1..=max_params)
        .filter_map(|index| params.get(&index.to_string()))
        .map(param_text)
        .collect()
}

/// Substitutes `{{i}}` placeholders in `body` for each present index up to
/// `max_params`.
///
/// Placeholders without a matching parameter, and those above the cap, are
/// left as literal text.
pub fn render_body(body: &str, params: &TemplateParams, max_params: usize) -> String {
    let mut content = body.to_string();
    for index in 1..=max_params {
        if let Some(value) = params.get(&index.to_string()) {
            content = content.replace(&format!("{{{{{index}}}}}"), &param_text(value));
        }
    }
    content
}
