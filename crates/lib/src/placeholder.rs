//! Variable substitution for node argument templates.
//!
//! Templates reference values with `{key}` tokens. Substitution is plain text
//! replacement: every key a layer knows is replaced once, and layers are
//! applied in order. A key defined by an earlier layer therefore consumes the
//! token before any later layer sees it.
//!
//! # Layers
//!
//! The orchestrator substitutes node arguments against three layers:
//!
//! 1. project-level global keys
//! 2. the run's bound positional arguments (keyed by declared argument name)
//! 3. the run's task-state store (`<node>:message`, `<node>:result`)
//!
//! Tokens that no layer knows are left verbatim.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use taskforge_lib::placeholder::{KeySource, substitute};
//!
//! let project: BTreeMap<String, String> = [("root".to_string(), "/srv".to_string())].into();
//! let args = vec![("env".to_string(), "prod".to_string())];
//! let layers: [&dyn KeySource; 2] = [&project, &args];
//!
//! assert_eq!(substitute("{root}/{env}/{missing}", &layers), "/srv/prod/{missing}");
//! ```

use std::collections::{BTreeMap, HashMap};

/// A layer of known keys for substitution.
pub trait KeySource {
  /// Visit every key/value pair in this layer.
  fn visit(&self, f: &mut dyn FnMut(&str, &str));
}

impl KeySource for BTreeMap<String, String> {
  fn visit(&self, f: &mut dyn FnMut(&str, &str)) {
    for (key, value) in self {
      f(key, value);
    }
  }
}

impl KeySource for HashMap<String, String> {
  fn visit(&self, f: &mut dyn FnMut(&str, &str)) {
    for (key, value) in self {
      f(key, value);
    }
  }
}

/// Ordered pairs, e.g. positional arguments bound to their declared names.
impl KeySource for Vec<(String, String)> {
  fn visit(&self, f: &mut dyn FnMut(&str, &str)) {
    for (key, value) in self {
      f(key, value);
    }
  }
}

/// Format the token that references `key`.
pub fn token(key: &str) -> String {
  format!("{{{key}}}")
}

/// Replace every `{key}` token in `template` with `value`.
pub fn replace_key(template: &str, key: &str, value: &str) -> String {
  let token = token(key);
  if template.contains(&token) {
    template.replace(&token, value)
  } else {
    template.to_string()
  }
}

/// Substitute all known keys of all layers into `template`, in layer order.
pub fn substitute(template: &str, layers: &[&dyn KeySource]) -> String {
  let mut result = template.to_string();
  for layer in layers {
    layer.visit(&mut |key, value| {
      result = replace_key(&result, key, value);
    });
  }
  result
}

/// List the `{...}` tokens still present in `text`.
///
/// Used for diagnostics after substitution. Braces that never close, or that
/// enclose another `{`, are not tokens.
pub fn unresolved_tokens(text: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current: Option<String> = None;

  for ch in text.chars() {
    if ch == '{' {
      current = Some(String::new());
      continue;
    }
    if let Some(content) = current.as_mut() {
      if ch == '}' {
        if !content.is_empty() {
          tokens.push(std::mem::take(content));
        }
        current = None;
      } else {
        content.push(ch);
      }
    }
  }

  tokens
}
