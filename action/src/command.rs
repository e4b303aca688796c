//! The parsed command model.
//!
//! A script parses into two ordered command lists, one per phase. Named
//! arguments keep deterministic order (BTreeMap) so that serialization and
//! comparisons are stable.

use std::collections::BTreeMap;

/// Script phase a command belongs to. Commands outside an explicit phase
/// marker are discarded by the parser.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    None,
    Create,
    Activate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionCommand {
    /// The command's source tokens re-joined, for logging and cache keys.
    pub raw: String,
    /// Lowercased verb.
    pub verb: String,
    pub positional: Vec<String>,
    /// `key=value` arguments, keys lowercased.
    pub named: BTreeMap<String, String>,
}

impl ActionCommand {
    pub fn named_arg(&self, key: &str) -> Option<&str> {
        self.named.get(key).map(String::as_str)
    }

    /// Parses `f32` out of a named argument, if present and valid.
    pub fn named_f32(&self, key: &str) -> Option<f32> {
        self.named_arg(key)?.parse().ok()
    }

    /// The material tag this command is restricted to, accepted as a
    /// `tag=N` named argument, a positional `tag=N`, or a positional `tag`
    /// followed by the value.
    pub fn tag(&self) -> Option<i32> {
        if let Some(value) = self.named_arg("tag") {
            return value.parse().ok();
        }
        let mut tokens = self.positional.iter();
        while let Some(token) = tokens.next() {
            if token.eq_ignore_ascii_case("tag") {
                return tokens.next()?.parse().ok();
            }
            if let Some((key, value)) = token.split_once('=') {
                if key.eq_ignore_ascii_case("tag") {
                    return value.parse().ok();
                }
            }
        }
        None
    }

    /// Positional arguments with the tag selector tokens removed.
    pub fn positional_without_tag(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip_next = false;
        for token in &self.positional {
            if skip_next {
                skip_next = false;
                continue;
            }
            if token.eq_ignore_ascii_case("tag") {
                skip_next = true;
                continue;
            }
            if let Some((key, _)) = token.split_once('=') {
                if key.eq_ignore_ascii_case("tag") {
                    continue;
                }
            }
            out.push(token.as_str());
        }
        out
    }

    /// Serializes back to source form: verb, positionals, then named
    /// arguments (case-normalized where parsing normalized).
    pub fn to_raw(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.positional.len() + self.named.len());
        parts.push(self.verb.clone());
        parts.extend(self.positional.iter().cloned());
        for (key, value) in &self.named {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedScript {
    pub create: Vec<ActionCommand>,
    pub activate: Vec<ActionCommand>,
}

impl ParsedScript {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.activate.is_empty()
    }

    /// Serializes the script back into parseable source text.
    pub fn to_raw(&self) -> String {
        let mut out = String::new();
        for (marker, commands) in [("create", &self.create), ("activate", &self.activate)] {
            if commands.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str(marker);
            for command in commands {
                out.push_str("; ");
                out.push_str(&command.to_raw());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(verb: &str, positional: &[&str]) -> ActionCommand {
        ActionCommand {
            raw: String::new(),
            verb: verb.into(),
            positional: positional.iter().map(|s| s.to_string()).collect(),
            named: BTreeMap::new(),
        }
    }

    #[test]
    fn tag_from_named_argument() {
        let mut command = cmd("texture", &["wood"]);
        command.named.insert("tag".into(), "2".into());
        assert_eq!(command.tag(), Some(2));
    }

    #[test]
    fn tag_from_positional_pair() {
        assert_eq!(cmd("texture", &["wood", "tag", "3"]).tag(), Some(3));
        assert_eq!(cmd("texture", &["wood", "tag=4"]).tag(), Some(4));
        assert_eq!(cmd("texture", &["wood"]).tag(), None);
    }

    #[test]
    fn positional_without_tag_strips_selectors() {
        assert_eq!(
            cmd("color", &["red", "tag", "7"]).positional_without_tag(),
            vec!["red"]
        );
        assert_eq!(
            cmd("color", &["tag=7", "red", "tint"]).positional_without_tag(),
            vec!["red", "tint"]
        );
    }
}
