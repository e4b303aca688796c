//! Action-script tokenizer and parser.
//!
//! Scripts split into segments on `;`, `,` and newlines (double-quoted
//! runs protect separators), segments split into whitespace tokens (quotes
//! group, quote characters vanish), and `key=value` tokens become named
//! arguments. A `create` or `activate` token at the start of a segment
//! switches the current phase, standalone or prefixing an inline command.
//! Parsing never fails: malformed pieces degrade to positional strings and
//! the verbs sort them out later.

use std::sync::Arc;

use veld_core::FastHashMap;

use crate::command::{ActionCommand, ParsedScript, Phase};

fn split_segments(input: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' | ',' | '\n' if !in_quotes => {
                segments.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

fn split_tokens(segment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in segment.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn build_command(tokens: Vec<String>) -> Option<ActionCommand> {
    let mut iter = tokens.iter();
    let first = iter.next()?;

    let mut command = ActionCommand {
        raw: tokens.join(" "),
        ..Default::default()
    };

    // The verb itself may be written `verb=value`.
    match first.split_once('=') {
        Some((key, value)) if !key.is_empty() => {
            command.verb = key.to_ascii_lowercase();
            command.positional.push(value.to_string());
        }
        _ => command.verb = first.to_ascii_lowercase(),
    }

    for token in iter {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                command
                    .named
                    .insert(key.to_ascii_lowercase(), value.to_string());
            }
            _ => command.positional.push(token.to_string()),
        }
    }
    Some(command)
}

/// Parses a raw action string into its create/activate command lists.
pub fn parse_script(input: &str) -> ParsedScript {
    let mut script = ParsedScript::default();
    let mut phase = Phase::None;

    for segment in split_segments(input) {
        let mut tokens = split_tokens(segment);
        if tokens.is_empty() {
            continue;
        }
        match tokens[0].to_ascii_lowercase().as_str() {
            "create" => {
                phase = Phase::Create;
                tokens.remove(0);
            }
            "activate" => {
                phase = Phase::Activate;
                tokens.remove(0);
            }
            _ => {}
        }
        if tokens.is_empty() {
            continue;
        }
        let Some(command) = build_command(tokens) else {
            continue;
        };
        match phase {
            Phase::None => {} // unphased commands are dropped by design
            Phase::Create => script.create.push(command),
            Phase::Activate => script.activate.push(command),
        }
    }
    script
}

/// Cache of parse results keyed by the exact raw string.
///
/// Placements repeat the same scripts thousands of times across a world;
/// a hit returns the shared parse. `parse_cloned` hands out a deep copy
/// for callers that want to mutate the result.
pub struct ParseCache {
    map: FastHashMap<String, Arc<ParsedScript>>,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl ParseCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            map: FastHashMap::default(),
            enabled,
            hits: 0,
            misses: 0,
        }
    }

    pub fn parse(&mut self, raw: &str) -> Arc<ParsedScript> {
        if !self.enabled {
            return Arc::new(parse_script(raw));
        }
        if let Some(cached) = self.map.get(raw) {
            self.hits += 1;
            return cached.clone();
        }
        self.misses += 1;
        let parsed = Arc::new(parse_script(raw));
        self.map.insert(raw.to_string(), parsed.clone());
        parsed
    }

    /// Like [`parse`](Self::parse) but returns an owned copy the caller may
    /// mutate without poisoning the cache.
    pub fn parse_cloned(&mut self, raw: &str) -> ParsedScript {
        (*self.parse(raw)).clone()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hit_rate(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(true)
    }
}
