//! The action-script pipeline.
//!
//! Every object placement carries a compact textual script ("action") that
//! customizes the spawned instance: textures, colors, scaling, signs,
//! lights. Parsing is cacheable and cheap; applying is where the work is,
//! so the executor is driven step-by-step from the streamer's budgeted
//! action loop.

/// Color spec parsing: hex, named HTML colors, component lists
pub mod color;
/// `ActionCommand` / `ParsedScript` data model
pub mod command;
/// Command dispatch onto a scene instance
pub mod executor;
/// Asynchronous texture/normalmap fetch state machine
pub mod fetch;
/// `light` command parsing and fx waveforms
pub mod light;
/// Precomputed numeric records for the cheap verbs
pub mod numeric;
/// Tokenizer, phase tracking and the parse cache
pub mod parser;
/// Sign text fitting and off-screen rendering
pub mod sign;

pub use command::{ActionCommand, ParsedScript, Phase};
pub use executor::{ExecCtx, ExecOutcome};
pub use parser::{parse_script, ParseCache};
