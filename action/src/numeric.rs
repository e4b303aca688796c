//! Precomputed numeric actions.
//!
//! The cheap verbs (`ambient`, `diffuse`, `visible`, `solid`, `scale`,
//! `shear`) are pure numeric transforms. Parsing and clamping them happens
//! here, off the critical path — optionally for a whole batch at once — so
//! the budgeted action loop only performs direct field writes for them and
//! saves the dispatching executor for the heavy verbs.

use crate::command::ActionCommand;

pub const SCALE_FLOOR: f32 = 0.1;
pub const SHEAR_LIMIT: f32 = 20.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NumericVerb {
    Ambient,
    Diffuse,
    Visible,
    Solid,
    Scale,
    Shear,
}

/// Fixed-width record for one numeric command. `values` is filled per
/// verb: one factor for ambient/diffuse, up to three scale components, six
/// shear coefficients. Invalid input parses to `valid == false` and the
/// apply loop skips the record.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NumericAction {
    pub verb: NumericVerb,
    pub values: [f32; 6],
    pub flag: bool,
    pub valid: bool,
}

impl NumericAction {
    fn invalid(verb: NumericVerb) -> Self {
        Self {
            verb,
            values: [0.0; 6],
            flag: false,
            valid: false,
        }
    }
}

/// Parses a yes/no style token (`yes|no|true|false|1|0|on`).
pub fn parse_bool_token(token: &str) -> Option<bool> {
    match token.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Precomputes one command, or `None` when the verb is not numeric.
pub fn preprocess(command: &ActionCommand) -> Option<NumericAction> {
    let verb = match command.verb.as_str() {
        "ambient" => NumericVerb::Ambient,
        "diffuse" => NumericVerb::Diffuse,
        "visible" => NumericVerb::Visible,
        "solid" => NumericVerb::Solid,
        "scale" => NumericVerb::Scale,
        "shear" => NumericVerb::Shear,
        _ => return None,
    };
    let args = command.positional_without_tag();
    Some(preprocess_args(verb, &args))
}

fn preprocess_args(verb: NumericVerb, args: &[&str]) -> NumericAction {
    let mut action = NumericAction {
        verb,
        values: [0.0; 6],
        flag: false,
        valid: true,
    };
    match verb {
        NumericVerb::Ambient | NumericVerb::Diffuse => {
            let Some(value) = args.first().and_then(|a| a.parse::<f32>().ok()) else {
                return NumericAction::invalid(verb);
            };
            action.values[0] = if verb == NumericVerb::Diffuse {
                value.clamp(0.0, 1.0)
            } else {
                value.max(0.0)
            };
        }
        NumericVerb::Visible | NumericVerb::Solid => {
            let Some(flag) = args.first().and_then(|a| parse_bool_token(a)) else {
                return NumericAction::invalid(verb);
            };
            action.flag = flag;
        }
        NumericVerb::Scale => {
            let mut components = [1.0f32; 3];
            let mut count = 0;
            for arg in args.iter().take(3) {
                match arg.parse::<f32>() {
                    Ok(v) => {
                        components[count] = v.max(SCALE_FLOOR);
                        count += 1;
                    }
                    Err(_) => return NumericAction::invalid(verb),
                }
            }
            let (sx, sy, sz) = match count {
                0 => return NumericAction::invalid(verb),
                1 => (components[0], components[0], components[0]),
                2 => (components[0], components[1], 1.0),
                _ => (components[0], components[1], components[2]),
            };
            action.values[0] = sx;
            action.values[1] = sy;
            action.values[2] = sz;
        }
        NumericVerb::Shear => {
            // Missing trailing coefficients read as 0; any unparseable
            // token invalidates the record.
            for (i, slot) in action.values.iter_mut().enumerate() {
                match args.get(i) {
                    Some(arg) => match arg.parse::<f32>() {
                        Ok(v) => *slot = v.clamp(-SHEAR_LIMIT, SHEAR_LIMIT),
                        Err(_) => return NumericAction::invalid(verb),
                    },
                    None => *slot = 0.0,
                }
            }
        }
    }
    action
}

/// Batch variant: one record per command, `None` where the command is not
/// numeric. Safe to run on a worker; the records are plain data.
pub fn preprocess_batch(commands: &[ActionCommand]) -> Vec<Option<NumericAction>> {
    commands.iter().map(preprocess).collect()
}
