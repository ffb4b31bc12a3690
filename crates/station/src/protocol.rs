//! Text commands accepted on the push channel.
//!
//! `relay<N>_on` / `relay<N>_off` (the underscore is optional) and
//! `mode_auto` / `mode_manual`. Parsing is case-insensitive and trims
//! surrounding whitespace.

use crate::relay::{Mode, RelayId, Switch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    Relay { id: RelayId, on: bool },
    Mode(Mode),
}

/// Parse one push-channel text frame. `None` for anything unrecognised.
pub fn parse_push_message(text: &str) -> Option<PushCommand> {
    let msg = text.trim().to_ascii_lowercase();

    if let Some(mode) = msg.strip_prefix("mode_") {
        return mode.parse::<Mode>().ok().map(PushCommand::Mode);
    }

    let rest = msg.strip_prefix("relay")?;
    let split = rest.find(|c: char| !c.is_ascii_digit())?;
    let (digits, verb) = rest.split_at(split);
    let verb = verb.strip_prefix('_').unwrap_or(verb);

    let id = format!("relay{digits}").parse::<RelayId>().ok()?;
    let switch = verb.parse::<Switch>().ok()?;
    Some(PushCommand::Relay {
        id,
        on: switch.is_on(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(index: usize, on: bool) -> Option<PushCommand> {
        Some(PushCommand::Relay {
            id: RelayId(index),
            on,
        })
    }

    // -- relay commands -----------------------------------------------------

    #[test]
    fn relay_on_with_underscore() {
        assert_eq!(parse_push_message("relay1_on"), relay(0, true));
    }

    #[test]
    fn relay_off_with_underscore() {
        assert_eq!(parse_push_message("relay4_off"), relay(3, false));
    }

    #[test]
    fn relay_without_underscore() {
        assert_eq!(parse_push_message("relay2on"), relay(1, true));
        assert_eq!(parse_push_message("relay3off"), relay(2, false));
    }

    #[test]
    fn relay_multi_digit_index() {
        assert_eq!(parse_push_message("relay12_on"), relay(11, true));
    }

    #[test]
    fn relay_mixed_case_and_whitespace() {
        assert_eq!(parse_push_message("  Relay1_ON\n"), relay(0, true));
    }

    #[test]
    fn relay_zero_is_rejected() {
        assert_eq!(parse_push_message("relay0_on"), None);
    }

    #[test]
    fn relay_missing_index() {
        assert_eq!(parse_push_message("relay_on"), None);
    }

    #[test]
    fn relay_missing_verb() {
        assert_eq!(parse_push_message("relay1"), None);
        assert_eq!(parse_push_message("relay1_"), None);
    }

    #[test]
    fn relay_unknown_verb() {
        assert_eq!(parse_push_message("relay1_toggle"), None);
    }

    // -- mode commands ------------------------------------------------------

    #[test]
    fn mode_auto() {
        assert_eq!(
            parse_push_message("mode_auto"),
            Some(PushCommand::Mode(Mode::Automatic))
        );
    }

    #[test]
    fn mode_manual() {
        assert_eq!(
            parse_push_message("MODE_MANUAL"),
            Some(PushCommand::Mode(Mode::Manual))
        );
    }

    #[test]
    fn mode_unknown() {
        assert_eq!(parse_push_message("mode_turbo"), None);
    }

    // -- garbage ------------------------------------------------------------

    #[test]
    fn empty_message() {
        assert_eq!(parse_push_message(""), None);
    }

    #[test]
    fn unrelated_message() {
        assert_eq!(parse_push_message("hello"), None);
        assert_eq!(parse_push_message("{\"relay\":1}"), None);
    }
}
