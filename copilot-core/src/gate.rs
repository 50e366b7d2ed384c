//! Confirmation gate for mutating operations.
//!
//! `Idle -> AwaitingConfirmation -> (Executing | Idle)`. The gate only holds
//! state and classifies replies; running the operation is the caller's job.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::ColumnValue;
use crate::operation::{Action, OperationDescriptor, PendingOperation, ValidatedOperation};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConfirmationGate {
    #[default]
    Idle,
    AwaitingConfirmation(PendingOperation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirmative,
    Negative,
    Other,
}

impl ConfirmationGate {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, ConfirmationGate::AwaitingConfirmation(_))
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        match self {
            ConfirmationGate::AwaitingConfirmation(p) => Some(p),
            ConfirmationGate::Idle => None,
        }
    }

    /// Park a mutating operation and return the confirmation prompt.
    pub fn propose(&mut self, pending: PendingOperation, validated: &ValidatedOperation) -> String {
        let prompt = confirmation_prompt(&pending.descriptor, validated);
        *self = ConfirmationGate::AwaitingConfirmation(pending);
        prompt
    }

    /// Consume the pending operation, leaving the gate idle.
    pub fn take(&mut self) -> Option<PendingOperation> {
        match std::mem::take(self) {
            ConfirmationGate::AwaitingConfirmation(p) => Some(p),
            ConfirmationGate::Idle => None,
        }
    }
}

// A yes or no word, then only filler that adds no new instruction:
// "yes please, go ahead" confirms, "yes but rename it first" does not.
const AFFIRMATIVE: &str = concat!(
    r"^(yes|y|yeah|yep|yup|sure|ok|okay|confirm|confirmed|proceed|go ahead|do it)",
    r"([\s,.!]+(please|yes|sure|ok|okay|go ahead|do it|proceed|confirm|confirmed|execute|execute it|execute all|thanks|thank you|sounds good|looks good))*",
    r"[\s,.!]*$",
);
const NEGATIVE: &str = concat!(
    r"^(no|n|nope|nah|cancel|abort|stop|never ?mind|don'?t)",
    r"([\s,.!]+(thanks|thank you|cancel|cancel it|don'?t|don'?t do it|stop|never ?mind|not now|forget it|leave it))*",
    r"[\s,.!]*$",
);

fn matches_pattern(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Classify a reply to a confirmation prompt. Case, punctuation and polite
/// filler are ignored; a yes or no that carries any further instruction is `Other`.
pub fn classify_reply(text: &str) -> Reply {
    let normalized = text.trim().replace('\u{2019}', "'").to_lowercase();
    static YES: OnceLock<Option<Regex>> = OnceLock::new();
    static NO: OnceLock<Option<Regex>> = OnceLock::new();

    if matches_pattern(&YES, AFFIRMATIVE, &normalized) {
        Reply::Affirmative
    } else if matches_pattern(&NO, NEGATIVE, &normalized) {
        Reply::Negative
    } else {
        Reply::Other
    }
}

/// Human-readable summary ending in a yes/no question.
pub fn confirmation_prompt(descriptor: &OperationDescriptor, validated: &ValidatedOperation) -> String {
    let entity = validated.entity_type;
    let assignments: Vec<String> = validated
        .fields
        .iter()
        .filter(|(column, _)| *column != "name")
        .map(|(column, value)| format!("{} {}", column.replace('_', " "), plain(value)))
        .collect();
    let target: Vec<String> = validated.filters.iter().map(|f| f.to_string()).collect();

    let summary = match descriptor.action {
        Action::Create => {
            let name = validated
                .fields
                .iter()
                .find(|(column, _)| *column == "name")
                .map(|(_, v)| v.clone())
                .unwrap_or(ColumnValue::Null);
            let mut s = format!("I will create a {} named {}", entity, name);
            if !assignments.is_empty() {
                s.push_str(&format!(" with {}", join_human(&assignments)));
            }
            s
        }
        Action::Update => {
            let changes: Vec<String> = validated
                .fields
                .iter()
                .map(|(column, value)| format!("{} to {}", column.replace('_', " "), plain(value)))
                .collect();
            format!(
                "I will update the {} where {}, setting {}",
                entity,
                target.join(" and "),
                join_human(&changes)
            )
        }
        Action::Delete => format!("I will delete the {} where {}", entity, target.join(" and ")),
        Action::Read => format!("I will look up {}s", entity),
    };
    format!("{}. Confirm? (yes/no)", summary)
}

/// Field values without the quotes `ColumnValue` puts around text.
fn plain(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join_human(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::operation::Predicate;

    #[test]
    fn replies_are_classified() {
        for yes in [
            "yes",
            "Y",
            "ok",
            "Proceed",
            "confirm",
            "yes!",
            " OK. ",
            "yes please",
            "Yes, go ahead",
            "Yes, execute all.",
            "sure, do it",
            "yep, thanks!",
            "Go ahead please",
        ] {
            assert_eq!(classify_reply(yes), Reply::Affirmative, "{}", yes);
        }
        for no in ["no", "N", "cancel", "abort", "Nope.", "no thanks", "No, don\u{2019}t do it", "nah, forget it"] {
            assert_eq!(classify_reply(no), Reply::Negative, "{}", no);
        }
        for other in [
            "yes but rename it first",
            "what?",
            "",
            "okay fine whatever",
            "yes, and also create a task",
            "no, make it P2 instead",
        ] {
            assert_eq!(classify_reply(other), Reply::Other, "{}", other);
        }
    }

    #[test]
    fn create_prompt_names_the_record() {
        let d = OperationDescriptor::new(EntityType::Project, Action::Create)
            .with_field("name", "Q1 Planning")
            .with_field("priority", "high");
        let v = d.validate().unwrap();
        assert_eq!(
            confirmation_prompt(&d, &v),
            "I will create a project named \"Q1 Planning\" with priority P1. Confirm? (yes/no)"
        );
    }

    #[test]
    fn delete_prompt_names_the_target() {
        let d = OperationDescriptor::new(EntityType::Task, Action::Delete).with_filter("id", Predicate::eq(12));
        let v = d.validate().unwrap();
        assert_eq!(confirmation_prompt(&d, &v), "I will delete the task where id is 12. Confirm? (yes/no)");
    }

    #[test]
    fn propose_then_take_returns_to_idle() {
        let d = OperationDescriptor::new(EntityType::Client, Action::Create).with_field("name", "Acme");
        let v = d.validate().unwrap();
        let mut gate = ConfirmationGate::default();
        gate.propose(PendingOperation::new(d.clone(), "add Acme"), &v);
        assert!(gate.is_awaiting());
        assert_eq!(gate.pending().unwrap().raw_request, "add Acme");

        let taken = gate.take().unwrap();
        assert_eq!(taken.descriptor, d);
        assert_eq!(gate, ConfirmationGate::Idle);
        assert!(gate.take().is_none());
    }
}
