//! Decision logic of the verification workflow.
//!
//! Every function here is pure: it takes the current record plus whatever the
//! collaborators answered and returns the next record together with the
//! effects to deliver. Nothing is committed until the manager has delivered
//! those effects.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::min;

use crate::messages;
use crate::state::{UserRecord, VerificationState};

/// Distinct failed emails allowed before a user is rejected
pub const RETRY_BUDGET: u32 = 3;

/// Upper bound for `reset_count`
pub const RESET_COUNT_CAP: u32 = 999;

/// Stop remembering attempted emails past this many failures
pub const ATTEMPT_LOG_CUTOFF: u32 = 100;

/// Reply that skips the primary server
pub const SKIP_PRIMARY: &str = "none";

static MAYBE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\w+$").unwrap());

/// Roles the workflow hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Donor,
    Whitelisted,
}

/// A side effect the manager has to deliver
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Reply(String),
    GrantRole(Role),
}

/// The record a user moves to and what must happen for it to stick
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: UserRecord,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(record: &UserRecord, reply: impl Into<String>) -> Self {
        Self {
            record: record.clone(),
            effects: vec![Effect::Reply(reply.into())],
        }
    }

    fn moved(record: &UserRecord, state: VerificationState, effects: Vec<Effect>) -> Self {
        let mut record = record.clone();
        record.state = state;
        Self { record, effects }
    }
}

/// What a direct message asks the manager to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Terminal state, nothing happens
    Ignore,
    /// Decided without asking any collaborator
    Respond(Transition),
    /// Ask the ledger for this email's total
    CheckDonations { email: String },
    /// Resolve a name for the primary server
    ResolveAccount { name: String },
    /// Whitelist a name on the secondary server
    WhitelistSecondary { name: String },
}

pub fn looks_like_email(text: &str) -> bool {
    MAYBE_EMAIL.is_match(text)
}

/// A reaction on the active prompt. Only users without a record start the workflow.
pub fn on_reaction(existing: Option<&UserRecord>) -> Option<Transition> {
    if existing.is_some() {
        return None;
    }

    Some(Transition {
        record: UserRecord::pending(),
        effects: vec![Effect::Reply(messages::ASK_FOR_EMAIL.to_string())],
    })
}

/// A direct message from a user who has a record
pub fn on_message(record: &UserRecord, text: &str) -> Step {
    if record.state.is_terminal() {
        return Step::Ignore;
    }

    let text = text.trim();

    match record.state {
        VerificationState::Pending => {
            if looks_like_email(text) {
                Step::CheckDonations {
                    email: text.to_string(),
                }
            } else {
                Step::Respond(Transition::stay(record, messages::INVALID_EMAIL))
            }
        }
        VerificationState::Verified => match &record.verified_email {
            Some(email) => Step::CheckDonations {
                email: email.clone(),
            },
            None => Step::Respond(Transition::stay(record, messages::UNEXPECTED_ERROR)),
        },
        VerificationState::Accepted => {
            if text == SKIP_PRIMARY {
                Step::Respond(Transition::moved(
                    record,
                    VerificationState::WhitelistedPrimary,
                    vec![Effect::Reply(messages::SKIPPED_PRIMARY.to_string())],
                ))
            } else {
                Step::ResolveAccount {
                    name: text.to_string(),
                }
            }
        }
        VerificationState::WhitelistedPrimary => {
            if text.is_empty() {
                Step::Respond(Transition::stay(record, messages::EMPTY_ACCOUNT_NAME))
            } else {
                Step::WhitelistSecondary {
                    name: text.to_string(),
                }
            }
        }
        VerificationState::Rejected | VerificationState::WhitelistedSecondary => Step::Ignore,
    }
}

/// The ledger answered `total` for `email`
pub fn on_donation_total(
    record: &UserRecord,
    email: &str,
    total: f64,
    min_donation: f64,
) -> Transition {
    if total > 0.0 {
        let (state, follow_up) = if total >= min_donation {
            (VerificationState::Accepted, messages::QUALIFIED.to_string())
        } else {
            (
                VerificationState::Verified,
                messages::not_qualified(min_donation),
            )
        };

        let mut next = Transition::moved(
            record,
            state,
            vec![
                Effect::GrantRole(Role::Donor),
                Effect::Reply(messages::email_verified(total)),
                Effect::Reply(follow_up),
            ],
        );
        next.record.verified_email = Some(email.to_string());
        return next;
    }

    if record.state != VerificationState::Pending {
        // Already verified once, there is no budget to spend
        return Transition::stay(record, messages::NO_DONATIONS_FOR_VERIFIED);
    }

    on_failed_email(record, email)
}

/// Retry accounting for an email with no donations
fn on_failed_email(record: &UserRecord, email: &str) -> Transition {
    let repeated = record.attempted_emails.contains(email);
    let increment = if repeated { 0 } else { 1 };
    let count = min(RESET_COUNT_CAP, record.reset_count.saturating_add(increment));

    let mut next = record.clone();
    next.reset_count = count;

    if count > RETRY_BUDGET && !repeated {
        next.state = VerificationState::Rejected;
        return Transition {
            record: next,
            effects: vec![Effect::Reply(messages::OUT_OF_ATTEMPTS.to_string())],
        };
    }

    if count < ATTEMPT_LOG_CUTOFF {
        next.attempted_emails.insert(email.to_string());
    }

    let remaining = i64::from(RETRY_BUDGET) - i64::from(count);
    Transition {
        record: next,
        effects: vec![Effect::Reply(messages::no_donations(remaining))],
    }
}

/// The account name did not resolve. There is no budget here.
pub fn on_account_not_found(record: &UserRecord) -> Transition {
    Transition::stay(record, messages::INVALID_ACCOUNT)
}

/// `name` is now whitelisted on the primary server
pub fn on_primary_whitelisted(record: &UserRecord, name: &str) -> Transition {
    Transition::moved(
        record,
        VerificationState::WhitelistedPrimary,
        vec![
            Effect::GrantRole(Role::Whitelisted),
            Effect::Reply(messages::primary_whitelisted(name)),
        ],
    )
}

/// `name` is now whitelisted on the secondary server
pub fn on_secondary_whitelisted(record: &UserRecord, name: &str) -> Transition {
    Transition::moved(
        record,
        VerificationState::WhitelistedSecondary,
        vec![
            Effect::GrantRole(Role::Whitelisted),
            Effect::Reply(messages::secondary_whitelisted(name)),
        ],
    )
}

/// The whitelist command failed; the user stays put and may resend the name
pub fn on_whitelist_failed(record: &UserRecord, server: &str) -> Transition {
    Transition::stay(record, messages::whitelist_failed(server))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_in(state: VerificationState) -> UserRecord {
        let mut record = UserRecord::pending();
        record.state = state;
        if state != VerificationState::Pending {
            record.verified_email = Some("donor@example.com".to_string());
        }
        record
    }

    fn replies(transition: &Transition) -> Vec<&str> {
        transition
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::Reply(text) => Some(text.as_str()),
                Effect::GrantRole(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_email_shapes() {
        assert!(looks_like_email("a@b.com"));
        assert!(looks_like_email("first.last+tag@mail.example.org"));
        assert!(!looks_like_email("not an email"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a @b.com"));
        assert!(!looks_like_email(""));
    }

    #[test]
    fn test_reaction_creates_pending_once() {
        let first = on_reaction(None).unwrap();
        assert_eq!(first.record, UserRecord::pending());
        assert_eq!(replies(&first), vec![messages::ASK_FOR_EMAIL]);

        assert!(on_reaction(Some(&first.record)).is_none());
    }

    #[test]
    fn test_pending_invalid_email_stays() {
        let record = UserRecord::pending();
        match on_message(&record, "hello there") {
            Step::Respond(t) => {
                assert_eq!(t.record, record);
                assert_eq!(replies(&t), vec![messages::INVALID_EMAIL]);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_pending_email_is_trimmed() {
        assert_eq!(
            on_message(&UserRecord::pending(), "  a@b.com\n"),
            Step::CheckDonations {
                email: "a@b.com".to_string()
            }
        );
    }

    #[test]
    fn test_verified_rechecks_stored_email() {
        let record = record_in(VerificationState::Verified);
        assert_eq!(
            on_message(&record, "anything"),
            Step::CheckDonations {
                email: "donor@example.com".to_string()
            }
        );
    }

    #[test]
    fn test_qualifying_total_accepts() {
        let t = on_donation_total(&UserRecord::pending(), "a@b.com", 30.0, 25.0);

        assert_eq!(t.record.state, VerificationState::Accepted);
        assert_eq!(t.record.verified_email.as_deref(), Some("a@b.com"));
        assert_eq!(t.effects[0], Effect::GrantRole(Role::Donor));
        assert!(replies(&t)[0].contains("$30.00"));
        assert_eq!(replies(&t)[1], messages::QUALIFIED);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t = on_donation_total(&UserRecord::pending(), "a@b.com", 25.0, 25.0);
        assert_eq!(t.record.state, VerificationState::Accepted);
    }

    #[test]
    fn test_small_total_verifies() {
        let t = on_donation_total(&UserRecord::pending(), "a@b.com", 10.0, 25.0);

        assert_eq!(t.record.state, VerificationState::Verified);
        assert_eq!(t.effects[0], Effect::GrantRole(Role::Donor));
        assert!(replies(&t)[1].contains("$25.00"));
    }

    #[test]
    fn test_verified_can_upgrade() {
        let record = record_in(VerificationState::Verified);
        let t = on_donation_total(&record, "donor@example.com", 40.0, 25.0);
        assert_eq!(t.record.state, VerificationState::Accepted);
    }

    #[test]
    fn test_verified_with_zero_total_stays() {
        let record = record_in(VerificationState::Verified);
        let t = on_donation_total(&record, "donor@example.com", 0.0, 25.0);

        assert_eq!(t.record, record);
        assert_eq!(replies(&t), vec![messages::NO_DONATIONS_FOR_VERIFIED]);
    }

    #[test]
    fn test_zero_total_spends_one_attempt() {
        let t = on_donation_total(&UserRecord::pending(), "a@b.com", 0.0, 25.0);

        assert_eq!(t.record.state, VerificationState::Pending);
        assert_eq!(t.record.reset_count, 1);
        assert!(t.record.attempted_emails.contains("a@b.com"));
        assert!(replies(&t)[0].contains("**2** more times"));
    }

    #[test]
    fn test_negative_total_is_not_found() {
        let t = on_donation_total(&UserRecord::pending(), "a@b.com", -5.0, 25.0);
        assert_eq!(t.record.reset_count, 1);
        assert_eq!(t.record.verified_email, None);
    }

    #[test]
    fn test_repeated_email_is_free() {
        let first = on_donation_total(&UserRecord::pending(), "a@b.com", 0.0, 25.0);
        let second = on_donation_total(&first.record, "a@b.com", 0.0, 25.0);

        assert_eq!(second.record.reset_count, 1);
        assert!(replies(&second)[0].contains("**2** more times"));
    }

    #[test]
    fn test_counter_tracks_distinct_emails() {
        let mut record = UserRecord::pending();
        let emails = ["a@b.com", "c@d.com", "a@b.com", "e@f.com", "c@d.com"];
        for email in emails {
            record = on_donation_total(&record, email, 0.0, 25.0).record;
        }

        assert_eq!(record.reset_count, 3);
        assert_eq!(record.state, VerificationState::Pending);
        assert_eq!(record.attempted_emails.len(), 3);
    }

    #[test]
    fn test_fourth_distinct_failure_rejects() {
        let mut record = UserRecord::pending();
        for email in ["a@b.com", "c@d.com", "e@f.com"] {
            record = on_donation_total(&record, email, 0.0, 25.0).record;
        }
        assert_eq!(record.state, VerificationState::Pending);

        // Repeating an old email past the budget is not a new failure
        let repeat = on_donation_total(&record, "a@b.com", 0.0, 25.0);
        assert_eq!(repeat.record.state, VerificationState::Pending);
        assert!(replies(&repeat)[0].contains("**0** more times"));

        let t = on_donation_total(&record, "g@h.com", 0.0, 25.0);
        assert_eq!(t.record.state, VerificationState::Rejected);
        assert_eq!(t.record.reset_count, 4);
        assert!(!t.record.attempted_emails.contains("g@h.com"));
        assert_eq!(replies(&t), vec![messages::OUT_OF_ATTEMPTS]);
    }

    #[test]
    fn test_success_after_failures_still_accepts() {
        let mut record = UserRecord::pending();
        for email in ["a@b.com", "c@d.com", "e@f.com"] {
            record = on_donation_total(&record, email, 0.0, 25.0).record;
        }

        let t = on_donation_total(&record, "real@donor.com", 50.0, 25.0);
        assert_eq!(t.record.state, VerificationState::Accepted);
        assert_eq!(t.record.reset_count, 3);
    }

    #[test]
    fn test_counter_is_capped() {
        let mut record = UserRecord::pending();
        record.reset_count = RESET_COUNT_CAP;
        record.attempted_emails.insert("a@b.com".to_string());

        let t = on_donation_total(&record, "a@b.com", 0.0, 25.0);
        assert_eq!(t.record.reset_count, RESET_COUNT_CAP);
    }

    #[test]
    fn test_attempt_log_cutoff() {
        let mut record = UserRecord::pending();
        record.reset_count = ATTEMPT_LOG_CUTOFF;
        record.attempted_emails.insert("spam@b.com".to_string());

        let t = on_donation_total(&record, "spam@b.com", 0.0, 25.0);
        assert_eq!(t.record.state, VerificationState::Pending);
        assert_eq!(t.record.reset_count, ATTEMPT_LOG_CUTOFF);
        assert_eq!(t.record.attempted_emails.len(), 1);
    }

    #[test]
    fn test_accepted_none_skips_primary() {
        let record = record_in(VerificationState::Accepted);
        match on_message(&record, "none") {
            Step::Respond(t) => {
                assert_eq!(t.record.state, VerificationState::WhitelistedPrimary);
                assert_eq!(replies(&t), vec![messages::SKIPPED_PRIMARY]);
                assert!(!t.effects.contains(&Effect::GrantRole(Role::Whitelisted)));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_accepted_name_is_resolved() {
        let record = record_in(VerificationState::Accepted);
        assert_eq!(
            on_message(&record, " Notch "),
            Step::ResolveAccount {
                name: "Notch".to_string()
            }
        );
    }

    #[test]
    fn test_account_not_found_keeps_state() {
        let mut record = record_in(VerificationState::Accepted);
        for _ in 0..3 {
            let t = on_account_not_found(&record);
            assert_eq!(t.record.state, VerificationState::Accepted);
            assert_eq!(replies(&t), vec![messages::INVALID_ACCOUNT]);
            record = t.record;
        }
    }

    #[test]
    fn test_whitelist_transitions() {
        let accepted = record_in(VerificationState::Accepted);
        let primary = on_primary_whitelisted(&accepted, "Notch");
        assert_eq!(primary.record.state, VerificationState::WhitelistedPrimary);
        assert_eq!(primary.effects[0], Effect::GrantRole(Role::Whitelisted));
        assert!(replies(&primary)[0].contains("`Notch`"));

        assert_eq!(
            on_message(&primary.record, "BedrockName"),
            Step::WhitelistSecondary {
                name: "BedrockName".to_string()
            }
        );

        let secondary = on_secondary_whitelisted(&primary.record, "BedrockName");
        assert_eq!(
            secondary.record.state,
            VerificationState::WhitelistedSecondary
        );
    }

    #[test]
    fn test_empty_secondary_name_is_refused() {
        let record = record_in(VerificationState::WhitelistedPrimary);
        match on_message(&record, "   ") {
            Step::Respond(t) => assert_eq!(t.record, record),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_terminal_states_ignore_everything() {
        for state in [
            VerificationState::Rejected,
            VerificationState::WhitelistedSecondary,
        ] {
            let record = record_in(state);
            for text in ["a@b.com", "none", "Notch", ""] {
                assert_eq!(on_message(&record, text), Step::Ignore);
            }
        }
    }
}
