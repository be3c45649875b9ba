// src/messages.rs

pub const PROMPT_MESSAGE: &str =
    "React to this message to verify your donation and get your roles/whitelist.";

pub const HISTORY_TIMEOUT: &str =
    "Sorry, the message history in this channel is too long, or otherwise took too long to load.";

pub const ASK_FOR_EMAIL: &str =
    "To verify your donation, please reply with the email you used to donate.";

pub const INVALID_EMAIL: &str = "That doesn't look like a valid email. Please try again.";

pub const OUT_OF_ATTEMPTS: &str = "Sorry, you are out of email attempts.";

pub const QUALIFIED: &str =
    "Congratulations! This amount qualifies for server access. \
    Reply with your Minecraft ***Java Edition*** in-game name to be whitelisted. \
    If you do not have or want java edition access, reply with \"none\".";

pub const SKIPPED_PRIMARY: &str =
    "Skipped whitelisting for java edition. Please send your bedrock edition username now.";

pub const INVALID_ACCOUNT: &str =
    "That does not appear to be a valid Minecraft account name. Try again?";

pub const EMPTY_ACCOUNT_NAME: &str =
    "Please send your bedrock edition username as a text message.";

pub fn email_verified(total: f64) -> String {
    format!(
        "Your email was verified! Donation amount: {}",
        format_currency(total)
    )
}

pub fn not_qualified(min_donation: f64) -> String {
    format!(
        "Unfortunately, this is not enough to qualify for server access. \
        However, you have still been assigned the donor role!\n\n\
        You need at least {} across all donations to qualify.\n\
        **Say anything in this chat to try again.**",
        format_currency(min_donation)
    )
}

pub fn no_donations(remaining: i64) -> String {
    format!(
        "Sorry, there were no donations by that email. \
        Either the email was incorrect, or you have not donated yet.\n\n\
        You may try **{}** more times to enter the correct email, \
        or enter the same email again to re-attempt.",
        remaining
    )
}

pub const NO_DONATIONS_FOR_VERIFIED: &str =
    "Sorry, no donations were found for your verified email right now.\n\
    **Say anything in this chat to try again.**";

pub fn primary_whitelisted(name: &str) -> String {
    format!(
        "Whitelisted `{}` on Java edition server.\n\
        Please send your bedrock edition username if you would like to be whitelisted there as well. \
        You can ignore this message if not.\n\nHave fun!",
        name
    )
}

pub fn secondary_whitelisted(name: &str) -> String {
    format!("Whitelisted `{}` on Bedrock edition server.\n\nHave fun!", name)
}

pub fn whitelist_failed(server: &str) -> String {
    format!(
        "Sorry, whitelisting on the {} server failed. \
        Please send your username again in a moment, or contact an administrator.",
        server
    )
}

pub const DISCORD_ERROR: &str =
    "Discord error processing donations. Please try again in a moment, or contact an administrator.";

pub const UNEXPECTED_ERROR: &str =
    "Unexpected error processing donations. Please try again in a moment, or contact an administrator.";

/// US dollar formatting with thousands separators, e.g. `$1,234.50`
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, c) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}
