//! Session kinds registered at startup

use crate::session::{
    KindParams, ParticipantSpec, SessionBlueprint, SessionError, SessionManager, SpeakerSelection,
    DEFAULT_KIND,
};
use serde_json::Value;
use std::sync::Arc;

pub const CAMPAIGN_BUILDER: &str = "campaign_builder";
pub const WEEKLY_REPORT: &str = "weekly_report";

const CLOSING_RULES: &str = "Talk to the client only through reply_to_client. \
Set completed=true once the request is fully handled; set it to false when you need an answer.";

pub fn register_default_kinds(manager: &SessionManager) -> Result<(), SessionError> {
    manager.register_kind(DEFAULT_KIND, Arc::new(front_desk))?;
    manager.register_kind(CAMPAIGN_BUILDER, Arc::new(campaign_builder))?;
    manager.register_kind(WEEKLY_REPORT, Arc::new(weekly_report))?;
    Ok(())
}

fn account_line(params: &KindParams) -> String {
    match params.get("account_id").and_then(Value::as_str) {
        Some(account) => format!("\n\nThe client's ad account is {account}."),
        None => String::new(),
    }
}

/// Answers simple questions and routes specialist work
fn front_desk(params: &KindParams) -> SessionBlueprint {
    SessionBlueprint::new(format!(
        "You are the first point of contact for a marketing agency's clients. \
Answer general questions yourself. For building an ad campaign delegate to \
`{CAMPAIGN_BUILDER}`; for a performance report delegate to `{WEEKLY_REPORT}`. \
The brief must restate everything the specialists need.\n\n{CLOSING_RULES}{}",
        account_line(params)
    ))
    .participant(ParticipantSpec::solo(
        "account_manager",
        "Greets the client and routes their request",
    ))
    .tool("reply_to_client")
    .tool("delegate_task")
}

/// Plans a campaign, has it reviewed, and asks before launching
fn campaign_builder(params: &KindParams) -> SessionBlueprint {
    SessionBlueprint::new(format!(
        "Build a paid search campaign: objective, audience, keywords, ad copy, and daily budget. \
Never spend money without asking: call ask_for_approval with the exact change first.\n\n{CLOSING_RULES}{}",
        account_line(params)
    ))
    .participant(ParticipantSpec::proposer(
        "strategist",
        "Drafts the campaign structure, keywords, and budget",
    ))
    .participant(ParticipantSpec::proposer(
        "copywriter",
        "Writes and refines ad copy within platform limits",
    ))
    .participant(ParticipantSpec::executor(
        "operator",
        "Executes approved tool calls",
    ))
    .tool("reply_to_client")
    .tool("ask_for_approval")
    .speaker_selection(SpeakerSelection::Manager)
}

/// Summarises last week's performance
fn weekly_report(params: &KindParams) -> SessionBlueprint {
    let period = params
        .get("period")
        .and_then(Value::as_str)
        .unwrap_or("the last 7 days");
    SessionBlueprint::new(format!(
        "Write a performance report for {period}: spend, conversions, cost per conversion, \
notable changes, and one recommendation.\n\n{CLOSING_RULES}{}",
        account_line(params)
    ))
    .participant(ParticipantSpec::solo(
        "analyst",
        "Reads the numbers and writes the report",
    ))
    .tool("reply_to_client")
    .max_round(12)
}
