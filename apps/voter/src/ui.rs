use shared::{
    domain::{Candidate, CandidateId, Identity, TxState},
    error::VotingError,
};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    List,
    Vote(CandidateId),
    Add(String),
    Refresh,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match verb {
        "list" | "ls" => Ok(Command::List),
        "vote" => rest
            .parse::<u64>()
            .map(|id| Command::Vote(CandidateId(id)))
            .map_err(|_| format!("usage: vote <candidate id>, got {rest:?}")),
        "add" if !rest.is_empty() => Ok(Command::Add(rest.to_string())),
        "add" => Err("usage: add <name>".into()),
        "refresh" => Ok(Command::Refresh),
        "status" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "" => Ok(Command::Help),
        other => Err(format!("unknown command {other:?}, type help")),
    }
}

pub const HELP: &str = "\
commands:
  list            show candidates and vote counts
  vote <id>       cast your single vote
  add <name>      propose a new candidate
  refresh         re-read everything from the ledger
  status          show account and transaction state
  quit";

pub fn render_candidates(candidates: &[Candidate], voted_for: Option<CandidateId>) -> String {
    if candidates.is_empty() {
        return "no candidates yet, use `add <name>`".to_string();
    }
    let width = candidates.iter().map(|c| c.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for candidate in candidates {
        let marker = if voted_for == Some(candidate.id) { "*" } else { " " };
        out.push_str(&format!(
            "{marker} {:>3}  {:<width$}  {} vote(s)\n",
            candidate.id.0, candidate.name, candidate.vote_count
        ));
    }
    match voted_for {
        Some(id) => out.push_str(&format!("Thank you for voting! (candidate {id})")),
        None => out.push_str("vote with `vote <id>`"),
    }
    out
}

pub fn render_status(identity: Option<&Identity>, state: TxState, can_vote: bool) -> String {
    let account = identity.map_or_else(|| "not connected".to_string(), |i| i.to_string());
    format!("account: {account}\ntransaction: {state}\nvoting available: {can_vote}")
}

pub fn render_error(err: &VotingError) -> String {
    format!("{} ({})", err.kind().user_message(), err.message())
}

pub fn render_state_change(state: TxState) -> Option<&'static str> {
    match state {
        TxState::Submitting => Some("sending transaction, approve it in your signer..."),
        TxState::AwaitingConfirmation => Some("waiting for the ledger to confirm..."),
        TxState::Applying => Some("confirmed, updating..."),
        TxState::Failed | TxState::Idle => None,
    }
}
