//! Stable embedded gamification command surface for host runtimes.
//!
//! Host projects should embed engine behavior through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_db`] for direct [`GamifyCommand`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteGamifyStore`].

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gamify_core::{
    parse_iso_date, Badge, BadgeId, BadgeRequirement, BadgeType, Challenge, ChallengeId, ChurchId,
    EngineError, GoalType, LeaderboardEntry, MetricType, MinistryId, PointTransactionInput, Rarity,
    StreakType, TransactionType, VolunteerId,
};
use gamify_store_sqlite::{LedgerCheck, LedgerIssueSeverity, LedgerStatus, SqliteGamifyStore};
use time::Date;
use ulid::Ulid;

#[derive(Debug, Parser)]
#[command(name = "gamify")]
#[command(about = "Volunteer gamification engine CLI")]
pub struct Cli {
    #[arg(long, default_value = "./gamify.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: GamifyCommand,
}

#[derive(Debug, Subcommand)]
pub enum GamifyCommand {
    Points {
        #[command(subcommand)]
        command: Box<PointsCommand>,
    },
    Streak {
        #[command(subcommand)]
        command: Box<StreakCommand>,
    },
    Badge {
        #[command(subcommand)]
        command: Box<BadgeCommand>,
    },
    Challenge {
        #[command(subcommand)]
        command: Box<ChallengeCommand>,
    },
    Leaderboard {
        #[command(subcommand)]
        command: Box<LeaderboardCommand>,
    },
    Ledger {
        #[command(subcommand)]
        command: Box<LedgerCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum PointsCommand {
    Award(AwardArgs),
    Balance(ScopeArgs),
    Transactions(TransactionsArgs),
}

#[derive(Debug, Args)]
pub struct AwardArgs {
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    church_id: String,
    #[arg(long)]
    points: i64,
    #[arg(long = "type")]
    transaction_type: TransactionTypeArg,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    event_id: Option<String>,
    #[arg(long)]
    assignment_id: Option<String>,
    #[arg(long)]
    badge_id: Option<String>,
    #[arg(long)]
    ministry_id: Option<String>,
    #[arg(long)]
    idempotency_key: Option<String>,
    #[arg(long, default_value = "{}")]
    metadata_json: String,
    #[arg(long, default_value = "cli")]
    created_by: String,
}

#[derive(Debug, Args)]
pub struct ScopeArgs {
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    church_id: String,
}

#[derive(Debug, Args)]
pub struct TransactionsArgs {
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    church_id: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum StreakCommand {
    Record(StreakRecordArgs),
    Show(StreakShowArgs),
}

#[derive(Debug, Args)]
pub struct StreakRecordArgs {
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    church_id: String,
    #[arg(long = "type")]
    streak_type: StreakTypeArg,
    #[arg(long)]
    date: String,
}

#[derive(Debug, Args)]
pub struct StreakShowArgs {
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    church_id: String,
    #[arg(long = "type")]
    streak_type: Option<StreakTypeArg>,
}

#[derive(Debug, Subcommand)]
pub enum BadgeCommand {
    Define(BadgeDefineArgs),
    Evaluate(ScopeArgs),
    Progress(ScopeArgs),
    Earned(ScopeArgs),
}

#[derive(Debug, Args)]
pub struct BadgeDefineArgs {
    #[arg(long)]
    badge_id: Option<String>,
    #[arg(long)]
    church_id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long = "type")]
    badge_type: BadgeTypeArg,
    #[arg(long)]
    requirement_json: String,
    #[arg(long, default_value_t = 0)]
    points_reward: i64,
    #[arg(long)]
    rarity: RarityArg,
    #[arg(long)]
    inactive: bool,
}

#[derive(Debug, Subcommand)]
pub enum ChallengeCommand {
    Create(ChallengeCreateArgs),
    Join(ChallengeMemberArgs),
    Progress(ChallengeProgressArgs),
    Claim(ChallengeMemberArgs),
    Sweep,
}

#[derive(Debug, Args)]
pub struct ChallengeCreateArgs {
    #[arg(long)]
    challenge_id: Option<String>,
    #[arg(long)]
    church_id: String,
    #[arg(long)]
    name: String,
    #[arg(long = "goal-type")]
    goal_type: GoalTypeArg,
    #[arg(long)]
    goal_target: i64,
    #[arg(long, default_value_t = 0)]
    points_reward: i64,
    #[arg(long)]
    badge_reward: Option<String>,
    #[arg(long)]
    start_date: String,
    #[arg(long)]
    end_date: String,
}

#[derive(Debug, Args)]
pub struct ChallengeMemberArgs {
    #[arg(long)]
    challenge_id: String,
    #[arg(long)]
    volunteer_id: String,
}

#[derive(Debug, Args)]
pub struct ChallengeProgressArgs {
    #[arg(long)]
    challenge_id: String,
    #[arg(long)]
    volunteer_id: String,
    #[arg(long)]
    delta: i64,
}

#[derive(Debug, Subcommand)]
pub enum LeaderboardCommand {
    Rank(RankArgs),
    Snapshot(SnapshotArgs),
}

#[derive(Debug, Args)]
pub struct RankArgs {
    #[arg(long)]
    church_id: String,
    #[arg(long)]
    metric: MetricTypeArg,
    #[arg(long)]
    ministry_id: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[arg(long)]
    church_id: String,
    #[arg(long)]
    metric: MetricTypeArg,
    #[arg(long)]
    ministry_id: Option<String>,
    #[arg(long)]
    period_key: String,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    Status(LedgerStatusArgs),
    Check(LedgerCheckArgs),
    Replay,
}

#[derive(Debug, Args)]
pub struct LedgerStatusArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct LedgerCheckArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransactionTypeArg {
    Earned,
    Spent,
    Bonus,
    Penalty,
    Adjustment,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StreakTypeArg {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BadgeTypeArg {
    Milestone,
    Achievement,
    Special,
    Seasonal,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RarityArg {
    Common,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GoalTypeArg {
    Points,
    Events,
    Hours,
    StreakDays,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MetricTypeArg {
    Points,
    Events,
    Hours,
    Streak,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate or command execution fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_with_db(&cli.db, cli.command)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_with_db(db_path: &std::path::Path, command: GamifyCommand) -> Result<()> {
    let mut store = SqliteGamifyStore::open(db_path)?;
    store.migrate()?;
    run_command(command, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when command validation, persistence, or retrieval fails.
pub fn run_command(command: GamifyCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        GamifyCommand::Points { command } => run_points(*command, store),
        GamifyCommand::Streak { command } => run_streak(*command, store),
        GamifyCommand::Badge { command } => run_badge(*command, store),
        GamifyCommand::Challenge { command } => run_challenge(*command, store),
        GamifyCommand::Leaderboard { command } => run_leaderboard(*command, store),
        GamifyCommand::Ledger { command } => run_ledger(*command, store),
    }
}

fn run_points(command: PointsCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        PointsCommand::Award(args) => {
            let input = PointTransactionInput {
                txn_id: None,
                volunteer_id: VolunteerId(parse_ulid(&args.volunteer_id)?),
                church_id: ChurchId(parse_ulid(&args.church_id)?),
                points: args.points,
                transaction_type: map_transaction_type(args.transaction_type),
                reason: args.reason,
                event_id: parse_optional_ulid(args.event_id.as_deref())?,
                assignment_id: parse_optional_ulid(args.assignment_id.as_deref())?,
                badge_id: parse_optional_ulid(args.badge_id.as_deref())?.map(BadgeId),
                ministry_id: parse_optional_ulid(args.ministry_id.as_deref())?.map(MinistryId),
                idempotency_key: args.idempotency_key,
                metadata: parse_metadata_json(&args.metadata_json)?,
                created_by: args.created_by,
            };

            let outcome = store.award(&input)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        PointsCommand::Balance(args) => {
            let volunteer_id = VolunteerId(parse_ulid(&args.volunteer_id)?);
            let church_id = ChurchId(parse_ulid(&args.church_id)?);

            let Some(balance) = store.get_balance(volunteer_id, church_id)? else {
                return Err(anyhow::Error::from(EngineError::UnknownVolunteer(format!(
                    "no points recorded for {volunteer_id}:{church_id}"
                ))));
            };

            println!("{}", serde_json::to_string_pretty(&balance)?);
            Ok(())
        }
        PointsCommand::Transactions(args) => {
            let volunteer_id = VolunteerId(parse_ulid(&args.volunteer_id)?);
            let church_id = ChurchId(parse_ulid(&args.church_id)?);
            let transactions = store.list_transactions(volunteer_id, church_id, args.limit)?;
            println!("{}", serde_json::to_string_pretty(&transactions)?);
            Ok(())
        }
    }
}

fn run_streak(command: StreakCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        StreakCommand::Record(args) => {
            let update = store.record_activity(
                VolunteerId(parse_ulid(&args.volunteer_id)?),
                ChurchId(parse_ulid(&args.church_id)?),
                map_streak_type(args.streak_type),
                parse_date(&args.date)?,
            )?;
            println!("{}", serde_json::to_string_pretty(&update)?);
            Ok(())
        }
        StreakCommand::Show(args) => {
            let volunteer_id = VolunteerId(parse_ulid(&args.volunteer_id)?);
            let church_id = ChurchId(parse_ulid(&args.church_id)?);

            match args.streak_type {
                Some(streak_type) => {
                    let Some(streak) =
                        store.get_streak(volunteer_id, church_id, map_streak_type(streak_type))?
                    else {
                        return Err(anyhow!(
                            "no streak recorded for {volunteer_id}:{church_id}"
                        ));
                    };
                    println!("{}", serde_json::to_string_pretty(&streak)?);
                }
                None => {
                    let streaks = store.list_streaks(volunteer_id, church_id)?;
                    println!("{}", serde_json::to_string_pretty(&streaks)?);
                }
            }
            Ok(())
        }
    }
}

fn run_badge(command: BadgeCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        BadgeCommand::Define(args) => {
            let requirement: BadgeRequirement = serde_json::from_str(&args.requirement_json)
                .with_context(|| {
                    format!("requirement_json must be a valid requirement: {}", args.requirement_json)
                })?;

            let badge = Badge {
                badge_id: BadgeId(match args.badge_id {
                    Some(raw) => parse_ulid(&raw)?,
                    None => Ulid::new(),
                }),
                church_id: args
                    .church_id
                    .as_deref()
                    .map(parse_ulid)
                    .transpose()?
                    .map(ChurchId),
                name: args.name,
                description: args.description,
                badge_type: map_badge_type(args.badge_type),
                requirement,
                points_reward: args.points_reward,
                rarity: map_rarity(args.rarity),
                is_active: !args.inactive,
            };

            store.upsert_badge(&badge)?;
            println!("{}", serde_json::to_string_pretty(&badge)?);
            Ok(())
        }
        BadgeCommand::Evaluate(args) => {
            let awarded = store.evaluate_badges(
                VolunteerId(parse_ulid(&args.volunteer_id)?),
                ChurchId(parse_ulid(&args.church_id)?),
            )?;
            println!("{}", serde_json::to_string_pretty(&awarded)?);
            Ok(())
        }
        BadgeCommand::Progress(args) => {
            let progress = store.list_badge_progress(
                VolunteerId(parse_ulid(&args.volunteer_id)?),
                ChurchId(parse_ulid(&args.church_id)?),
            )?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
            Ok(())
        }
        BadgeCommand::Earned(args) => {
            let badges = store.list_volunteer_badges(
                VolunteerId(parse_ulid(&args.volunteer_id)?),
                ChurchId(parse_ulid(&args.church_id)?),
            )?;
            println!("{}", serde_json::to_string_pretty(&badges)?);
            Ok(())
        }
    }
}

fn run_challenge(command: ChallengeCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        ChallengeCommand::Create(args) => {
            let challenge = Challenge {
                challenge_id: ChallengeId(match args.challenge_id {
                    Some(raw) => parse_ulid(&raw)?,
                    None => Ulid::new(),
                }),
                church_id: ChurchId(parse_ulid(&args.church_id)?),
                name: args.name,
                goal_type: map_goal_type(args.goal_type),
                goal_target: args.goal_target,
                points_reward: args.points_reward,
                badge_reward: parse_optional_ulid(args.badge_reward.as_deref())?.map(BadgeId),
                start_date: parse_date(&args.start_date)?,
                end_date: parse_date(&args.end_date)?,
                is_active: true,
            };

            store.create_challenge(&challenge)?;
            println!("{}", serde_json::to_string_pretty(&challenge)?);
            Ok(())
        }
        ChallengeCommand::Join(args) => {
            let participant = store.join_challenge(
                ChallengeId(parse_ulid(&args.challenge_id)?),
                VolunteerId(parse_ulid(&args.volunteer_id)?),
            )?;
            println!("{}", serde_json::to_string_pretty(&participant)?);
            Ok(())
        }
        ChallengeCommand::Progress(args) => {
            let report = store.record_challenge_progress(
                ChallengeId(parse_ulid(&args.challenge_id)?),
                VolunteerId(parse_ulid(&args.volunteer_id)?),
                args.delta,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        ChallengeCommand::Claim(args) => {
            let participant = store.claim_reward(
                ChallengeId(parse_ulid(&args.challenge_id)?),
                VolunteerId(parse_ulid(&args.volunteer_id)?),
            )?;
            println!("{}", serde_json::to_string_pretty(&participant)?);
            Ok(())
        }
        ChallengeCommand::Sweep => {
            let report = store.sweep_expired_challenges()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn run_leaderboard(command: LeaderboardCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        LeaderboardCommand::Rank(args) => {
            let church_id = ChurchId(parse_ulid(&args.church_id)?);
            let ministry_id = parse_optional_ulid(args.ministry_id.as_deref())?.map(MinistryId);
            let metric_type = map_metric_type(args.metric);

            let entries = store.leaderboard(church_id, metric_type, ministry_id, args.limit)?;

            if args.json {
                let payload = build_leaderboard_json_payload(
                    church_id,
                    metric_type,
                    ministry_id,
                    args.limit,
                    &entries,
                );
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_leaderboard_table(metric_type, &entries);
            }
            Ok(())
        }
        LeaderboardCommand::Snapshot(args) => {
            let report = store.snapshot_leaderboard(
                ChurchId(parse_ulid(&args.church_id)?),
                map_metric_type(args.metric),
                parse_optional_ulid(args.ministry_id.as_deref())?.map(MinistryId),
                &args.period_key,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn run_ledger(command: LedgerCommand, store: &mut SqliteGamifyStore) -> Result<()> {
    match command {
        LedgerCommand::Status(args) => {
            let status = store.ledger_status()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_ledger_status(&status);
            }
            Ok(())
        }
        LedgerCommand::Check(args) => {
            let check = store.ledger_check()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                print_ledger_check(&check);
            }

            if !check.healthy {
                return Err(anyhow!(
                    "ledger consistency check failed: {}",
                    check
                        .issues
                        .iter()
                        .map(|item| format!("{}:{}", item.code, item.message))
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }

            Ok(())
        }
        LedgerCommand::Replay => {
            let report = store.rebuild_aggregates()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn map_transaction_type(value: TransactionTypeArg) -> TransactionType {
    match value {
        TransactionTypeArg::Earned => TransactionType::Earned,
        TransactionTypeArg::Spent => TransactionType::Spent,
        TransactionTypeArg::Bonus => TransactionType::Bonus,
        TransactionTypeArg::Penalty => TransactionType::Penalty,
        TransactionTypeArg::Adjustment => TransactionType::Adjustment,
    }
}

fn map_streak_type(value: StreakTypeArg) -> StreakType {
    match value {
        StreakTypeArg::Daily => StreakType::Daily,
        StreakTypeArg::Weekly => StreakType::Weekly,
        StreakTypeArg::Monthly => StreakType::Monthly,
    }
}

fn map_badge_type(value: BadgeTypeArg) -> BadgeType {
    match value {
        BadgeTypeArg::Milestone => BadgeType::Milestone,
        BadgeTypeArg::Achievement => BadgeType::Achievement,
        BadgeTypeArg::Special => BadgeType::Special,
        BadgeTypeArg::Seasonal => BadgeType::Seasonal,
    }
}

fn map_rarity(value: RarityArg) -> Rarity {
    match value {
        RarityArg::Common => Rarity::Common,
        RarityArg::Rare => Rarity::Rare,
        RarityArg::Epic => Rarity::Epic,
        RarityArg::Legendary => Rarity::Legendary,
    }
}

fn map_goal_type(value: GoalTypeArg) -> GoalType {
    match value {
        GoalTypeArg::Points => GoalType::Points,
        GoalTypeArg::Events => GoalType::Events,
        GoalTypeArg::Hours => GoalType::Hours,
        GoalTypeArg::StreakDays => GoalType::StreakDays,
    }
}

fn map_metric_type(value: MetricTypeArg) -> MetricType {
    match value {
        MetricTypeArg::Points => MetricType::Points,
        MetricTypeArg::Events => MetricType::Events,
        MetricTypeArg::Hours => MetricType::Hours,
        MetricTypeArg::Streak => MetricType::Streak,
    }
}

fn parse_metadata_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("metadata_json must be valid JSON: {raw}"))
}

fn parse_date(raw: &str) -> Result<Date> {
    parse_iso_date(raw).map_err(|err| anyhow!("invalid date: {err}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

fn parse_optional_ulid(raw: Option<&str>) -> Result<Option<Ulid>> {
    raw.map(parse_ulid).transpose()
}

fn print_leaderboard_table(metric_type: MetricType, entries: &[LeaderboardEntry]) {
    println!("metric: {}", metric_type.as_str());
    println!(
        "{:<6} {:<28} {:<12} previous",
        "rank", "volunteer_id", "value"
    );
    println!("{}", "-".repeat(60));

    for entry in entries {
        println!(
            "{:<6} {:<28} {:<12.1} {}",
            entry.rank,
            entry.volunteer_id,
            entry.metric_value,
            entry
                .previous_rank
                .map_or_else(|| "new".to_string(), |value| value.to_string())
        );
    }
}

fn print_ledger_status(status: &LedgerStatus) {
    println!(
        "contract={} ledger_rows={} latest_txn_seq={} tracked_scopes={} aggregate_rows={}",
        status.contract_version,
        status.ledger_rows,
        status.latest_txn_seq,
        status.tracked_scopes,
        status.aggregate_rows
    );
    println!(
        "scopes_without_aggregate={} aggregates_without_transactions={}",
        status.scopes_without_aggregate, status.aggregates_without_transactions
    );
}

fn print_ledger_check(check: &LedgerCheck) {
    println!("contract={}", check.contract_version);
    print_ledger_status(&check.status);
    println!("healthy={}", if check.healthy { "yes" } else { "no" });
    if !check.issues.is_empty() {
        let formatted = check
            .issues
            .iter()
            .map(|item| {
                let severity = match item.severity {
                    LedgerIssueSeverity::Warning => "warning",
                    LedgerIssueSeverity::Error => "error",
                };
                format!("{severity}:{}:{}", item.code, item.message)
            })
            .collect::<Vec<_>>()
            .join(" | ");
        println!("issues={formatted}");
        println!("hint=run `gamify ledger replay` to rebuild aggregates from the ledger");
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LeaderboardJsonPayload {
    contract_version: String,
    church_id: ChurchId,
    metric_type: MetricType,
    ministry_id: Option<MinistryId>,
    limit: usize,
    entries: Vec<LeaderboardEntry>,
}

fn build_leaderboard_json_payload(
    church_id: ChurchId,
    metric_type: MetricType,
    ministry_id: Option<MinistryId>,
    limit: usize,
    entries: &[LeaderboardEntry],
) -> LeaderboardJsonPayload {
    LeaderboardJsonPayload {
        contract_version: "leaderboard.v1".to_string(),
        church_id,
        metric_type,
        ministry_id,
        limit,
        entries: entries.to_vec(),
    }
}
