use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unknown volunteer scope: {0}")]
    UnknownVolunteer(String),
    #[error("stale activity: {0}")]
    StaleActivity(String),
    #[error("challenge not completed: {0}")]
    NotCompleted(String),
    #[error("reward already claimed: {0}")]
    AlreadyClaimed(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct VolunteerId(pub Ulid);

impl Display for VolunteerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ChurchId(pub Ulid);

impl Display for ChurchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct MinistryId(pub Ulid);

impl Display for MinistryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct BadgeId(pub Ulid);

impl Display for BadgeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ChallengeId(pub Ulid);

impl Display for ChallengeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The per-volunteer-per-church key every aggregate is scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ScopeKey {
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
}

impl Display for ScopeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.volunteer_id, self.church_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
    Spent,
    Bonus,
    Penalty,
    Adjustment,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Spent => "spent",
            Self::Bonus => "bonus",
            Self::Penalty => "penalty",
            Self::Adjustment => "adjustment",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "earned" => Some(Self::Earned),
            "spent" => Some(Self::Spent),
            "bonus" => Some(Self::Bonus),
            "penalty" => Some(Self::Penalty),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

/// An immutable row of the append-only points ledger. Once appended it is
/// never mutated or deleted; it is the sole source of truth for balances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointTransaction {
    pub txn_seq: i64,
    pub txn_id: Ulid,
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub points: i64,
    pub transaction_type: TransactionType,
    pub reason: String,
    pub event_id: Option<Ulid>,
    pub assignment_id: Option<Ulid>,
    pub badge_id: Option<BadgeId>,
    pub ministry_id: Option<MinistryId>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
    pub created_at: OffsetDateTime,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointTransactionInput {
    pub txn_id: Option<Ulid>,
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub points: i64,
    pub transaction_type: TransactionType,
    pub reason: String,
    pub event_id: Option<Ulid>,
    pub assignment_id: Option<Ulid>,
    pub badge_id: Option<BadgeId>,
    pub ministry_id: Option<MinistryId>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
    pub created_by: String,
}

impl PointTransactionInput {
    /// Validates a point award before it is appended to the ledger.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for missing fields and
    /// [`EngineError::InvalidAmount`] for a sign/type mismatch.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "reason MUST be provided for every transaction".to_string(),
            ));
        }

        if self.created_by.trim().is_empty() {
            return Err(EngineError::Validation(
                "created_by MUST be provided for every transaction".to_string(),
            ));
        }

        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(EngineError::Validation(
                    "idempotency_key MUST be non-empty when supplied".to_string(),
                ));
            }
        }

        let _ = self.normalized_points()?;
        Ok(())
    }

    /// Resolves the signed amount that lands on the ledger.
    ///
    /// `earned`/`bonus` must be positive, `spent`/`penalty` are stored
    /// negative (a positive magnitude is negated), `adjustment` keeps its
    /// sign. Zero is never a valid amount.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidAmount`] on a sign/type mismatch.
    pub fn normalized_points(&self) -> Result<i64, EngineError> {
        if self.points == 0 {
            return Err(EngineError::InvalidAmount(
                "points MUST be non-zero".to_string(),
            ));
        }

        match self.transaction_type {
            TransactionType::Earned | TransactionType::Bonus => {
                if self.points < 0 {
                    return Err(EngineError::InvalidAmount(format!(
                        "{} transactions MUST carry a positive amount",
                        self.transaction_type.as_str()
                    )));
                }
                Ok(self.points)
            }
            TransactionType::Spent | TransactionType::Penalty => Ok(-self.points.abs()),
            TransactionType::Adjustment => Ok(self.points),
        }
    }
}

/// Derived aggregate for one volunteer x church scope. Always recomputable
/// from the ledger; `created_at` is kept as the leaderboard seniority
/// tie-break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolunteerPoints {
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub total_points: i64,
    pub lifetime_points: i64,
    pub points_spent: i64,
    pub level: u32,
    pub level_progress: f64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl VolunteerPoints {
    #[must_use]
    pub fn zeroed(volunteer_id: VolunteerId, church_id: ChurchId, at: OffsetDateTime) -> Self {
        Self {
            volunteer_id,
            church_id,
            total_points: 0,
            lifetime_points: 0,
            points_spent: 0,
            level: 0,
            level_progress: 0.0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Folds one signed ledger amount into the aggregate. Positive amounts
    /// grow `lifetime_points`, negative amounts grow `points_spent`, and the
    /// level is re-derived from `lifetime_points` alone so it never
    /// decreases when points are spent. Totals saturate at the `i64` range
    /// instead of wrapping.
    pub fn apply(&mut self, points: i64, at: OffsetDateTime) {
        if points >= 0 {
            self.lifetime_points = self.lifetime_points.saturating_add(points);
        } else {
            self.points_spent = self.points_spent.saturating_sub(points);
        }
        self.total_points = self.lifetime_points.saturating_sub(self.points_spent);

        let (level, level_progress) = level_for(self.lifetime_points);
        self.level = level;
        self.level_progress = level_progress;
        self.updated_at = at;
    }
}

/// Lifetime points required to reach `level` on the fixed triangular curve:
/// 100, 300, 600, 1000, ... Saturates at `i64::MAX` once the curve leaves
/// the representable range.
#[must_use]
pub fn level_threshold(level: u32) -> i64 {
    let l = i64::from(level);
    l.saturating_mul(l + 1).saturating_mul(50)
}

/// Level and percentage toward the next threshold for a lifetime total.
/// Pure in `lifetime_points` so levels are reproducible from the ledger.
#[must_use]
pub fn level_for(lifetime_points: i64) -> (u32, f64) {
    let points = lifetime_points.max(0);

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let mut level = ((-1.0 + (1.0 + points as f64 / 12.5).sqrt()) / 2.0)
        .floor()
        .max(0.0) as u32;

    // A saturated next threshold means the true threshold is beyond i64
    // range, so the level is never reached.
    loop {
        let next = level_threshold(level + 1);
        if next > points || next == i64::MAX {
            break;
        }
        level += 1;
    }
    while level > 0 && level_threshold(level) > points {
        level -= 1;
    }

    let current = level_threshold(level);
    let next = level_threshold(level + 1);
    let span = next.saturating_sub(current);
    #[allow(clippy::cast_precision_loss)]
    let level_progress = if span <= 0 {
        100.0
    } else {
        clamp_f64((points - current) as f64 / span as f64 * 100.0, 0.0, 100.0)
    };

    (level, level_progress)
}

/// Projects the full ledger stream for one scope into its aggregate.
///
/// # Errors
/// Returns [`EngineError::Validation`] when the stream mixes scopes, is not
/// strictly ordered by `txn_seq`, or carries a zero amount.
pub fn project_volunteer_points(
    transactions: &[PointTransaction],
) -> Result<Option<VolunteerPoints>, EngineError> {
    let Some(first) = transactions.first() else {
        return Ok(None);
    };

    let key = ScopeKey {
        volunteer_id: first.volunteer_id,
        church_id: first.church_id,
    };

    let mut aggregate = VolunteerPoints::zeroed(key.volunteer_id, key.church_id, first.created_at);
    let mut prev_txn_seq = i64::MIN;

    for txn in transactions {
        if txn.volunteer_id != key.volunteer_id || txn.church_id != key.church_id {
            return Err(EngineError::Validation(
                "replay stream MUST contain a single (volunteer_id, church_id) scope".to_string(),
            ));
        }

        if txn.txn_seq <= prev_txn_seq {
            return Err(EngineError::Validation(
                "txn_seq MUST be strictly increasing".to_string(),
            ));
        }
        prev_txn_seq = txn.txn_seq;

        if txn.points == 0 {
            return Err(EngineError::Validation(
                "ledger MUST NOT contain zero-amount transactions".to_string(),
            ));
        }

        aggregate.apply(txn.points, txn.created_at);
    }

    Ok(Some(aggregate))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
    Daily,
    Weekly,
    Monthly,
}

impl StreakType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// Maps an activity date onto the contiguous period axis for a streak type.
/// Consecutive periods differ by exactly one.
#[must_use]
pub fn period_index(date: Date, streak_type: StreakType) -> i64 {
    let julian = i64::from(date.to_julian_day());
    match streak_type {
        StreakType::Daily => julian,
        StreakType::Weekly => {
            let monday = julian - i64::from(date.weekday().number_days_from_monday());
            monday.div_euclid(7)
        }
        StreakType::Monthly => i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct VolunteerStreak {
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub streak_type: StreakType,
    pub current_streak: u32,
    pub current_streak_start: Date,
    pub current_streak_end: Date,
    pub best_streak: u32,
    pub best_streak_start: Date,
    pub best_streak_end: Date,
    pub last_activity_date: Date,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StreakOutcome {
    Started,
    Extended,
    Duplicate,
    Broken,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StreakUpdate {
    pub streak: VolunteerStreak,
    pub outcome: StreakOutcome,
}

/// Advances the streak state machine with one activity date.
///
/// The same period twice is an idempotent no-op; exactly the next period
/// extends the window; a gap closes the window and starts a new one. After
/// every update `best_streak >= current_streak` holds.
///
/// # Errors
/// Returns [`EngineError::StaleActivity`] when the activity falls in an
/// earlier period than the last recorded one — the engine never rewinds
/// streak state for late-arriving events.
pub fn advance_streak(
    existing: Option<&VolunteerStreak>,
    volunteer_id: VolunteerId,
    church_id: ChurchId,
    streak_type: StreakType,
    activity_date: Date,
) -> Result<StreakUpdate, EngineError> {
    let Some(previous) = existing else {
        let streak = VolunteerStreak {
            volunteer_id,
            church_id,
            streak_type,
            current_streak: 1,
            current_streak_start: activity_date,
            current_streak_end: activity_date,
            best_streak: 1,
            best_streak_start: activity_date,
            best_streak_end: activity_date,
            last_activity_date: activity_date,
        };
        return Ok(StreakUpdate {
            streak,
            outcome: StreakOutcome::Started,
        });
    };

    let last_period = period_index(previous.last_activity_date, streak_type);
    let new_period = period_index(activity_date, streak_type);

    if new_period < last_period {
        return Err(EngineError::StaleActivity(format!(
            "activity on {} predates last recorded period for {}:{} ({})",
            format_iso_date(activity_date),
            volunteer_id,
            church_id,
            format_iso_date(previous.last_activity_date)
        )));
    }

    if new_period == last_period {
        return Ok(StreakUpdate {
            streak: previous.clone(),
            outcome: StreakOutcome::Duplicate,
        });
    }

    let mut streak = previous.clone();
    let outcome = if new_period == last_period + 1 {
        streak.current_streak += 1;
        streak.current_streak_end = activity_date;
        StreakOutcome::Extended
    } else {
        streak.current_streak = 1;
        streak.current_streak_start = activity_date;
        streak.current_streak_end = activity_date;
        StreakOutcome::Broken
    };
    streak.last_activity_date = activity_date;

    if streak.current_streak > streak.best_streak {
        streak.best_streak = streak.current_streak;
        streak.best_streak_start = streak.current_streak_start;
        streak.best_streak_end = streak.current_streak_end;
    }

    Ok(StreakUpdate { streak, outcome })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BadgeType {
    Milestone,
    Achievement,
    Special,
    Seasonal,
}

impl BadgeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Milestone => "milestone",
            Self::Achievement => "achievement",
            Self::Special => "special",
            Self::Seasonal => "seasonal",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "milestone" => Some(Self::Milestone),
            "achievement" => Some(Self::Achievement),
            "special" => Some(Self::Special),
            "seasonal" => Some(Self::Seasonal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "common" => Some(Self::Common),
            "rare" => Some(Self::Rare),
            "epic" => Some(Self::Epic),
            "legendary" => Some(Self::Legendary),
            _ => None,
        }
    }
}

/// Closed set of badge requirement kinds. `all_of` is the only composite;
/// there is deliberately no expression language here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BadgeRequirement {
    LifetimePoints { value: i64 },
    TotalPoints { value: i64 },
    Level { value: u32 },
    CurrentStreak { value: u32, streak_type: StreakType },
    BestStreak { value: u32, streak_type: StreakType },
    EventsAttended { value: u32 },
    HoursServed { value: f64 },
    AllOf { requirements: Vec<BadgeRequirement> },
}

/// Catalog entity. Read-only from the engine's perspective;
/// `church_id = None` means the badge is global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Badge {
    pub badge_id: BadgeId,
    pub church_id: Option<ChurchId>,
    pub name: String,
    pub description: String,
    pub badge_type: BadgeType,
    pub requirement: BadgeRequirement,
    pub points_reward: i64,
    pub rarity: Rarity,
    pub is_active: bool,
}

impl Badge {
    /// # Errors
    /// Returns [`EngineError::Validation`] for an empty name or a negative
    /// points reward.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "badge name MUST be provided".to_string(),
            ));
        }
        if self.points_reward < 0 {
            return Err(EngineError::Validation(
                "badge points_reward MUST NOT be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Award record. At most one exists per (volunteer_id, badge_id) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolunteerBadge {
    pub volunteer_id: VolunteerId,
    pub badge_id: BadgeId,
    pub church_id: ChurchId,
    pub earned_at: OffsetDateTime,
    pub progress: u8,
    pub is_displayed: bool,
    pub display_order: u32,
}

/// Read-only state a badge requirement is evaluated against, taken as of
/// call time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolunteerSnapshot {
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub points: Option<VolunteerPoints>,
    pub streaks: BTreeMap<StreakType, VolunteerStreak>,
    pub events_attended: u32,
    pub hours_served: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct RequirementProgress {
    pub satisfied: bool,
    pub progress: u8,
}

/// Evaluates a requirement against a snapshot. Progress is 0-100 toward the
/// target; `all_of` reports the bottleneck child's progress and is satisfied
/// only when every child is.
#[must_use]
pub fn evaluate_requirement(
    requirement: &BadgeRequirement,
    snapshot: &VolunteerSnapshot,
) -> RequirementProgress {
    match requirement {
        BadgeRequirement::LifetimePoints { value } => {
            let metric = snapshot.points.as_ref().map_or(0, |p| p.lifetime_points);
            ratio_progress(to_f64(metric), to_f64(*value))
        }
        BadgeRequirement::TotalPoints { value } => {
            let metric = snapshot.points.as_ref().map_or(0, |p| p.total_points);
            ratio_progress(to_f64(metric), to_f64(*value))
        }
        BadgeRequirement::Level { value } => {
            let metric = snapshot.points.as_ref().map_or(0, |p| p.level);
            ratio_progress(f64::from(metric), f64::from(*value))
        }
        BadgeRequirement::CurrentStreak { value, streak_type } => {
            let metric = snapshot
                .streaks
                .get(streak_type)
                .map_or(0, |s| s.current_streak);
            ratio_progress(f64::from(metric), f64::from(*value))
        }
        BadgeRequirement::BestStreak { value, streak_type } => {
            let metric = snapshot
                .streaks
                .get(streak_type)
                .map_or(0, |s| s.best_streak);
            ratio_progress(f64::from(metric), f64::from(*value))
        }
        BadgeRequirement::EventsAttended { value } => {
            ratio_progress(f64::from(snapshot.events_attended), f64::from(*value))
        }
        BadgeRequirement::HoursServed { value } => {
            ratio_progress(snapshot.hours_served, *value)
        }
        BadgeRequirement::AllOf { requirements } => {
            let mut satisfied = true;
            let mut progress = 100_u8;
            for child in requirements {
                let result = evaluate_requirement(child, snapshot);
                satisfied = satisfied && result.satisfied;
                progress = progress.min(result.progress);
            }
            RequirementProgress {
                satisfied,
                progress,
            }
        }
    }
}

fn ratio_progress(metric: f64, target: f64) -> RequirementProgress {
    if target <= 0.0 {
        return RequirementProgress {
            satisfied: true,
            progress: 100,
        };
    }

    let satisfied = metric >= target;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let progress = clamp_f64(metric / target * 100.0, 0.0, 100.0).floor() as u8;
    RequirementProgress {
        satisfied,
        progress: if satisfied { 100 } else { progress },
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Points,
    Events,
    Hours,
    StreakDays,
}

impl GoalType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Events => "events",
            Self::Hours => "hours",
            Self::StreakDays => "streak_days",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "points" => Some(Self::Points),
            "events" => Some(Self::Events),
            "hours" => Some(Self::Hours),
            "streak_days" => Some(Self::StreakDays),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Active,
    Completed,
    Failed,
    Abandoned,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Status moves forward only: active is the sole non-terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub challenge_id: ChallengeId,
    pub church_id: ChurchId,
    pub name: String,
    pub goal_type: GoalType,
    pub goal_target: i64,
    pub points_reward: i64,
    pub badge_reward: Option<BadgeId>,
    pub start_date: Date,
    pub end_date: Date,
    pub is_active: bool,
}

impl Challenge {
    /// # Errors
    /// Returns [`EngineError::Validation`] for an empty name, a non-positive
    /// goal target, a negative reward, or an inverted date window.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "challenge name MUST be provided".to_string(),
            ));
        }
        if self.goal_target < 1 {
            return Err(EngineError::Validation(
                "goal_target MUST be >= 1".to_string(),
            ));
        }
        if self.points_reward < 0 {
            return Err(EngineError::Validation(
                "points_reward MUST NOT be negative".to_string(),
            ));
        }
        if self.end_date < self.start_date {
            return Err(EngineError::Validation(
                "end_date MUST NOT precede start_date".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeParticipant {
    pub challenge_id: ChallengeId,
    pub volunteer_id: VolunteerId,
    pub church_id: ChurchId,
    pub current_progress: i64,
    pub progress_percentage: f64,
    pub status: ChallengeStatus,
    pub joined_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub reward_claimed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    Advanced,
    Completed,
    Ignored,
}

/// Applies a progress delta to an active participant.
///
/// A non-active participant, or progress reported after the challenge
/// deadline, is ignored — the deadline sweep owns those transitions.
/// Reaching `goal_target` completes the participant and stamps
/// `completed_at`; `progress_percentage` clamps at 100.
pub fn apply_challenge_progress(
    participant: &mut ChallengeParticipant,
    challenge: &Challenge,
    delta: i64,
    now: OffsetDateTime,
) -> ProgressOutcome {
    if participant.status != ChallengeStatus::Active {
        return ProgressOutcome::Ignored;
    }
    if now.date() > challenge.end_date {
        return ProgressOutcome::Ignored;
    }

    participant.current_progress = (participant.current_progress + delta).max(0);
    participant.progress_percentage =
        progress_percentage(participant.current_progress, challenge.goal_target);

    if participant.current_progress >= challenge.goal_target {
        participant.status = ChallengeStatus::Completed;
        participant.completed_at = Some(now);
        participant.progress_percentage = 100.0;
        return ProgressOutcome::Completed;
    }

    ProgressOutcome::Advanced
}

/// Deadline sweep decision for one participant: completed when the goal was
/// met by the boundary, failed otherwise. `None` when no transition applies,
/// which makes the sweep idempotent on any cadence.
#[must_use]
pub fn sweep_participant(
    participant: &ChallengeParticipant,
    challenge: &Challenge,
    now: OffsetDateTime,
) -> Option<ChallengeStatus> {
    if participant.status != ChallengeStatus::Active {
        return None;
    }
    if now.date() <= challenge.end_date {
        return None;
    }

    if participant.current_progress >= challenge.goal_target {
        Some(ChallengeStatus::Completed)
    } else {
        Some(ChallengeStatus::Failed)
    }
}

#[must_use]
pub fn progress_percentage(current_progress: i64, goal_target: i64) -> f64 {
    if goal_target <= 0 {
        return 100.0;
    }
    clamp_f64(
        to_f64(current_progress) / to_f64(goal_target) * 100.0,
        0.0,
        100.0,
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Points,
    Events,
    Hours,
    Streak,
}

impl MetricType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Events => "events",
            Self::Hours => "hours",
            Self::Streak => "streak",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "points" => Some(Self::Points),
            "events" => Some(Self::Events),
            "hours" => Some(Self::Hours),
            "streak" => Some(Self::Streak),
            _ => None,
        }
    }
}

/// One volunteer's metric value plus the seniority tie-break input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankRow {
    pub volunteer_id: VolunteerId,
    pub metric_value: f64,
    pub aggregate_created_at: OffsetDateTime,
}

/// Ephemeral, query-time ranking row. Never persisted as ground truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub volunteer_id: VolunteerId,
    pub rank: u32,
    pub previous_rank: Option<u32>,
    pub metric_type: MetricType,
    pub metric_value: f64,
}

/// Ranks rows descending by metric value with a deterministic tie-break:
/// earliest aggregate `created_at` first, then volunteer id. Ranks are
/// standard sequential (1..N, no shared ranks) and the list is truncated to
/// `limit` only after the full sort.
#[must_use]
pub fn rank_entries(
    metric_type: MetricType,
    mut rows: Vec<RankRow>,
    previous_ranks: &BTreeMap<VolunteerId, u32>,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    rows.sort_by(|lhs, rhs| {
        rhs.metric_value
            .total_cmp(&lhs.metric_value)
            .then_with(|| lhs.aggregate_created_at.cmp(&rhs.aggregate_created_at))
            .then_with(|| lhs.volunteer_id.cmp(&rhs.volunteer_id))
    });

    rows.iter()
        .enumerate()
        .take(limit)
        .map(|(index, row)| LeaderboardEntry {
            volunteer_id: row.volunteer_id,
            rank: u32::try_from(index + 1).unwrap_or(u32::MAX),
            previous_rank: previous_ranks.get(&row.volunteer_id).copied(),
            metric_type,
            metric_value: row.metric_value,
        })
        .collect()
}

/// Idempotency key for a badge's bonus deposit, derived from the badge id so
/// re-evaluation never double-pays.
#[must_use]
pub fn badge_award_key(badge_id: BadgeId) -> String {
    format!("badge:{badge_id}")
}

/// Idempotency key for a challenge's reward deposit.
#[must_use]
pub fn challenge_reward_key(challenge_id: ChallengeId) -> String {
    format!("challenge:{challenge_id}")
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: i64) -> f64 {
    value as f64
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`EngineError::Validation`] when parsing fails or the timestamp
/// is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, EngineError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| EngineError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(EngineError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`EngineError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, EngineError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| EngineError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Parses a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
/// Returns [`EngineError::Validation`] for anything else.
pub fn parse_iso_date(raw: &str) -> Result<Date, EngineError> {
    let invalid = || EngineError::Validation(format!("invalid date (expected YYYY-MM-DD): {raw}"));

    let mut parts = raw.splitn(3, '-');
    let year: i32 = parts
        .next()
        .and_then(|part| part.parse().ok())
        .ok_or_else(invalid)?;
    let month_number: u8 = parts
        .next()
        .and_then(|part| part.parse().ok())
        .ok_or_else(invalid)?;
    let day: u8 = parts
        .next()
        .and_then(|part| part.parse().ok())
        .ok_or_else(invalid)?;

    let month = Month::try_from(month_number).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

#[must_use]
pub fn format_iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}
