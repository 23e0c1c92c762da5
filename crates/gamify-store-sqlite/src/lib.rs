#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use gamify_core::{
    advance_streak, apply_challenge_progress, badge_award_key, challenge_reward_key,
    evaluate_requirement, format_iso_date, format_rfc3339, now_utc, parse_iso_date,
    parse_rfc3339_utc, project_volunteer_points, rank_entries, sweep_participant, Badge,
    BadgeId, BadgeRequirement, BadgeType, Challenge, ChallengeId, ChallengeParticipant,
    ChallengeStatus, ChurchId, EngineError, GoalType, LeaderboardEntry, MetricType, MinistryId,
    PointTransaction, PointTransactionInput, ProgressOutcome, Rarity, RankRow, ScopeKey,
    StreakType, StreakUpdate, TransactionType, VolunteerBadge, VolunteerId, VolunteerPoints,
    VolunteerSnapshot, VolunteerStreak,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use ulid::Ulid;

const GAMIFY_MIGRATION_VERSION: i64 = 1;

const SCHEMA_GAMIFY_V1: &str = r"
CREATE TABLE IF NOT EXISTS point_transactions (
  txn_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  txn_id TEXT NOT NULL UNIQUE,
  volunteer_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  points INTEGER NOT NULL CHECK (points <> 0),
  transaction_type TEXT NOT NULL CHECK (
    transaction_type IN ('earned', 'spent', 'bonus', 'penalty', 'adjustment')
  ),
  reason TEXT NOT NULL,
  event_id TEXT,
  assignment_id TEXT,
  badge_id TEXT,
  ministry_id TEXT,
  idempotency_key TEXT,
  metadata_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL,
  created_by TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_point_transactions_no_update
BEFORE UPDATE ON point_transactions
BEGIN
  SELECT RAISE(FAIL, 'point_transactions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_point_transactions_no_delete
BEFORE DELETE ON point_transactions
BEGIN
  SELECT RAISE(FAIL, 'point_transactions is append-only');
END;

CREATE UNIQUE INDEX IF NOT EXISTS idx_point_transactions_idempotency
  ON point_transactions(volunteer_id, church_id, idempotency_key)
  WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_point_transactions_scope_seq
  ON point_transactions(volunteer_id, church_id, txn_seq);
CREATE INDEX IF NOT EXISTS idx_point_transactions_church_type
  ON point_transactions(church_id, transaction_type);

CREATE TABLE IF NOT EXISTS volunteer_points (
  volunteer_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  total_points INTEGER NOT NULL,
  lifetime_points INTEGER NOT NULL CHECK (lifetime_points >= 0),
  points_spent INTEGER NOT NULL CHECK (points_spent >= 0),
  level INTEGER NOT NULL CHECK (level >= 0),
  level_progress REAL NOT NULL CHECK (level_progress BETWEEN 0.0 AND 100.0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (volunteer_id, church_id)
);

CREATE TABLE IF NOT EXISTS volunteer_streaks (
  volunteer_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  streak_type TEXT NOT NULL CHECK (streak_type IN ('daily', 'weekly', 'monthly')),
  current_streak INTEGER NOT NULL CHECK (current_streak >= 1),
  current_streak_start TEXT NOT NULL,
  current_streak_end TEXT NOT NULL,
  best_streak INTEGER NOT NULL CHECK (best_streak >= current_streak),
  best_streak_start TEXT NOT NULL,
  best_streak_end TEXT NOT NULL,
  last_activity_date TEXT NOT NULL,
  PRIMARY KEY (volunteer_id, church_id, streak_type)
);

CREATE TABLE IF NOT EXISTS badges (
  badge_id TEXT PRIMARY KEY,
  church_id TEXT,
  name TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  badge_type TEXT NOT NULL CHECK (
    badge_type IN ('milestone', 'achievement', 'special', 'seasonal')
  ),
  requirement_json TEXT NOT NULL,
  points_reward INTEGER NOT NULL CHECK (points_reward >= 0),
  rarity TEXT NOT NULL CHECK (rarity IN ('common', 'rare', 'epic', 'legendary')),
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS volunteer_badges (
  volunteer_id TEXT NOT NULL,
  badge_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  earned_at TEXT NOT NULL,
  progress INTEGER NOT NULL DEFAULT 100 CHECK (progress BETWEEN 0 AND 100),
  is_displayed INTEGER NOT NULL DEFAULT 1 CHECK (is_displayed IN (0, 1)),
  display_order INTEGER NOT NULL DEFAULT 0 CHECK (display_order >= 0),
  PRIMARY KEY (volunteer_id, badge_id),
  FOREIGN KEY (badge_id) REFERENCES badges(badge_id)
);

CREATE TABLE IF NOT EXISTS badge_progress (
  volunteer_id TEXT NOT NULL,
  badge_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  progress INTEGER NOT NULL CHECK (progress BETWEEN 0 AND 100),
  updated_at TEXT NOT NULL,
  PRIMARY KEY (volunteer_id, badge_id),
  FOREIGN KEY (badge_id) REFERENCES badges(badge_id)
);

CREATE TABLE IF NOT EXISTS challenges (
  challenge_id TEXT PRIMARY KEY,
  church_id TEXT NOT NULL,
  name TEXT NOT NULL,
  goal_type TEXT NOT NULL CHECK (goal_type IN ('points', 'events', 'hours', 'streak_days')),
  goal_target INTEGER NOT NULL CHECK (goal_target >= 1),
  points_reward INTEGER NOT NULL CHECK (points_reward >= 0),
  badge_reward TEXT,
  start_date TEXT NOT NULL,
  end_date TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS challenge_participants (
  challenge_id TEXT NOT NULL,
  volunteer_id TEXT NOT NULL,
  church_id TEXT NOT NULL,
  current_progress INTEGER NOT NULL DEFAULT 0 CHECK (current_progress >= 0),
  progress_percentage REAL NOT NULL DEFAULT 0.0 CHECK (progress_percentage BETWEEN 0.0 AND 100.0),
  status TEXT NOT NULL CHECK (status IN ('active', 'completed', 'failed', 'abandoned')),
  joined_at TEXT NOT NULL,
  completed_at TEXT,
  reward_claimed INTEGER NOT NULL DEFAULT 0 CHECK (reward_claimed IN (0, 1)),
  PRIMARY KEY (challenge_id, volunteer_id),
  FOREIGN KEY (challenge_id) REFERENCES challenges(challenge_id)
);

CREATE INDEX IF NOT EXISTS idx_challenge_participants_status
  ON challenge_participants(status, challenge_id);

CREATE TABLE IF NOT EXISTS leaderboard_snapshots (
  church_id TEXT NOT NULL,
  metric_type TEXT NOT NULL CHECK (metric_type IN ('points', 'events', 'hours', 'streak')),
  ministry_id TEXT NOT NULL DEFAULT '',
  period_key TEXT NOT NULL,
  volunteer_id TEXT NOT NULL,
  rank INTEGER NOT NULL CHECK (rank >= 1),
  metric_value REAL NOT NULL,
  captured_at TEXT NOT NULL,
  PRIMARY KEY (church_id, metric_type, ministry_id, period_key, volunteer_id)
);
";

pub struct SqliteGamifyStore {
    conn: Connection,
}

/// Result of one ledger append. `deduplicated` is set when an idempotency key
/// matched an existing row and nothing was written.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AwardOutcome {
    pub transaction: PointTransaction,
    pub aggregate: VolunteerPoints,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LedgerReplayReport {
    pub contract_version: String,
    pub projected_scopes: usize,
    pub processed_transactions: usize,
    pub latest_txn_seq: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LedgerStatus {
    pub contract_version: String,
    pub ledger_rows: usize,
    pub latest_txn_seq: i64,
    pub tracked_scopes: usize,
    pub aggregate_rows: usize,
    pub scopes_without_aggregate: usize,
    pub aggregates_without_transactions: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerIssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LedgerIssue {
    pub code: String,
    pub severity: LedgerIssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LedgerCheck {
    pub contract_version: String,
    pub healthy: bool,
    pub status: LedgerStatus,
    pub issues: Vec<LedgerIssue>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct BadgeProgressEntry {
    pub badge_id: BadgeId,
    pub name: String,
    pub progress: u8,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChallengeProgressReport {
    pub outcome: ProgressOutcome,
    pub participant: ChallengeParticipant,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ChallengeSweepReport {
    pub contract_version: String,
    pub swept: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LeaderboardSnapshotReport {
    pub contract_version: String,
    pub church_id: ChurchId,
    pub metric_type: MetricType,
    pub ministry_id: Option<MinistryId>,
    pub period_key: String,
    pub captured_at: String,
    pub entries: usize,
}

impl SqliteGamifyStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_GAMIFY_V1)
            .context("failed to apply gamify schema")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![GAMIFY_MIGRATION_VERSION, now],
            )
            .context("failed to register gamify schema migration")?;

        Ok(())
    }

    /// Appends one validated transaction and recomputes the scope aggregate
    /// in the same sqlite transaction. A repeated idempotency key returns the
    /// original row untouched.
    pub fn award(&mut self, input: &PointTransactionInput) -> Result<AwardOutcome> {
        input.validate().map_err(anyhow::Error::from)?;
        let points = input.normalized_points().map_err(anyhow::Error::from)?;

        let txn_id = match input.txn_id {
            Some(value) => value,
            None => Ulid::new(),
        };
        let created_at = now_utc();

        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_unavailable(err, "failed to start award transaction"))?;

        if let Some(key) = &input.idempotency_key {
            if let Some(existing) =
                find_transaction_by_key(&tx, input.volunteer_id, input.church_id, key)?
            {
                let aggregate = read_aggregate(&tx, input.volunteer_id, input.church_id)?
                    .ok_or_else(|| {
                        anyhow!(
                            "ledger holds transaction {} but no aggregate exists for {}:{}",
                            existing.txn_id,
                            input.volunteer_id,
                            input.church_id
                        )
                    })?;
                return Ok(AwardOutcome {
                    transaction: existing,
                    aggregate,
                    deduplicated: true,
                });
            }
        }

        tx.execute(
            "INSERT INTO point_transactions(
                txn_id, volunteer_id, church_id, points, transaction_type,
                reason, event_id, assignment_id, badge_id, ministry_id,
                idempotency_key, metadata_json, created_at, created_by
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14
             )",
            params![
                txn_id.to_string(),
                input.volunteer_id.to_string(),
                input.church_id.to_string(),
                points,
                input.transaction_type.as_str(),
                input.reason,
                input.event_id.map(|id| id.to_string()),
                input.assignment_id.map(|id| id.to_string()),
                input.badge_id.map(|id| id.to_string()),
                input.ministry_id.map(|id| id.to_string()),
                input.idempotency_key,
                serde_json::to_string(&input.metadata)
                    .context("failed to serialize transaction metadata")?,
                format_rfc3339(created_at).map_err(|err| anyhow!(err.to_string()))?,
                input.created_by,
            ],
        )
        .map_err(|err| map_unavailable(err, "failed to append point transaction"))?;

        let txn_seq = tx.last_insert_rowid();

        let mut aggregate = match read_aggregate(&tx, input.volunteer_id, input.church_id)? {
            Some(existing) => existing,
            None => VolunteerPoints::zeroed(input.volunteer_id, input.church_id, created_at),
        };
        aggregate.apply(points, created_at);
        upsert_aggregate(&tx, &aggregate)?;

        tx.commit()
            .map_err(|err| map_unavailable(err, "failed to commit award transaction"))?;

        Ok(AwardOutcome {
            transaction: PointTransaction {
                txn_seq,
                txn_id,
                volunteer_id: input.volunteer_id,
                church_id: input.church_id,
                points,
                transaction_type: input.transaction_type,
                reason: input.reason.clone(),
                event_id: input.event_id,
                assignment_id: input.assignment_id,
                badge_id: input.badge_id,
                ministry_id: input.ministry_id,
                idempotency_key: input.idempotency_key.clone(),
                metadata: input.metadata.clone(),
                created_at,
                created_by: input.created_by.clone(),
            },
            aggregate,
            deduplicated: false,
        })
    }

    pub fn get_balance(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Option<VolunteerPoints>> {
        read_aggregate(&self.conn, volunteer_id, church_id)
    }

    /// Most recent transactions first.
    pub fn list_transactions(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
        limit: Option<usize>,
    ) -> Result<Vec<PointTransaction>> {
        // A negative bound LIMIT means "no limit" to SQLite.
        let limit = limit.map_or(-1, |value| i64::try_from(value).unwrap_or(i64::MAX));

        let mut stmt = self.conn.prepare(
            "SELECT
                txn_seq, txn_id, volunteer_id, church_id, points, transaction_type,
                reason, event_id, assignment_id, badge_id, ministry_id,
                idempotency_key, metadata_json, created_at, created_by
             FROM point_transactions
             WHERE volunteer_id = ?1 AND church_id = ?2
             ORDER BY txn_seq DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string(), limit],
            parse_transaction_row,
        )?;

        collect_rows(rows)
    }

    fn list_transactions_for_replay(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Vec<PointTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                txn_seq, txn_id, volunteer_id, church_id, points, transaction_type,
                reason, event_id, assignment_id, badge_id, ministry_id,
                idempotency_key, metadata_json, created_at, created_by
             FROM point_transactions
             WHERE volunteer_id = ?1 AND church_id = ?2
             ORDER BY txn_seq ASC",
        )?;

        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string()],
            parse_transaction_row,
        )?;

        collect_rows(rows)
    }

    /// Recomputes one scope's aggregate from its full ledger stream without
    /// writing anything.
    pub fn replay_scope(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Option<VolunteerPoints>> {
        let transactions = self.list_transactions_for_replay(volunteer_id, church_id)?;
        project_volunteer_points(&transactions)
            .map_err(|err| anyhow!("failed projecting {volunteer_id}:{church_id}: {err}"))
    }

    /// Re-derives every stored aggregate from the ledger. The repair path for
    /// any drift `ledger_check` reports.
    pub fn rebuild_aggregates(&mut self) -> Result<LedgerReplayReport> {
        let scopes = self.tracked_scopes()?;
        let mut projected_scopes = 0_usize;
        let mut processed_transactions = 0_usize;

        for scope in scopes {
            let transactions =
                self.list_transactions_for_replay(scope.volunteer_id, scope.church_id)?;
            processed_transactions += transactions.len();

            if let Some(aggregate) = project_volunteer_points(&transactions)
                .map_err(|err| anyhow!("failed projecting {scope}: {err}"))?
            {
                upsert_aggregate(&self.conn, &aggregate)?;
                projected_scopes += 1;
            }
        }

        let latest_txn_seq = self.latest_txn_seq()?;
        Ok(LedgerReplayReport {
            contract_version: "ledger_replay.v1".to_string(),
            projected_scopes,
            processed_transactions,
            latest_txn_seq,
        })
    }

    pub fn ledger_status(&self) -> Result<LedgerStatus> {
        let ledger_rows = self.count_rows("SELECT COUNT(*) FROM point_transactions")?;
        let latest_txn_seq = self.latest_txn_seq()?;
        let tracked_scopes = self.count_rows(
            "SELECT COUNT(*) FROM (SELECT DISTINCT volunteer_id, church_id FROM point_transactions)",
        )?;
        let aggregate_rows = self.count_rows("SELECT COUNT(*) FROM volunteer_points")?;
        let scopes_without_aggregate = self.count_rows(
            "SELECT COUNT(*) FROM (
                SELECT DISTINCT volunteer_id, church_id FROM point_transactions
             ) txns
             WHERE NOT EXISTS (
                SELECT 1 FROM volunteer_points agg
                WHERE agg.volunteer_id = txns.volunteer_id AND agg.church_id = txns.church_id
             )",
        )?;
        let aggregates_without_transactions = self.count_rows(
            "SELECT COUNT(*) FROM volunteer_points agg
             WHERE NOT EXISTS (
                SELECT 1 FROM point_transactions txns
                WHERE txns.volunteer_id = agg.volunteer_id AND txns.church_id = agg.church_id
             )",
        )?;

        Ok(LedgerStatus {
            contract_version: "ledger_status.v1".to_string(),
            ledger_rows,
            latest_txn_seq,
            tracked_scopes,
            aggregate_rows,
            scopes_without_aggregate,
            aggregates_without_transactions,
        })
    }

    /// Audits every stored aggregate against a fresh replay of its ledger
    /// stream. Drift and missing aggregates are errors; an aggregate row with
    /// no ledger stream is only a warning.
    pub fn ledger_check(&self) -> Result<LedgerCheck> {
        let status = self.ledger_status()?;
        let mut issues = Vec::new();

        if status.scopes_without_aggregate > 0 {
            issues.push(LedgerIssue {
                code: "aggregate_missing".to_string(),
                severity: LedgerIssueSeverity::Error,
                message: format!(
                    "scopes with ledger rows but no aggregate: {}",
                    status.scopes_without_aggregate
                ),
            });
        }

        if status.aggregates_without_transactions > 0 {
            issues.push(LedgerIssue {
                code: "orphan_aggregates".to_string(),
                severity: LedgerIssueSeverity::Warning,
                message: format!(
                    "aggregate rows without ledger rows: {}",
                    status.aggregates_without_transactions
                ),
            });
        }

        for scope in self.tracked_scopes()? {
            let replayed = self.replay_scope(scope.volunteer_id, scope.church_id)?;
            let stored = self.get_balance(scope.volunteer_id, scope.church_id)?;

            if let (Some(replayed), Some(stored)) = (replayed, stored) {
                let drifted = replayed.total_points != stored.total_points
                    || replayed.lifetime_points != stored.lifetime_points
                    || replayed.points_spent != stored.points_spent
                    || replayed.level != stored.level;
                if drifted {
                    issues.push(LedgerIssue {
                        code: "aggregate_drift".to_string(),
                        severity: LedgerIssueSeverity::Error,
                        message: format!(
                            "aggregate drift for {scope}: stored total {} vs replayed {}",
                            stored.total_points, replayed.total_points
                        ),
                    });
                }
            }
        }

        let healthy = !issues
            .iter()
            .any(|item| item.severity == LedgerIssueSeverity::Error);

        Ok(LedgerCheck {
            contract_version: "ledger_check.v1".to_string(),
            healthy,
            status,
            issues,
        })
    }

    /// Runs the streak state machine for one activity date and persists the
    /// result. The duplicate-period no-op writes nothing.
    pub fn record_activity(
        &mut self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
        streak_type: StreakType,
        activity_date: Date,
    ) -> Result<StreakUpdate> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_unavailable(err, "failed to start streak transaction"))?;

        let existing = read_streak(&tx, volunteer_id, church_id, streak_type)?;
        let update = advance_streak(
            existing.as_ref(),
            volunteer_id,
            church_id,
            streak_type,
            activity_date,
        )
        .map_err(anyhow::Error::from)?;

        if update.outcome != gamify_core::StreakOutcome::Duplicate {
            upsert_streak(&tx, &update.streak)?;
        }

        tx.commit()
            .map_err(|err| map_unavailable(err, "failed to commit streak transaction"))?;

        Ok(update)
    }

    pub fn get_streak(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
        streak_type: StreakType,
    ) -> Result<Option<VolunteerStreak>> {
        read_streak(&self.conn, volunteer_id, church_id, streak_type)
    }

    pub fn list_streaks(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Vec<VolunteerStreak>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                volunteer_id, church_id, streak_type, current_streak,
                current_streak_start, current_streak_end, best_streak,
                best_streak_start, best_streak_end, last_activity_date
             FROM volunteer_streaks
             WHERE volunteer_id = ?1 AND church_id = ?2
             ORDER BY streak_type ASC",
        )?;

        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string()],
            parse_streak_row,
        )?;

        collect_rows(rows)
    }

    pub fn upsert_badge(&self, badge: &Badge) -> Result<()> {
        badge.validate().map_err(anyhow::Error::from)?;

        let requirement_json = serde_json::to_string(&badge.requirement)
            .context("failed to serialize badge requirement")?;

        self.conn
            .execute(
                "INSERT INTO badges(
                    badge_id, church_id, name, description, badge_type,
                    requirement_json, points_reward, rarity, is_active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(badge_id) DO UPDATE SET
                   church_id = excluded.church_id,
                   name = excluded.name,
                   description = excluded.description,
                   badge_type = excluded.badge_type,
                   requirement_json = excluded.requirement_json,
                   points_reward = excluded.points_reward,
                   rarity = excluded.rarity,
                   is_active = excluded.is_active",
                params![
                    badge.badge_id.to_string(),
                    badge.church_id.map(|id| id.to_string()),
                    badge.name,
                    badge.description,
                    badge.badge_type.as_str(),
                    requirement_json,
                    badge.points_reward,
                    badge.rarity.as_str(),
                    bool_to_sql(badge.is_active),
                ],
            )
            .context("failed to upsert badge")?;

        Ok(())
    }

    pub fn get_badge(&self, badge_id: BadgeId) -> Result<Option<Badge>> {
        self.conn
            .query_row(
                "SELECT
                    badge_id, church_id, name, description, badge_type,
                    requirement_json, points_reward, rarity, is_active
                 FROM badges
                 WHERE badge_id = ?1",
                params![badge_id.to_string()],
                parse_badge_row,
            )
            .optional()
            .context("failed to read badge")
    }

    /// Active catalog rows visible to one church: its own badges plus the
    /// global ones.
    pub fn list_active_badges(&self, church_id: ChurchId) -> Result<Vec<Badge>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                badge_id, church_id, name, description, badge_type,
                requirement_json, points_reward, rarity, is_active
             FROM badges
             WHERE is_active = 1 AND (church_id IS NULL OR church_id = ?1)
             ORDER BY badge_id ASC",
        )?;

        let rows = stmt.query_map(params![church_id.to_string()], parse_badge_row)?;
        collect_rows(rows)
    }

    pub fn list_volunteer_badges(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Vec<VolunteerBadge>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                volunteer_id, badge_id, church_id, earned_at,
                progress, is_displayed, display_order
             FROM volunteer_badges
             WHERE volunteer_id = ?1 AND church_id = ?2
             ORDER BY display_order ASC, badge_id ASC",
        )?;

        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string()],
            parse_volunteer_badge_row,
        )?;

        collect_rows(rows)
    }

    /// Read-only requirement inputs for one scope, as of call time.
    pub fn volunteer_snapshot(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<VolunteerSnapshot> {
        let points = self.get_balance(volunteer_id, church_id)?;

        let mut streaks = BTreeMap::new();
        for streak in self.list_streaks(volunteer_id, church_id)? {
            streaks.insert(streak.streak_type, streak);
        }

        let events_attended_i64: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM point_transactions
                 WHERE volunteer_id = ?1 AND church_id = ?2
                   AND transaction_type = 'earned' AND event_id IS NOT NULL",
                params![volunteer_id.to_string(), church_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count attended events")?;
        let events_attended = u32::try_from(events_attended_i64).unwrap_or(u32::MAX);

        let hours_served = self.hours_served(volunteer_id, church_id)?;

        Ok(VolunteerSnapshot {
            volunteer_id,
            church_id,
            points,
            streaks,
            events_attended,
            hours_served,
        })
    }

    // Metadata stays opaque to the schema, so hour totals are summed here
    // rather than in SQL.
    fn hours_served(&self, volunteer_id: VolunteerId, church_id: ChurchId) -> Result<f64> {
        let mut stmt = self.conn.prepare(
            "SELECT metadata_json FROM point_transactions
             WHERE volunteer_id = ?1 AND church_id = ?2 AND transaction_type = 'earned'",
        )?;

        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string()],
            |row| row.get::<_, String>(0),
        )?;

        let mut total = 0.0;
        for raw in rows {
            let raw = raw?;
            let metadata: Value =
                serde_json::from_str(&raw).context("invalid stored transaction metadata")?;
            if let Some(hours) = metadata.get("hours").and_then(Value::as_f64) {
                total += hours;
            }
        }

        Ok(total)
    }

    /// Evaluates every visible active badge against the current snapshot.
    /// Newly satisfied badges are granted at most once per volunteer, the
    /// bonus deposit rides on the `badge:<id>` idempotency key, and
    /// unsatisfied requirements persist their partial progress.
    pub fn evaluate_badges(
        &mut self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Vec<VolunteerBadge>> {
        let snapshot = self.volunteer_snapshot(volunteer_id, church_id)?;
        let badges = self.list_active_badges(church_id)?;
        let held: BTreeSet<BadgeId> = self
            .list_volunteer_badges(volunteer_id, church_id)?
            .into_iter()
            .map(|record| record.badge_id)
            .collect();

        let now = now_utc();
        let mut awarded = Vec::new();

        for badge in badges {
            if held.contains(&badge.badge_id) {
                continue;
            }

            let result = evaluate_requirement(&badge.requirement, &snapshot);
            if result.satisfied {
                if let Some(record) = self.grant_badge(volunteer_id, church_id, badge.badge_id, now)?
                {
                    if badge.points_reward > 0 {
                        let _ = self.award(&badge_bonus_input(volunteer_id, church_id, &badge))?;
                    }
                    awarded.push(record);
                }
            } else {
                self.upsert_badge_progress(volunteer_id, church_id, badge.badge_id, result.progress)?;
            }
        }

        Ok(awarded)
    }

    /// Grants one badge if the volunteer does not already hold it. Returns
    /// `None` when the (volunteer, badge) pair already exists.
    pub fn grant_badge(
        &mut self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
        badge_id: BadgeId,
        earned_at: OffsetDateTime,
    ) -> Result<Option<VolunteerBadge>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_unavailable(err, "failed to start badge grant transaction"))?;

        let display_order_i64: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM volunteer_badges WHERE volunteer_id = ?1 AND church_id = ?2",
                params![volunteer_id.to_string(), church_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count held badges")?;
        let display_order = u32::try_from(display_order_i64).unwrap_or(u32::MAX);

        let earned_at_raw = format_rfc3339(earned_at).map_err(|err| anyhow!(err.to_string()))?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO volunteer_badges(
                    volunteer_id, badge_id, church_id, earned_at,
                    progress, is_displayed, display_order
                 ) VALUES (?1, ?2, ?3, ?4, 100, 1, ?5)",
                params![
                    volunteer_id.to_string(),
                    badge_id.to_string(),
                    church_id.to_string(),
                    earned_at_raw,
                    i64::from(display_order),
                ],
            )
            .context("failed to insert volunteer badge")?;

        if inserted == 0 {
            return Ok(None);
        }

        tx.execute(
            "DELETE FROM badge_progress WHERE volunteer_id = ?1 AND badge_id = ?2",
            params![volunteer_id.to_string(), badge_id.to_string()],
        )
        .context("failed to clear badge progress after grant")?;

        tx.commit()
            .map_err(|err| map_unavailable(err, "failed to commit badge grant"))?;

        Ok(Some(VolunteerBadge {
            volunteer_id,
            badge_id,
            church_id,
            earned_at,
            progress: 100,
            is_displayed: true,
            display_order,
        }))
    }

    fn upsert_badge_progress(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
        badge_id: BadgeId,
        progress: u8,
    ) -> Result<()> {
        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO badge_progress(volunteer_id, badge_id, church_id, progress, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(volunteer_id, badge_id) DO UPDATE SET
                   progress = excluded.progress,
                   updated_at = excluded.updated_at",
                params![
                    volunteer_id.to_string(),
                    badge_id.to_string(),
                    church_id.to_string(),
                    i64::from(progress),
                    now,
                ],
            )
            .context("failed to upsert badge progress")?;

        Ok(())
    }

    pub fn list_badge_progress(
        &self,
        volunteer_id: VolunteerId,
        church_id: ChurchId,
    ) -> Result<Vec<BadgeProgressEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT progress.badge_id, badges.name, progress.progress, progress.updated_at
             FROM badge_progress progress
             JOIN badges ON badges.badge_id = progress.badge_id
             WHERE progress.volunteer_id = ?1 AND progress.church_id = ?2
             ORDER BY progress.progress DESC, progress.badge_id ASC",
        )?;

        let rows = stmt.query_map(
            params![volunteer_id.to_string(), church_id.to_string()],
            |row| {
                let badge_id_raw: String = row.get(0)?;
                let progress_i64: i64 = row.get(2)?;
                let progress = u8::try_from(progress_i64).map_err(|_| {
                    invalid_column(2, format!("invalid progress value: {progress_i64}"))
                })?;
                Ok(BadgeProgressEntry {
                    badge_id: BadgeId(parse_ulid_column(&badge_id_raw, 0)?),
                    name: row.get(1)?,
                    progress,
                    updated_at: parse_rfc3339_utc(&row.get::<_, String>(3)?)
                        .map_err(to_sql_error)?,
                })
            },
        )?;

        collect_rows(rows)
    }

    pub fn create_challenge(&self, challenge: &Challenge) -> Result<()> {
        challenge.validate().map_err(anyhow::Error::from)?;

        if let Some(badge_id) = challenge.badge_reward {
            if self.get_badge(badge_id)?.is_none() {
                return Err(anyhow!("badge_reward references unknown badge: {badge_id}"));
            }
        }

        self.conn
            .execute(
                "INSERT INTO challenges(
                    challenge_id, church_id, name, goal_type, goal_target,
                    points_reward, badge_reward, start_date, end_date, is_active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    challenge.challenge_id.to_string(),
                    challenge.church_id.to_string(),
                    challenge.name,
                    challenge.goal_type.as_str(),
                    challenge.goal_target,
                    challenge.points_reward,
                    challenge.badge_reward.map(|id| id.to_string()),
                    format_iso_date(challenge.start_date),
                    format_iso_date(challenge.end_date),
                    bool_to_sql(challenge.is_active),
                ],
            )
            .context("failed to insert challenge")?;

        Ok(())
    }

    pub fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<Challenge>> {
        self.conn
            .query_row(
                "SELECT
                    challenge_id, church_id, name, goal_type, goal_target,
                    points_reward, badge_reward, start_date, end_date, is_active
                 FROM challenges
                 WHERE challenge_id = ?1",
                params![challenge_id.to_string()],
                parse_challenge_row,
            )
            .optional()
            .context("failed to read challenge")
    }

    /// Joining twice is a no-op returning the existing enrollment.
    pub fn join_challenge(
        &mut self,
        challenge_id: ChallengeId,
        volunteer_id: VolunteerId,
    ) -> Result<ChallengeParticipant> {
        let challenge = self
            .get_challenge(challenge_id)?
            .ok_or_else(|| anyhow!("unknown challenge: {challenge_id}"))?;

        if !challenge.is_active {
            return Err(anyhow::Error::from(EngineError::Validation(format!(
                "challenge {challenge_id} is not active"
            ))));
        }

        if let Some(existing) = self.get_participant(challenge_id, volunteer_id)? {
            return Ok(existing);
        }

        let joined_at = now_utc();
        self.conn
            .execute(
                "INSERT INTO challenge_participants(
                    challenge_id, volunteer_id, church_id, current_progress,
                    progress_percentage, status, joined_at, completed_at, reward_claimed
                 ) VALUES (?1, ?2, ?3, 0, 0.0, 'active', ?4, NULL, 0)",
                params![
                    challenge_id.to_string(),
                    volunteer_id.to_string(),
                    challenge.church_id.to_string(),
                    format_rfc3339(joined_at).map_err(|err| anyhow!(err.to_string()))?,
                ],
            )
            .context("failed to enroll challenge participant")?;

        Ok(ChallengeParticipant {
            challenge_id,
            volunteer_id,
            church_id: challenge.church_id,
            current_progress: 0,
            progress_percentage: 0.0,
            status: ChallengeStatus::Active,
            joined_at,
            completed_at: None,
            reward_claimed: false,
        })
    }

    pub fn get_participant(
        &self,
        challenge_id: ChallengeId,
        volunteer_id: VolunteerId,
    ) -> Result<Option<ChallengeParticipant>> {
        self.conn
            .query_row(
                "SELECT
                    challenge_id, volunteer_id, church_id, current_progress,
                    progress_percentage, status, joined_at, completed_at, reward_claimed
                 FROM challenge_participants
                 WHERE challenge_id = ?1 AND volunteer_id = ?2",
                params![challenge_id.to_string(), volunteer_id.to_string()],
                parse_participant_row,
            )
            .optional()
            .context("failed to read challenge participant")
    }

    pub fn record_challenge_progress(
        &mut self,
        challenge_id: ChallengeId,
        volunteer_id: VolunteerId,
        delta: i64,
    ) -> Result<ChallengeProgressReport> {
        let challenge = self
            .get_challenge(challenge_id)?
            .ok_or_else(|| anyhow!("unknown challenge: {challenge_id}"))?;
        let mut participant = self
            .get_participant(challenge_id, volunteer_id)?
            .ok_or_else(|| {
                anyhow::Error::from(EngineError::UnknownVolunteer(format!(
                    "{volunteer_id} has not joined challenge {challenge_id}"
                )))
            })?;

        let outcome = apply_challenge_progress(&mut participant, &challenge, delta, now_utc());

        if outcome != ProgressOutcome::Ignored {
            self.update_participant(&participant)?;
        }

        Ok(ChallengeProgressReport {
            outcome,
            participant,
        })
    }

    /// Pays out a completed challenge. The bonus deposit carries the
    /// `challenge:<id>` idempotency key, so a retry after a partial failure
    /// never double-pays; only after the payouts land is `reward_claimed`
    /// set.
    pub fn claim_reward(
        &mut self,
        challenge_id: ChallengeId,
        volunteer_id: VolunteerId,
    ) -> Result<ChallengeParticipant> {
        let challenge = self
            .get_challenge(challenge_id)?
            .ok_or_else(|| anyhow!("unknown challenge: {challenge_id}"))?;
        let participant = self
            .get_participant(challenge_id, volunteer_id)?
            .ok_or_else(|| {
                anyhow::Error::from(EngineError::UnknownVolunteer(format!(
                    "{volunteer_id} has not joined challenge {challenge_id}"
                )))
            })?;

        if participant.status != ChallengeStatus::Completed {
            return Err(anyhow::Error::from(EngineError::NotCompleted(format!(
                "challenge {challenge_id} is {} for {volunteer_id}",
                participant.status.as_str()
            ))));
        }
        if participant.reward_claimed {
            return Err(anyhow::Error::from(EngineError::AlreadyClaimed(format!(
                "challenge {challenge_id} reward already claimed by {volunteer_id}"
            ))));
        }

        if challenge.points_reward > 0 {
            let _ = self.award(&challenge_bonus_input(volunteer_id, &challenge))?;
        }

        if let Some(badge_id) = challenge.badge_reward {
            if self.get_badge(badge_id)?.is_none() {
                return Err(anyhow!("badge_reward references unknown badge: {badge_id}"));
            }
            let _ = self.grant_badge(volunteer_id, challenge.church_id, badge_id, now_utc())?;
        }

        self.conn
            .execute(
                "UPDATE challenge_participants SET reward_claimed = 1
                 WHERE challenge_id = ?1 AND volunteer_id = ?2",
                params![challenge_id.to_string(), volunteer_id.to_string()],
            )
            .context("failed to mark reward claimed")?;

        let mut claimed = participant;
        claimed.reward_claimed = true;
        Ok(claimed)
    }

    /// Resolves every active participant whose challenge deadline has passed.
    /// Safe to run on any cadence; a second sweep finds nothing to do.
    pub fn sweep_expired_challenges(&mut self) -> Result<ChallengeSweepReport> {
        let now = now_utc();
        let keys = self.active_participant_keys()?;

        let mut completed = 0_usize;
        let mut failed = 0_usize;

        for (challenge_id, volunteer_id) in keys {
            let Some(challenge) = self.get_challenge(challenge_id)? else {
                continue;
            };
            let Some(participant) = self.get_participant(challenge_id, volunteer_id)? else {
                continue;
            };

            if let Some(next_status) = sweep_participant(&participant, &challenge, now) {
                let completed_at = if next_status == ChallengeStatus::Completed {
                    Some(format_rfc3339(now).map_err(|err| anyhow!(err.to_string()))?)
                } else {
                    None
                };
                self.conn
                    .execute(
                        "UPDATE challenge_participants
                         SET status = ?3,
                             completed_at = COALESCE(?4, completed_at),
                             progress_percentage = CASE WHEN ?3 = 'completed' THEN 100.0
                                                        ELSE progress_percentage END
                         WHERE challenge_id = ?1 AND volunteer_id = ?2",
                        params![
                            challenge_id.to_string(),
                            volunteer_id.to_string(),
                            next_status.as_str(),
                            completed_at,
                        ],
                    )
                    .context("failed to update swept participant")?;

                if next_status == ChallengeStatus::Completed {
                    completed += 1;
                } else {
                    failed += 1;
                }
            }
        }

        Ok(ChallengeSweepReport {
            contract_version: "challenge_sweep.v1".to_string(),
            swept: completed + failed,
            completed,
            failed,
        })
    }

    /// Computes a fresh ranking for one church scope. Previous ranks come
    /// from the most recent stored snapshot for the same (metric, ministry)
    /// scope.
    pub fn leaderboard(
        &self,
        church_id: ChurchId,
        metric_type: MetricType,
        ministry_id: Option<MinistryId>,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let rows = self.metric_rows(church_id, metric_type, ministry_id)?;
        let previous = self.latest_snapshot_ranks(church_id, metric_type, ministry_id)?;
        Ok(rank_entries(metric_type, rows, &previous, limit))
    }

    /// Persists the full current ranking under `period_key`, replacing any
    /// earlier snapshot for the same key.
    pub fn snapshot_leaderboard(
        &mut self,
        church_id: ChurchId,
        metric_type: MetricType,
        ministry_id: Option<MinistryId>,
        period_key: &str,
    ) -> Result<LeaderboardSnapshotReport> {
        if period_key.trim().is_empty() {
            return Err(anyhow::Error::from(EngineError::Validation(
                "period_key MUST be non-empty".to_string(),
            )));
        }

        let rows = self.metric_rows(church_id, metric_type, ministry_id)?;
        let entries = rank_entries(metric_type, rows, &BTreeMap::new(), usize::MAX);
        let captured_at = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        let ministry_key = ministry_key(ministry_id);

        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_unavailable(err, "failed to start snapshot transaction"))?;

        tx.execute(
            "DELETE FROM leaderboard_snapshots
             WHERE church_id = ?1 AND metric_type = ?2 AND ministry_id = ?3 AND period_key = ?4",
            params![
                church_id.to_string(),
                metric_type.as_str(),
                ministry_key,
                period_key,
            ],
        )
        .context("failed to clear prior snapshot")?;

        for entry in &entries {
            tx.execute(
                "INSERT INTO leaderboard_snapshots(
                    church_id, metric_type, ministry_id, period_key,
                    volunteer_id, rank, metric_value, captured_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    church_id.to_string(),
                    metric_type.as_str(),
                    ministry_key,
                    period_key,
                    entry.volunteer_id.to_string(),
                    i64::from(entry.rank),
                    entry.metric_value,
                    captured_at,
                ],
            )
            .context("failed to insert snapshot row")?;
        }

        tx.commit()
            .map_err(|err| map_unavailable(err, "failed to commit snapshot transaction"))?;

        Ok(LeaderboardSnapshotReport {
            contract_version: "leaderboard_snapshot.v1".to_string(),
            church_id,
            metric_type,
            ministry_id,
            period_key: period_key.to_string(),
            captured_at,
            entries: entries.len(),
        })
    }

    fn metric_rows(
        &self,
        church_id: ChurchId,
        metric_type: MetricType,
        ministry_id: Option<MinistryId>,
    ) -> Result<Vec<RankRow>> {
        match metric_type {
            MetricType::Points => self.rank_rows_for_query(
                "SELECT volunteer_id, total_points, created_at
                 FROM volunteer_points
                 WHERE church_id = ?1",
                "volunteer_id",
                church_id,
                ministry_id,
            ),
            MetricType::Events => self.rank_rows_for_query(
                "SELECT txns.volunteer_id, COUNT(*), agg.created_at
                 FROM point_transactions txns
                 JOIN volunteer_points agg
                   ON agg.volunteer_id = txns.volunteer_id AND agg.church_id = txns.church_id
                 WHERE txns.church_id = ?1
                   AND txns.transaction_type = 'earned' AND txns.event_id IS NOT NULL",
                "txns.volunteer_id",
                church_id,
                ministry_id,
            ),
            MetricType::Streak => self.rank_rows_for_query(
                "SELECT streaks.volunteer_id, streaks.current_streak, agg.created_at
                 FROM volunteer_streaks streaks
                 JOIN volunteer_points agg
                   ON agg.volunteer_id = streaks.volunteer_id AND agg.church_id = streaks.church_id
                 WHERE streaks.church_id = ?1 AND streaks.streak_type = 'weekly'",
                "streaks.volunteer_id",
                church_id,
                ministry_id,
            ),
            MetricType::Hours => self.hours_rank_rows(church_id, ministry_id),
        }
    }

    fn rank_rows_for_query(
        &self,
        base_query: &str,
        volunteer_column: &str,
        church_id: ChurchId,
        ministry_id: Option<MinistryId>,
    ) -> Result<Vec<RankRow>> {
        let mut query = base_query.to_string();
        if ministry_id.is_some() {
            query.push_str(&format!(
                " AND {volunteer_column} IN (
                    SELECT DISTINCT volunteer_id FROM point_transactions
                    WHERE church_id = ?1 AND ministry_id = ?2
                 )"
            ));
        }
        if base_query.contains("COUNT(*)") {
            query.push_str(&format!(" GROUP BY {volunteer_column}, agg.created_at"));
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = match ministry_id {
            Some(ministry) => stmt.query_map(
                params![church_id.to_string(), ministry.to_string()],
                parse_rank_row,
            )?,
            None => stmt.query_map(params![church_id.to_string()], parse_rank_row)?,
        };

        collect_rows(rows)
    }

    fn hours_rank_rows(
        &self,
        church_id: ChurchId,
        ministry_id: Option<MinistryId>,
    ) -> Result<Vec<RankRow>> {
        let mut query = "SELECT txns.volunteer_id, txns.metadata_json, agg.created_at
             FROM point_transactions txns
             JOIN volunteer_points agg
               ON agg.volunteer_id = txns.volunteer_id AND agg.church_id = txns.church_id
             WHERE txns.church_id = ?1 AND txns.transaction_type = 'earned'"
            .to_string();
        if ministry_id.is_some() {
            query.push_str(
                " AND txns.volunteer_id IN (
                    SELECT DISTINCT volunteer_id FROM point_transactions
                    WHERE church_id = ?1 AND ministry_id = ?2
                 )",
            );
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = match ministry_id {
            Some(ministry) => stmt.query_map(
                params![church_id.to_string(), ministry.to_string()],
                parse_raw_triple,
            )?,
            None => stmt.query_map(params![church_id.to_string()], parse_raw_triple)?,
        };

        let mut totals: BTreeMap<VolunteerId, (f64, OffsetDateTime)> = BTreeMap::new();
        for row in rows {
            let (volunteer_raw, metadata_raw, created_raw) = row?;
            let volunteer_id = VolunteerId(
                Ulid::from_string(&volunteer_raw)
                    .with_context(|| format!("invalid stored volunteer_id: {volunteer_raw}"))?,
            );
            let created_at = parse_rfc3339_utc(&created_raw)
                .map_err(|err| anyhow!("invalid stored created_at: {err}"))?;
            let metadata: Value = serde_json::from_str(&metadata_raw)
                .context("invalid stored transaction metadata")?;
            let hours = metadata.get("hours").and_then(Value::as_f64).unwrap_or(0.0);

            let entry = totals.entry(volunteer_id).or_insert((0.0, created_at));
            entry.0 += hours;
        }

        Ok(totals
            .into_iter()
            .map(|(volunteer_id, (metric_value, aggregate_created_at))| RankRow {
                volunteer_id,
                metric_value,
                aggregate_created_at,
            })
            .collect())
    }

    fn latest_snapshot_ranks(
        &self,
        church_id: ChurchId,
        metric_type: MetricType,
        ministry_id: Option<MinistryId>,
    ) -> Result<BTreeMap<VolunteerId, u32>> {
        let ministry_key = ministry_key(ministry_id);

        // Latest means most recently captured; period_key is an opaque
        // caller label and carries no ordering guarantee.
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT period_key FROM leaderboard_snapshots
                 WHERE church_id = ?1 AND metric_type = ?2 AND ministry_id = ?3
                 ORDER BY captured_at DESC LIMIT 1",
                params![church_id.to_string(), metric_type.as_str(), ministry_key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to find latest snapshot period")?;

        let Some(period_key) = latest else {
            return Ok(BTreeMap::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT volunteer_id, rank FROM leaderboard_snapshots
             WHERE church_id = ?1 AND metric_type = ?2 AND ministry_id = ?3 AND period_key = ?4",
        )?;
        let mut rows = stmt.query(params![
            church_id.to_string(),
            metric_type.as_str(),
            ministry_key,
            period_key,
        ])?;

        let mut map = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let volunteer_raw: String = row.get(0)?;
            let rank_i64: i64 = row.get(1)?;
            let volunteer_id = VolunteerId(
                Ulid::from_string(&volunteer_raw)
                    .with_context(|| format!("invalid stored volunteer_id: {volunteer_raw}"))?,
            );
            map.insert(volunteer_id, u32::try_from(rank_i64).unwrap_or(u32::MAX));
        }

        Ok(map)
    }

    fn tracked_scopes(&self) -> Result<Vec<ScopeKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT volunteer_id, church_id FROM point_transactions
             ORDER BY volunteer_id ASC, church_id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let volunteer_raw: String = row.get(0)?;
            let church_raw: String = row.get(1)?;
            Ok(ScopeKey {
                volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 0)?),
                church_id: ChurchId(parse_ulid_column(&church_raw, 1)?),
            })
        })?;

        collect_rows(rows)
    }

    fn active_participant_keys(&self) -> Result<Vec<(ChallengeId, VolunteerId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT challenge_id, volunteer_id FROM challenge_participants
             WHERE status = 'active'
             ORDER BY challenge_id ASC, volunteer_id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let challenge_raw: String = row.get(0)?;
            let volunteer_raw: String = row.get(1)?;
            Ok((
                ChallengeId(parse_ulid_column(&challenge_raw, 0)?),
                VolunteerId(parse_ulid_column(&volunteer_raw, 1)?),
            ))
        })?;

        collect_rows(rows)
    }

    fn update_participant(&self, participant: &ChallengeParticipant) -> Result<()> {
        let completed_at = participant
            .completed_at
            .map(format_rfc3339)
            .transpose()
            .map_err(|err| anyhow!(err.to_string()))?;

        self.conn
            .execute(
                "UPDATE challenge_participants
                 SET current_progress = ?3,
                     progress_percentage = ?4,
                     status = ?5,
                     completed_at = ?6,
                     reward_claimed = ?7
                 WHERE challenge_id = ?1 AND volunteer_id = ?2",
                params![
                    participant.challenge_id.to_string(),
                    participant.volunteer_id.to_string(),
                    participant.current_progress,
                    participant.progress_percentage,
                    participant.status.as_str(),
                    completed_at,
                    bool_to_sql(participant.reward_claimed),
                ],
            )
            .context("failed to update challenge participant")?;

        Ok(())
    }

    fn latest_txn_seq(&self) -> Result<i64> {
        let latest: Option<i64> = self
            .conn
            .query_row("SELECT MAX(txn_seq) FROM point_transactions", [], |row| {
                row.get(0)
            })
            .context("failed to read latest txn_seq")?;
        Ok(latest.unwrap_or(0))
    }

    fn count_rows(&self, query: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(query, [], |row| row.get(0))
            .with_context(|| format!("failed to run count query: {query}"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn badge_bonus_input(
    volunteer_id: VolunteerId,
    church_id: ChurchId,
    badge: &Badge,
) -> PointTransactionInput {
    PointTransactionInput {
        txn_id: None,
        volunteer_id,
        church_id,
        points: badge.points_reward,
        transaction_type: TransactionType::Bonus,
        reason: format!("Badge earned: {}", badge.name),
        event_id: None,
        assignment_id: None,
        badge_id: Some(badge.badge_id),
        ministry_id: None,
        idempotency_key: Some(badge_award_key(badge.badge_id)),
        metadata: Value::Object(serde_json::Map::default()),
        created_by: "badge_engine".to_string(),
    }
}

fn challenge_bonus_input(volunteer_id: VolunteerId, challenge: &Challenge) -> PointTransactionInput {
    PointTransactionInput {
        txn_id: None,
        volunteer_id,
        church_id: challenge.church_id,
        points: challenge.points_reward,
        transaction_type: TransactionType::Bonus,
        reason: format!("Challenge completed: {}", challenge.name),
        event_id: None,
        assignment_id: None,
        badge_id: None,
        ministry_id: None,
        idempotency_key: Some(challenge_reward_key(challenge.challenge_id)),
        metadata: Value::Object(serde_json::Map::default()),
        created_by: "challenge_tracker".to_string(),
    }
}

fn ministry_key(ministry_id: Option<MinistryId>) -> String {
    // Empty string marks the church-wide scope so the snapshot primary key
    // never carries NULL.
    ministry_id.map_or_else(String::new, |id| id.to_string())
}

fn find_transaction_by_key(
    conn: &Connection,
    volunteer_id: VolunteerId,
    church_id: ChurchId,
    idempotency_key: &str,
) -> Result<Option<PointTransaction>> {
    conn.query_row(
        "SELECT
            txn_seq, txn_id, volunteer_id, church_id, points, transaction_type,
            reason, event_id, assignment_id, badge_id, ministry_id,
            idempotency_key, metadata_json, created_at, created_by
         FROM point_transactions
         WHERE volunteer_id = ?1 AND church_id = ?2 AND idempotency_key = ?3",
        params![
            volunteer_id.to_string(),
            church_id.to_string(),
            idempotency_key
        ],
        parse_transaction_row,
    )
    .optional()
    .context("failed to look up idempotency key")
}

fn read_aggregate(
    conn: &Connection,
    volunteer_id: VolunteerId,
    church_id: ChurchId,
) -> Result<Option<VolunteerPoints>> {
    conn.query_row(
        "SELECT
            volunteer_id, church_id, total_points, lifetime_points, points_spent,
            level, level_progress, created_at, updated_at
         FROM volunteer_points
         WHERE volunteer_id = ?1 AND church_id = ?2",
        params![volunteer_id.to_string(), church_id.to_string()],
        parse_points_row,
    )
    .optional()
    .context("failed to read volunteer points")
}

fn upsert_aggregate(conn: &Connection, aggregate: &VolunteerPoints) -> Result<()> {
    conn.execute(
        "INSERT INTO volunteer_points(
            volunteer_id, church_id, total_points, lifetime_points, points_spent,
            level, level_progress, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(volunteer_id, church_id) DO UPDATE SET
           total_points = excluded.total_points,
           lifetime_points = excluded.lifetime_points,
           points_spent = excluded.points_spent,
           level = excluded.level,
           level_progress = excluded.level_progress,
           updated_at = excluded.updated_at",
        params![
            aggregate.volunteer_id.to_string(),
            aggregate.church_id.to_string(),
            aggregate.total_points,
            aggregate.lifetime_points,
            aggregate.points_spent,
            i64::from(aggregate.level),
            aggregate.level_progress,
            format_rfc3339(aggregate.created_at).map_err(|err| anyhow!(err.to_string()))?,
            format_rfc3339(aggregate.updated_at).map_err(|err| anyhow!(err.to_string()))?,
        ],
    )
    .context("failed to upsert volunteer points")?;

    Ok(())
}

fn read_streak(
    conn: &Connection,
    volunteer_id: VolunteerId,
    church_id: ChurchId,
    streak_type: StreakType,
) -> Result<Option<VolunteerStreak>> {
    conn.query_row(
        "SELECT
            volunteer_id, church_id, streak_type, current_streak,
            current_streak_start, current_streak_end, best_streak,
            best_streak_start, best_streak_end, last_activity_date
         FROM volunteer_streaks
         WHERE volunteer_id = ?1 AND church_id = ?2 AND streak_type = ?3",
        params![
            volunteer_id.to_string(),
            church_id.to_string(),
            streak_type.as_str()
        ],
        parse_streak_row,
    )
    .optional()
    .context("failed to read volunteer streak")
}

fn upsert_streak(conn: &Connection, streak: &VolunteerStreak) -> Result<()> {
    conn.execute(
        "INSERT INTO volunteer_streaks(
            volunteer_id, church_id, streak_type, current_streak,
            current_streak_start, current_streak_end, best_streak,
            best_streak_start, best_streak_end, last_activity_date
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(volunteer_id, church_id, streak_type) DO UPDATE SET
           current_streak = excluded.current_streak,
           current_streak_start = excluded.current_streak_start,
           current_streak_end = excluded.current_streak_end,
           best_streak = excluded.best_streak,
           best_streak_start = excluded.best_streak_start,
           best_streak_end = excluded.best_streak_end,
           last_activity_date = excluded.last_activity_date",
        params![
            streak.volunteer_id.to_string(),
            streak.church_id.to_string(),
            streak.streak_type.as_str(),
            i64::from(streak.current_streak),
            format_iso_date(streak.current_streak_start),
            format_iso_date(streak.current_streak_end),
            i64::from(streak.best_streak),
            format_iso_date(streak.best_streak_start),
            format_iso_date(streak.best_streak_end),
            format_iso_date(streak.last_activity_date),
        ],
    )
    .context("failed to upsert volunteer streak")?;

    Ok(())
}

fn parse_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PointTransaction> {
    let txn_id_raw: String = row.get(1)?;
    let volunteer_raw: String = row.get(2)?;
    let church_raw: String = row.get(3)?;
    let type_raw: String = row.get(5)?;
    let metadata_raw: String = row.get(12)?;

    let transaction_type = TransactionType::parse(&type_raw)
        .ok_or_else(|| invalid_column(5, format!("invalid transaction_type: {type_raw}")))?;

    let metadata: Value = serde_json::from_str(&metadata_raw)
        .map_err(|err| invalid_column(12, format!("invalid metadata JSON: {err}")))?;

    Ok(PointTransaction {
        txn_seq: row.get(0)?,
        txn_id: parse_ulid_column(&txn_id_raw, 1)?,
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 2)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 3)?),
        points: row.get(4)?,
        transaction_type,
        reason: row.get(6)?,
        event_id: parse_optional_ulid(row, 7)?,
        assignment_id: parse_optional_ulid(row, 8)?,
        badge_id: parse_optional_ulid(row, 9)?.map(BadgeId),
        ministry_id: parse_optional_ulid(row, 10)?.map(MinistryId),
        idempotency_key: row.get(11)?,
        metadata,
        created_at: parse_rfc3339_utc(&row.get::<_, String>(13)?).map_err(to_sql_error)?,
        created_by: row.get(14)?,
    })
}

fn parse_points_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VolunteerPoints> {
    let volunteer_raw: String = row.get(0)?;
    let church_raw: String = row.get(1)?;
    let level_i64: i64 = row.get(5)?;

    let level = u32::try_from(level_i64)
        .map_err(|_| invalid_column(5, format!("invalid level value: {level_i64}")))?;

    Ok(VolunteerPoints {
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 0)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 1)?),
        total_points: row.get(2)?,
        lifetime_points: row.get(3)?,
        points_spent: row.get(4)?,
        level,
        level_progress: row.get(6)?,
        created_at: parse_rfc3339_utc(&row.get::<_, String>(7)?).map_err(to_sql_error)?,
        updated_at: parse_rfc3339_utc(&row.get::<_, String>(8)?).map_err(to_sql_error)?,
    })
}

fn parse_streak_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VolunteerStreak> {
    let volunteer_raw: String = row.get(0)?;
    let church_raw: String = row.get(1)?;
    let type_raw: String = row.get(2)?;
    let current_i64: i64 = row.get(3)?;
    let best_i64: i64 = row.get(6)?;

    let streak_type = StreakType::parse(&type_raw)
        .ok_or_else(|| invalid_column(2, format!("invalid streak_type: {type_raw}")))?;
    let current_streak = u32::try_from(current_i64)
        .map_err(|_| invalid_column(3, format!("invalid current_streak: {current_i64}")))?;
    let best_streak = u32::try_from(best_i64)
        .map_err(|_| invalid_column(6, format!("invalid best_streak: {best_i64}")))?;

    Ok(VolunteerStreak {
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 0)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 1)?),
        streak_type,
        current_streak,
        current_streak_start: parse_iso_date(&row.get::<_, String>(4)?).map_err(to_sql_error)?,
        current_streak_end: parse_iso_date(&row.get::<_, String>(5)?).map_err(to_sql_error)?,
        best_streak,
        best_streak_start: parse_iso_date(&row.get::<_, String>(7)?).map_err(to_sql_error)?,
        best_streak_end: parse_iso_date(&row.get::<_, String>(8)?).map_err(to_sql_error)?,
        last_activity_date: parse_iso_date(&row.get::<_, String>(9)?).map_err(to_sql_error)?,
    })
}

fn parse_badge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Badge> {
    let badge_raw: String = row.get(0)?;
    let type_raw: String = row.get(4)?;
    let requirement_raw: String = row.get(5)?;
    let rarity_raw: String = row.get(7)?;

    let badge_type = BadgeType::parse(&type_raw)
        .ok_or_else(|| invalid_column(4, format!("invalid badge_type: {type_raw}")))?;
    let rarity = Rarity::parse(&rarity_raw)
        .ok_or_else(|| invalid_column(7, format!("invalid rarity: {rarity_raw}")))?;
    let requirement: BadgeRequirement = serde_json::from_str(&requirement_raw)
        .map_err(|err| invalid_column(5, format!("invalid requirement JSON: {err}")))?;

    Ok(Badge {
        badge_id: BadgeId(parse_ulid_column(&badge_raw, 0)?),
        church_id: parse_optional_ulid(row, 1)?.map(ChurchId),
        name: row.get(2)?,
        description: row.get(3)?,
        badge_type,
        requirement,
        points_reward: row.get(6)?,
        rarity,
        is_active: row.get::<_, i64>(8)? == 1,
    })
}

fn parse_volunteer_badge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VolunteerBadge> {
    let volunteer_raw: String = row.get(0)?;
    let badge_raw: String = row.get(1)?;
    let church_raw: String = row.get(2)?;
    let progress_i64: i64 = row.get(4)?;
    let order_i64: i64 = row.get(6)?;

    let progress = u8::try_from(progress_i64)
        .map_err(|_| invalid_column(4, format!("invalid progress: {progress_i64}")))?;
    let display_order = u32::try_from(order_i64)
        .map_err(|_| invalid_column(6, format!("invalid display_order: {order_i64}")))?;

    Ok(VolunteerBadge {
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 0)?),
        badge_id: BadgeId(parse_ulid_column(&badge_raw, 1)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 2)?),
        earned_at: parse_rfc3339_utc(&row.get::<_, String>(3)?).map_err(to_sql_error)?,
        progress,
        is_displayed: row.get::<_, i64>(5)? == 1,
        display_order,
    })
}

fn parse_challenge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Challenge> {
    let challenge_raw: String = row.get(0)?;
    let church_raw: String = row.get(1)?;
    let goal_raw: String = row.get(3)?;

    let goal_type = GoalType::parse(&goal_raw)
        .ok_or_else(|| invalid_column(3, format!("invalid goal_type: {goal_raw}")))?;

    Ok(Challenge {
        challenge_id: ChallengeId(parse_ulid_column(&challenge_raw, 0)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 1)?),
        name: row.get(2)?,
        goal_type,
        goal_target: row.get(4)?,
        points_reward: row.get(5)?,
        badge_reward: parse_optional_ulid(row, 6)?.map(BadgeId),
        start_date: parse_iso_date(&row.get::<_, String>(7)?).map_err(to_sql_error)?,
        end_date: parse_iso_date(&row.get::<_, String>(8)?).map_err(to_sql_error)?,
        is_active: row.get::<_, i64>(9)? == 1,
    })
}

fn parse_participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChallengeParticipant> {
    let challenge_raw: String = row.get(0)?;
    let volunteer_raw: String = row.get(1)?;
    let church_raw: String = row.get(2)?;
    let status_raw: String = row.get(5)?;

    let status = ChallengeStatus::parse(&status_raw)
        .ok_or_else(|| invalid_column(5, format!("invalid status: {status_raw}")))?;

    let completed_at = row
        .get::<_, Option<String>>(7)?
        .as_deref()
        .map(|value| parse_rfc3339_utc(value).map_err(to_sql_error))
        .transpose()?;

    Ok(ChallengeParticipant {
        challenge_id: ChallengeId(parse_ulid_column(&challenge_raw, 0)?),
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 1)?),
        church_id: ChurchId(parse_ulid_column(&church_raw, 2)?),
        current_progress: row.get(3)?,
        progress_percentage: row.get(4)?,
        status,
        joined_at: parse_rfc3339_utc(&row.get::<_, String>(6)?).map_err(to_sql_error)?,
        completed_at,
        reward_claimed: row.get::<_, i64>(8)? == 1,
    })
}

fn parse_rank_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankRow> {
    let volunteer_raw: String = row.get(0)?;
    Ok(RankRow {
        volunteer_id: VolunteerId(parse_ulid_column(&volunteer_raw, 0)?),
        metric_value: row.get(1)?,
        aggregate_created_at: parse_rfc3339_utc(&row.get::<_, String>(2)?).map_err(to_sql_error)?,
    })
}

fn parse_raw_triple(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn parse_optional_ulid(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Option<Ulid>> {
    row.get::<_, Option<String>>(index)?
        .as_deref()
        .map(|raw| parse_ulid_column(raw, index))
        .transpose()
}

fn parse_ulid_column(raw: &str, index: usize) -> rusqlite::Result<Ulid> {
    Ulid::from_string(raw).map_err(|_| invalid_column(index, format!("invalid ULID: {raw}")))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message,
        )),
    )
}

#[allow(clippy::needless_pass_by_value)]
fn to_sql_error(err: EngineError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

/// Busy/locked failures surface as [`EngineError::StoreUnavailable`] so
/// callers can retry the same call (same idempotency key) safely.
fn map_unavailable(err: rusqlite::Error, what: &str) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if matches!(
            failure.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return anyhow::Error::from(EngineError::StoreUnavailable(format!("{what}: {err}")));
        }
    }
    anyhow::Error::new(err).context(what.to_string())
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp, clippy::too_many_lines)]

    use super::*;
    use proptest::prelude::*;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    fn fixture_store() -> SqliteGamifyStore {
        let store = must(SqliteGamifyStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn fixture_volunteer_id() -> VolunteerId {
        VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M2"))
    }

    fn fixture_church_id() -> ChurchId {
        ChurchId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M3"))
    }

    fn fixture_ulid(raw: &str) -> Ulid {
        match Ulid::from_string(raw) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture ULID: {err}"),
        }
    }

    fn fixture_date(raw: &str) -> Date {
        match parse_iso_date(raw) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    fn award_input(points: i64, transaction_type: TransactionType) -> PointTransactionInput {
        PointTransactionInput {
            txn_id: None,
            volunteer_id: fixture_volunteer_id(),
            church_id: fixture_church_id(),
            points,
            transaction_type,
            reason: "fixture".to_string(),
            event_id: None,
            assignment_id: None,
            badge_id: None,
            ministry_id: None,
            idempotency_key: None,
            metadata: Value::Object(serde_json::Map::default()),
            created_by: "tester".to_string(),
        }
    }

    fn fixture_badge(points_reward: i64, requirement: BadgeRequirement) -> Badge {
        Badge {
            badge_id: BadgeId(Ulid::new()),
            church_id: Some(fixture_church_id()),
            name: "Faithful Server".to_string(),
            description: "Keeps showing up".to_string(),
            badge_type: BadgeType::Milestone,
            requirement,
            points_reward,
            rarity: Rarity::Common,
            is_active: true,
        }
    }

    fn fixture_challenge(goal_target: i64) -> Challenge {
        Challenge {
            challenge_id: ChallengeId(Ulid::new()),
            church_id: fixture_church_id(),
            name: "Summer serve".to_string(),
            goal_type: GoalType::Events,
            goal_target,
            points_reward: 200,
            badge_reward: None,
            start_date: fixture_date("2020-01-01"),
            end_date: fixture_date("2099-12-31"),
            is_active: true,
        }
    }

    fn expired_challenge(goal_target: i64) -> Challenge {
        let mut challenge = fixture_challenge(goal_target);
        challenge.start_date = fixture_date("2020-01-01");
        challenge.end_date = fixture_date("2020-12-31");
        challenge
    }

    #[test]
    fn award_scenario_maintains_balance_identity() {
        let mut store = fixture_store();

        let _ = must(store.award(&award_input(100, TransactionType::Earned)));
        let _ = must(store.award(&award_input(50, TransactionType::Bonus)));
        let outcome = must(store.award(&award_input(30, TransactionType::Spent)));

        assert_eq!(outcome.aggregate.total_points, 120);
        assert_eq!(outcome.aggregate.lifetime_points, 150);
        assert_eq!(outcome.aggregate.points_spent, 30);
        assert_eq!(outcome.aggregate.level, 1);
        assert_eq!(outcome.transaction.points, -30);

        let transactions = must(store.list_transactions(
            fixture_volunteer_id(),
            fixture_church_id(),
            None,
        ));
        assert_eq!(transactions.len(), 3);
        // Most recent first.
        assert_eq!(transactions[0].points, -30);
    }

    #[test]
    fn idempotency_key_appends_exactly_once() {
        let mut store = fixture_store();

        let mut input = award_input(100, TransactionType::Earned);
        input.idempotency_key = Some("event:123".to_string());

        let first = must(store.award(&input));
        assert!(!first.deduplicated);

        let second = must(store.award(&input));
        assert!(second.deduplicated);
        assert_eq!(second.transaction.txn_id, first.transaction.txn_id);
        assert_eq!(second.aggregate, first.aggregate);

        let transactions = must(store.list_transactions(
            fixture_volunteer_id(),
            fixture_church_id(),
            None,
        ));
        assert_eq!(transactions.len(), 1);
    }

    #[test]
    fn append_only_triggers_block_mutation() {
        let mut store = fixture_store();
        let outcome = must(store.award(&award_input(10, TransactionType::Earned)));

        let update_result = store.connection().execute(
            "UPDATE point_transactions SET points = 999 WHERE txn_seq = ?1",
            params![outcome.transaction.txn_seq],
        );
        assert!(update_result.is_err());

        let delete_result = store.connection().execute(
            "DELETE FROM point_transactions WHERE txn_seq = ?1",
            params![outcome.transaction.txn_seq],
        );
        assert!(delete_result.is_err());
    }

    #[test]
    fn invalid_amounts_never_reach_the_ledger() {
        let mut store = fixture_store();

        let result = store.award(&award_input(-5, TransactionType::Earned));
        let err = match result {
            Ok(_) => panic!("negative earned amount must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidAmount(_))
        ));

        let zero = store.award(&award_input(0, TransactionType::Adjustment));
        assert!(zero.is_err());

        let status = must(store.ledger_status());
        assert_eq!(status.ledger_rows, 0);
    }

    #[test]
    fn replay_matches_stored_aggregate_and_check_passes() {
        let mut store = fixture_store();

        let _ = must(store.award(&award_input(120, TransactionType::Earned)));
        let _ = must(store.award(&award_input(40, TransactionType::Spent)));
        let _ = must(store.award(&award_input(-15, TransactionType::Adjustment)));
        let _ = must(store.award(&award_input(75, TransactionType::Bonus)));

        let stored = must_some(must(
            store.get_balance(fixture_volunteer_id(), fixture_church_id())
        ));
        let replayed = must_some(must(
            store.replay_scope(fixture_volunteer_id(), fixture_church_id())
        ));

        assert_eq!(replayed.total_points, stored.total_points);
        assert_eq!(replayed.lifetime_points, stored.lifetime_points);
        assert_eq!(replayed.points_spent, stored.points_spent);
        assert_eq!(replayed.level, stored.level);

        let check = must(store.ledger_check());
        assert_eq!(check.contract_version, "ledger_check.v1");
        assert!(check.healthy);
        assert!(check.issues.is_empty());
    }

    #[test]
    fn ledger_check_flags_drift_and_rebuild_repairs_it() {
        let mut store = fixture_store();
        let _ = must(store.award(&award_input(200, TransactionType::Earned)));

        // Aggregates carry no append-only trigger, so corrupt one directly.
        let corrupted = store.connection().execute(
            "UPDATE volunteer_points SET total_points = 9999, lifetime_points = 9999",
            [],
        );
        assert!(corrupted.is_ok());

        let check = must(store.ledger_check());
        assert!(!check.healthy);
        assert!(check.issues.iter().any(|issue| issue.code == "aggregate_drift"));

        let report = must(store.rebuild_aggregates());
        assert_eq!(report.contract_version, "ledger_replay.v1");
        assert_eq!(report.projected_scopes, 1);

        let repaired = must(store.ledger_check());
        assert!(repaired.healthy);
    }

    #[test]
    fn streaks_extend_break_and_reject_stale_activity() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();
        let church = fixture_church_id();

        for date in ["2026-01-05", "2026-01-12", "2026-01-19"] {
            let _ = must(store.record_activity(
                volunteer,
                church,
                StreakType::Weekly,
                fixture_date(date),
            ));
        }

        let streak = must_some(must(store.get_streak(volunteer, church, StreakType::Weekly)));
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.best_streak, 3);

        // Skip a week.
        let broken = must(store.record_activity(
            volunteer,
            church,
            StreakType::Weekly,
            fixture_date("2026-02-02"),
        ));
        assert_eq!(broken.streak.current_streak, 1);
        assert_eq!(broken.streak.best_streak, 3);

        let stale = store.record_activity(
            volunteer,
            church,
            StreakType::Weekly,
            fixture_date("2026-01-26"),
        );
        let err = match stale {
            Ok(_) => panic!("stale activity must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::StaleActivity(_))
        ));
    }

    #[test]
    fn snapshot_counts_events_and_sums_metadata_hours() {
        let mut store = fixture_store();

        let mut with_event = award_input(25, TransactionType::Earned);
        with_event.event_id = Some(Ulid::new());
        with_event.metadata = serde_json::json!({ "hours": 2.5 });
        let _ = must(store.award(&with_event));

        let mut second = award_input(25, TransactionType::Earned);
        second.event_id = Some(Ulid::new());
        second.metadata = serde_json::json!({ "hours": 1.5 });
        let _ = must(store.award(&second));

        // Spending carries no event and no hours.
        let _ = must(store.award(&award_input(10, TransactionType::Spent)));

        let snapshot = must(store.volunteer_snapshot(fixture_volunteer_id(), fixture_church_id()));
        assert_eq!(snapshot.events_attended, 2);
        assert_eq!(snapshot.hours_served, 4.0);
        assert_eq!(must_some(snapshot.points).total_points, 40);
    }

    #[test]
    fn badge_evaluation_grants_once_and_pays_bonus_once() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();
        let church = fixture_church_id();

        let badge = fixture_badge(50, BadgeRequirement::LifetimePoints { value: 100 });
        must(store.upsert_badge(&badge));

        let _ = must(store.award(&award_input(150, TransactionType::Earned)));

        let first = must(store.evaluate_badges(volunteer, church));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].badge_id, badge.badge_id);

        let second = must(store.evaluate_badges(volunteer, church));
        assert!(second.is_empty());

        let held = must(store.list_volunteer_badges(volunteer, church));
        assert_eq!(held.len(), 1);

        // 150 earned + one 50-point bonus, no double payout on re-evaluation.
        let balance = must_some(must(store.get_balance(volunteer, church)));
        assert_eq!(balance.lifetime_points, 200);
    }

    #[test]
    fn unsatisfied_requirement_persists_partial_progress() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();
        let church = fixture_church_id();

        let badge = fixture_badge(0, BadgeRequirement::LifetimePoints { value: 500 });
        must(store.upsert_badge(&badge));

        let _ = must(store.award(&award_input(250, TransactionType::Earned)));
        let awarded = must(store.evaluate_badges(volunteer, church));
        assert!(awarded.is_empty());

        let progress = must(store.list_badge_progress(volunteer, church));
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].badge_id, badge.badge_id);
        assert_eq!(progress[0].progress, 50);

        // Crossing the threshold clears the progress row.
        let _ = must(store.award(&award_input(250, TransactionType::Earned)));
        let awarded = must(store.evaluate_badges(volunteer, church));
        assert_eq!(awarded.len(), 1);
        assert!(must(store.list_badge_progress(volunteer, church)).is_empty());
    }

    #[test]
    fn challenge_progress_completes_and_claim_guards_hold() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();

        let challenge = fixture_challenge(10);
        must(store.create_challenge(&challenge));
        let _ = must(store.join_challenge(challenge.challenge_id, volunteer));

        let early_claim = store.claim_reward(challenge.challenge_id, volunteer);
        let err = match early_claim {
            Ok(_) => panic!("claim before completion must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotCompleted(_))
        ));

        let report = must(store.record_challenge_progress(challenge.challenge_id, volunteer, 8));
        assert_eq!(report.outcome, ProgressOutcome::Advanced);
        assert_eq!(report.participant.progress_percentage, 80.0);

        let report = must(store.record_challenge_progress(challenge.challenge_id, volunteer, 4));
        assert_eq!(report.outcome, ProgressOutcome::Completed);
        assert_eq!(report.participant.status, ChallengeStatus::Completed);

        let claimed = must(store.claim_reward(challenge.challenge_id, volunteer));
        assert!(claimed.reward_claimed);

        // The 200-point reward landed exactly once.
        let balance = must_some(must(store.get_balance(volunteer, challenge.church_id)));
        assert_eq!(balance.lifetime_points, 200);

        let again = store.claim_reward(challenge.challenge_id, volunteer);
        let err = match again {
            Ok(_) => panic!("second claim must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::AlreadyClaimed(_))
        ));
    }

    #[test]
    fn claim_grants_badge_reward_when_configured() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();

        let badge = fixture_badge(0, BadgeRequirement::EventsAttended { value: 999 });
        must(store.upsert_badge(&badge));

        let mut challenge = fixture_challenge(5);
        challenge.badge_reward = Some(badge.badge_id);
        must(store.create_challenge(&challenge));

        let _ = must(store.join_challenge(challenge.challenge_id, volunteer));
        let _ = must(store.record_challenge_progress(challenge.challenge_id, volunteer, 5));
        let _ = must(store.claim_reward(challenge.challenge_id, volunteer));

        let held = must(store.list_volunteer_badges(volunteer, challenge.church_id));
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].badge_id, badge.badge_id);
    }

    #[test]
    fn sweep_completes_exact_goal_fails_shortfall_and_is_idempotent() {
        let mut store = fixture_store();
        let met = fixture_volunteer_id();
        let short = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M4"));

        let challenge = expired_challenge(10);
        must(store.create_challenge(&challenge));
        let _ = must(store.join_challenge(challenge.challenge_id, met));
        let _ = must(store.join_challenge(challenge.challenge_id, short));

        // The deadline has passed, so progress can only be seeded directly.
        let seeded = store.connection().execute(
            "UPDATE challenge_participants SET current_progress = ?3
             WHERE challenge_id = ?1 AND volunteer_id = ?2",
            params![challenge.challenge_id.to_string(), met.to_string(), 10],
        );
        assert!(seeded.is_ok());
        let seeded = store.connection().execute(
            "UPDATE challenge_participants SET current_progress = ?3
             WHERE challenge_id = ?1 AND volunteer_id = ?2",
            params![challenge.challenge_id.to_string(), short.to_string(), 9],
        );
        assert!(seeded.is_ok());

        let report = must(store.sweep_expired_challenges());
        assert_eq!(report.contract_version, "challenge_sweep.v1");
        assert_eq!(report.swept, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);

        let met_row = must_some(must(store.get_participant(challenge.challenge_id, met)));
        assert_eq!(met_row.status, ChallengeStatus::Completed);
        assert!(met_row.completed_at.is_some());

        let short_row = must_some(must(store.get_participant(challenge.challenge_id, short)));
        assert_eq!(short_row.status, ChallengeStatus::Failed);

        let second = must(store.sweep_expired_challenges());
        assert_eq!(second.swept, 0);
    }

    #[test]
    fn progress_after_deadline_is_ignored_until_sweep() {
        let mut store = fixture_store();
        let volunteer = fixture_volunteer_id();

        let challenge = expired_challenge(10);
        must(store.create_challenge(&challenge));
        let _ = must(store.join_challenge(challenge.challenge_id, volunteer));

        let report = must(store.record_challenge_progress(challenge.challenge_id, volunteer, 4));
        assert_eq!(report.outcome, ProgressOutcome::Ignored);
        assert_eq!(report.participant.current_progress, 0);
    }

    #[test]
    fn leaderboard_ranks_points_with_seniority_tie_break() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let senior = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let junior = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        let mut input = award_input(500, TransactionType::Earned);
        input.volunteer_id = senior;
        let _ = must(store.award(&input));

        let mut input = award_input(500, TransactionType::Earned);
        input.volunteer_id = junior;
        let _ = must(store.award(&input));

        // Equal totals rank by earliest aggregate creation.
        let aged = store.connection().execute(
            "UPDATE volunteer_points SET created_at = '2020-01-01T00:00:00Z'
             WHERE volunteer_id = ?1",
            params![senior.to_string()],
        );
        assert!(aged.is_ok());

        let entries = must(store.leaderboard(church, MetricType::Points, None, 10));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].volunteer_id, senior);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].previous_rank, None);
        assert_eq!(entries[1].volunteer_id, junior);
        assert_eq!(entries[1].rank, 2);
    }

    #[test]
    fn snapshot_supplies_previous_ranks_and_replaces_same_period() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let first = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let second = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        let mut input = award_input(300, TransactionType::Earned);
        input.volunteer_id = first;
        let _ = must(store.award(&input));
        let mut input = award_input(100, TransactionType::Earned);
        input.volunteer_id = second;
        let _ = must(store.award(&input));

        let report = must(store.snapshot_leaderboard(church, MetricType::Points, None, "2026-W34"));
        assert_eq!(report.contract_version, "leaderboard_snapshot.v1");
        assert_eq!(report.entries, 2);

        // Overtake, then re-rank against the stored snapshot.
        let mut input = award_input(400, TransactionType::Earned);
        input.volunteer_id = second;
        let _ = must(store.award(&input));

        let entries = must(store.leaderboard(church, MetricType::Points, None, 10));
        assert_eq!(entries[0].volunteer_id, second);
        assert_eq!(entries[0].previous_rank, Some(2));
        assert_eq!(entries[1].volunteer_id, first);
        assert_eq!(entries[1].previous_rank, Some(1));

        // Snapshotting the same period twice replaces, not duplicates.
        let again = must(store.snapshot_leaderboard(church, MetricType::Points, None, "2026-W34"));
        assert_eq!(again.entries, 2);
    }

    #[test]
    fn previous_ranks_follow_the_latest_captured_snapshot() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let first = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let second = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        let mut input = award_input(300, TransactionType::Earned);
        input.volunteer_id = first;
        let _ = must(store.award(&input));
        let mut input = award_input(100, TransactionType::Earned);
        input.volunteer_id = second;
        let _ = must(store.award(&input));

        // Unpadded keys sort backwards lexicographically ("2026-W9" >
        // "2026-W10"); capture order must win anyway.
        let report = must(store.snapshot_leaderboard(church, MetricType::Points, None, "2026-W9"));
        assert_eq!(report.entries, 2);
        let aged = store.connection().execute(
            "UPDATE leaderboard_snapshots SET captured_at = '2020-01-01T00:00:00Z'
             WHERE period_key = '2026-W9'",
            [],
        );
        assert!(aged.is_ok());

        let mut input = award_input(400, TransactionType::Earned);
        input.volunteer_id = second;
        let _ = must(store.award(&input));
        let _ = must(store.snapshot_leaderboard(church, MetricType::Points, None, "2026-W10"));

        let entries = must(store.leaderboard(church, MetricType::Points, None, 10));
        assert_eq!(entries[0].volunteer_id, second);
        assert_eq!(entries[0].previous_rank, Some(1));
        assert_eq!(entries[1].volunteer_id, first);
        assert_eq!(entries[1].previous_rank, Some(2));
    }

    #[test]
    fn transaction_listing_honors_the_limit() {
        let mut store = fixture_store();

        for points in [10, 20, 30] {
            let _ = must(store.award(&award_input(points, TransactionType::Earned)));
        }

        let limited = must(store.list_transactions(
            fixture_volunteer_id(),
            fixture_church_id(),
            Some(2),
        ));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].points, 30);
        assert_eq!(limited[1].points, 20);

        let all = must(store.list_transactions(
            fixture_volunteer_id(),
            fixture_church_id(),
            None,
        ));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn ministry_filter_scopes_the_leaderboard() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let ministry = MinistryId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M7"));
        let inside = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let outside = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        let mut input = award_input(100, TransactionType::Earned);
        input.volunteer_id = inside;
        input.ministry_id = Some(ministry);
        let _ = must(store.award(&input));

        let mut input = award_input(900, TransactionType::Earned);
        input.volunteer_id = outside;
        let _ = must(store.award(&input));

        let scoped = must(store.leaderboard(church, MetricType::Points, Some(ministry), 10));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].volunteer_id, inside);

        let church_wide = must(store.leaderboard(church, MetricType::Points, None, 10));
        assert_eq!(church_wide.len(), 2);
    }

    #[test]
    fn hours_leaderboard_sums_metadata() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let busy = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let light = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        for hours in [3.0, 2.5] {
            let mut input = award_input(10, TransactionType::Earned);
            input.volunteer_id = busy;
            input.metadata = serde_json::json!({ "hours": hours });
            let _ = must(store.award(&input));
        }
        let mut input = award_input(10, TransactionType::Earned);
        input.volunteer_id = light;
        input.metadata = serde_json::json!({ "hours": 1.0 });
        let _ = must(store.award(&input));

        let entries = must(store.leaderboard(church, MetricType::Hours, None, 10));
        assert_eq!(entries[0].volunteer_id, busy);
        assert_eq!(entries[0].metric_value, 5.5);
        assert_eq!(entries[1].volunteer_id, light);
    }

    #[test]
    fn streak_leaderboard_ranks_weekly_current_streaks() {
        let mut store = fixture_store();
        let church = fixture_church_id();
        let steady = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M5"));
        let newcomer = VolunteerId(fixture_ulid("01J0SQQP7M70P6Y3R4T8D8G8M6"));

        for volunteer in [steady, newcomer] {
            let mut input = award_input(10, TransactionType::Earned);
            input.volunteer_id = volunteer;
            let _ = must(store.award(&input));
        }

        for date in ["2026-01-05", "2026-01-12", "2026-01-19"] {
            let _ = must(store.record_activity(
                steady,
                church,
                StreakType::Weekly,
                fixture_date(date),
            ));
        }
        let _ = must(store.record_activity(
            newcomer,
            church,
            StreakType::Weekly,
            fixture_date("2026-01-19"),
        ));

        let entries = must(store.leaderboard(church, MetricType::Streak, None, 10));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].volunteer_id, steady);
        assert_eq!(entries[0].metric_value, 3.0);
    }

    proptest! {
        #[test]
        fn stored_aggregate_always_matches_replay(
            amounts in proptest::collection::vec((0_u8..5, 1_i64..400), 1..40)
        ) {
            let mut store = fixture_store();

            for (type_choice, magnitude) in amounts {
                let transaction_type = match type_choice {
                    0 => TransactionType::Earned,
                    1 => TransactionType::Spent,
                    2 => TransactionType::Bonus,
                    3 => TransactionType::Penalty,
                    _ => TransactionType::Adjustment,
                };
                let outcome = store.award(&award_input(magnitude, transaction_type));
                prop_assert!(outcome.is_ok());
            }

            let stored = store.get_balance(fixture_volunteer_id(), fixture_church_id());
            let replayed = store.replay_scope(fixture_volunteer_id(), fixture_church_id());
            let (stored, replayed) = match (stored, replayed) {
                (Ok(Some(stored)), Ok(Some(replayed))) => (stored, replayed),
                other => panic!("missing aggregate: {other:?}"),
            };

            prop_assert_eq!(stored.total_points, replayed.total_points);
            prop_assert_eq!(stored.lifetime_points, replayed.lifetime_points);
            prop_assert_eq!(stored.points_spent, replayed.points_spent);
            prop_assert_eq!(stored.level, replayed.level);
            prop_assert_eq!(
                stored.total_points,
                stored.lifetime_points - stored.points_spent
            );
            prop_assert!(stored.lifetime_points >= 0);
            prop_assert!(stored.points_spent >= 0);
        }
    }
}
