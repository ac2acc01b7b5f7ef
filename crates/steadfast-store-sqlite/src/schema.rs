//! SQL schema for the Steadfast SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings (microsecond precision,
/// `Z` suffix), so lexical comparison in SQL matches chronological order.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schedules (
    schedule_id          TEXT PRIMARY KEY,
    owner_id             TEXT NOT NULL,
    recurrence           TEXT NOT NULL,     -- 'daily' | 'weekly' | 'custom'
    custom_interval_days INTEGER,           -- set iff recurrence = 'custom'
    time_of_day          TEXT NOT NULL,     -- 'HH:MM', local to timezone
    timezone             TEXT NOT NULL,     -- IANA identifier
    questions            TEXT NOT NULL,     -- JSON array of 1..5 strings
    next_scheduled_at    TEXT NOT NULL,
    last_sent_at         TEXT,
    consecutive_misses   INTEGER NOT NULL DEFAULT 0,
    escalation_raised    INTEGER NOT NULL DEFAULT 0,
    is_active            INTEGER NOT NULL DEFAULT 1,
    created_at           TEXT NOT NULL,
    CHECK ((recurrence = 'custom') = (custom_interval_days IS NOT NULL)),
    CHECK (custom_interval_days IS NULL OR custom_interval_days BETWEEN 1 AND 365),
    CHECK (consecutive_misses >= 0)
);

-- One instance per firing. The UNIQUE constraint is what makes the due-scan
-- idempotent under overlapping ticks. No foreign key: schedules may be purged
-- by retention jobs while their history remains.
CREATE TABLE IF NOT EXISTS check_in_instances (
    instance_id   TEXT PRIMARY KEY,
    schedule_id   TEXT NOT NULL,
    due_at        TEXT NOT NULL,
    sent_at       TEXT,
    responded_at  TEXT,
    questions     TEXT NOT NULL,            -- JSON snapshot
    responses     TEXT NOT NULL DEFAULT '{}',
    status        TEXT NOT NULL,            -- 'pending' | 'sent' | 'completed' | 'missed'
    dispatch_claimed_until TEXT,            -- lease held by the pass sending it
    UNIQUE (schedule_id, due_at)
);

CREATE TABLE IF NOT EXISTS sobriety_dates (
    sobriety_date_id TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    substance_type   TEXT NOT NULL,
    start_date       TEXT NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL
);

-- Relapses are append-only; only sponsor_notified is ever updated.
CREATE TABLE IF NOT EXISTS relapses (
    relapse_id       TEXT PRIMARY KEY,
    sobriety_date_id TEXT NOT NULL REFERENCES sobriety_dates(sobriety_date_id),
    relapse_date     TEXT NOT NULL,
    note             TEXT,
    trigger_context  TEXT,
    sponsor_notified INTEGER NOT NULL DEFAULT 0,
    recorded_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sponsorships (
    sponsorship_id TEXT PRIMARY KEY,
    sponsor_id     TEXT NOT NULL,
    sponsee_id     TEXT NOT NULL,
    is_active      INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    CHECK (sponsor_id != sponsee_id)
);

CREATE INDEX IF NOT EXISTS schedules_due_idx      ON schedules(is_active, next_scheduled_at);
CREATE INDEX IF NOT EXISTS schedules_owner_idx    ON schedules(owner_id);
CREATE INDEX IF NOT EXISTS instances_status_idx   ON check_in_instances(status, sent_at);
CREATE INDEX IF NOT EXISTS relapses_sobriety_idx  ON relapses(sobriety_date_id, relapse_date);
CREATE UNIQUE INDEX IF NOT EXISTS sobriety_active_idx
    ON sobriety_dates(user_id, substance_type) WHERE is_active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS sponsorships_active_idx
    ON sponsorships(sponsee_id) WHERE is_active = 1;

PRAGMA user_version = 1;
";
