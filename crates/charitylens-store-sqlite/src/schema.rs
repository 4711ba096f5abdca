//! SQL schema for the CharityLens SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per registered entity. Replaced wholesale on every fetch/import.
CREATE TABLE IF NOT EXISTS organizations (
    organisation_number INTEGER PRIMARY KEY,
    registered_number   INTEGER NOT NULL,
    linked_number       INTEGER NOT NULL DEFAULT 0,  -- 0 = primary entity
    company_number      TEXT,
    name                TEXT NOT NULL,
    status              TEXT NOT NULL,
    date_registered     TEXT,                        -- YYYY-MM-DD
    date_removed        TEXT,
    address             TEXT,
    website             TEXT,
    email               TEXT,
    phone               TEXT,
    activities          TEXT,
    last_updated        TEXT NOT NULL,               -- RFC 3339 UTC
    UNIQUE (registered_number, linked_number)
);

CREATE TABLE IF NOT EXISTS financial_records (
    registered_number INTEGER NOT NULL,
    year_end          TEXT NOT NULL,
    total_income      REAL NOT NULL,
    total_spending    REAL NOT NULL,
    charitable_spend  REAL,
    fundraising_spend REAL,
    other_spend       REAL,
    reserves          REAL,
    assets            REAL,
    employees         INTEGER,
    trustee_count     INTEGER,
    last_updated      TEXT NOT NULL,
    PRIMARY KEY (registered_number, year_end)
);

-- Set membership only; no trustee identity or history.
CREATE TABLE IF NOT EXISTS trustees (
    registered_number INTEGER NOT NULL,
    name              TEXT NOT NULL,
    is_chair          INTEGER NOT NULL DEFAULT 0,
    last_updated      TEXT NOT NULL,
    PRIMARY KEY (registered_number, name)
);

CREATE TABLE IF NOT EXISTS filing_history (
    organisation_number INTEGER NOT NULL,
    registered_number   INTEGER NOT NULL,
    cycle_reference     TEXT NOT NULL,
    period_start        TEXT,
    period_end          TEXT,
    due_date            TEXT,
    return_received     TEXT,
    accounts_received   TEXT,
    gross_income        REAL,
    gross_expenditure   REAL,
    accounts_qualified  INTEGER,                     -- NULL = not reported
    suppressed          INTEGER NOT NULL DEFAULT 0,
    suppression_type    TEXT,
    date_of_extract     TEXT,
    PRIMARY KEY (organisation_number, cycle_reference)
);

-- Derived data; always recomputable, never hand-edited.
CREATE TABLE IF NOT EXISTS scores (
    registered_number INTEGER PRIMARY KEY,
    overall           REAL NOT NULL,
    efficiency        REAL NOT NULL,
    financial_health  REAL NOT NULL,
    transparency      REAL NOT NULL,
    governance        REAL NOT NULL,
    confidence        TEXT NOT NULL,                 -- 'high' | 'medium' | 'low'
    last_calculated   TEXT NOT NULL
);

-- Single row keyed by the sentinel id 1.
CREATE TABLE IF NOT EXISTS crawl_checkpoint (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    last_identifier INTEGER NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS organizations_registered_idx ON organizations(registered_number);
CREATE INDEX IF NOT EXISTS filing_history_registered_idx ON filing_history(registered_number);

PRAGMA user_version = 1;
";
