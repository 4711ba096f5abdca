//! [`SqliteStore`], the SQLite implementation of [`CharityStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use charitylens_core::{
  finance::{FilingHistoryRecord, FinancialRecord},
  organization::{Organization, REMOVED_STATUSES, Trustee},
  score::Score,
  store::{BatchOutcome, CharityStore, FetchedCharity, OrganizationImport},
};

use crate::{
  Result,
  encode::{
    FILING_COLUMNS, FINANCIAL_COLUMNS, ORGANIZATION_COLUMNS, RawFiling, RawFinancial,
    RawOrganization, RawScore, RawTrustee, encode_date, encode_dt, encode_opt_date,
  },
  schema::SCHEMA,
};

// ─── Statements ──────────────────────────────────────────────────────────────

// `OR REPLACE` also clears a row that collides on (registered_number,
// linked_number) under a different organisation number.
const UPSERT_ORGANIZATION: &str = "INSERT OR REPLACE INTO organizations (
     organisation_number, registered_number, linked_number, company_number,
     name, status, date_registered, date_removed, address, website, email,
     phone, activities, last_updated
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

const UPSERT_FINANCIAL: &str = "INSERT OR REPLACE INTO financial_records (
     registered_number, year_end, total_income, total_spending,
     charitable_spend, fundraising_spend, other_spend, reserves, assets,
     employees, trustee_count, last_updated
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPSERT_TRUSTEE: &str = "INSERT OR REPLACE INTO trustees (
     registered_number, name, is_chair, last_updated
   ) VALUES (?1, ?2, ?3, ?4)";

const UPSERT_FILING: &str = "INSERT OR REPLACE INTO filing_history (
     organisation_number, registered_number, cycle_reference, period_start,
     period_end, due_date, return_received, accounts_received, gross_income,
     gross_expenditure, accounts_qualified, suppressed, suppression_type,
     date_of_extract
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

fn removed_list() -> String {
  REMOVED_STATUSES
    .iter()
    .map(|s| format!("'{s}'"))
    .collect::<Vec<_>>()
    .join(", ")
}

fn write_organization(
  stmt: &mut rusqlite::CachedStatement<'_>,
  org: &Organization,
) -> rusqlite::Result<usize> {
  stmt.execute(rusqlite::params![
    org.organisation_number,
    org.registered_number,
    org.linked_number,
    org.company_number,
    org.name,
    org.status,
    encode_opt_date(org.date_registered),
    encode_opt_date(org.date_removed),
    org.address,
    org.website,
    org.email,
    org.phone,
    org.activities,
    encode_dt(org.last_updated),
  ])
}

fn write_financial(
  stmt: &mut rusqlite::CachedStatement<'_>,
  fin: &FinancialRecord,
) -> rusqlite::Result<usize> {
  stmt.execute(rusqlite::params![
    fin.registered_number,
    encode_date(fin.year_end),
    fin.total_income,
    fin.total_spending,
    fin.charitable_spend,
    fin.fundraising_spend,
    fin.other_spend,
    fin.reserves,
    fin.assets,
    fin.employees,
    fin.trustee_count,
    encode_dt(fin.last_updated),
  ])
}

/// Run one item's writes under a savepoint. On failure the item's partial
/// writes are undone and the enclosing transaction carries on.
fn within_savepoint<T>(
  tx: &rusqlite::Transaction<'_>,
  write: impl FnOnce() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
  tx.execute_batch("SAVEPOINT batch_item")?;
  match write() {
    Ok(value) => {
      tx.execute_batch("RELEASE batch_item")?;
      Ok(value)
    }
    Err(e) => {
      tx.execute_batch("ROLLBACK TO batch_item; RELEASE batch_item")?;
      Err(e)
    }
  }
}

fn write_trustee(
  stmt: &mut rusqlite::CachedStatement<'_>,
  trustee: &Trustee,
) -> rusqlite::Result<usize> {
  stmt.execute(rusqlite::params![
    trustee.registered_number,
    trustee.name,
    trustee.is_chair,
    encode_dt(trustee.last_updated),
  ])
}

fn write_filing(
  stmt: &mut rusqlite::CachedStatement<'_>,
  filing: &FilingHistoryRecord,
) -> rusqlite::Result<usize> {
  stmt.execute(rusqlite::params![
    filing.organisation_number,
    filing.registered_number,
    filing.cycle_reference,
    encode_opt_date(filing.period_start),
    encode_opt_date(filing.period_end),
    encode_opt_date(filing.due_date),
    encode_opt_date(filing.return_received),
    encode_opt_date(filing.accounts_received),
    filing.gross_income,
    filing.gross_expenditure,
    filing.accounts_qualified,
    filing.suppressed,
    filing.suppression_type,
    encode_opt_date(filing.date_of_extract),
  ])
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Per-table row counts, reported at the end of an import or crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
  pub organizations: u64,
  pub financials:    u64,
  pub trustees:      u64,
  pub filings:       u64,
  pub scores:        u64,
}

/// A CharityLens store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn row_counts(&self) -> Result<RowCounts> {
    let counts = self
      .conn
      .call(|conn| {
        let count = |table: &str| -> rusqlite::Result<u64> {
          conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        };
        Ok(RowCounts {
          organizations: count("organizations")?,
          financials:    count("financial_records")?,
          trustees:      count("trustees")?,
          filings:       count("filing_history")?,
          scores:        count("scores")?,
        })
      })
      .await?;
    Ok(counts)
  }

  /// Run `write` once per item inside one transaction, recording per-row
  /// failures instead of aborting.
  async fn write_batch<T, F>(
    &self,
    sql: &'static str,
    batch: Vec<T>,
    describe: fn(&T) -> String,
    write: F,
  ) -> Result<BatchOutcome>
  where
    T: Send + 'static,
    F: Fn(&mut rusqlite::CachedStatement<'_>, &T) -> rusqlite::Result<usize>
      + Send
      + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        {
          let mut stmt = tx.prepare_cached(sql)?;
          for item in &batch {
            match write(&mut stmt, item) {
              Ok(_) => outcome.written += 1,
              Err(e) => outcome.record_failure(format!("{}: {e}", describe(item))),
            }
          }
        }
        tx.commit()?;
        Ok(outcome)
      })
      .await?;
    Ok(outcome)
  }
}

// ─── CharityStore impl ───────────────────────────────────────────────────────

impl CharityStore for SqliteStore {
  type Error = crate::Error;

  // ── Organizations ─────────────────────────────────────────────────────────

  async fn organization_exists(&self, registered_number: i64) -> Result<bool> {
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM organizations WHERE registered_number = ?1 LIMIT 1",
              rusqlite::params![registered_number],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn get_organization(
    &self,
    registered_number: i64,
    include_removed: bool,
  ) -> Result<Option<Organization>> {
    let mut sql = format!(
      "SELECT {ORGANIZATION_COLUMNS} FROM organizations
       WHERE registered_number = ?1 AND linked_number = 0"
    );
    if !include_removed {
      sql.push_str(&format!(" AND status NOT IN ({})", removed_list()));
    }

    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![registered_number], RawOrganization::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawOrganization::into_organization).transpose()
  }

  async fn unscored_organizations(&self) -> Result<Vec<i64>> {
    let sql = format!(
      "SELECT o.registered_number FROM organizations o
       LEFT JOIN scores s ON s.registered_number = o.registered_number
       WHERE o.linked_number = 0
         AND o.status NOT IN ({})
         AND s.registered_number IS NULL
       ORDER BY o.registered_number",
      removed_list()
    );

    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
      })
      .await?;
    Ok(ids)
  }

  // ── Ingest writes ─────────────────────────────────────────────────────────

  async fn save_fetched(&self, fetched: FetchedCharity) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          write_organization(&mut tx.prepare_cached(UPSERT_ORGANIZATION)?, &fetched.organization)?;
          if let Some(fin) = &fetched.financial {
            write_financial(&mut tx.prepare_cached(UPSERT_FINANCIAL)?, fin)?;
          }
          let mut stmt = tx.prepare_cached(UPSERT_TRUSTEE)?;
          for trustee in &fetched.trustees {
            write_trustee(&mut stmt, trustee)?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn upsert_organizations(&self, batch: Vec<OrganizationImport>) -> Result<BatchOutcome> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        {
          let mut org_stmt = tx.prepare_cached(UPSERT_ORGANIZATION)?;
          let mut fin_stmt = tx.prepare_cached(UPSERT_FINANCIAL)?;
          for item in &batch {
            let number = item.organization.registered_number;
            let mut part = "organization";
            let written = within_savepoint(&tx, || {
              write_organization(&mut org_stmt, &item.organization)?;
              if let Some(fin) = &item.financial {
                part = "financial record";
                write_financial(&mut fin_stmt, fin)?;
              }
              Ok(())
            });
            match written {
              Ok(()) => outcome.written += 1,
              Err(e) => outcome.record_failure(format!("{part} {number}: {e}")),
            }
          }
        }
        tx.commit()?;
        Ok(outcome)
      })
      .await?;
    Ok(outcome)
  }

  async fn upsert_trustees(&self, batch: Vec<Trustee>) -> Result<BatchOutcome> {
    self
      .write_batch(
        UPSERT_TRUSTEE,
        batch,
        |t| format!("trustee {} of {}", t.name, t.registered_number),
        write_trustee,
      )
      .await
  }

  async fn upsert_financials(&self, batch: Vec<FinancialRecord>) -> Result<BatchOutcome> {
    self
      .write_batch(
        UPSERT_FINANCIAL,
        batch,
        |f| format!("financial record {} ({})", f.registered_number, f.year_end),
        write_financial,
      )
      .await
  }

  async fn upsert_filing_history(
    &self,
    batch: Vec<FilingHistoryRecord>,
  ) -> Result<BatchOutcome> {
    self
      .write_batch(
        UPSERT_FILING,
        batch,
        |f| format!("filing {} cycle {}", f.registered_number, f.cycle_reference),
        write_filing,
      )
      .await
  }

  // ── Reads for scoring ─────────────────────────────────────────────────────

  async fn latest_financial(&self, registered_number: i64) -> Result<Option<FinancialRecord>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {FINANCIAL_COLUMNS} FROM financial_records
                 WHERE registered_number = ?1
                 ORDER BY year_end DESC LIMIT 1"
              ),
              rusqlite::params![registered_number],
              RawFinancial::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawFinancial::into_financial).transpose()
  }

  async fn list_trustees(&self, registered_number: i64) -> Result<Vec<Trustee>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT registered_number, name, is_chair, last_updated FROM trustees
           WHERE registered_number = ?1 ORDER BY name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![registered_number], |r| {
            Ok(RawTrustee {
              registered_number: r.get(0)?,
              name:              r.get(1)?,
              is_chair:          r.get(2)?,
              last_updated:      r.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTrustee::into_trustee).collect()
  }

  async fn trustee_count(&self, registered_number: i64) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM trustees WHERE registered_number = ?1",
          rusqlite::params![registered_number],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(count).unwrap_or_default())
  }

  async fn filing_history(&self, registered_number: i64) -> Result<Vec<FilingHistoryRecord>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {FILING_COLUMNS} FROM filing_history
           WHERE registered_number = ?1
           ORDER BY COALESCE(period_end, due_date) DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![registered_number], RawFiling::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFiling::into_filing).collect()
  }

  // ── Scores ────────────────────────────────────────────────────────────────

  async fn save_score(&self, score: Score) -> Result<()> {
    let confidence = score.confidence.as_str();
    let calculated = encode_dt(score.last_calculated);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO scores (
             registered_number, overall, efficiency, financial_health,
             transparency, governance, confidence, last_calculated
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            score.registered_number,
            score.overall,
            score.efficiency,
            score.financial_health,
            score.transparency,
            score.governance,
            confidence,
            calculated,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_score(&self, registered_number: i64) -> Result<Option<Score>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT registered_number, overall, efficiency, financial_health,
                      transparency, governance, confidence, last_calculated
               FROM scores WHERE registered_number = ?1",
              rusqlite::params![registered_number],
              |r| {
                Ok(RawScore {
                  registered_number: r.get(0)?,
                  overall:           r.get(1)?,
                  efficiency:        r.get(2)?,
                  financial_health:  r.get(3)?,
                  transparency:      r.get(4)?,
                  governance:        r.get(5)?,
                  confidence:        r.get(6)?,
                  last_calculated:   r.get(7)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawScore::into_score).transpose()
  }

  // ── Crawl checkpoint ──────────────────────────────────────────────────────

  async fn load_checkpoint(&self) -> Result<Option<i64>> {
    let last = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT last_identifier FROM crawl_checkpoint WHERE id = 1",
              [],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(last)
  }

  async fn save_checkpoint(&self, identifier: i64) -> Result<()> {
    let at = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO crawl_checkpoint (id, last_identifier, updated_at)
           VALUES (1, ?1, ?2)
           ON CONFLICT(id) DO UPDATE SET
             last_identifier = excluded.last_identifier,
             updated_at      = excluded.updated_at",
          rusqlite::params![identifier, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
