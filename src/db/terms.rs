use super::Db;
use crate::store::{
    CandidateTerm, LanguagePair, StoreError, StoredTerm, TermKey, TermStore, VerificationStatus,
    VerifiedSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

const TERM_COLUMNS: &str = "id, source, target, source_lang, target_lang, domain, confidence_score, verification_status, origin_batch_id, created_at, updated_at";

fn term_from_row(row: &Row<'_>) -> rusqlite::Result<StoredTerm> {
    Ok(StoredTerm {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        source_lang: row.get(3)?,
        target_lang: row.get(4)?,
        domain: row.get(5)?,
        confidence_score: row.get(6)?,
        verification_status: row.get(7)?,
        origin_batch_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// `?3, ?4, ...` placeholders for the domain filter after the two language params.
fn domain_placeholders(count: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + 3))
        .collect::<Vec<_>>()
        .join(", ")
}

fn pair_params(pair: &LanguagePair, domains: &[&str]) -> Vec<String> {
    let mut values = vec![pair.source_lang.clone(), pair.target_lang.clone()];
    values.extend(domains.iter().map(|d| d.to_string()));
    values
}

impl TermStore for Db {
    fn find_term(&self, key: &TermKey) -> Result<Option<StoredTerm>, StoreError> {
        let conn = self.conn()?;
        let term = conn
            .query_row(
                &format!(
                    "SELECT {TERM_COLUMNS} FROM terms WHERE source = ?1 AND source_lang = ?2 AND target_lang = ?3"
                ),
                params![key.source, key.source_lang, key.target_lang],
                term_from_row,
            )
            .optional()?;
        Ok(term)
    }

    fn insert_term(&self, candidate: &CandidateTerm) -> Result<i64, StoreError> {
        let c = candidate.clone().normalized();
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO terms (source, target, source_lang, target_lang, domain, confidence_score,
                               verification_status, origin_batch_id, context, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
            params![
                c.source,
                c.target,
                c.source_lang,
                c.target_lang,
                c.domain,
                c.confidence_score,
                VerificationStatus::Unverified,
                c.origin_batch_id,
                c.context,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn verified_summary(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<VerifiedSummary, StoreError> {
        if domains.is_empty() {
            return Ok(VerifiedSummary::default());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COUNT(*), MAX(updated_at) FROM terms
             WHERE source_lang = ?1 AND target_lang = ?2 AND verification_status = 'verified'
               AND domain IN ({})",
            domain_placeholders(domains.len())
        );
        let (count, max_updated_at): (usize, Option<DateTime<Utc>>) = conn.query_row(
            &sql,
            params_from_iter(pair_params(pair, domains)),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(VerifiedSummary {
            count,
            max_updated_at,
        })
    }

    fn verified_terms(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<Vec<StoredTerm>, StoreError> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TERM_COLUMNS} FROM terms
             WHERE source_lang = ?1 AND target_lang = ?2 AND verification_status = 'verified'
               AND domain IN ({})
             ORDER BY source",
            domain_placeholders(domains.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(pair_params(pair, domains)), term_from_row)?;

        let mut terms = Vec::new();
        for row in rows {
            terms.push(row?);
        }
        Ok(terms)
    }

    fn set_verification(
        &self,
        key: &TermKey,
        status: VerificationStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE terms SET verification_status = ?1, updated_at = ?2
             WHERE source = ?3 AND source_lang = ?4 AND target_lang = ?5",
            params![status, Utc::now(), key.source, key.source_lang, key.target_lang],
        )?;
        Ok(rows > 0)
    }
}

impl Db {
    /// Terms of a language pair, optionally filtered by verification status.
    pub fn list_terms(
        &self,
        pair: &LanguagePair,
        status: Option<VerificationStatus>,
    ) -> Result<Vec<StoredTerm>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TERM_COLUMNS} FROM terms
             WHERE source_lang = ?1 AND target_lang = ?2
               AND (?3 IS NULL OR verification_status = ?3)
             ORDER BY source"
        ))?;
        let rows = stmt.query_map(
            params![pair.source_lang, pair.target_lang, status],
            term_from_row,
        )?;

        let mut terms = Vec::new();
        for row in rows {
            terms.push(row?);
        }
        Ok(terms)
    }

    /// Delete a term. Returns `false` if it did not exist.
    pub fn delete_term(&self, key: &TermKey) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM terms WHERE source = ?1 AND source_lang = ?2 AND target_lang = ?3",
            params![key.source, key.source_lang, key.target_lang],
        )?;
        Ok(rows > 0)
    }
}
