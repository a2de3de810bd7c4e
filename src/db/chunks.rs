use super::Db;
use crate::chunker::Chunk;
use crate::store::{ChunkRecord, ChunkRepository, ChunkUpdate, StoreError};
use rusqlite::{Row, params};
use std::collections::BTreeSet;

const CHUNK_COLUMNS: &str = "job_id, chunk_index, content, char_count, token_estimate, page_range, start_page, end_page, status, terms_extracted, processing_ms, error";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(ChunkRecord, String)> {
    let page_range: String = row.get(5)?;
    let record = ChunkRecord {
        job_id: row.get(0)?,
        chunk: Chunk {
            index: row.get::<_, i64>(1)? as usize,
            text: row.get(2)?,
            char_count: row.get::<_, i64>(3)? as usize,
            token_estimate: row.get::<_, i64>(4)? as usize,
            page_range: BTreeSet::new(),
            start_page: row.get(6)?,
            end_page: row.get(7)?,
            status: row.get(8)?,
        },
        terms_extracted: row.get::<_, i64>(9)? as usize,
        processing_ms: row.get::<_, i64>(10)? as u64,
        error: row.get(11)?,
    };
    Ok((record, page_range))
}

impl Db {
    fn query_records(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE job_id = ?1 ORDER BY chunk_index"
        ))?;
        let rows = stmt.query_map(params![job_id], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, page_range) = row?;
            record.chunk.page_range = serde_json::from_str(&page_range).map_err(|e| {
                StoreError::Corrupt(format!(
                    "page_range of chunk {job_id}/{}: {e}",
                    record.chunk.index
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl ChunkRepository for Db {
    fn save_chunks(&self, job_id: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Re-chunking a job replaces its previous records
        tx.execute("DELETE FROM chunks WHERE job_id = ?1", params![job_id])?;

        for chunk in chunks {
            let page_range = serde_json::to_string(&chunk.page_range)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            tx.execute(
                r#"
                INSERT INTO chunks (job_id, chunk_index, content, char_count, token_estimate,
                                    page_range, start_page, end_page, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    job_id,
                    chunk.index as i64,
                    chunk.text,
                    chunk.char_count as i64,
                    chunk.token_estimate as i64,
                    page_range,
                    chunk.start_page,
                    chunk.end_page,
                    chunk.status,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let records = self.query_records(job_id)?;
        if records.is_empty() {
            return Err(StoreError::NotFound(format!("chunks for job {job_id}")));
        }
        Ok(records.into_iter().map(|r| r.chunk).collect())
    }

    fn update_chunk(
        &self,
        job_id: &str,
        chunk_index: usize,
        update: &ChunkUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE chunks SET status = ?1, terms_extracted = ?2, processing_ms = ?3, error = ?4
             WHERE job_id = ?5 AND chunk_index = ?6",
            params![
                update.status,
                update.terms_extracted as i64,
                update.processing_ms as i64,
                update.error,
                job_id,
                chunk_index as i64,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("chunk {job_id}/{chunk_index}")));
        }
        Ok(())
    }

    fn chunk_records(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        self.query_records(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkStatus, Page, chunk_pages};

    #[test]
    fn test_chunks_crud() {
        let db = Db::open_in_memory().unwrap();
        let pages = vec![
            Page::new(1, "First page text."),
            Page::new(2, "Second page text."),
            Page::new(3, "Third page text."),
        ];
        let chunks = chunk_pages(&pages, 9, true).unwrap();
        assert_eq!(chunks.len(), 2);

        // 1. Save and load
        db.save_chunks("job-1", &chunks).unwrap();
        let loaded = db.load_chunks("job-1").unwrap();
        assert_eq!(loaded, chunks);

        // 2. Status transitions
        db.update_chunk("job-1", 0, &ChunkUpdate::processing()).unwrap();
        db.update_chunk("job-1", 0, &ChunkUpdate::completed(4, 120))
            .unwrap();
        db.update_chunk("job-1", 1, &ChunkUpdate::failed("timeout".to_string(), 30))
            .unwrap();

        let records = db.chunk_records("job-1").unwrap();
        assert_eq!(records[0].chunk.status, ChunkStatus::Completed);
        assert_eq!(records[0].terms_extracted, 4);
        assert_eq!(records[0].processing_ms, 120);
        assert_eq!(records[1].chunk.status, ChunkStatus::Failed);
        assert_eq!(records[1].error.as_deref(), Some("timeout"));

        // 3. Unknown chunk / job
        assert!(matches!(
            db.update_chunk("job-1", 5, &ChunkUpdate::processing()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(db.load_chunks("job-2"), Err(StoreError::NotFound(_))));

        // 4. Re-saving replaces the records
        db.save_chunks("job-1", &chunks[..1]).unwrap();
        assert_eq!(db.load_chunks("job-1").unwrap().len(), 1);
    }
}
