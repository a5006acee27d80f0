// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Backing-store adapter: a thin layer over a single-file SQLite database
//! executing the parameterized statements the block manager needs, plus
//! BEGIN/COMMIT/ROLLBACK with hook callbacks.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::layout::BlockRef;
use crate::metadata::{Metadata, EXPECTED_TABLE_COUNT};

/// Owns the SQLite connection and exposes the block store's schema.
pub struct Backend {
    conn: Connection,
}

impl Backend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// `true` if the expected tables are already present (an existing file).
    pub fn schema_present(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "select count(*) from sqlite_master where type = 'table'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64 >= EXPECTED_TABLE_COUNT)
    }

    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "create table STATIC (data BLOB);
             create table OBJECT (id INTEGER primary key, gc BOOLEAN, data BLOB, ref BLOB);
             create table SCAN (id INTEGER);",
        )?;
        Ok(())
    }

    pub fn read_metadata(&self) -> Result<Metadata> {
        let data: Vec<u8> = self
            .conn
            .query_row("select data from STATIC", [], |row| row.get(0))?;
        Metadata::from_bytes(&data)
    }

    pub fn insert_metadata(&self, metadata: Metadata) -> Result<()> {
        self.conn
            .execute("insert into STATIC values (?1)", params![metadata.to_bytes().to_vec()])?;
        Ok(())
    }

    pub fn write_metadata(&self, metadata: Metadata) -> Result<()> {
        self.conn
            .execute("update STATIC set data = ?1", params![metadata.to_bytes().to_vec()])?;
        Ok(())
    }

    /// Inserts one empty `OBJECT` row with the given color and returns its id.
    pub fn insert_object(&self, gc_mark: bool) -> Result<u64> {
        let id: i64 = self.conn.query_row(
            "insert into OBJECT (gc) values (?1) returning id",
            params![gc_mark],
            |row| row.get(0),
        )?;
        Ok(id as u64)
    }

    /// Reads a block's payload and ref list. Returns `Ok(None)` for a row
    /// allocated by the batch allocator but never written (a NULL `data`
    /// column).
    pub fn read_object(&self, id: u64) -> Result<Option<(Vec<u8>, Vec<BlockRef>)>> {
        let row: Option<(Option<Vec<u8>>, Option<Vec<u8>>)> = self
            .conn
            .query_row(
                "select data, ref from OBJECT where id = ?1",
                params![id as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Err(Error::MissingBlock(id)),
            Some((None, _)) => Ok(None),
            Some((Some(data), refs)) => {
                let refs = crate::layout::decode_refs(&refs.unwrap_or_default())?;
                Ok(Some((data, refs)))
            }
        }
    }

    /// Plain write-through, used outside the Scanning phase.
    pub fn update_object(&self, id: u64, data: &[u8], refs: &[BlockRef]) -> Result<()> {
        let n = self.conn.execute(
            "update OBJECT set data = ?1, ref = ?2 where id = ?3",
            params![data, crate::layout::encode_refs(refs), id as i64],
        )?;
        if n == 0 {
            return Err(Error::MissingBlock(id));
        }
        Ok(())
    }

    /// Write-through with write barrier observation: returns the color the
    /// block carried *before* this write.
    pub fn update_object_returning_prior_gc(
        &self,
        id: u64,
        data: &[u8],
        refs: &[BlockRef],
    ) -> Result<bool> {
        let prior: i64 = self
            .conn
            .query_row(
                "update OBJECT set data = ?1, ref = ?2 where id = ?3 returning gc",
                params![data, crate::layout::encode_refs(refs), id as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(Error::MissingBlock(id))?;
        Ok(prior != 0)
    }

    pub fn scan_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("select count(*) from SCAN", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn scan_insert(&self, id: u64) -> Result<()> {
        self.conn
            .execute("insert into SCAN values (?1)", params![id as i64])?;
        Ok(())
    }

    /// Recolors up to `limit` of the newest SCAN rows from `old_gc` to
    /// `new_gc`, returning the `ref` lists of the rows actually recolored
    /// (rows already `new_gc` are silently skipped) and deletes the
    /// processed SCAN rows.
    pub fn scan_recolor_batch(
        &self,
        new_gc: bool,
        old_gc: bool,
        limit: u64,
    ) -> Result<Vec<Vec<BlockRef>>> {
        let mut stmt = self.conn.prepare(
            "update OBJECT set gc = ?1 \
             where id in (select id from SCAN order by rowid desc limit ?2) and gc = ?3 \
             returning ref",
        )?;
        let rows = stmt
            .query_map(params![new_gc, limit as i64, old_gc], |row| {
                let bytes: Vec<u8> = row.get(0)?;
                Ok(bytes)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.conn.execute(
            "delete from SCAN where rowid in (select rowid from SCAN order by rowid desc limit ?1)",
            params![limit as i64],
        )?;
        rows.into_iter()
            .map(|bytes| crate::layout::decode_refs(&bytes))
            .collect()
    }

    pub fn object_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("select count(*) from OBJECT", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn max_object_id(&self) -> Result<u64> {
        let n: Option<i64> = self
            .conn
            .query_row("select max(id) from OBJECT", [], |row| row.get(0))?;
        Ok(n.unwrap_or(0) as u64)
    }

    /// Advances the sweep cursor past every id in `[begin, begin + limit)`:
    /// one past the highest existing id in the window, or straight to the
    /// window edge if the window holds no rows (so sparse id ranges don't
    /// stall sweep).
    pub fn next_sweep_boundary(&self, begin: u64, limit: u64) -> Result<u64> {
        let end = begin.saturating_add(limit);
        let n: Option<i64> = self.conn.query_row(
            "select max(id) from OBJECT where id >= ?1 and id < ?2",
            params![begin as i64, end as i64],
            |row| row.get(0),
        )?;
        Ok(n.map(|v| v as u64 + 1).unwrap_or(end))
    }

    pub fn delete_dead_range(&self, begin: u64, end: u64, dead_gc: bool) -> Result<u64> {
        let n = self.conn.execute(
            "delete from OBJECT where id in (select id from OBJECT where id >= ?1 and id < ?2 and gc = ?3)",
            params![begin as i64, end as i64, dead_gc],
        )?;
        Ok(n as u64)
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
