//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only entry log (key: entry_id)
//! - `holds` - Escrow holds (key: hold_id)
//! - `indices` - Secondary indices for per-user lookups

use crate::{
    error::{Error, Result},
    types::{EscrowHold, LedgerEntry, UserId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_HOLDS: &str = "holds";
const CF_INDICES: &str = "indices";

/// Index tags (first byte of composite index keys)
const IDX_USER_ENTRY: u8 = b'e';
const IDX_USER_HOLD: u8 = b'h';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy entry log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_HOLDS, Self::cf_options_holds()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened ledger RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_holds() -> Options {
        let mut opts = Options::default();
        // Holds are frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Entry operations

    /// Append a group of entries atomically
    ///
    /// A deposit or release always appends its debit and credit legs in the
    /// same batch, so conservation holds after every committed write.
    pub fn append_entries(&self, entries: &[LedgerEntry]) -> Result<()> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        for entry in entries {
            let value = bincode::serialize(entry)?;
            batch.put_cf(cf_entries, entry.entry_id.as_bytes(), &value);

            let idx = Self::index_key_user(IDX_USER_ENTRY, &entry.user_id, entry.entry_id);
            batch.put_cf(cf_indices, &idx, &[]);
        }

        self.db.write(batch)?;

        for entry in entries {
            tracing::debug!(
                entry_id = %entry.entry_id,
                user_id = %entry.user_id,
                delta = %entry.delta,
                "Entry appended"
            );
        }

        Ok(())
    }

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        let entry: LedgerEntry = bincode::deserialize(&value)?;
        Ok(entry)
    }

    /// Get all entries for a user (via index), oldest first
    pub fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_prefix_user(IDX_USER_ENTRY, user_id);
        let iter = self.db.prefix_iterator_cf(cf_indices, &prefix);

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let entry_id = Self::uuid_suffix(&key)?;
            entries.push(self.get_entry(entry_id)?);
        }

        // UUIDv7 entry ids sort by creation time
        entries.sort_by_key(|e| e.entry_id);
        Ok(entries)
    }

    /// Iterate every entry in the log
    pub fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    // Hold operations

    /// Put a new hold with its user index
    pub fn put_hold(&self, hold: &EscrowHold) -> Result<()> {
        let cf_holds = self.cf_handle(CF_HOLDS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_holds, hold.hold_id.as_bytes(), &bincode::serialize(hold)?);

        let idx = Self::index_key_user(IDX_USER_HOLD, &hold.user_id, hold.hold_id);
        batch.put_cf(cf_indices, &idx, &[]);

        self.db.write(batch)?;
        Ok(())
    }

    /// Get hold by ID
    pub fn get_hold(&self, hold_id: Uuid) -> Result<EscrowHold> {
        let cf = self.cf_handle(CF_HOLDS)?;

        let value = self
            .db
            .get_cf(cf, hold_id.as_bytes())?
            .ok_or_else(|| Error::HoldNotFound(hold_id.to_string()))?;

        let hold: EscrowHold = bincode::deserialize(&value)?;
        Ok(hold)
    }

    /// Get all holds for a user (via index)
    pub fn holds_for_user(&self, user_id: &UserId) -> Result<Vec<EscrowHold>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_prefix_user(IDX_USER_HOLD, user_id);
        let iter = self.db.prefix_iterator_cf(cf_indices, &prefix);

        let mut holds = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let hold_id = Self::uuid_suffix(&key)?;
            holds.push(self.get_hold(hold_id)?);
        }

        Ok(holds)
    }

    /// Update a settled hold and append its release entries atomically
    ///
    /// Passing an empty entry slice records a refund (funds were never
    /// debited, so no entries are needed).
    pub fn settle_hold(&self, hold: &EscrowHold, entries: &[LedgerEntry]) -> Result<()> {
        let cf_holds = self.cf_handle(CF_HOLDS)?;
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_holds, hold.hold_id.as_bytes(), &bincode::serialize(hold)?);

        for entry in entries {
            batch.put_cf(cf_entries, entry.entry_id.as_bytes(), &bincode::serialize(entry)?);

            let idx = Self::index_key_user(IDX_USER_ENTRY, &entry.user_id, entry.entry_id);
            batch.put_cf(cf_indices, &idx, &[]);
        }

        self.db.write(batch)?;

        tracing::debug!(
            hold_id = %hold.hold_id,
            status = ?hold.status,
            entry_count = entries.len(),
            "Hold settled"
        );

        Ok(())
    }

    // Index key helpers

    fn index_prefix_user(tag: u8, user_id: &UserId) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(user_id.as_str().as_bytes());
        key.push(b'|');
        key
    }

    fn index_key_user(tag: u8, user_id: &UserId, id: Uuid) -> Vec<u8> {
        let mut key = Self::index_prefix_user(tag, user_id);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn uuid_suffix(key: &[u8]) -> Result<Uuid> {
        if key.len() < 16 {
            return Err(Error::Storage("Index key too short".to_string()));
        }
        let bytes: [u8; 16] = key[key.len() - 16..]
            .try_into()
            .map_err(|_| Error::Storage("Malformed index key".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Ledger RocksDB closed gracefully");
        Ok(())
    }
}
