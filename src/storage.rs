// =============================================================================
// SATKAS - Storage Engine (Sled Database)
// =============================================================================

use sled::{Db, Tree};
use std::path::Path;

use crate::atomic_swaps::swap::SwapRecord;
use crate::crypto::KeyBlob;

pub const DEFAULT_DB_PATH: &str = "satkas_data";

const ADDRESS_COUNTER: &str = "address_counter";
const IS_ENCRYPTED: &str = "is_encrypted";

/// Motor de almacenamiento persistente
pub struct Storage {
    db: Db,

    swaps: Tree,  // payment_hash hex -> SwapRecord
    wallet: Tree, // counters and flags
    keys: Tree,   // key name -> KeyBlob
}

impl Storage {
    /// Abre o crea la base de datos en `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        Self::from_db(db)
    }

    /// Base de datos en memoria, se borra al cerrarse
    pub fn open_temporary() -> Result<Self, String> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| format!("Failed to open temporary database: {}", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, String> {
        let swaps = db.open_tree("swaps").map_err(|e| format!("Failed to open swaps tree: {}", e))?;
        let wallet = db.open_tree("wallet").map_err(|e| format!("Failed to open wallet tree: {}", e))?;
        let keys = db.open_tree("keys").map_err(|e| format!("Failed to open keys tree: {}", e))?;

        Ok(Storage { db, swaps, wallet, keys })
    }

    /// Flushes everything and releases the database
    pub fn close(self) -> Result<(), String> {
        self.flush()
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| format!("Flush error: {}", e))?;
        Ok(())
    }

    // =========================================================================
    // Swaps
    // =========================================================================

    pub fn put_swap(&self, record: &SwapRecord) -> Result<(), String> {
        let data = bincode::serialize(record).map_err(|e| format!("Serialize swap error: {}", e))?;
        self.swaps
            .insert(record.payment_hash.as_bytes(), data)
            .map_err(|e| format!("Insert swap error: {}", e))?;
        Ok(())
    }

    pub fn get_swap(&self, payment_hash: &str) -> Result<Option<SwapRecord>, String> {
        let Some(data) = self
            .swaps
            .get(payment_hash.as_bytes())
            .map_err(|e| format!("Read swap error: {}", e))?
        else {
            return Ok(None);
        };
        bincode::deserialize(&data)
            .map(Some)
            .map_err(|e| format!("Corrupt swap record {}: {}", payment_hash, e))
    }

    pub fn has_swap(&self, payment_hash: &str) -> bool {
        self.swaps.contains_key(payment_hash.as_bytes()).unwrap_or(false)
    }

    /// All records, oldest first; unreadable entries are skipped
    pub fn list_swaps(&self) -> Vec<SwapRecord> {
        let mut records: Vec<SwapRecord> = self
            .swaps
            .iter()
            .filter_map(|item| {
                let (_, value) = item.ok()?;
                bincode::deserialize(&value).ok()
            })
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn delete_swap(&self, payment_hash: &str) -> Result<(), String> {
        self.swaps
            .remove(payment_hash.as_bytes())
            .map_err(|e| format!("Delete swap error: {}", e))?;
        Ok(())
    }

    // =========================================================================
    // Wallet
    // =========================================================================

    pub fn address_counter(&self) -> u32 {
        self.wallet
            .get(ADDRESS_COUNTER)
            .ok()
            .flatten()
            .and_then(|v| v[..].try_into().ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0)
    }

    /// Reserves the next key index
    pub fn next_address_index(&self) -> Result<u32, String> {
        let updated = self
            .wallet
            .update_and_fetch(ADDRESS_COUNTER, |old| {
                let current = old
                    .and_then(|v| v.try_into().ok())
                    .map(u32::from_be_bytes)
                    .unwrap_or(0);
                Some(current.saturating_add(1).to_be_bytes().to_vec())
            })
            .map_err(|e| format!("Update address_counter error: {}", e))?;

        let next = updated
            .and_then(|v| v[..].try_into().ok())
            .map(u32::from_be_bytes)
            .ok_or_else(|| "address_counter missing after update".to_string())?;
        Ok(next - 1)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.wallet.get(IS_ENCRYPTED), Ok(Some(v)) if &v[..] == [1u8])
    }

    pub fn set_encrypted(&self, encrypted: bool) -> Result<(), String> {
        self.wallet
            .insert(IS_ENCRYPTED, vec![encrypted as u8])
            .map_err(|e| format!("Set is_encrypted error: {}", e))?;
        Ok(())
    }

    // =========================================================================
    // Keys
    // =========================================================================

    pub fn put_key(&self, name: &str, blob: &KeyBlob) -> Result<(), String> {
        let data = bincode::serialize(blob).map_err(|e| format!("Serialize key error: {}", e))?;
        self.keys
            .insert(name.as_bytes(), data)
            .map_err(|e| format!("Insert key error: {}", e))?;
        Ok(())
    }

    pub fn get_key(&self, name: &str) -> Result<Option<KeyBlob>, String> {
        match self.keys.get(name.as_bytes()).map_err(|e| format!("Read key error: {}", e))? {
            Some(data) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| format!("Corrupt key {}: {}", name, e)),
            None => Ok(None),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_swaps::swap::{SwapStatus, SwapType};

    fn record(hash: u8) -> SwapRecord {
        SwapRecord::new(
            SwapType::KasToSat,
            "lnbc1",
            &[hash; 32],
            "kaspa:a",
            "kaspa:b",
            &[0x63],
            "kaspa:c",
            10,
            20,
        )
    }

    #[test]
    fn test_swap_roundtrip_and_update() {
        let storage = Storage::open_temporary().unwrap();
        let mut rec = record(1);
        storage.put_swap(&rec).unwrap();
        assert!(storage.has_swap(&rec.payment_hash));

        rec.set_status(SwapStatus::Refunded).unwrap();
        rec.spend_tx_id = Some("ff".repeat(32));
        storage.put_swap(&rec).unwrap();

        let loaded = storage.get_swap(&rec.payment_hash).unwrap().unwrap();
        assert_eq!(loaded.status, SwapStatus::Refunded);
        assert_eq!(loaded, rec);
        assert_eq!(storage.list_swaps().len(), 1);

        storage.delete_swap(&rec.payment_hash).unwrap();
        assert!(storage.get_swap(&rec.payment_hash).unwrap().is_none());
    }

    #[test]
    fn test_list_swaps() {
        let storage = Storage::open_temporary().unwrap();
        storage.put_swap(&record(1)).unwrap();
        storage.put_swap(&record(2)).unwrap();
        storage.put_swap(&record(1)).unwrap();
        assert_eq!(storage.list_swaps().len(), 2);
    }

    #[test]
    fn test_address_counter() {
        let storage = Storage::open_temporary().unwrap();
        assert_eq!(storage.address_counter(), 0);
        assert_eq!(storage.next_address_index().unwrap(), 0);
        assert_eq!(storage.next_address_index().unwrap(), 1);
        assert_eq!(storage.address_counter(), 2);
    }

    #[test]
    fn test_encrypted_flag() {
        let storage = Storage::open_temporary().unwrap();
        assert!(!storage.is_encrypted());
        storage.set_encrypted(true).unwrap();
        assert!(storage.is_encrypted());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = std::env::temp_dir().join(format!("satkas-test-{}", rand::random::<u64>()));
        {
            let storage = Storage::open(&dir).unwrap();
            storage.put_swap(&record(7)).unwrap();
            storage.next_address_index().unwrap();
            storage.close().unwrap();
        }
        let storage = Storage::open(&dir).unwrap();
        assert!(storage.has_swap(&hex::encode([7u8; 32])));
        assert_eq!(storage.address_counter(), 1);
        storage.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
