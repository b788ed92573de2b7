//! Internal entity store.
//!
//! [`EntityStore`] is the narrow interface the pipelines write through;
//! [`Database`] implements it on the `entities` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::queries::parse_datetime;
use crate::db::{Database, EntityRow};
use crate::entities::InternalEntity;
use crate::errors::DatabaseError;
use crate::models::SyncType;

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same content hash; nothing was written.
    Unchanged,
}

/// An entity as persisted, with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub entity: InternalEntity,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Stored `updated_at` text, used to mark exactly this version synced.
    pub version: String,
}

/// Persistence used by the import and export pipelines.
pub trait EntityStore: Send + Sync {
    /// Insert or update by natural key. `from_sheet` marks the write as
    /// coming from the spreadsheet, so it is not picked up for export.
    fn upsert(&self, entity: &InternalEntity, from_sheet: bool)
        -> Result<UpsertOutcome, DatabaseError>;

    /// Entities changed by the application after `since`.
    fn find_changed_since(
        &self,
        sync_type: SyncType,
        since: Option<&DateTime<Utc>>,
    ) -> Result<Vec<StoredEntity>, DatabaseError>;

    fn get(&self, sync_type: SyncType, natural_key: &str)
        -> Result<Option<StoredEntity>, DatabaseError>;

    /// Record that `stored` has been pushed to the sheet.
    fn mark_synced(&self, stored: &StoredEntity) -> Result<(), DatabaseError>;

    fn count(&self, sync_type: SyncType) -> Result<i64, DatabaseError>;
}

/// SHA-256 of the canonical JSON payload, hex encoded.
pub fn content_hash(payload: &serde_json::Value) -> Result<String, DatabaseError> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl TryFrom<EntityRow> for StoredEntity {
    type Error = DatabaseError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let sync_type: SyncType = row.entity_type.parse().map_err(|_| DatabaseError::Corrupt {
            column: "entity_type".into(),
            detail: format!("unexpected value '{}'", row.entity_type),
        })?;
        let payload: serde_json::Value = serde_json::from_str(&row.payload)?;
        Ok(Self {
            entity: InternalEntity::from_payload(sync_type, payload)?,
            content_hash: row.content_hash,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
            last_synced_at: row.last_synced_at.as_deref().map(parse_datetime),
            version: row.updated_at,
        })
    }
}

impl EntityStore for Database {
    fn upsert(
        &self,
        entity: &InternalEntity,
        from_sheet: bool,
    ) -> Result<UpsertOutcome, DatabaseError> {
        let payload = entity.to_payload()?;
        let hash = content_hash(&payload)?;
        self.upsert_entity(
            entity.sync_type(),
            entity.natural_key(),
            &serde_json::to_string(&payload)?,
            &hash,
            from_sheet,
        )
    }

    fn find_changed_since(
        &self,
        sync_type: SyncType,
        since: Option<&DateTime<Utc>>,
    ) -> Result<Vec<StoredEntity>, DatabaseError> {
        self.list_entities_changed_since(sync_type, since)?
            .into_iter()
            .map(StoredEntity::try_from)
            .collect()
    }

    fn get(
        &self,
        sync_type: SyncType,
        natural_key: &str,
    ) -> Result<Option<StoredEntity>, DatabaseError> {
        self.get_entity(sync_type, natural_key)?
            .map(StoredEntity::try_from)
            .transpose()
    }

    fn mark_synced(&self, stored: &StoredEntity) -> Result<(), DatabaseError> {
        self.mark_entity_synced(
            stored.entity.sync_type(),
            stored.entity.natural_key(),
            &stored.version,
        )?;
        Ok(())
    }

    fn count(&self, sync_type: SyncType) -> Result<i64, DatabaseError> {
        self.count_entities(sync_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Attendee, AttendeeRole};

    fn attendee(name: &str) -> InternalEntity {
        InternalEntity::Attendee(Attendee {
            email: "ana@nps.edu".into(),
            full_name: name.into(),
            organization: None,
            role: AttendeeRole::Student,
            title: None,
            checked_in: false,
        })
    }

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(&attendee("Ana").to_payload().unwrap()).unwrap();
        let b = content_hash(&attendee("Ana").to_payload().unwrap()).unwrap();
        let c = content_hash(&attendee("Ana R.").to_payload().unwrap()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup_db();
        assert_eq!(db.upsert(&attendee("Ana"), true).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(db.upsert(&attendee("Ana"), true).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(db.upsert(&attendee("Ana Ruiz"), true).unwrap(), UpsertOutcome::Updated);

        let stored = EntityStore::get(&db, SyncType::Attendees, "ana@nps.edu")
            .unwrap()
            .unwrap();
        assert_eq!(stored.entity, attendee("Ana Ruiz"));
        assert_eq!(stored.last_synced_at, Some(stored.updated_at));
        assert_eq!(db.count(SyncType::Attendees).unwrap(), 1);
    }

    #[test]
    fn test_local_edit_is_exported_once() {
        let db = setup_db();
        db.upsert(&attendee("Ana"), true).unwrap();
        assert!(db.find_changed_since(SyncType::Attendees, None).unwrap().is_empty());

        db.upsert(&attendee("Dr. Ana Ruiz"), false).unwrap();
        let changed = db.find_changed_since(SyncType::Attendees, None).unwrap();
        assert_eq!(changed.len(), 1);

        db.mark_synced(&changed[0]).unwrap();
        assert!(db.find_changed_since(SyncType::Attendees, None).unwrap().is_empty());
    }
}
