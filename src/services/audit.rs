use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::audit_log;

/// Best-effort append log of settlement-relevant events.
///
/// Writes are dispatched on a detached task after the authoritative state
/// transition commits; failures are logged locally and never propagated to
/// the operation being audited.
#[derive(Clone)]
pub struct AuditService {
    db: Arc<DbPool>,
}

impl AuditService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        actor: &str,
        action: &str,
        object_type: &str,
        object_id: impl ToString,
        metadata: Option<serde_json::Value>,
    ) {
        let db = self.db.clone();
        let entry = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            actor: Set(actor.to_string()),
            action: Set(action.to_string()),
            object_type: Set(object_type.to_string()),
            object_id: Set(object_id.to_string()),
            metadata: Set(metadata),
            created_at: Set(Utc::now()),
        };
        let action = action.to_string();

        tokio::spawn(async move {
            match entry.insert(&*db).await {
                Ok(saved) => debug!(entry_id = %saved.id, action = %action, "Audit entry recorded"),
                Err(e) => warn!(error = %e, action = %action, "Failed to write audit entry"),
            }
        });
    }
}
