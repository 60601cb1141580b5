use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

/// Best-effort activity trail. A failed insert is logged and swallowed;
/// bookings never fail because the trail is down.
pub struct ActivityLogService {
    supabase: Arc<SupabaseClient>,
}

impl ActivityLogService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn record(
        &self,
        user_id: Uuid,
        action: &str,
        description: String,
        metadata: Value,
        auth_token: &str,
    ) {
        let body = json!({
            "user_id": user_id,
            "action": action,
            "description": description,
            "status": "success",
            "metadata": metadata,
        });

        if let Err(e) = self
            .supabase
            .execute(
                Method::POST,
                "/rest/v1/user_activity_log",
                Some(auth_token),
                Some(body),
            )
            .await
        {
            warn!("Failed to record activity '{}': {}", action, e);
        }
    }
}
