//! Durable key-value storage glue shared by the outbox, seen cache, and
//! device identity: three sled trees living inside one `sled::Db`.

use uuid::Uuid;

use crate::error::EngineResult;

const DEVICE_ID_KEY: &str = "device_id";

/// Returns this node's persistent device id, generating one with
/// `Uuid::new_v4()` on first run and caching it under
/// `device_settings/device_id` thereafter.
pub fn device_id(db: &sled::Db) -> EngineResult<String> {
    let tree = db.open_tree("device_settings")?;
    if let Some(existing) = tree.get(DEVICE_ID_KEY)? {
        return Ok(String::from_utf8_lossy(&existing).to_string());
    }
    let id = Uuid::new_v4().to_string();
    tree.insert(DEVICE_ID_KEY, id.as_bytes())?;
    Ok(id)
}
