//! # Persisted Key Layout
//!
//! Every value shared between instances lives under one of these plain string
//! keys. Values are JSON; TTLs are set by the writer.

pub const INSTANCE_PREFIX: &str = "instance:";
pub const LOCK_PREFIX: &str = "lock:";
pub const MESSAGE_LOCK_PREFIX: &str = "msg_lock:";
pub const TASK_STATUS_PREFIX: &str = "task_status:";
pub const SETTING_PREFIX: &str = "setting:";
pub const API_KEY_PREFIX: &str = "api_key:";
pub const TOKEN_TO_USER_PREFIX: &str = "token_to_user:";

/// Lock scope used by `acquire_lock` / `release_lock`
pub const GENERIC_LOCK_SCOPE: &str = "generic";
/// Lock scope used for task-processing dedup
pub const TASK_LOCK_SCOPE: &str = "task";

pub fn instance_key(instance_id: &str) -> String {
    format!("{INSTANCE_PREFIX}{instance_id}")
}

pub fn lock_key(scope: &str, id: &str) -> String {
    format!("{LOCK_PREFIX}{scope}:{id}")
}

pub fn message_lock_key(message_id: &str) -> String {
    format!("{MESSAGE_LOCK_PREFIX}{message_id}")
}

pub fn task_status_key(task_id: &str) -> String {
    format!("{TASK_STATUS_PREFIX}{task_id}")
}

pub fn setting_key(name: &str) -> String {
    format!("{SETTING_PREFIX}{name}")
}

pub fn api_key_key(user_id: &str) -> String {
    format!("{API_KEY_PREFIX}{user_id}")
}

pub fn token_to_user_key(token: &str) -> String {
    format!("{TOKEN_TO_USER_PREFIX}{token}")
}
