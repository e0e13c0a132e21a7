//! The `shardddl/optimism/...` key namespace, per the design's persistence-shape section.

pub const NAMESPACE: &str = "shardddl/optimism";

pub fn info_key(task: &str, source: &str, up_schema: &str, up_table: &str) -> String {
    format!("{NAMESPACE}/info/{task}/{source}/{up_schema}/{up_table}")
}

pub fn operation_key(task: &str, source: &str, up_schema: &str, up_table: &str) -> String {
    format!("{NAMESPACE}/operation/{task}/{source}/{up_schema}/{up_table}")
}

pub fn init_schema_key(task: &str, down_schema: &str, down_table: &str) -> String {
    format!("{NAMESPACE}/init-schema/{task}/{down_schema}/{down_table}")
}

pub fn column_key(task: &str, down_schema: &str, down_table: &str, column: &str) -> String {
    format!("{NAMESPACE}/column/{task}/{down_schema}/{down_table}/{column}")
}

pub fn task_prefix(task: &str) -> String {
    format!("{NAMESPACE}/info/{task}/")
}

pub fn operation_task_prefix(task: &str) -> String {
    format!("{NAMESPACE}/operation/{task}/")
}

pub fn init_schema_task_prefix(task: &str) -> String {
    format!("{NAMESPACE}/init-schema/{task}/")
}

/// Every tracked-column record for one lock, for the rebuild scan that restores
/// `Lock::columns` without replaying every drop that produced them.
pub fn column_lock_prefix(task: &str, down_schema: &str, down_table: &str) -> String {
    format!("{NAMESPACE}/column/{task}/{down_schema}/{down_table}/")
}
