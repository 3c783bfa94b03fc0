pub mod mysql;

#[must_use]
pub fn adapter_name() -> &'static str {
    "dbe-adapters"
}
