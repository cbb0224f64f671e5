/// A stored key/value pair, as it sits in SQLite.
pub struct ItemRow {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}
