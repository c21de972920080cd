use serde::{Deserialize, Serialize};

/// CSV header names for each logical lineage field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub workspace_name: String,
    pub workspace_id: String,
    pub item_name: String,
    pub item_id: String,
    pub item_type: String,
    pub shortcut_name: String,
    pub source_type: String,
    pub source_connection: String,
    pub source_workspace_name: String,
    pub source_item_name: String,
    pub source_item_type: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            workspace_name: "Workspace Name".into(),
            workspace_id: "Workspace ID".into(),
            item_name: "Item Name".into(),
            item_id: "Item ID".into(),
            item_type: "Item Type".into(),
            shortcut_name: "Shortcut Name".into(),
            source_type: "Source Type".into(),
            source_connection: "Source Connection".into(),
            source_workspace_name: "Source Workspace Name".into(),
            source_item_name: "Source Item Name".into(),
            source_item_type: "Source Item Type".into(),
        }
    }
}

/// Values substituted for optional columns that are absent or blank.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Placeholders {
    pub shortcut_name: String,
    pub source_type: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            shortcut_name: "N/A".into(),
            source_type: "Unknown".into(),
        }
    }
}
