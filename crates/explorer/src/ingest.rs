use std::io::Read;

use ahash::AHashMap as HashMap;
use lineage_shared::columns::ColumnMap;

use crate::connection::Connection;

/// Logical lineage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    WorkspaceName,
    WorkspaceId,
    ItemName,
    ItemId,
    ItemType,
    ShortcutName,
    SourceType,
    SourceConnection,
    SourceWorkspaceName,
    SourceItemName,
    SourceItemType,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::WorkspaceName,
        Field::WorkspaceId,
        Field::ItemName,
        Field::ItemId,
        Field::ItemType,
        Field::ShortcutName,
        Field::SourceType,
        Field::SourceConnection,
        Field::SourceWorkspaceName,
        Field::SourceItemName,
        Field::SourceItemType,
    ];

    /// Every row must carry these; anything else is optional.
    pub const MANDATORY: [Field; 3] = [Field::WorkspaceName, Field::ItemName, Field::ItemType];

    #[must_use]
    pub fn header<'a>(&self, columns: &'a ColumnMap) -> &'a str {
        match self {
            Field::WorkspaceName => &columns.workspace_name,
            Field::WorkspaceId => &columns.workspace_id,
            Field::ItemName => &columns.item_name,
            Field::ItemId => &columns.item_id,
            Field::ItemType => &columns.item_type,
            Field::ShortcutName => &columns.shortcut_name,
            Field::SourceType => &columns.source_type,
            Field::SourceConnection => &columns.source_connection,
            Field::SourceWorkspaceName => &columns.source_workspace_name,
            Field::SourceItemName => &columns.source_item_name,
            Field::SourceItemType => &columns.source_item_type,
        }
    }
}

/// One lineage record. Only cells carrying a value are stored.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 1-based data row number in the source file.
    pub line: usize,
    cells: HashMap<Field, String>,
    connection: Option<Connection>,
}

impl RawRow {
    #[must_use]
    pub fn new(line: usize) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.set(field, value);
        self
    }

    /// Stores a cell, dropping null-like values. The connection cell is decoded here.
    pub fn set(&mut self, field: Field, value: &str) {
        let Some(value) = normalize_cell(value) else {
            return;
        };
        if field == Field::SourceConnection {
            self.connection = Connection::decode(value);
        }
        self.cells.insert(field, value.to_string());
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.cells.get(&field).map(String::as_str)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, field: Field, placeholder: &'a str) -> &'a str {
        self.get(field).unwrap_or(placeholder)
    }

    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn missing_mandatory(&self) -> Vec<Field> {
        Field::MANDATORY
            .into_iter()
            .filter(|f| self.get(*f).is_none())
            .collect()
    }
}

/// Trims a cell and maps the null spellings of dataframe exports to `None`.
#[must_use]
pub fn normalize_cell(raw: &str) -> Option<&str> {
    let v = raw.trim();
    if v.is_empty() || v == "<NA>" || v == "NaT" {
        return None;
    }
    if ["nan", "none", "null"]
        .iter()
        .any(|null| v.eq_ignore_ascii_case(null))
    {
        return None;
    }
    Some(v)
}

#[derive(Debug, Default)]
pub struct RowSet {
    pub rows: Vec<RawRow>,
    /// Records the CSV reader could not decode.
    pub undecodable: usize,
}

/// Reads a lineage CSV. Headers are matched after trimming; unknown columns are
/// ignored and absent ones simply never produce a value.
pub fn read_rows<R: Read>(reader: R, columns: &ColumnMap) -> Result<RowSet, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let positions: Vec<(Field, usize)> = Field::ALL
        .into_iter()
        .filter_map(|field| {
            let name = field.header(columns);
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == name)
                .map(|idx| (field, idx))
        })
        .collect();

    let mut set = RowSet::default();
    for (i, record) in rdr.records().enumerate() {
        let line = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(target = "ingest", line, error = %e, "undecodable csv record");
                set.undecodable += 1;
                continue;
            }
        };

        let mut row = RawRow::new(line);
        for (field, idx) in &positions {
            if let Some(cell) = record.get(*idx) {
                row.set(*field, cell);
            }
        }
        set.rows.push(row);
    }

    Ok(set)
}
