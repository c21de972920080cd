//! Decoding of the `Source Connection` cell.
//!
//! Exports write this column either as a plain connection string (URI, ODBC
//! key/value list, file path) or as a stringified mapping, frequently in
//! Python literal syntax (`{'type': 'Sql', 'server': 'db1'}`). The cell is
//! decoded exactly once, at ingestion, into [`Connection`]; display labels are
//! derived from the decoded value and never from the raw text of a mapping.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

const FALLBACK_LABEL: &str = "External source";

/// Keys naming where the data lives, in order of preference.
const LOCATION_KEYS: &[&str] = &[
    "server",
    "host",
    "hostname",
    "location",
    "url",
    "endpoint",
    "connectionString",
    "path",
    "bucket",
    "account",
];

/// Keys narrowing a location down to a database or container.
const SCOPE_KEYS: &[&str] = &["database", "subpath", "container", "schema"];

const NAME_KEYS: &[&str] = &["displayName", "name", "itemName"];

lazy_static! {
    static ref MAPPING_KEY_RE: Regex =
        Regex::new(r#"['"][A-Za-z_][\w.\-]*['"]\s*:"#).expect("mapping key regex should compile");
    static ref SALVAGE_PAIR_RE: Regex =
        Regex::new(r#"['"]([A-Za-z_][\w.\-]*)['"]\s*:\s*(?:'([^']*)'|"([^"]*)")"#)
            .expect("mapping pair regex should compile");
}

#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    /// A mapping that was serialized into the cell.
    Structured(Map<String, Value>),
    /// A plain connection string, trimmed.
    Opaque(String),
}

impl Connection {
    /// Returns `None` for a blank cell.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if !looks_like_mapping(trimmed) {
            return Some(Self::Opaque(trimmed.to_string()));
        }

        if let Some(map) = parse_mapping(trimmed) {
            return Some(Self::Structured(map));
        }

        let salvaged = salvage_pairs(trimmed);
        if salvaged.is_empty() {
            tracing::debug!(target = "ingest", "unparseable connection mapping kept opaque");
            return Some(Self::Opaque(trimmed.to_string()));
        }
        Some(Self::Structured(salvaged))
    }

    /// The `type` entry of a structured connection.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Structured(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("type"))
                .and_then(|(_, v)| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            Self::Opaque(_) => None,
        }
    }

    #[must_use]
    pub fn display_label(&self) -> String {
        let label = match self {
            Self::Structured(map) => structured_label(map, self.kind()),
            Self::Opaque(raw) => render_opaque(raw),
        };

        if label.is_empty() || looks_like_mapping(&label) {
            return FALLBACK_LABEL.to_string();
        }
        label
    }

    #[must_use]
    pub fn to_metadata(&self) -> Value {
        match self {
            Self::Structured(map) => Value::Object(map.clone()),
            Self::Opaque(raw) => Value::String(raw.clone()),
        }
    }
}

#[must_use]
pub fn looks_like_mapping(s: &str) -> bool {
    s.starts_with('{') || MAPPING_KEY_RE.is_match(s)
}

fn parse_mapping(s: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(s) {
        return Some(map);
    }
    match serde_json::from_str::<Value>(&python_literal_to_json(s)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Rewrites Python literal syntax into JSON: single-quoted strings become
/// double-quoted and `True`/`False`/`None` become `true`/`false`/`null`.
fn python_literal_to_json(src: &str) -> String {
    let mut out = String::with_capacity(src.len() + 8);
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(next) => {
                                out.push('\\');
                                out.push(next);
                            }
                            None => out.push_str("\\\\"),
                        },
                        c if c == quote => break,
                        '"' => out.push_str("\\\""),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        word.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            c => out.push(c),
        }
    }

    out
}

fn salvage_pairs(s: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for caps in SALVAGE_PAIR_RE.captures_iter(s) {
        let key = caps[1].to_string();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        map.entry(key).or_insert_with(|| Value::String(value.to_string()));
    }
    map
}

/// Depth-first lookup of a non-empty string field, matching keys case-insensitively.
fn find_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    for (k, v) in map {
        if k.eq_ignore_ascii_case(key) {
            if let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                return Some(s);
            }
        }
    }
    map.values()
        .filter_map(Value::as_object)
        .find_map(|nested| find_str(nested, key))
}

fn find_any<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| find_str(map, k))
}

fn structured_label(map: &Map<String, Value>, kind: Option<&str>) -> String {
    let scope = find_any(map, SCOPE_KEYS).map(first_segment);

    if let Some(location) = find_any(map, LOCATION_KEYS) {
        let base = render_opaque(location);
        return match scope {
            Some(scope) if !scope.is_empty() && !base.contains('/') => format!("{base}/{scope}"),
            _ => base,
        };
    }

    if let Some(scope) = scope.filter(|s| !s.is_empty()) {
        return scope.to_string();
    }
    if let Some(name) = find_any(map, NAME_KEYS) {
        return name.to_string();
    }
    match kind {
        Some(kind) => format!("{kind} source"),
        None => FALLBACK_LABEL.to_string(),
    }
}

fn first_segment(s: &str) -> &str {
    s.trim_matches('/').split('/').next().unwrap_or_default()
}

/// Reduces a connection string to `host/database` where it can be recognised.
#[must_use]
pub fn render_opaque(raw: &str) -> String {
    let s = raw.trim();
    let s = match s.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &s[5..],
        _ => s,
    };

    if s.contains("://") {
        if let Some(label) = render_uri(s) {
            return label;
        }
    }
    if s.contains('=') {
        if let Some(label) = render_key_values(s) {
            return label;
        }
    }
    s.to_string()
}

fn render_uri(s: &str) -> Option<String> {
    let (base, props) = match s.split_once(';') {
        Some((base, props)) => (base, Some(props)),
        None => (s, None),
    };
    let url = Url::parse(base).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?.to_string();

    let database = props
        .and_then(|p| lookup_kv(p, &["databaseName", "database", "initial catalog"]))
        .map(str::to_string)
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.find(|seg| !seg.is_empty()).map(str::to_string))
        });

    Some(match database {
        Some(db) => format!("{host}/{db}"),
        None => host,
    })
}

fn render_key_values(s: &str) -> Option<String> {
    let server = lookup_kv(
        s,
        &["server", "data source", "host", "address", "addr", "endpoint"],
    )
    .map(|v| {
        let v = v.strip_prefix("tcp:").unwrap_or(v);
        v.split(',').next().unwrap_or(v).trim()
    });
    let database = lookup_kv(s, &["database", "initial catalog", "dbq"]);

    match (server, database) {
        (Some(server), Some(db)) => Some(format!("{server}/{db}")),
        (Some(server), None) => Some(server.to_string()),
        (None, Some(db)) => Some(db.to_string()),
        (None, None) => None,
    }
}

fn lookup_kv<'a>(s: &'a str, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        s.split(';').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let v = v.trim();
            (k.trim().eq_ignore_ascii_case(key) && !v.is_empty()).then_some(v)
        })
    })
}
