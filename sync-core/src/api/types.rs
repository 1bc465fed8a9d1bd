use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Closed set of artifact tags carried in the `type` field.
///
/// `Other` keeps the raw tag of anything the engine does not synchronize
/// (dependency listings in particular may contain such entries).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    Folder,
    Report,
    Universe,
    Connection,
    Dimension,
    Measure,
    Other(String),
}

impl ArtifactKind {
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactKind::Folder => "Folder",
            ArtifactKind::Report => "Report",
            ArtifactKind::Universe => "Universe",
            ArtifactKind::Connection => "Connection",
            ArtifactKind::Dimension => "Dimension",
            ArtifactKind::Measure => "Measure",
            ArtifactKind::Other(raw) => raw,
        }
    }

    pub fn is_untagged(&self) -> bool {
        matches!(self, ArtifactKind::Other(raw) if raw.is_empty())
    }

    /// Parses a tag case-insensitively. `webi` documents are reports.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "folder" => ArtifactKind::Folder,
            "report" | "webi" => ArtifactKind::Report,
            "universe" => ArtifactKind::Universe,
            "connection" => ArtifactKind::Connection,
            "dimension" => ArtifactKind::Dimension,
            "measure" => ArtifactKind::Measure,
            _ => ArtifactKind::Other(tag.to_string()),
        }
    }
}

/// An empty tag: the payload did not say what it is.
impl Default for ArtifactKind {
    fn default() -> Self {
        ArtifactKind::Other(String::new())
    }
}

impl From<String> for ArtifactKind {
    fn from(raw: String) -> Self {
        ArtifactKind::parse(&raw)
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for ArtifactKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ArtifactKind::parse(s))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every synchronizable object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "ArtifactKind::is_untagged")]
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ArtifactRef>,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Folder, id, name)
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_child(mut self, child: ArtifactRef) -> Self {
        self.children.push(child);
        self
    }

    /// Tags this entry and its children as `kind` where no tag was sent.
    pub fn or_kind(mut self, kind: ArtifactKind) -> Self {
        if self.kind.is_untagged() {
            self.kind = kind.clone();
        }
        self.children = self
            .children
            .into_iter()
            .map(|child| child.or_kind(kind.clone()))
            .collect();
        self
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// True when the object was modified strictly after `after`; objects
    /// without a timestamp always pass.
    pub fn modified_after(&self, after: Option<DateTime<Utc>>) -> bool {
        match (after, self.modified) {
            (Some(after), Some(modified)) => modified > after,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "camelCase")]
pub struct Connection {
    #[serde(flatten)]
    pub base: ArtifactRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_mode: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Connection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ArtifactRef::new(ArtifactKind::Connection, id, name),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniverseObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "camelCase")]
pub struct Universe {
    #[serde(flatten)]
    pub base: ArtifactRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<UniverseObject>,
}

impl Universe {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ArtifactRef::new(ArtifactKind::Universe, id, name),
            ..Default::default()
        }
    }

    pub fn on_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "camelCase")]
pub struct Report {
    #[serde(flatten)]
    pub base: ArtifactRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Report {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ArtifactRef::new(ArtifactKind::Report, id, name),
            ..Default::default()
        }
    }

    pub fn on_universe(mut self, universe_id: impl Into<String>) -> Self {
        self.universe_id = Some(universe_id.into());
        self
    }
}

// The records above derive with `remote = "Self"` so these impls can wrap
// the generated ones and fill in the kind of an untagged payload.
macro_rules! tagged_record {
    ($record:ident, $kind:expr) => {
        impl Serialize for $record {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                $record::serialize(self, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $record {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let mut record = $record::deserialize(deserializer)?;
                if record.base.kind.is_untagged() {
                    record.base.kind = $kind;
                }
                Ok(record)
            }
        }
    };
}

tagged_record!(Connection, ArtifactKind::Connection);
tagged_record!(Universe, ArtifactKind::Universe);
tagged_record!(Report, ArtifactKind::Report);

/// An artifact of any synchronizable type, selected by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Folder(ArtifactRef),
    Report(Report),
    Universe(Universe),
    Connection(Connection),
}

impl Artifact {
    pub fn base(&self) -> &ArtifactRef {
        match self {
            Artifact::Folder(base) => base,
            Artifact::Report(report) => &report.base,
            Artifact::Universe(universe) => &universe.base,
            Artifact::Connection(connection) => &connection.base,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Folder(_) => ArtifactKind::Folder,
            Artifact::Report(_) => ArtifactKind::Report,
            Artifact::Universe(_) => ArtifactKind::Universe,
            Artifact::Connection(_) => ArtifactKind::Connection,
        }
    }

    /// Decodes a JSON entry into the variant named by its `type` field.
    /// An entry without a tag is a folder. Returns `Ok(None)` for tags that
    /// are not synchronizable on their own.
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Option<Self>> {
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(ArtifactKind::parse)
            .unwrap_or(ArtifactKind::Folder);

        let artifact = match tag {
            ArtifactKind::Folder => Artifact::Folder(serde_json::from_value(value)?),
            ArtifactKind::Report => Artifact::Report(serde_json::from_value(value)?),
            ArtifactKind::Universe => Artifact::Universe(serde_json::from_value(value)?),
            ArtifactKind::Connection => Artifact::Connection(serde_json::from_value(value)?),
            _ => return Ok(None),
        };
        Ok(Some(artifact))
    }
}

/// Free-form filter options forwarded to list/search calls.
pub type ListOptions = BTreeMap<String, String>;

/// List response envelope used by the infostore endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entries<T> {
    #[serde(default = "Vec::new")]
    pub entries: Vec<T>,
}

/// Query parameters for list requests
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(flatten)]
    pub options: ListOptions,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: Option<&str>) -> Self {
        self.path = path.filter(|p| !p.trim().is_empty()).map(str::to_string);
        self
    }

    pub fn folder_id(mut self, folder_id: Option<&str>) -> Self {
        self.folder_id = folder_id.filter(|f| !f.trim().is_empty()).map(str::to_string);
        self
    }

    pub fn modified_after(mut self, after: Option<DateTime<Utc>>) -> Self {
        self.modified_after = after.map(|t| t.to_rfc3339());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn types(mut self, types: Option<&[ArtifactKind]>) -> Self {
        self.types = types.filter(|t| !t.is_empty()).map(|t| {
            t.iter()
                .map(|k| k.as_str().to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(",")
        });
        self
    }

    pub fn cluster_id(mut self, cluster_id: Option<&str>) -> Self {
        self.cluster_id = cluster_id.map(str::to_string);
        self
    }

    pub fn options(mut self, options: &ListOptions) -> Self {
        self.options = options.clone();
        self
    }

    pub fn to_query(&self) -> String {
        serde_urlencoded::to_string(self).unwrap_or_default()
    }
}

/// Logon request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogonRequest {
    pub user_name: String,
    pub password: String,
    pub auth: String,
}

/// Logon response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogonResponse {
    #[serde(default)]
    pub logon_token: String,
}

/// Error body returned by the REST layer
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!(ArtifactKind::parse("universe"), ArtifactKind::Universe);
        assert_eq!(ArtifactKind::parse("CONNECTION"), ArtifactKind::Connection);
        assert_eq!(ArtifactKind::parse("Webi"), ArtifactKind::Report);
        assert_eq!(
            ArtifactKind::parse("Publication"),
            ArtifactKind::Other("Publication".to_string())
        );
    }

    #[test]
    fn test_report_round_trips_camel_case_fields() {
        let value = json!({
            "id": "r1",
            "cuid": "AbC",
            "name": "Sales",
            "type": "Report",
            "parentId": "f1",
            "universeId": "u1",
            "size": 42
        });
        let report: Report = serde_json::from_value(value).unwrap();
        assert_eq!(report.base.id, "r1");
        assert_eq!(report.base.kind, ArtifactKind::Report);
        assert_eq!(report.base.parent_id.as_deref(), Some("f1"));
        assert_eq!(report.universe_id.as_deref(), Some("u1"));
        assert_eq!(report.size, Some(42));

        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back["universeId"], "u1");
        assert_eq!(back["type"], "Report");
    }

    #[test]
    fn test_untagged_records_take_their_own_kind() {
        let report: Report = serde_json::from_value(json!({"id": "r1", "name": "Sales"})).unwrap();
        assert_eq!(report.base.kind, ArtifactKind::Report);

        let universe: Universe =
            serde_json::from_value(json!({"id": "u1", "name": "U", "connectionId": "c1"})).unwrap();
        assert_eq!(universe.base.kind, ArtifactKind::Universe);
        assert_eq!(universe.connection_id.as_deref(), Some("c1"));

        let connection: Connection = serde_json::from_value(json!({"id": "c1", "name": "DW"})).unwrap();
        assert_eq!(connection.base.kind, ArtifactKind::Connection);
        assert_eq!(serde_json::to_value(&connection).unwrap()["type"], "Connection");

        let bare: ArtifactRef = serde_json::from_value(json!({"id": "x", "name": "X"})).unwrap();
        assert!(bare.kind.is_untagged());
        assert!(serde_json::to_value(&bare).unwrap().get("type").is_none());

        let folder = ArtifactRef {
            children: vec![bare.clone()],
            ..bare
        }
        .or_kind(ArtifactKind::Folder);
        assert_eq!(folder.kind, ArtifactKind::Folder);
        assert_eq!(folder.children[0].kind, ArtifactKind::Folder);
    }

    #[test]
    fn test_artifact_from_value_selects_variant_by_tag() {
        let universe = Artifact::from_value(json!({"id": "u1", "name": "U", "type": "universe", "connectionId": "c1"}))
            .unwrap()
            .unwrap();
        match universe {
            Artifact::Universe(u) => assert_eq!(u.connection_id.as_deref(), Some("c1")),
            other => panic!("unexpected variant {:?}", other),
        }

        let dimension = Artifact::from_value(json!({"id": "d1", "type": "Dimension"})).unwrap();
        assert!(dimension.is_none());
    }

    #[test]
    fn test_modified_after_filter() {
        let t0 = Utc::now();
        let older = ArtifactRef::folder("a", "A").with_modified(t0 - chrono::Duration::hours(1));
        let newer = ArtifactRef::folder("b", "B").with_modified(t0 + chrono::Duration::hours(1));
        let undated = ArtifactRef::folder("c", "C");

        assert!(!older.modified_after(Some(t0)));
        assert!(newer.modified_after(Some(t0)));
        assert!(undated.modified_after(Some(t0)));
        assert!(older.modified_after(None));
    }

    #[test]
    fn test_list_params_query_string() {
        let mut options = ListOptions::new();
        options.insert("includeDetails".to_string(), "true".to_string());
        let query = ListParams::new()
            .folder_id(Some("f1"))
            .types(Some(&[ArtifactKind::Folder]))
            .options(&options)
            .to_query();
        assert!(query.contains("folderId=f1"));
        assert!(query.contains("types=folder"));
        assert!(query.contains("includeDetails=true"));
    }
}
