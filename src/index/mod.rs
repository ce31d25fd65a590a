// Index storage and data model

pub mod db;
pub mod persist;
pub mod schema;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A project root being indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub path: String,
    pub name: String,
    /// language -> file count, recomputed after every full index
    pub language_stats: BTreeMap<String, usize>,
    pub created_at: i64,
    pub last_indexed: Option<i64>,
}

/// A source file owned by a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub project_id: i64,
    pub path: String,
    pub relative_path: String,
    pub language: String,
    pub size: u64,
    pub lines_of_code: usize,
    pub hash: String,
    pub last_modified: i64,
    pub last_indexed: i64,
}

/// Source span of a symbol. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl Range {
    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A code symbol (function, type, variable, etc.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// Row id, 0 until persisted
    pub id: i64,
    pub file_id: i64,
    /// Relative path of the owning file
    pub file_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub visibility: Visibility,
    pub range: Range,
    pub content_hash: String,
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub assigned_agent: Option<String>,
    pub metadata: serde_json::Value,
}

impl Symbol {
    /// Build an unpersisted symbol, the shape extractors hand to the pipeline
    pub fn new(name: impl Into<String>, kind: SymbolKind, file_path: &str, range: Range) -> Self {
        Self {
            id: 0,
            file_id: 0,
            file_path: file_path.to_string(),
            name: name.into(),
            kind,
            signature: None,
            documentation: None,
            visibility: Visibility::Public,
            range,
            content_hash: String::new(),
            status: None,
            priority: None,
            assigned_agent: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Whether the symbol is reachable from outside its module.
    ///
    /// Extractors that know the language's export rule (Go capitalisation,
    /// Python underscore prefix) record it under `metadata.exported`.
    pub fn is_exported(&self) -> bool {
        self.metadata
            .get("exported")
            .and_then(|v| v.as_bool())
            .unwrap_or(self.visibility == Visibility::Public)
    }
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Enum,
    Type,
    Variable,
    Constant,
    Field,
    Module,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Field => "field",
            SymbolKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            "struct" => Some(SymbolKind::Struct),
            "interface" => Some(SymbolKind::Interface),
            "enum" => Some(SymbolKind::Enum),
            "type" => Some(SymbolKind::Type),
            "variable" => Some(SymbolKind::Variable),
            "constant" => Some(SymbolKind::Constant),
            "field" => Some(SymbolKind::Field),
            "module" => Some(SymbolKind::Module),
            _ => None,
        }
    }

    /// Kinds that can sit on the right-hand side of `extends`/`implements`
    pub fn is_type_like(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Type
        )
    }
}

/// Visibility levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            "protected" => Some(Visibility::Protected),
            "internal" => Some(Visibility::Internal),
            _ => None,
        }
    }
}

/// Structural edge between two symbols, keyed by name with optional resolved ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub kind: RelationshipType,
    pub source_symbol: String,
    pub target_symbol: String,
    pub source_symbol_id: Option<i64>,
    pub target_symbol_id: Option<i64>,
    pub file_path: String,
    pub line: usize,
    pub metadata: serde_json::Value,
}

impl Relationship {
    pub fn new(
        kind: RelationshipType,
        source: impl Into<String>,
        target: impl Into<String>,
        file_path: &str,
        line: usize,
    ) -> Self {
        Self {
            id: 0,
            kind,
            source_symbol: source.into(),
            target_symbol: target.into(),
            source_symbol_id: None,
            target_symbol_id: None,
            file_path: file_path.to_string(),
            line,
            metadata: serde_json::json!({}),
        }
    }
}

/// Relationship types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Calls,
    Uses,
    Extends,
    Implements,
    Composes,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Calls => "calls",
            RelationshipType::Uses => "uses",
            RelationshipType::Extends => "extends",
            RelationshipType::Implements => "implements",
            RelationshipType::Composes => "composes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(RelationshipType::Calls),
            "uses" => Some(RelationshipType::Uses),
            "extends" => Some(RelationshipType::Extends),
            "implements" => Some(RelationshipType::Implements),
            "composes" => Some(RelationshipType::Composes),
            _ => None,
        }
    }
}

/// A concrete use-site of a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: i64,
    pub source_symbol_id: Option<i64>,
    pub target_symbol_name: String,
    pub target_symbol_id: Option<i64>,
    /// Receiver or package text in front of the name (`fmt` in `fmt.Println`)
    pub qualifier: Option<String>,
    pub reference_type: ReferenceType,
    pub file_path: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Call,
    Use,
    Instantiate,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Call => "call",
            ReferenceType::Use => "use",
            ReferenceType::Instantiate => "instantiate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(ReferenceType::Call),
            "use" => Some(ReferenceType::Use),
            "instantiate" => Some(ReferenceType::Instantiate),
            _ => None,
        }
    }
}

/// Reference as produced by an extractor: the source is the enclosing
/// symbol's name, resolved to an id when the file is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedReference {
    pub source_symbol: Option<String>,
    pub target_symbol_name: String,
    pub qualifier: Option<String>,
    pub reference_type: ReferenceType,
    pub line: usize,
    pub column: usize,
}

/// An import statement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Import {
    pub id: i64,
    pub file_path: String,
    pub path: String,
    pub alias: Option<String>,
    pub imported_names: Vec<String>,
    pub is_wildcard: bool,
    pub start_line: usize,
    pub end_line: usize,
}

impl Import {
    /// Final path segment, the name an unaliased import binds in most languages
    pub fn binding_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        self.path
            .rsplit(|c| c == '/' || c == '.' || c == ':')
            .find(|s| !s.is_empty())
            .unwrap_or(&self.path)
    }
}

/// Everything an extractor pulls out of one file
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub relationships: Vec<Relationship>,
    pub references: Vec<ExtractedReference>,
    pub metadata: serde_json::Value,
}

/// Per-language syntax extractor
pub trait Extractor: Send + Sync {
    /// Language identifier stored on files ("go", "python", ...)
    fn language(&self) -> &'static str;

    /// File extensions handled, without the leading dot
    fn extensions(&self) -> &'static [&'static str];

    fn parse(&self, content: &[u8], file_path: &str) -> anyhow::Result<ParseResult>;
}
