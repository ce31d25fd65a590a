// Language extractors and the registry that picks one per file

mod go;
mod python;
mod rust;

pub use go::GoExtractor;
pub use python::PythonExtractor;
pub use rust::RustExtractor;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tree_sitter::{Language, Node, Parser as TreeParser, Tree};

use crate::index::{
    ExtractedReference, Extractor, Import, ParseResult, Range, ReferenceType, Relationship,
    RelationshipType, Symbol, SymbolKind,
};

/// Maps languages and file extensions to extractors
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_language: HashMap<&'static str, Arc<dyn Extractor>>,
    by_extension: HashMap<&'static str, &'static str>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in extractor
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GoExtractor::new()));
        registry.register(Arc::new(PythonExtractor::new()));
        registry.register(Arc::new(RustExtractor::new()));
        registry
    }

    /// Built-in extractors restricted to the given language names
    pub fn with_languages(enabled: &[String]) -> Self {
        let mut registry = Self::new();
        for extractor in Self::with_defaults().by_language.into_values() {
            if enabled.iter().any(|l| l == extractor.language()) {
                registry.register(extractor);
            }
        }
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let language = extractor.language();
        for ext in extractor.extensions() {
            self.by_extension.insert(ext, language);
        }
        self.by_language.insert(language, extractor);
    }

    /// Language for a path, by extension
    pub fn detect_language(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?;
        self.by_extension.get(ext).copied()
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn Extractor>> {
        self.by_language.get(language).cloned()
    }

    /// Registered languages with their extensions, sorted by name
    pub fn languages(&self) -> Vec<(&'static str, &'static [&'static str])> {
        let mut languages: Vec<_> = self
            .by_language
            .values()
            .map(|e| (e.language(), e.extensions()))
            .collect();
        languages.sort_by_key(|(name, _)| *name);
        languages
    }
}

pub(crate) fn parse_tree(language: Language, content: &[u8], name: &str) -> Result<Tree> {
    let mut parser = TreeParser::new();
    parser.set_language(&language)?;

    parser
        .parse(content, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {} code", name))
}

pub(crate) fn node_text<'a>(node: Node, content: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(content).ok()
}

pub(crate) fn field_text<'a>(node: Node, field: &str, content: &'a [u8]) -> Option<&'a str> {
    node_text(node.child_by_field_name(field)?, content)
}

/// 1-based line/column span of a node
pub(crate) fn node_range(node: Node) -> Range {
    let start = node.start_position();
    let end = node.end_position();

    Range {
        start_line: start.row + 1,
        start_column: start.column + 1,
        end_line: end.row + 1,
        end_column: end.column + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

/// blake3 of the bytes a node spans
pub(crate) fn span_hash(node: Node, content: &[u8]) -> String {
    let bytes = content.get(node.byte_range()).unwrap_or_default();
    blake3::hash(bytes).to_hex().to_string()
}

pub(crate) fn new_symbol(
    node: Node,
    name: &str,
    kind: SymbolKind,
    file_path: &str,
    content: &[u8],
) -> Symbol {
    let mut symbol = Symbol::new(name, kind, file_path, node_range(node));
    symbol.content_hash = span_hash(node, content);
    symbol
}

/// Declaration text up to (not including) the body node, whitespace collapsed
pub(crate) fn signature_before(node: Node, body_field: &str, content: &[u8]) -> Option<String> {
    let end = node
        .child_by_field_name(body_field)
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let raw = std::str::from_utf8(content.get(node.start_byte()..end)?).ok()?;
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed.trim_end_matches(['{', ':']).trim_end().to_string())
}

/// Accumulates one file's extraction output
pub(crate) struct Sink<'a> {
    pub content: &'a [u8],
    pub file_path: &'a str,
    /// Names (and qualifiers) the language provides without a declaration
    pub builtins: &'static [&'static str],
    pub result: ParseResult,
}

impl<'a> Sink<'a> {
    pub fn new(content: &'a [u8], file_path: &'a str, builtins: &'static [&'static str]) -> Self {
        Self {
            content,
            file_path,
            builtins,
            result: ParseResult::default(),
        }
    }

    pub fn text(&self, node: Node) -> Option<&'a str> {
        node_text(node, self.content)
    }

    pub fn symbol(&mut self, symbol: Symbol) {
        self.result.symbols.push(symbol);
    }

    /// Record a use-site. Inside a named symbol it also becomes a `calls`
    /// or `uses` edge from that symbol.
    pub fn reference(
        &mut self,
        enclosing: Option<&str>,
        name: &str,
        qualifier: Option<&str>,
        reference_type: ReferenceType,
        node: Node,
    ) {
        let kind = match reference_type {
            ReferenceType::Call => RelationshipType::Calls,
            ReferenceType::Use | ReferenceType::Instantiate => RelationshipType::Uses,
        };
        self.link(enclosing, name, qualifier, reference_type, kind, node);
    }

    /// Record a use-site together with an explicitly typed edge
    pub fn link(
        &mut self,
        enclosing: Option<&str>,
        name: &str,
        qualifier: Option<&str>,
        reference_type: ReferenceType,
        kind: RelationshipType,
        node: Node,
    ) {
        let qualifier_root = qualifier.and_then(|q| q.split(['.', ':']).next());
        if name.is_empty()
            || self.builtins.contains(&name)
            || qualifier_root.is_some_and(|q| self.builtins.contains(&q))
        {
            return;
        }

        let position = node.start_position();
        self.result.references.push(ExtractedReference {
            source_symbol: enclosing.map(str::to_string),
            target_symbol_name: name.to_string(),
            qualifier: qualifier.map(str::to_string),
            reference_type,
            line: position.row + 1,
            column: position.column + 1,
        });

        if let Some(source) = enclosing {
            self.relationship(kind, source, name, node);
        }
    }

    pub fn relationship(&mut self, kind: RelationshipType, source: &str, target: &str, node: Node) {
        if self.builtins.contains(&target) {
            return;
        }
        self.result.relationships.push(Relationship::new(
            kind,
            source,
            target,
            self.file_path,
            node.start_position().row + 1,
        ));
    }

    pub fn import(&mut self, mut import: Import, node: Node) {
        let range = node_range(node);
        import.file_path = self.file_path.to_string();
        import.start_line = range.start_line;
        import.end_line = range.end_line;
        self.result.imports.push(import);
    }

    pub fn finish(self, language: &str) -> ParseResult {
        let mut result = self.result;
        result.metadata = serde_json::json!({
            "language": language,
            "symbols": result.symbols.len(),
        });
        result
    }
}

/// Comment block directly above a node. Siblings whose kind is in `skip`
/// (attributes, decorators) may sit between the comments and the node.
pub(crate) fn leading_comments(
    node: Node,
    content: &[u8],
    comment_kinds: &[&str],
    markers: &[&str],
    skip: &[&str],
) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        let kind = sibling.kind();
        if skip.contains(&kind) {
            expected_row = sibling.start_position().row;
            current = sibling.prev_sibling();
            continue;
        }
        if !comment_kinds.contains(&kind) || sibling.end_position().row + 1 < expected_row {
            break;
        }

        let text = node_text(sibling, content)?.trim_end();
        let Some(marker) = markers.iter().find(|m| text.starts_with(*m)) else {
            break;
        };
        lines.push(text[marker.len()..].trim().to_string());
        expected_row = sibling.start_position().row;
        current = sibling.prev_sibling();
    }

    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}
