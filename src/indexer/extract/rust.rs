// Rust extractor using tree-sitter

use tree_sitter::Node;

use super::{
    field_text, leading_comments, new_symbol, node_text, parse_tree, signature_before, Sink,
};
use crate::index::{
    Extractor, Import, ParseResult, ReferenceType, RelationshipType, Symbol, SymbolKind,
    Visibility,
};

/// Prelude and std names that never resolve to project symbols
const BUILTINS: &[&str] = &[
    "Some", "None", "Ok", "Err", "Box", "Vec", "String", "Option", "Result", "Self", "Default",
    "Rc", "Arc", "RefCell", "Cell", "Mutex", "RwLock", "HashMap", "HashSet", "BTreeMap",
    "BTreeSet", "VecDeque", "Path", "PathBuf", "Cow", "From", "Into", "Clone", "Copy", "Debug",
    "Display", "Iterator", "IntoIterator", "Send", "Sync", "Sized", "Eq", "PartialEq", "Ord",
    "PartialOrd", "Hash", "AsRef", "ToString", "Fn", "FnMut", "FnOnce", "drop", "std", "core",
    "alloc",
];

/// Where a node sits while walking
#[derive(Clone, Copy, Default)]
struct Scope<'a> {
    enclosing: Option<&'a str>,
    /// Self type of the surrounding impl or trait
    owner: Option<&'a str>,
    /// Visibility inherited by trait items and trait impl items
    inherited: Option<Visibility>,
}

pub struct RustExtractor;

impl RustExtractor {
    pub fn new() -> Self {
        Self
    }

    fn walk<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        match node.kind() {
            "function_item" | "function_signature_item" => {
                return self.extract_function(node, sink, scope)
            }
            "struct_item" => return self.extract_struct(node, sink),
            "enum_item" | "union_item" => {
                return self.extract_named(node, SymbolKind::Enum, sink, scope)
            }
            "type_item" => return self.extract_named(node, SymbolKind::Type, sink, scope),
            "const_item" => return self.extract_named(node, SymbolKind::Constant, sink, scope),
            "static_item" => return self.extract_named(node, SymbolKind::Variable, sink, scope),
            "trait_item" => return self.extract_trait(node, sink),
            "impl_item" => return self.extract_impl(node, sink),
            "mod_item" => return self.extract_mod(node, sink),
            "use_declaration" => return self.extract_use(node, sink),
            "call_expression" => self.extract_call(node, sink, scope),
            "struct_expression" => self.extract_struct_literal(node, sink, scope),
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, sink, scope);
        }
    }

    fn symbol(&self, node: Node, name: &str, kind: SymbolKind, sink: &Sink, scope: Scope) -> Symbol {
        let mut symbol = new_symbol(node, name, kind, sink.file_path, sink.content);

        symbol.visibility = scope
            .inherited
            .unwrap_or_else(|| visibility(node, sink.content));
        symbol.documentation = leading_comments(
            node,
            sink.content,
            &["line_comment", "block_comment"],
            &["///", "/**"],
            &["attribute_item"],
        )
        .map(|doc| doc.trim_end_matches("*/").trim().to_string());
        symbol.metadata = serde_json::json!({
            "exported": symbol.visibility == Visibility::Public,
        });
        if let Some(owner) = scope.owner {
            symbol.metadata["owner"] = serde_json::json!(owner);
        }
        symbol
    }

    fn extract_function<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };
        let kind = if scope.owner.is_some() {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };

        let mut symbol = self.symbol(node, name, kind, sink, scope);
        symbol.signature = signature_before(node, "body", sink.content)
            .map(|s| s.trim_end_matches(';').to_string());
        sink.symbol(symbol);

        for field in ["parameters", "return_type"] {
            if let Some(part) = node.child_by_field_name(field) {
                self.link_types(part, name, RelationshipType::Uses, sink, scope);
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Scope {
                enclosing: Some(name),
                owner: scope.owner,
                inherited: None,
            };
            self.walk(body, sink, inner);
        }
    }

    fn extract_struct(&self, node: Node, sink: &mut Sink) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(node, name, SymbolKind::Struct, sink, Scope::default());
        symbol.signature = signature_before(node, "body", sink.content);
        sink.symbol(symbol);

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let owner_scope = Scope {
            owner: Some(name),
            ..Default::default()
        };

        let mut cursor = body.walk();
        let fields: Vec<Node> = body.named_children(&mut cursor).collect();
        for field in fields {
            if field.kind() == "field_declaration" {
                if let Some(field_name) = field_text(field, "name", sink.content) {
                    let mut symbol = self.symbol(field, field_name, SymbolKind::Field, sink, owner_scope);
                    symbol.signature = sink.text(field).map(|t| t.trim().to_string());
                    sink.symbol(symbol);
                }
            }
            let type_node = field.child_by_field_name("type").unwrap_or(field);
            self.link_types(type_node, name, RelationshipType::Composes, sink, owner_scope);
        }
    }

    /// Items identified by a `name` field with no nested items of interest
    fn extract_named<'a>(&self, node: Node, kind: SymbolKind, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(node, name, kind, sink, scope);
        symbol.signature = match kind {
            SymbolKind::Enum => signature_before(node, "body", sink.content),
            _ => sink
                .text(node)
                .and_then(|t| t.lines().next())
                .map(|l| l.trim().trim_end_matches(['{', ';']).trim_end().to_string()),
        };
        sink.symbol(symbol);

        if let Some(type_node) = node.child_by_field_name("type") {
            self.link_types(type_node, name, RelationshipType::Uses, sink, scope);
        }
        if let Some(value) = node.child_by_field_name("value") {
            let inner = Scope {
                enclosing: Some(name),
                ..scope
            };
            self.walk(value, sink, inner);
        }
    }

    fn extract_trait(&self, node: Node, sink: &mut Sink) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(node, name, SymbolKind::Interface, sink, Scope::default());
        let trait_visibility = symbol.visibility;
        symbol.signature = signature_before(node, "body", sink.content);
        sink.symbol(symbol);

        if let Some(bounds) = node.child_by_field_name("bounds") {
            self.link_types(bounds, name, RelationshipType::Extends, sink, Scope::default());
        }

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Scope {
                enclosing: None,
                owner: Some(name),
                inherited: Some(trait_visibility),
            };
            self.walk_items(body, sink, inner);
        }
    }

    fn extract_impl(&self, node: Node, sink: &mut Sink) {
        let Some(self_type) = node
            .child_by_field_name("type")
            .and_then(base_type_name)
            .and_then(|t| sink.text(t))
        else {
            return;
        };

        let trait_node = node.child_by_field_name("trait");
        if let Some(trait_node) = trait_node {
            let trait_name = base_type_name(trait_node).and_then(|t| sink.text(t));
            let qualifier = path_qualifier(trait_node, sink.content);
            if let Some(trait_name) = trait_name {
                sink.link(
                    Some(self_type),
                    trait_name,
                    qualifier,
                    ReferenceType::Use,
                    RelationshipType::Implements,
                    trait_node,
                );
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Scope {
                enclosing: None,
                owner: Some(self_type),
                // Trait impl items carry the trait's visibility
                inherited: trait_node.map(|_| Visibility::Public),
            };
            self.walk_items(body, sink, inner);
        }
    }

    fn extract_mod(&self, node: Node, sink: &mut Sink) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(node, name, SymbolKind::Module, sink, Scope::default());
        symbol.signature = Some(format!("mod {name}"));
        sink.symbol(symbol);

        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, sink, Scope::default());
        }
    }

    fn walk_items<'a>(&self, body: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let mut cursor = body.walk();
        let items: Vec<Node> = body.named_children(&mut cursor).collect();
        for item in items {
            match item.kind() {
                "function_item" | "function_signature_item" => self.extract_function(item, sink, scope),
                "const_item" => self.extract_named(item, SymbolKind::Constant, sink, scope),
                "associated_type" | "type_item" => self.extract_named(item, SymbolKind::Type, sink, scope),
                _ => self.walk(item, sink, scope),
            }
        }
    }

    fn extract_use(&self, node: Node, sink: &mut Sink) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let mut imports = Vec::new();
        collect_use(argument, "", sink.content, &mut imports);
        for import in imports {
            sink.import(import, node);
        }
    }

    fn extract_call<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(mut function) = node.child_by_field_name("function") else {
            return;
        };
        if function.kind() == "generic_function" {
            match function.child_by_field_name("function") {
                Some(inner) => function = inner,
                None => return,
            }
        }

        match function.kind() {
            "identifier" => {
                if let Some(name) = sink.text(function) {
                    sink.reference(scope.enclosing, name, None, ReferenceType::Call, function);
                }
            }
            "scoped_identifier" => {
                let name = field_text(function, "name", sink.content);
                let qualifier = path_qualifier(function, sink.content)
                    .map(|q| resolve_self(q, scope.owner));
                if let Some(name) = name {
                    sink.reference(scope.enclosing, name, qualifier, ReferenceType::Call, function);
                }
            }
            "field_expression" => {
                let name = field_text(function, "field", sink.content);
                let qualifier = function
                    .child_by_field_name("value")
                    .and_then(|v| sink.text(v))
                    .map(receiver_text);
                if let Some(name) = name {
                    sink.reference(scope.enclosing, name, qualifier, ReferenceType::Call, function);
                }
            }
            _ => {}
        }
    }

    fn extract_struct_literal<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(type_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(name) = base_type_name(type_node).and_then(|t| sink.text(t)) else {
            return;
        };
        let name = if name == "Self" {
            scope.owner.unwrap_or(name)
        } else {
            name
        };
        let qualifier = path_qualifier(type_node, sink.content);
        sink.reference(scope.enclosing, name, qualifier, ReferenceType::Instantiate, type_node);
    }

    /// Named types under a type expression become edges from `owner`
    fn link_types<'a>(
        &self,
        node: Node,
        owner: &str,
        kind: RelationshipType,
        sink: &mut Sink<'a>,
        scope: Scope<'a>,
    ) {
        let mut found = Vec::new();
        collect_type_names(node, sink.content, &mut found);
        for (name, qualifier, at) in found {
            let name = if name == "Self" {
                scope.owner.unwrap_or(name)
            } else {
                name
            };
            sink.link(Some(owner), name, qualifier, ReferenceType::Use, kind, at);
        }
    }
}

impl Default for RustExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for RustExtractor {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn parse(&self, content: &[u8], file_path: &str) -> anyhow::Result<ParseResult> {
        let tree = parse_tree(tree_sitter_rust::LANGUAGE.into(), content, "Rust")?;
        let mut sink = Sink::new(content, file_path, BUILTINS);

        self.walk(tree.root_node(), &mut sink, Scope::default());

        Ok(sink.finish(self.language()))
    }
}

fn visibility(node: Node, content: &[u8]) -> Visibility {
    let mut cursor = node.walk();
    let modifier = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "visibility_modifier")
        .and_then(|m| node_text(m, content));

    match modifier {
        Some("pub") => Visibility::Public,
        Some(_) => Visibility::Internal,
        None => Visibility::Private,
    }
}

/// The identifier naming a type expression: `Foo` in `a::Foo<T>` or `&mut Foo`
fn base_type_name(node: Node) -> Option<Node> {
    match node.kind() {
        "type_identifier" | "identifier" => Some(node),
        "scoped_type_identifier"
        | "scoped_identifier"
        | "scoped_type_identifier_in_expression_position" => node.child_by_field_name("name"),
        "generic_type" | "generic_type_with_turbofish" => {
            base_type_name(node.child_by_field_name("type")?)
        }
        "reference_type" | "pointer_type" => base_type_name(node.child_by_field_name("type")?),
        _ => None,
    }
}

/// Path in front of a scoped name: `crate::db` in `crate::db::open`
fn path_qualifier<'a>(node: Node, content: &'a [u8]) -> Option<&'a str> {
    match node.kind() {
        "scoped_type_identifier"
        | "scoped_identifier"
        | "scoped_type_identifier_in_expression_position" => field_text(node, "path", content),
        "generic_type" | "generic_type_with_turbofish" => {
            path_qualifier(node.child_by_field_name("type")?, content)
        }
        _ => None,
    }
}

fn resolve_self<'a>(qualifier: &'a str, owner: Option<&'a str>) -> &'a str {
    match owner {
        Some(owner) if qualifier == "Self" => owner,
        _ => qualifier,
    }
}

fn receiver_text(text: &str) -> &str {
    let head = text.split('(').next().unwrap_or(text).trim();
    if head.is_empty() {
        text
    } else {
        head
    }
}

fn collect_type_names<'a, 't>(
    node: Node<'t>,
    content: &'a [u8],
    out: &mut Vec<(&'a str, Option<&'a str>, Node<'t>)>,
) {
    match node.kind() {
        "type_identifier" => {
            if let Some(name) = node_text(node, content) {
                out.push((name, None, node));
            }
        }
        "scoped_type_identifier" => {
            let qualifier = field_text(node, "path", content);
            if let Some(name) = field_text(node, "name", content) {
                out.push((name, qualifier, node));
            }
        }
        // Parameter patterns and lifetimes never name types
        "identifier" | "self_parameter" | "lifetime" => {}
        _ => {
            let mut cursor = node.walk();
            let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_type_names(child, content, out);
            }
        }
    }
}

/// Flatten a use tree into one import per leaf
fn collect_use(node: Node, prefix: &str, content: &[u8], out: &mut Vec<Import>) {
    let join = |path: &str| {
        if prefix.is_empty() {
            path.to_string()
        } else {
            format!("{prefix}::{path}")
        }
    };

    match node.kind() {
        "use_as_clause" => {
            let Some(path) = field_text(node, "path", content) else {
                return;
            };
            let full = join(path);
            let last = full.rsplit("::").next().unwrap_or(&full).to_string();
            out.push(Import {
                path: full,
                alias: field_text(node, "alias", content).map(str::to_string),
                imported_names: vec![last],
                ..Default::default()
            });
        }
        "scoped_use_list" => {
            let nested = match field_text(node, "path", content) {
                Some(path) => join(path),
                None => prefix.to_string(),
            };
            if let Some(list) = node.child_by_field_name("list") {
                collect_use(list, &nested, content, out);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_use(child, prefix, content, out);
            }
        }
        "use_wildcard" => {
            let Some(text) = node_text(node, content) else {
                return;
            };
            let path = text.trim_end_matches('*').trim_end_matches("::");
            out.push(Import {
                path: join(path),
                is_wildcard: true,
                ..Default::default()
            });
        }
        "scoped_identifier" | "identifier" | "crate" | "self" | "super" => {
            let Some(text) = node_text(node, content) else {
                return;
            };
            let full = join(text);
            let last = full.rsplit("::").next().unwrap_or(&full).to_string();
            out.push(Import {
                path: full,
                imported_names: vec![last],
                ..Default::default()
            });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"use std::collections::HashMap;
use crate::store::{Store, writer::Writer as W};
use super::models::*;

/// Maximum retries.
pub const MAX_RETRIES: u32 = 3;

/// A cached lookup table.
#[derive(Debug)]
pub struct Cache {
    entries: HashMap<String, Entry>,
    pub(crate) store: Store,
}

pub trait Lookup: Named {
    fn lookup(&self, key: &str) -> Option<Entry>;
}

impl Cache {
    pub fn new(store: Store) -> Self {
        let cache = Cache { entries: HashMap::new(), store };
        Self::warm(&cache);
        cache
    }

    fn warm(cache: &Cache) {
        helpers::prefetch(cache.store.keys());
    }
}

impl Lookup for Cache {
    fn lookup(&self, key: &str) -> Option<Entry> {
        self.entries.get(key).cloned()
    }
}

fn main() {
    let _ = Cache::new(open_store());
}
"#;

    fn parse() -> ParseResult {
        RustExtractor::new().parse(SOURCE.as_bytes(), "src/cache.rs").unwrap()
    }

    fn find<'a>(result: &'a ParseResult, name: &str) -> &'a Symbol {
        result.symbols.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_extracts_declarations() {
        let result = parse();

        assert_eq!(find(&result, "Cache").kind, SymbolKind::Struct);
        assert_eq!(find(&result, "Lookup").kind, SymbolKind::Interface);
        assert_eq!(find(&result, "MAX_RETRIES").kind, SymbolKind::Constant);
        assert_eq!(find(&result, "new").kind, SymbolKind::Method);
        assert_eq!(find(&result, "main").kind, SymbolKind::Function);
        assert_eq!(find(&result, "entries").kind, SymbolKind::Field);
        assert_eq!(find(&result, "new").metadata["owner"], "Cache");

        // Trait declaration plus trait impl
        assert_eq!(result.symbols.iter().filter(|s| s.name == "lookup").count(), 2);
    }

    #[test]
    fn test_visibility_and_docs() {
        let result = parse();

        assert_eq!(find(&result, "Cache").visibility, Visibility::Public);
        assert_eq!(find(&result, "store").visibility, Visibility::Internal);
        assert_eq!(find(&result, "warm").visibility, Visibility::Private);
        assert!(!find(&result, "main").is_exported());
        assert!(find(&result, "lookup").is_exported());

        assert_eq!(find(&result, "Cache").documentation.as_deref(), Some("A cached lookup table."));
        assert_eq!(find(&result, "MAX_RETRIES").documentation.as_deref(), Some("Maximum retries."));
    }

    #[test]
    fn test_use_trees() {
        let result = parse();
        let paths: Vec<&str> = result.imports.iter().map(|i| i.path.as_str()).collect();

        assert_eq!(
            paths,
            vec![
                "std::collections::HashMap",
                "crate::store::Store",
                "crate::store::writer::Writer",
                "super::models",
            ]
        );
        assert_eq!(result.imports[2].alias.as_deref(), Some("W"));
        assert!(result.imports[3].is_wildcard);
    }

    #[test]
    fn test_references_and_edges() {
        let result = parse();

        let has_edge = |kind: RelationshipType, from: &str, to: &str| {
            result
                .relationships
                .iter()
                .any(|r| r.kind == kind && r.source_symbol == from && r.target_symbol == to)
        };
        assert!(has_edge(RelationshipType::Implements, "Cache", "Lookup"));
        assert!(has_edge(RelationshipType::Extends, "Lookup", "Named"));
        assert!(has_edge(RelationshipType::Composes, "Cache", "Entry"));
        assert!(has_edge(RelationshipType::Composes, "Cache", "Store"));
        assert!(has_edge(RelationshipType::Calls, "main", "open_store"));

        // Self:: resolves to the impl type
        let warm = result
            .references
            .iter()
            .find(|r| r.target_symbol_name == "warm")
            .unwrap();
        assert_eq!(warm.qualifier.as_deref(), Some("Cache"));

        let literal = result
            .references
            .iter()
            .find(|r| r.reference_type == ReferenceType::Instantiate)
            .unwrap();
        assert_eq!(literal.target_symbol_name, "Cache");
        assert_eq!(literal.source_symbol.as_deref(), Some("new"));

        // Prelude names are dropped
        assert!(result.references.iter().all(|r| r.target_symbol_name != "HashMap"));
        assert!(result.references.iter().all(|r| r.target_symbol_name != "String"));
    }
}
