// Go extractor using tree-sitter

use tree_sitter::Node;

use super::{
    field_text, leading_comments, new_symbol, node_text, parse_tree, signature_before, Sink,
};
use crate::index::{
    Extractor, Import, ParseResult, ReferenceType, RelationshipType, Symbol, SymbolKind,
    Visibility,
};

/// Predeclared identifiers, never reported as references
const BUILTINS: &[&str] = &[
    "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make", "max",
    "min", "new", "panic", "print", "println", "real", "recover", "any", "bool", "byte",
    "comparable", "complex64", "complex128", "error", "float32", "float64", "int", "int8",
    "int16", "int32", "int64", "rune", "string", "uint", "uint8", "uint16", "uint32", "uint64",
    "uintptr", "nil", "true", "false", "iota",
];

pub struct GoExtractor;

impl GoExtractor {
    pub fn new() -> Self {
        Self
    }

    fn walk(&self, node: Node, sink: &mut Sink, enclosing: Option<&str>) {
        match node.kind() {
            "function_declaration" => return self.extract_function(node, sink),
            "method_declaration" => return self.extract_method(node, sink),
            "type_declaration" => return self.extract_types(node, sink),
            "import_declaration" => return self.extract_imports(node, sink),
            "const_declaration" | "var_declaration" if enclosing.is_none() => {
                self.extract_values(node, node, sink);
            }
            "call_expression" => self.extract_call(node, sink, enclosing),
            "composite_literal" => {
                if let Some(type_node) = node.child_by_field_name("type") {
                    self.reference_type_name(type_node, sink, enclosing, ReferenceType::Instantiate);
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, sink, enclosing);
        }
    }

    fn symbol(&self, node: Node, doc_node: Node, name: &str, kind: SymbolKind, sink: &Sink) -> Symbol {
        let mut symbol = new_symbol(node, name, kind, sink.file_path, sink.content);
        let exported = is_exported(name);

        symbol.visibility = if exported {
            Visibility::Public
        } else {
            Visibility::Private
        };
        symbol.documentation = leading_comments(doc_node, sink.content, &["comment"], &["//"], &[]);
        symbol.metadata = serde_json::json!({ "exported": exported });
        symbol
    }

    fn extract_function(&self, node: Node, sink: &mut Sink) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(node, node, name, SymbolKind::Function, sink);
        symbol.signature = signature_before(node, "body", sink.content);
        sink.symbol(symbol);

        self.reference_signature_types(node, name, sink);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, sink, Some(name));
        }
    }

    fn extract_method(&self, node: Node, sink: &mut Sink) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };
        let receiver = node
            .child_by_field_name("receiver")
            .and_then(|r| first_of_kind(r, "type_identifier"))
            .and_then(|t| sink.text(t));

        let mut symbol = self.symbol(node, node, name, SymbolKind::Method, sink);
        symbol.signature = signature_before(node, "body", sink.content);
        if let Some(receiver) = receiver {
            symbol.metadata["receiver"] = serde_json::json!(receiver);
        }
        sink.symbol(symbol);

        self.reference_signature_types(node, name, sink);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, sink, Some(name));
        }
    }

    fn extract_types(&self, decl: Node, sink: &mut Sink) {
        let mut cursor = decl.walk();
        let specs: Vec<Node> = decl
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "type_spec" | "type_alias"))
            .collect();
        let grouped = specs.len() > 1;

        for spec in specs {
            let Some(name) = field_text(spec, "name", sink.content) else {
                continue;
            };
            let type_node = spec.child_by_field_name("type");
            let kind = match type_node.map(|t| t.kind()) {
                Some("struct_type") => SymbolKind::Struct,
                Some("interface_type") => SymbolKind::Interface,
                _ => SymbolKind::Type,
            };

            let (node, doc_node) = if grouped { (spec, spec) } else { (decl, decl) };
            let mut symbol = self.symbol(node, doc_node, name, kind, sink);
            symbol.signature = Some(format!("type {name}"));
            sink.symbol(symbol);

            match (kind, type_node) {
                (SymbolKind::Struct, Some(body)) => self.extract_struct_fields(body, name, sink),
                (SymbolKind::Interface, Some(body)) => self.extract_interface(body, name, sink),
                (_, Some(aliased)) => {
                    self.reference_type_name(aliased, sink, Some(name), ReferenceType::Use)
                }
                _ => {}
            }
        }
    }

    fn extract_struct_fields(&self, struct_node: Node, owner: &str, sink: &mut Sink) {
        let Some(list) = first_of_kind(struct_node, "field_declaration_list") else {
            return;
        };

        let mut cursor = list.walk();
        for field in list.named_children(&mut cursor) {
            if field.kind() != "field_declaration" {
                continue;
            }
            let Some(type_node) = field.child_by_field_name("type") else {
                continue;
            };

            let mut name_cursor = field.walk();
            let names: Vec<&str> = field
                .children_by_field_name("name", &mut name_cursor)
                .filter_map(|n| sink.text(n))
                .collect();

            if names.is_empty() {
                // Embedded type
                self.link_type_names(type_node, owner, RelationshipType::Extends, sink);
                continue;
            }

            for name in names {
                let mut symbol = self.symbol(field, field, name, SymbolKind::Field, sink);
                symbol.signature = sink.text(field).map(|t| t.trim().to_string());
                symbol.metadata["owner"] = serde_json::json!(owner);
                sink.symbol(symbol);
            }
            self.link_type_names(type_node, owner, RelationshipType::Composes, sink);
        }
    }

    fn extract_interface(&self, iface: Node, owner: &str, sink: &mut Sink) {
        let mut cursor = iface.walk();
        for elem in iface.named_children(&mut cursor) {
            match elem.kind() {
                "method_elem" | "method_spec" => {
                    let Some(name) = field_text(elem, "name", sink.content) else {
                        continue;
                    };
                    let mut symbol = self.symbol(elem, elem, name, SymbolKind::Method, sink);
                    symbol.signature = sink.text(elem).map(|t| t.trim().to_string());
                    symbol.metadata["owner"] = serde_json::json!(owner);
                    sink.symbol(symbol);
                }
                "type_elem" | "constraint_elem" | "type_identifier" | "qualified_type" => {
                    self.link_type_names(elem, owner, RelationshipType::Extends, sink);
                }
                _ => {}
            }
        }
    }

    /// Top-level const/var specs, possibly nested in spec lists
    fn extract_values(&self, node: Node, decl: Node, sink: &mut Sink) {
        let kind = if decl.kind() == "const_declaration" {
            SymbolKind::Constant
        } else {
            SymbolKind::Variable
        };

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "const_spec" | "var_spec" => {
                    let mut name_cursor = child.walk();
                    let names: Vec<&str> = child
                        .children_by_field_name("name", &mut name_cursor)
                        .filter_map(|n| sink.text(n))
                        .collect();
                    for name in names {
                        if name == "_" {
                            continue;
                        }
                        let mut symbol = self.symbol(child, decl, name, kind, sink);
                        symbol.signature = sink.text(child).and_then(|t| t.lines().next()).map(str::to_string);
                        sink.symbol(symbol);
                    }
                }
                "var_spec_list" => self.extract_values(child, decl, sink),
                _ => {}
            }
        }
    }

    fn extract_imports(&self, node: Node, sink: &mut Sink) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "import_spec" => self.extract_import_spec(child, sink),
                "import_spec_list" => self.extract_imports(child, sink),
                _ => {}
            }
        }
    }

    fn extract_import_spec(&self, spec: Node, sink: &mut Sink) {
        let Some(path) = field_text(spec, "path", sink.content) else {
            return;
        };
        let path = path.trim_matches(|c| c == '"' || c == '`').to_string();

        let mut import = Import {
            path,
            ..Default::default()
        };
        if let Some(name) = spec.child_by_field_name("name") {
            if name.kind() == "dot" {
                import.is_wildcard = true;
            } else if let Some(alias) = sink.text(name) {
                import.alias = Some(alias.to_string());
            }
        }
        sink.import(import, spec);
    }

    fn extract_call(&self, node: Node, sink: &mut Sink, enclosing: Option<&str>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };

        match function.kind() {
            "identifier" => {
                if let Some(name) = sink.text(function) {
                    sink.reference(enclosing, name, None, ReferenceType::Call, function);
                }
            }
            "selector_expression" => {
                let name = field_text(function, "field", sink.content);
                let qualifier = function
                    .child_by_field_name("operand")
                    .and_then(|o| sink.text(o))
                    .map(receiver_text);
                if let Some(name) = name {
                    sink.reference(enclosing, name, qualifier, ReferenceType::Call, function);
                }
            }
            _ => {}
        }
    }

    /// Reference the named type in a type expression (`T`, `pkg.T`, `T[int]`, `*T`)
    fn reference_type_name(
        &self,
        type_node: Node,
        sink: &mut Sink,
        enclosing: Option<&str>,
        reference_type: ReferenceType,
    ) {
        match type_node.kind() {
            "type_identifier" => {
                if let Some(name) = sink.text(type_node) {
                    sink.reference(enclosing, name, None, reference_type, type_node);
                }
            }
            "qualified_type" => {
                let package = field_text(type_node, "package", sink.content);
                if let Some(name) = field_text(type_node, "name", sink.content) {
                    sink.reference(enclosing, name, package, reference_type, type_node);
                }
            }
            "generic_type" | "pointer_type" => {
                if let Some(inner) = type_node
                    .child_by_field_name("type")
                    .or_else(|| type_node.named_child(0))
                {
                    self.reference_type_name(inner, sink, enclosing, reference_type);
                }
            }
            _ => {}
        }
    }

    /// Types named in parameters and results become `uses` edges
    fn reference_signature_types(&self, node: Node, owner: &str, sink: &mut Sink) {
        for field in ["parameters", "result"] {
            let Some(part) = node.child_by_field_name(field) else {
                continue;
            };
            let mut found = Vec::new();
            collect_type_names(part, sink.content, &mut found);
            for (name, qualifier, at) in found {
                sink.reference(Some(owner), name, qualifier, ReferenceType::Use, at);
            }
        }
    }

    fn link_type_names(&self, type_node: Node, owner: &str, kind: RelationshipType, sink: &mut Sink) {
        let mut found = Vec::new();
        collect_type_names(type_node, sink.content, &mut found);
        for (name, qualifier, at) in found {
            sink.link(Some(owner), name, qualifier, ReferenceType::Use, kind, at);
        }
    }
}

/// Every named type under a node, with its package qualifier if any
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
        "qualified_type" => {
            let package = field_text(node, "package", content);
            if let Some(name) = field_text(node, "name", content) {
                out.push((name, package, node));
            }
        }
        _ => {
            let mut cursor = node.walk();
            let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_type_names(child, content, out);
            }
        }
    }
}

impl Default for GoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for GoExtractor {
    fn language(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn parse(&self, content: &[u8], file_path: &str) -> anyhow::Result<ParseResult> {
        let tree = parse_tree(tree_sitter_go::LANGUAGE.into(), content, "Go")?;
        let mut sink = Sink::new(content, file_path, BUILTINS);

        self.walk(tree.root_node(), &mut sink, None);

        Ok(sink.finish(self.language()))
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(|child| first_of_kind(child, kind))
}

/// Receiver text without call arguments: `a.b().c` -> `a.b`
fn receiver_text(text: &str) -> &str {
    let head = text.split('(').next().unwrap_or(text).trim();
    if head.is_empty() {
        text
    } else {
        head
    }
}
