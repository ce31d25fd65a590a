// Python extractor using tree-sitter

use tree_sitter::Node;

use super::{field_text, leading_comments, new_symbol, parse_tree, signature_before, Sink};
use crate::index::{
    Extractor, Import, ParseResult, ReferenceType, RelationshipType, Symbol, SymbolKind,
    Visibility,
};

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "classmethod", "dict", "dir", "divmod",
    "enumerate", "filter", "float", "format", "frozenset", "getattr", "hasattr", "hash", "id",
    "input", "int", "isinstance", "issubclass", "iter", "len", "list", "map", "max", "min",
    "next", "object", "open", "print", "property", "range", "repr", "reversed", "round", "set",
    "setattr", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    "None", "True", "False", "Exception", "BaseException", "ValueError", "TypeError", "KeyError",
    "IndexError", "AttributeError", "RuntimeError", "NotImplementedError", "StopIteration",
    "OSError", "IOError",
];

/// Where a node sits: the symbol that owns its references, and the class
/// whose body it is directly in
#[derive(Clone, Copy, Default)]
struct Scope<'a> {
    enclosing: Option<&'a str>,
    class: Option<&'a str>,
}

pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }

    fn walk<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        match node.kind() {
            "function_definition" => return self.extract_function(node, node, sink, scope),
            "class_definition" => return self.extract_class(node, node, sink, scope),
            "decorated_definition" => return self.extract_decorated(node, sink, scope),
            "import_statement" => return self.extract_import(node, sink),
            "import_from_statement" => return self.extract_from_import(node, sink),
            "assignment" => self.extract_assignment(node, sink, scope),
            "call" => self.extract_call(node, sink, scope.enclosing),
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, sink, scope);
        }
    }

    fn symbol(&self, node: Node, name: &str, kind: SymbolKind, sink: &Sink) -> Symbol {
        let mut symbol = new_symbol(node, name, kind, sink.file_path, sink.content);
        let exported = !name.starts_with('_');
        let dunder = name.starts_with("__") && name.ends_with("__");

        symbol.visibility = if exported || dunder {
            Visibility::Public
        } else {
            Visibility::Private
        };
        symbol.metadata = serde_json::json!({ "exported": exported || dunder });
        symbol
    }

    fn extract_decorated<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let mut cursor = node.walk();
        let decorators: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .collect();
        for decorator in decorators {
            self.walk(decorator, sink, scope);
        }

        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match definition.kind() {
            "function_definition" => self.extract_function(definition, node, sink, scope),
            "class_definition" => self.extract_class(definition, node, sink, scope),
            _ => self.walk(definition, sink, scope),
        }
    }

    /// `outer` is the decorated wrapper when there is one, so the span and
    /// hash cover the decorators too
    fn extract_function<'a>(&self, node: Node, outer: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };
        let kind = if scope.class.is_some() {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };

        let mut symbol = self.symbol(outer, name, kind, sink);
        symbol.signature = signature_before(node, "body", sink.content);
        symbol.documentation = docstring(node, sink).or_else(|| comments(outer, sink));
        if let Some(class) = scope.class {
            symbol.metadata["owner"] = serde_json::json!(class);
        }
        sink.symbol(symbol);

        for field in ["parameters", "return_type"] {
            if let Some(part) = node.child_by_field_name(field) {
                self.reference_annotations(part, name, sink, field == "return_type");
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Scope {
                enclosing: Some(name),
                class: None,
            };
            self.walk(body, sink, inner);
        }
    }

    fn extract_class<'a>(&self, node: Node, outer: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let Some(name) = field_text(node, "name", sink.content) else {
            return;
        };

        let mut symbol = self.symbol(outer, name, SymbolKind::Class, sink);
        symbol.signature = signature_before(node, "body", sink.content);
        symbol.documentation = docstring(node, sink).or_else(|| comments(outer, sink));
        sink.symbol(symbol);

        if let Some(bases) = node.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            let bases: Vec<Node> = bases.named_children(&mut cursor).collect();
            for base in bases {
                match base.kind() {
                    "identifier" => {
                        if let Some(base_name) = sink.text(base) {
                            sink.link(
                                Some(name),
                                base_name,
                                None,
                                ReferenceType::Use,
                                RelationshipType::Extends,
                                base,
                            );
                        }
                    }
                    "attribute" => {
                        let base_name = field_text(base, "attribute", sink.content);
                        let qualifier = field_text(base, "object", sink.content);
                        if let Some(base_name) = base_name {
                            sink.link(
                                Some(name),
                                base_name,
                                qualifier,
                                ReferenceType::Use,
                                RelationshipType::Extends,
                                base,
                            );
                        }
                    }
                    // metaclass=..., generic parameters
                    _ => self.walk(base, sink, scope),
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Scope {
                enclosing: Some(name),
                class: Some(name),
            };
            self.walk(body, sink, inner);
        }
    }

    /// Module-level names become variables or constants, class-level ones fields
    fn extract_assignment<'a>(&self, node: Node, sink: &mut Sink<'a>, scope: Scope<'a>) {
        let at_module = scope.enclosing.is_none();
        if !at_module && scope.class.is_none() {
            return;
        }
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let Some(name) = sink.text(left) else {
            return;
        };

        let kind = match scope.class {
            Some(_) => SymbolKind::Field,
            None if is_constant_name(name) => SymbolKind::Constant,
            None => SymbolKind::Variable,
        };

        // Span the whole statement so a change to the value changes the hash
        let statement = node
            .parent()
            .filter(|p| p.kind() == "expression_statement")
            .unwrap_or(node);

        let mut symbol = self.symbol(statement, name, kind, sink);
        symbol.signature = sink
            .text(node)
            .and_then(|t| t.lines().next())
            .map(|l| l.trim().to_string());
        symbol.documentation = comments(statement, sink);
        if let Some(class) = scope.class {
            symbol.metadata["owner"] = serde_json::json!(class);
        }
        sink.symbol(symbol);

        if let Some(annotation) = node.child_by_field_name("type") {
            if let Some(owner) = scope.enclosing {
                self.reference_annotations(annotation, owner, sink, true);
            }
        }
    }

    fn extract_import(&self, node: Node, sink: &mut Sink) {
        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();

        for name in names {
            let import = match name.kind() {
                "aliased_import" => Import {
                    path: field_text(name, "name", sink.content).unwrap_or_default().to_string(),
                    alias: field_text(name, "alias", sink.content).map(str::to_string),
                    ..Default::default()
                },
                _ => Import {
                    path: sink.text(name).unwrap_or_default().to_string(),
                    ..Default::default()
                },
            };
            if !import.path.is_empty() {
                sink.import(import, node);
            }
        }
    }

    fn extract_from_import(&self, node: Node, sink: &mut Sink) {
        let Some(module) = field_text(node, "module_name", sink.content) else {
            return;
        };

        let mut import = Import {
            path: module.to_string(),
            ..Default::default()
        };

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "wildcard_import" {
                import.is_wildcard = true;
            }
        }

        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            // The bound name is what later code refers to
            let bound = match name.kind() {
                "aliased_import" => field_text(name, "alias", sink.content),
                _ => sink.text(name),
            };
            if let Some(bound) = bound {
                import.imported_names.push(bound.to_string());
            }
        }

        sink.import(import, node);
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
            "attribute" => {
                let name = field_text(function, "attribute", sink.content);
                let qualifier = function
                    .child_by_field_name("object")
                    .and_then(|o| sink.text(o))
                    .map(receiver_text);
                if let Some(name) = name {
                    sink.reference(enclosing, name, qualifier, ReferenceType::Call, function);
                }
            }
            _ => {}
        }
    }

    /// Names used in type annotations (`x: Config`, `-> Result`)
    fn reference_annotations<'a>(&self, node: Node, owner: &'a str, sink: &mut Sink<'a>, is_type: bool) {
        let in_type = is_type || node.kind() == "type";
        if in_type && node.kind() == "identifier" {
            if let Some(name) = sink.text(node) {
                sink.reference(Some(owner), name, None, ReferenceType::Use, node);
            }
            return;
        }
        if node.kind() == "default_parameter" || node.kind() == "typed_default_parameter" {
            // Default values may call things
            if let Some(value) = node.child_by_field_name("value") {
                let scope = Scope {
                    enclosing: Some(owner),
                    class: None,
                };
                self.walk(value, sink, scope);
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if node.kind() == "default_parameter" || node.kind() == "typed_default_parameter" {
                if Some(child) == node.child_by_field_name("value") {
                    continue;
                }
            }
            self.reference_annotations(child, owner, sink, in_type);
        }
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn parse(&self, content: &[u8], file_path: &str) -> anyhow::Result<ParseResult> {
        let tree = parse_tree(tree_sitter_python::LANGUAGE.into(), content, "Python")?;
        let mut sink = Sink::new(content, file_path, BUILTINS);

        self.walk(tree.root_node(), &mut sink, Scope::default());

        Ok(sink.finish(self.language()))
    }
}

/// First statement of the body when it is a bare string
fn docstring(node: Node, sink: &Sink) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }

    let raw = sink.text(string)?;
    let doc = raw
        .trim_start_matches(|c| "rRuUbBfF".contains(c))
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    (!doc.is_empty()).then(|| doc.to_string())
}

fn comments(node: Node, sink: &Sink) -> Option<String> {
    leading_comments(node, sink.content, &["comment"], &["#"], &[])
}

fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn receiver_text(text: &str) -> &str {
    let head = text.split('(').next().unwrap_or(text).trim();
    if head.is_empty() {
        text
    } else {
        head
    }
}
