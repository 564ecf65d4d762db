//! C# symbol extraction on top of tree-sitter.
//!
//! Two passes over the parsed documents:
//!  1. **declare**: namespaces, types and members with their containers, accessibility and
//!     declared type names; partial types and namespaces merge across files.
//!  2. **bind**: walk every body with lexical scopes, declaring locals/parameters and
//!     binding each identifier to the symbol it names (in-tree, or a metadata symbol).
//!
//! The result is a set of `Document`s carrying declaration/reference occurrences and
//! declaration extents, plus the symbol table they point into.

use std::collections::HashMap;
use std::path::PathBuf;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::model::{
    Accessibility, DeclExtent, Document, Occurrence, OccurrenceRole, Symbol, SymbolId, SymbolKind, TextSpan,
};

/// Base-type chains deeper than this are treated as cyclic.
const MAX_BASE_DEPTH: usize = 16;

pub fn csharp_language() -> Language {
    tree_sitter_c_sharp::LANGUAGE.into()
}

pub struct ParsedFile {
    pub path: PathBuf,
    pub project: String,
    pub text: String,
    pub tree: Tree,
    pub syntax_errors: usize,
}

pub fn parse_source(path: PathBuf, project: String, text: String) -> Result<ParsedFile, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&csharp_language())
        .map_err(|e| format!("failed to set tree-sitter language: {e}"))?;
    let tree = parser
        .parse(&text, None)
        .ok_or_else(|| "tree-sitter returned no tree".to_string())?;
    let syntax_errors = count_syntax_errors(tree.root_node());
    Ok(ParsedFile {
        path,
        project,
        text,
        tree,
        syntax_errors,
    })
}

fn count_syntax_errors(root: Node) -> usize {
    if !root.has_error() {
        return 0;
    }
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            count += 1;
            continue;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        stack.extend(node.children(&mut cursor));
    }
    count
}

pub struct SourceModel {
    pub documents: Vec<Document>,
    pub symbols: Vec<Symbol>,
}

/// Declare and bind every file. Documents come out in the order of `files`.
pub fn build_source_model(files: &[ParsedFile]) -> SourceModel {
    let mut b = ModelBuilder::default();
    for f in files {
        b.documents
            .push(Document::new(f.path.clone(), f.project.clone(), f.text.clone()));
        b.decl_at.push(HashMap::new());
    }

    for (doc, f) in files.iter().enumerate() {
        let src = f.text.as_bytes();
        b.declare_members(doc, src, &f.project, f.tree.root_node(), None);
    }

    for (doc, f) in files.iter().enumerate() {
        let mut binder = Binder::new(&mut b, doc, f.text.as_bytes(), &f.project);
        binder.visit(f.tree.root_node());
    }

    for d in &mut b.documents {
        d.finish();
    }

    SourceModel {
        documents: b.documents,
        symbols: b.symbols,
    }
}

// ---------------------------------------------------------------------------
// Syntax helpers
// ---------------------------------------------------------------------------

fn node_text<'a>(src: &'a [u8], node: Node) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn field_identifier<'t>(node: Node<'t>, field: &str) -> Option<Node<'t>> {
    node.child_by_field_name(field).filter(|n| n.kind() == "identifier")
}

fn child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Name node of a declarator-like node, where the identifier is the first named child.
fn declarator_name<'t>(node: Node<'t>) -> Option<Node<'t>> {
    field_identifier(node, "name").or_else(|| {
        named_children(node)
            .into_iter()
            .next()
            .filter(|c| c.kind() == "identifier")
    })
}

fn modifiers<'a>(src: &'a [u8], node: Node) -> Vec<&'a str> {
    named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "modifier")
        .map(|c| node_text(src, c).trim())
        .collect()
}

/// Declaration extent, widened over the indentation that precedes it on its line.
fn leading_extent(src: &[u8], node: Node) -> TextSpan {
    let mut start = node.start_byte();
    while start > 0 && matches!(src[start - 1], b' ' | b'\t') {
        start -= 1;
    }
    TextSpan::new(start, node.end_byte())
}

fn ident_span(node: Node) -> TextSpan {
    TextSpan::new(node.start_byte(), node.end_byte())
}

/// The identifier a type expression ultimately names (`List<int>` → `List`, `A.B` → `B`).
fn core_type_name(src: &[u8], node: Node) -> Option<String> {
    match node.kind() {
        "identifier" => {
            let t = node_text(src, node);
            (t != "var" && t != "dynamic").then(|| t.to_string())
        }
        "generic_name" => child_of_kind(node, "identifier").map(|n| node_text(src, n).to_string()),
        "qualified_name" | "alias_qualified_name" => node.child_by_field_name("name").and_then(|n| core_type_name(src, n)),
        "nullable_type" | "ref_type" | "scoped_type" => node
            .child_by_field_name("type")
            .or_else(|| node.named_child(0))
            .and_then(|n| core_type_name(src, n)),
        _ => None,
    }
}

fn is_type_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "class_declaration"
            | "struct_declaration"
            | "interface_declaration"
            | "record_declaration"
            | "record_struct_declaration"
            | "enum_declaration"
            | "delegate_declaration"
    )
}

fn type_kind(kind: &str) -> SymbolKind {
    match kind {
        "class_declaration" => SymbolKind::Class,
        "struct_declaration" => SymbolKind::Struct,
        "interface_declaration" => SymbolKind::Interface,
        "enum_declaration" => SymbolKind::Enum,
        "delegate_declaration" => SymbolKind::Delegate,
        _ => SymbolKind::Record,
    }
}

fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "method_declaration"
            | "constructor_declaration"
            | "destructor_declaration"
            | "operator_declaration"
            | "conversion_operator_declaration"
            | "indexer_declaration"
            | "local_function_statement"
    )
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Pass 1: declarations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ModelBuilder {
    symbols: Vec<Symbol>,
    documents: Vec<Document>,
    /// Per document: identifier start byte → symbol it declares.
    decl_at: Vec<HashMap<usize, SymbolId>>,
    /// (container, name) → members, nested types and nested namespaces.
    children: HashMap<(Option<SymbolId>, String), Vec<SymbolId>>,
    types_by_name: HashMap<String, Vec<SymbolId>>,
    members_by_name: HashMap<String, Vec<SymbolId>>,
    namespaces_by_name: HashMap<String, Vec<SymbolId>>,
    /// Namespaces and partial types that merge across declarations of one project.
    merged: HashMap<(String, Option<SymbolId>, String, SymbolKind), SymbolId>,
    bases: HashMap<SymbolId, Vec<String>>,
    /// Declared type name of values: fields, properties, locals, parameters, method returns.
    value_types: HashMap<SymbolId, String>,
    externals: HashMap<(String, SymbolKind), SymbolId>,
}

impl ModelBuilder {
    fn new_symbol(
        &mut self,
        name: &str,
        kind: SymbolKind,
        container: Option<SymbolId>,
        accessibility: Accessibility,
        project: Option<&str>,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            kind,
            container,
            accessibility,
            locations: Vec::new(),
            project: project.map(str::to_string),
        });

        if kind.is_source_declaration() {
            self.children
                .entry((container, name.to_string()))
                .or_default()
                .push(id);
        }
        match kind {
            SymbolKind::Namespace => self.namespaces_by_name.entry(name.to_string()).or_default().push(id),
            k if k.is_type() && k != SymbolKind::NamedType => {
                self.types_by_name.entry(name.to_string()).or_default().push(id)
            }
            SymbolKind::Method
            | SymbolKind::Constructor
            | SymbolKind::Property
            | SymbolKind::Field
            | SymbolKind::Event
            | SymbolKind::EnumMember => self.members_by_name.entry(name.to_string()).or_default().push(id),
            _ => {}
        }
        id
    }

    fn merged_symbol(
        &mut self,
        name: &str,
        kind: SymbolKind,
        container: Option<SymbolId>,
        accessibility: Accessibility,
        project: &str,
    ) -> SymbolId {
        let key = (project.to_string(), container, name.to_string(), kind);
        if let Some(&id) = self.merged.get(&key) {
            return id;
        }
        let id = self.new_symbol(name, kind, container, accessibility, Some(project));
        self.merged.insert(key, id);
        id
    }

    fn add_declaration(&mut self, doc: usize, id: SymbolId, name: Node, extent: TextSpan) {
        let span = ident_span(name);
        let document = &mut self.documents[doc];
        let location = document.location(span);
        document.occurrences.push(Occurrence {
            span,
            symbol: id,
            role: OccurrenceRole::Declaration,
        });
        document.extents.push(DeclExtent { span: extent, symbol: id });
        self.decl_at[doc].insert(span.start, id);
        self.symbols[id.index()].locations.push(location);
    }

    fn external(&mut self, name: &str, kind: SymbolKind) -> SymbolId {
        if let Some(&id) = self.externals.get(&(name.to_string(), kind)) {
            return id;
        }
        let id = self.new_symbol(name, kind, None, Accessibility::NotApplicable, None);
        self.externals.insert((name.to_string(), kind), id);
        id
    }

    fn kind_of(&self, id: SymbolId) -> SymbolKind {
        self.symbols[id.index()].kind
    }

    fn default_accessibility(&self, container: Option<SymbolId>) -> Accessibility {
        match container.map(|c| self.kind_of(c)) {
            None | Some(SymbolKind::Namespace) => Accessibility::Internal,
            Some(SymbolKind::Interface) | Some(SymbolKind::Enum) => Accessibility::Public,
            Some(_) => Accessibility::Private,
        }
    }

    fn declare_members(&mut self, doc: usize, src: &[u8], project: &str, list: Node, container: Option<SymbolId>) {
        let mut container = container;
        for child in named_children(list) {
            match child.kind() {
                "file_scoped_namespace_declaration" => {
                    // Members after `namespace X;` belong to X until the end of the file.
                    let extent = TextSpan::new(leading_extent(src, child).start, list.end_byte());
                    if let Some(ns) = self.declare_namespace(doc, src, project, child, container, extent) {
                        container = Some(ns);
                    }
                    self.declare_members(doc, src, project, child, container);
                }
                "namespace_declaration" => {
                    let extent = leading_extent(src, child);
                    let ns = self.declare_namespace(doc, src, project, child, container, extent);
                    if let Some(body) = child.child_by_field_name("body") {
                        self.declare_members(doc, src, project, body, ns.or(container));
                    }
                }
                k if k.starts_with("preproc_") => self.declare_members(doc, src, project, child, container),
                k if is_type_declaration(k) => self.declare_type(doc, src, project, child, container),
                "method_declaration" => self.declare_member(doc, src, project, child, container, SymbolKind::Method),
                "constructor_declaration" => {
                    self.declare_member(doc, src, project, child, container, SymbolKind::Constructor)
                }
                "property_declaration" => self.declare_member(doc, src, project, child, container, SymbolKind::Property),
                "event_declaration" => self.declare_member(doc, src, project, child, container, SymbolKind::Event),
                "field_declaration" => self.declare_variables(doc, src, project, child, container, SymbolKind::Field),
                "event_field_declaration" => {
                    self.declare_variables(doc, src, project, child, container, SymbolKind::Event)
                }
                "enum_member_declaration" => {
                    if let Some(name) = declarator_name(child) {
                        let id = self.new_symbol(
                            node_text(src, name),
                            SymbolKind::EnumMember,
                            container,
                            Accessibility::Public,
                            Some(project),
                        );
                        self.add_declaration(doc, id, name, leading_extent(src, child));
                    }
                }
                _ => {}
            }
        }
    }

    fn declare_namespace(
        &mut self,
        doc: usize,
        src: &[u8],
        project: &str,
        node: Node,
        container: Option<SymbolId>,
        extent: TextSpan,
    ) -> Option<SymbolId> {
        let name = node.child_by_field_name("name")?;
        let mut segments = Vec::new();
        collect_name_segments(name, &mut segments);

        let mut parent = container;
        for ident in segments {
            let id = self.merged_symbol(
                node_text(src, ident),
                SymbolKind::Namespace,
                parent,
                Accessibility::Public,
                project,
            );
            self.add_declaration(doc, id, ident, extent);
            parent = Some(id);
        }
        parent
    }

    fn declare_type(&mut self, doc: usize, src: &[u8], project: &str, node: Node, container: Option<SymbolId>) {
        let Some(name) = field_identifier(node, "name") else { return };
        let kind = type_kind(node.kind());
        let mods = modifiers(src, node);
        let accessibility = Accessibility::from_modifiers(mods.iter().copied())
            .unwrap_or_else(|| self.default_accessibility(container));
        let text = node_text(src, name);

        let id = if mods.contains(&"partial") {
            self.merged_symbol(text, kind, container, accessibility, project)
        } else {
            self.new_symbol(text, kind, container, accessibility, Some(project))
        };
        self.add_declaration(doc, id, name, leading_extent(src, node));

        if let Some(base_list) = child_of_kind(node, "base_list") {
            let names: Vec<String> = named_children(base_list)
                .into_iter()
                .filter_map(|b| core_type_name(src, b))
                .collect();
            self.bases.entry(id).or_default().extend(names);
        }

        if kind == SymbolKind::Delegate {
            if let Some(t) = node.child_by_field_name("returns").or_else(|| node.child_by_field_name("type")) {
                if let Some(tn) = core_type_name(src, t) {
                    self.value_types.insert(id, tn);
                }
            }
            return;
        }

        // Positional record parameters declare public properties.
        if kind == SymbolKind::Record {
            if let Some(params) = child_of_kind(node, "parameter_list") {
                for p in named_children(params).into_iter().filter(|p| p.kind() == "parameter") {
                    let Some(pname) = field_identifier(p, "name") else { continue };
                    let prop = self.new_symbol(
                        node_text(src, pname),
                        SymbolKind::Property,
                        Some(id),
                        Accessibility::Public,
                        Some(project),
                    );
                    self.add_declaration(doc, prop, pname, leading_extent(src, p));
                    if let Some(tn) = p.child_by_field_name("type").and_then(|t| core_type_name(src, t)) {
                        self.value_types.insert(prop, tn);
                    }
                }
            }
        }

        let body = node
            .child_by_field_name("body")
            .or_else(|| child_of_kind(node, "declaration_list"))
            .or_else(|| child_of_kind(node, "enum_member_declaration_list"));
        if let Some(body) = body {
            self.declare_members(doc, src, project, body, Some(id));
        }
    }

    fn member_accessibility(&self, src: &[u8], node: Node, container: Option<SymbolId>) -> Accessibility {
        if child_of_kind(node, "explicit_interface_specifier").is_some() {
            return Accessibility::Private;
        }
        Accessibility::from_modifiers(modifiers(src, node)).unwrap_or_else(|| self.default_accessibility(container))
    }

    fn declare_member(
        &mut self,
        doc: usize,
        src: &[u8],
        project: &str,
        node: Node,
        container: Option<SymbolId>,
        kind: SymbolKind,
    ) {
        let Some(name) = field_identifier(node, "name") else { return };
        let accessibility = self.member_accessibility(src, node, container);
        let id = self.new_symbol(node_text(src, name), kind, container, accessibility, Some(project));
        self.add_declaration(doc, id, name, leading_extent(src, node));

        let declared = node.child_by_field_name("returns").or_else(|| node.child_by_field_name("type"));
        if let Some(tn) = declared.and_then(|t| core_type_name(src, t)) {
            self.value_types.insert(id, tn);
        }
    }

    fn declare_variables(
        &mut self,
        doc: usize,
        src: &[u8],
        project: &str,
        node: Node,
        container: Option<SymbolId>,
        kind: SymbolKind,
    ) {
        let Some(decl) = child_of_kind(node, "variable_declaration") else { return };
        let type_name = decl.child_by_field_name("type").and_then(|t| core_type_name(src, t));
        let accessibility = self.member_accessibility(src, node, container);
        let declarators: Vec<Node> = named_children(decl)
            .into_iter()
            .filter(|c| c.kind() == "variable_declarator")
            .collect();
        let single = declarators.len() == 1;

        for declarator in declarators {
            let Some(name) = declarator_name(declarator) else { continue };
            let id = self.new_symbol(node_text(src, name), kind, container, accessibility, Some(project));
            let extent = if single {
                leading_extent(src, node)
            } else {
                ident_span(declarator)
            };
            self.add_declaration(doc, id, name, extent);
            if let Some(tn) = &type_name {
                self.value_types.insert(id, tn.clone());
            }
        }
    }
}

/// Identifiers of a possibly dotted name, outermost first.
fn collect_name_segments<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    match node.kind() {
        "identifier" => out.push(node),
        "qualified_name" => {
            if let Some(q) = node.child_by_field_name("qualifier") {
                collect_name_segments(q, out);
            }
            if let Some(n) = node.child_by_field_name("name") {
                collect_name_segments(n, out);
            }
        }
        _ => {
            for c in named_children(node) {
                collect_name_segments(c, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pass 2: binding
// ---------------------------------------------------------------------------

struct Binder<'m, 's> {
    model: &'m mut ModelBuilder,
    doc: usize,
    src: &'s [u8],
    project: &'s str,
    scopes: Vec<HashMap<String, SymbolId>>,
    /// Enclosing type declarations, innermost last.
    types: Vec<SymbolId>,
    namespaces: Vec<SymbolId>,
    /// Namespaces and `using static` types imported into this document.
    usings: Vec<SymbolId>,
    /// Container for scoped symbols (enclosing member or type).
    owners: Vec<SymbolId>,
    in_using: bool,
}

impl<'m, 's> Binder<'m, 's> {
    fn new(model: &'m mut ModelBuilder, doc: usize, src: &'s [u8], project: &'s str) -> Self {
        Self {
            model,
            doc,
            src,
            project,
            scopes: Vec::new(),
            types: Vec::new(),
            namespaces: Vec::new(),
            usings: Vec::new(),
            owners: Vec::new(),
            in_using: false,
        }
    }

    fn text(&self, node: Node) -> &'s str {
        node_text(self.src, node)
    }

    fn declared_at(&self, node: Node) -> Option<SymbolId> {
        self.model.decl_at[self.doc].get(&node.start_byte()).copied()
    }

    fn reference(&mut self, ident: Node, id: SymbolId) {
        self.model.documents[self.doc].occurrences.push(Occurrence {
            span: ident_span(ident),
            symbol: id,
            role: OccurrenceRole::Reference,
        });
    }

    fn visit_children(&mut self, node: Node) {
        for child in named_children(node) {
            self.visit(child);
        }
    }

    /// Visit `node`, returning the symbol it denotes when it is a name-like expression.
    fn visit(&mut self, node: Node) -> Option<SymbolId> {
        match node.kind() {
            "comment" | "string_literal" | "verbatim_string_literal" | "raw_string_literal" | "character_literal" => None,
            "using_directive" => {
                self.visit_using(node);
                None
            }
            "namespace_declaration" => {
                let ns = node.child_by_field_name("name").and_then(|n| self.last_declared_segment(n));
                if let Some(ns) = ns {
                    self.namespaces.push(ns);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_children(body);
                }
                if ns.is_some() {
                    self.namespaces.pop();
                }
                None
            }
            "file_scoped_namespace_declaration" => {
                if let Some(ns) = node.child_by_field_name("name").and_then(|n| self.last_declared_segment(n)) {
                    self.namespaces.push(ns);
                }
                let name = node.child_by_field_name("name");
                for child in named_children(node) {
                    if Some(child) != name {
                        self.visit(child);
                    }
                }
                None
            }
            k if is_type_declaration(k) => {
                self.visit_type_declaration(node);
                None
            }
            k if is_function_like(k) => {
                self.visit_function(node);
                None
            }
            "property_declaration" | "event_declaration" => {
                let owner = field_identifier(node, "name").and_then(|n| self.declared_at(n));
                self.with_owner(owner, |b| b.visit_children(node));
                None
            }
            "lambda_expression" | "anonymous_method_expression" => {
                self.visit_lambda(node);
                None
            }
            "block" => {
                self.visit_block(node);
                None
            }
            "for_statement" | "using_statement" | "fixed_statement" | "switch_section" | "catch_clause"
            | "query_expression" | "accessor_declaration" | "switch_expression_arm" => {
                self.scoped(|b| b.visit_children(node));
                None
            }
            "foreach_statement" => {
                self.visit_foreach(node);
                None
            }
            "variable_declarator" => {
                self.visit_declarator(node);
                None
            }
            "tuple_pattern" => {
                for ident in named_children(node).into_iter().filter(|c| c.kind() == "identifier") {
                    self.declare_scoped(ident, SymbolKind::Local, ident, None);
                }
                None
            }
            "catch_declaration" | "declaration_expression" | "declaration_pattern" | "recursive_pattern"
            | "var_pattern" => {
                self.visit_designation(node);
                None
            }
            "single_variable_designation" => {
                if let Some(ident) = child_of_kind(node, "identifier") {
                    self.declare_scoped(ident, SymbolKind::Local, node, None);
                }
                None
            }
            "from_clause" | "let_clause" | "join_clause" | "query_continuation" => {
                self.visit_range_variable(node);
                None
            }
            "member_access_expression" => self.visit_member_access(node),
            "qualified_name" => self.visit_qualified_name(node),
            "invocation_expression" => {
                let target = node.child_by_field_name("function").and_then(|f| self.visit(f));
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.visit(args);
                }
                target
            }
            "object_creation_expression" => self.visit_object_creation(node),
            "generic_name" => self.visit_generic_name(node),
            "identifier" => self.visit_identifier(node),
            "this_expression" | "this" => self.types.last().copied(),
            "base_expression" | "base" => self.types.last().copied().and_then(|t| self.base_type_of(t)),
            "parenthesized_expression" => node.named_child(0).and_then(|c| self.visit(c)),
            "attribute" => self.visit_attribute(node),
            "name_colon" | "name_equals" => None,
            _ => {
                self.visit_children(node);
                None
            }
        }
    }

    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scopes.push(HashMap::new());
        let r = f(self);
        self.scopes.pop();
        r
    }

    fn with_owner<R>(&mut self, owner: Option<SymbolId>, f: impl FnOnce(&mut Self) -> R) -> R {
        if let Some(o) = owner {
            self.owners.push(o);
        }
        let r = f(self);
        if owner.is_some() {
            self.owners.pop();
        }
        r
    }

    fn last_declared_segment(&self, name: Node) -> Option<SymbolId> {
        let mut segments = Vec::new();
        collect_name_segments(name, &mut segments);
        segments.last().and_then(|n| self.declared_at(*n))
    }

    /// Declare a scoped symbol (local, parameter, ...) in the innermost scope.
    fn declare_scoped(&mut self, name: Node, kind: SymbolKind, extent_node: Node, type_name: Option<String>) -> SymbolId {
        let text = self.text(name);
        if let Some(existing) = self.declared_at(name) {
            self.bind_in_scope(text, existing);
            return existing;
        }

        let container = self.owners.last().copied();
        let id = self
            .model
            .new_symbol(text, kind, container, Accessibility::NotApplicable, Some(self.project));
        let extent = leading_extent(self.src, extent_node);
        self.model.add_declaration(self.doc, id, name, extent);
        if let Some(tn) = type_name {
            self.model.value_types.insert(id, tn);
        }
        self.bind_in_scope(text, id);
        id
    }

    fn bind_in_scope(&mut self, name: &str, id: SymbolId) {
        if self.scopes.is_empty() {
            self.scopes.push(HashMap::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
    }

    fn declare_type_parameters(&mut self, list: Node) {
        for tp in named_children(list).into_iter().filter(|c| c.kind() == "type_parameter") {
            if let Some(name) = declarator_name(tp) {
                self.declare_scoped(name, SymbolKind::TypeParameter, tp, None);
            }
        }
    }

    fn declare_parameters(&mut self, list: Node) {
        for p in named_children(list) {
            if p.kind() != "parameter" {
                self.visit(p);
                continue;
            }
            let name = field_identifier(p, "name");
            for child in named_children(p) {
                if Some(child) != name {
                    self.visit(child);
                }
            }
            if let Some(name) = name {
                let tn = p.child_by_field_name("type").and_then(|t| core_type_name(self.src, t));
                self.declare_scoped(name, SymbolKind::Parameter, p, tn);
            }
        }
    }

    fn visit_using(&mut self, node: Node) {
        let alias = field_identifier(node, "name");
        let is_static = {
            let mut cursor = node.walk();
            let found = node.children(&mut cursor).any(|c| c.kind() == "static");
            found
        };
        self.in_using = true;
        for child in named_children(node) {
            if Some(child) == alias {
                continue;
            }
            let Some(target) = self.visit(child) else { continue };
            let kind = self.model.kind_of(target);
            let imports = alias.is_none() && (kind == SymbolKind::Namespace || (is_static && kind.is_type()));
            if imports && self.model.symbols[target.index()].is_in_source() {
                self.usings.push(target);
            }
        }
        self.in_using = false;
    }

    fn visit_type_declaration(&mut self, node: Node) {
        let name = field_identifier(node, "name");
        let Some(id) = name.and_then(|n| self.declared_at(n)) else {
            self.visit_children(node);
            return;
        };

        self.types.push(id);
        self.owners.push(id);
        self.scoped(|b| {
            let children = named_children(node);
            for c in children.iter().filter(|c| c.kind() == "type_parameter_list") {
                b.declare_type_parameters(*c);
            }
            for c in children.iter().filter(|c| c.kind() == "parameter_list") {
                b.declare_parameters(*c);
            }
            for c in children {
                if Some(c) == name || matches!(c.kind(), "type_parameter_list" | "parameter_list") {
                    continue;
                }
                b.visit(c);
            }
        });
        self.owners.pop();
        self.types.pop();
    }

    fn visit_function(&mut self, node: Node) {
        let name = field_identifier(node, "name");
        let mut owner = name.and_then(|n| self.declared_at(n));
        if owner.is_none() && node.kind() == "local_function_statement" {
            if let Some(n) = name {
                let tn = self.return_type_name(node);
                owner = Some(self.declare_scoped(n, SymbolKind::LocalFunction, node, tn));
            }
        }

        self.with_owner(owner, |b| {
            b.scoped(|b| {
                let children = named_children(node);
                for c in children.iter().filter(|c| c.kind() == "type_parameter_list") {
                    b.declare_type_parameters(*c);
                }
                for c in children
                    .iter()
                    .filter(|c| matches!(c.kind(), "parameter_list" | "bracketed_parameter_list"))
                {
                    b.declare_parameters(*c);
                }
                for c in children {
                    if Some(c) == name
                        || matches!(c.kind(), "type_parameter_list" | "parameter_list" | "bracketed_parameter_list")
                    {
                        continue;
                    }
                    b.visit(c);
                }
            })
        });
    }

    fn return_type_name(&self, node: Node) -> Option<String> {
        node.child_by_field_name("returns")
            .or_else(|| node.child_by_field_name("type"))
            .and_then(|t| core_type_name(self.src, t))
    }

    fn visit_block(&mut self, node: Node) {
        self.scoped(|b| {
            let children = named_children(node);
            // Local functions are visible throughout their block.
            for c in children.iter().filter(|c| c.kind() == "local_function_statement") {
                if let Some(name) = field_identifier(*c, "name") {
                    let tn = b.return_type_name(*c);
                    b.declare_scoped(name, SymbolKind::LocalFunction, *c, tn);
                }
            }
            for c in children {
                b.visit(c);
            }
        });
    }

    fn visit_lambda(&mut self, node: Node) {
        self.scoped(|b| {
            let params = node
                .child_by_field_name("parameters")
                .or_else(|| child_of_kind(node, "parameter_list"));
            match params {
                Some(p) if p.kind() == "parameter_list" => b.declare_parameters(p),
                Some(p) => {
                    let ident = if p.named_child_count() == 0 { Some(p) } else { child_of_kind(p, "identifier") };
                    if let Some(ident) = ident {
                        b.declare_scoped(ident, SymbolKind::Parameter, ident, None);
                    }
                }
                None => {}
            }
            for c in named_children(node) {
                if Some(c) != params {
                    b.visit(c);
                }
            }
        });
    }

    fn visit_foreach(&mut self, node: Node) {
        self.scoped(|b| {
            let left = node.child_by_field_name("left");
            let type_name = node.child_by_field_name("type").and_then(|t| core_type_name(b.src, t));
            let body = node.child_by_field_name("body");
            for c in named_children(node) {
                if Some(c) == left || Some(c) == body {
                    continue;
                }
                b.visit(c);
            }
            if let Some(left) = left {
                if left.kind() == "identifier" {
                    b.declare_scoped(left, SymbolKind::Local, left, type_name);
                } else {
                    b.visit(left);
                }
            }
            if let Some(body) = body {
                b.visit(body);
            }
        });
    }

    fn visit_declarator(&mut self, node: Node) {
        let name = declarator_name(node);
        for c in named_children(node) {
            if Some(c) != name {
                self.visit(c);
            }
        }
        let Some(name) = name else { return };
        if self.declared_at(name).is_some() {
            return;
        }

        let declared = node
            .parent()
            .filter(|p| p.kind() == "variable_declaration")
            .and_then(|p| p.child_by_field_name("type"))
            .and_then(|t| core_type_name(self.src, t));
        let type_name = declared.or_else(|| self.inferred_type_name(node));
        let extent = node.parent().filter(|p| named_children(*p).len() == 2).unwrap_or(node);
        self.declare_scoped(name, SymbolKind::Local, extent, type_name);
    }

    /// `var x = new T(...)` → `T`.
    fn inferred_type_name(&self, declarator: Node) -> Option<String> {
        for c in named_children(declarator) {
            let creation = match c.kind() {
                "object_creation_expression" => Some(c),
                "equals_value_clause" => child_of_kind(c, "object_creation_expression"),
                _ => None,
            };
            if let Some(t) = creation.and_then(|c| c.child_by_field_name("type")) {
                return core_type_name(self.src, t);
            }
        }
        None
    }

    fn visit_designation(&mut self, node: Node) {
        let name = field_identifier(node, "name");
        for c in named_children(node) {
            if Some(c) != name {
                self.visit(c);
            }
        }
        if let Some(name) = name {
            let tn = node.child_by_field_name("type").and_then(|t| core_type_name(self.src, t));
            self.declare_scoped(name, SymbolKind::Local, node, tn);
        }
    }

    fn visit_range_variable(&mut self, node: Node) {
        let name = field_identifier(node, "name").or_else(|| {
            if node.child_by_field_name("type").is_some() {
                None
            } else {
                child_of_kind(node, "identifier")
            }
        });
        for c in named_children(node) {
            if Some(c) != name {
                self.visit(c);
            }
        }
        if let Some(name) = name {
            self.declare_scoped(name, SymbolKind::Local, name, None);
        }
    }

    fn visit_object_creation(&mut self, node: Node) -> Option<SymbolId> {
        let type_node = node.child_by_field_name("type");
        let created = type_node.and_then(|t| self.visit(t));
        let initializer = node
            .child_by_field_name("initializer")
            .or_else(|| child_of_kind(node, "initializer_expression"));

        for c in named_children(node) {
            if Some(c) == type_node || Some(c) == initializer {
                continue;
            }
            self.visit(c);
        }

        if let Some(init) = initializer {
            for c in named_children(init) {
                let left = c.child_by_field_name("left").filter(|l| l.kind() == "identifier");
                match (c.kind(), left, created) {
                    ("assignment_expression", Some(left), Some(t)) => {
                        let target = self.member_of(Some(t), false, self.text(left));
                        self.reference(left, target);
                        if let Some(right) = c.child_by_field_name("right") {
                            self.visit(right);
                        }
                    }
                    _ => {
                        self.visit(c);
                    }
                }
            }
        }

        created
    }

    fn visit_attribute(&mut self, node: Node) -> Option<SymbolId> {
        let name = node.child_by_field_name("name");
        let target = match name {
            Some(n) if n.kind() == "identifier" => {
                let text = self.text(n);
                let target = self
                    .resolve_type(text)
                    .or_else(|| self.resolve_type(&format!("{text}Attribute")))
                    .unwrap_or_else(|| self.model.external(text, SymbolKind::NamedType));
                self.reference(n, target);
                Some(target)
            }
            Some(n) => self.visit(n),
            None => None,
        };
        for c in named_children(node) {
            if Some(c) != name {
                self.visit(c);
            }
        }
        target
    }

    fn visit_generic_name(&mut self, node: Node) -> Option<SymbolId> {
        let ident = child_of_kind(node, "identifier");
        let target = ident.and_then(|i| self.bind_name(i, self.is_type_position(node)));
        for c in named_children(node) {
            if Some(c) != ident {
                self.visit(c);
            }
        }
        target
    }

    fn visit_identifier(&mut self, node: Node) -> Option<SymbolId> {
        if let Some(id) = self.declared_at(node) {
            return Some(id);
        }
        self.bind_name(node, self.is_type_position(node))
    }

    fn visit_member_access(&mut self, node: Node) -> Option<SymbolId> {
        let receiver = node.child_by_field_name("expression");
        let name = node.child_by_field_name("name")?;
        let receiver_symbol = receiver.and_then(|r| self.visit(r));
        let receiver_kind = receiver.map(|r| r.kind()).unwrap_or("");

        let ident = if name.kind() == "generic_name" {
            for c in named_children(name).into_iter().filter(|c| c.kind() != "identifier") {
                self.visit(c);
            }
            child_of_kind(name, "identifier")?
        } else {
            name
        };

        let (scope_type, external_receiver) = match receiver_kind {
            "predefined_type" => (None, true),
            _ => match receiver_symbol {
                Some(s) if !self.model.symbols[s.index()].is_in_source() => (None, true),
                Some(s) => (self.static_type_of(s), false),
                None => (None, false),
            },
        };

        let text = self.text(ident);
        let target = if external_receiver {
            self.model.external(text, SymbolKind::Member)
        } else {
            self.member_of(scope_type, true, text)
        };
        self.reference(ident, target);
        Some(target)
    }

    fn visit_qualified_name(&mut self, node: Node) -> Option<SymbolId> {
        let qualifier = node.child_by_field_name("qualifier");
        let name = node.child_by_field_name("name")?;
        let qualifier_symbol = qualifier.and_then(|q| self.visit(q));

        let ident = if name.kind() == "generic_name" {
            for c in named_children(name).into_iter().filter(|c| c.kind() != "identifier") {
                self.visit(c);
            }
            child_of_kind(name, "identifier")?
        } else {
            name
        };
        if let Some(id) = self.declared_at(ident) {
            return Some(id);
        }

        let text = self.text(ident);
        let external_kind = if self.in_using { SymbolKind::Namespace } else { SymbolKind::NamedType };
        let target = match qualifier_symbol {
            Some(q) if self.model.symbols[q.index()].is_in_source() => self
                .model
                .children
                .get(&(Some(q), text.to_string()))
                .and_then(|ids| ids.first().copied())
                .or_else(|| self.find_member(q, text, 0)),
            Some(_) => None,
            None => self.resolve_type(text),
        }
        .unwrap_or_else(|| self.model.external(text, external_kind));
        self.reference(ident, target);
        Some(target)
    }

    fn is_type_position(&self, node: Node) -> bool {
        let Some(parent) = node.parent() else { return false };
        if parent.child_by_field_name("type") == Some(node) || parent.child_by_field_name("returns") == Some(node) {
            return true;
        }
        match parent.kind() {
            "base_list" | "type_argument_list" | "nullable_type" | "array_type" | "pointer_type" | "ref_type"
            | "typeof_expression" | "type_parameter_constraint" | "type_constraint" | "tuple_element" => true,
            "generic_name" | "qualified_name" => self.is_type_position(parent),
            _ => false,
        }
    }

    fn is_member_access_receiver(&self, node: Node) -> bool {
        node.parent()
            .filter(|p| p.kind() == "member_access_expression")
            .and_then(|p| p.child_by_field_name("expression"))
            == Some(node)
    }

    /// Bind a simple name and record the reference.
    fn bind_name(&mut self, ident: Node, type_position: bool) -> Option<SymbolId> {
        let text = self.text(ident);
        let resolved = if type_position {
            self.lookup_scopes(text).or_else(|| self.resolve_type(text))
        } else {
            self.resolve_simple_name(text)
        };

        let target = match resolved {
            Some(id) => id,
            None if starts_uppercase(text) => {
                let kind = if self.in_using {
                    SymbolKind::Namespace
                } else if type_position || self.is_member_access_receiver(ident) {
                    SymbolKind::NamedType
                } else {
                    SymbolKind::Member
                };
                self.model.external(text, kind)
            }
            None => return None,
        };
        self.reference(ident, target);
        Some(target)
    }

    fn lookup_scopes(&self, name: &str) -> Option<SymbolId> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn resolve_simple_name(&self, name: &str) -> Option<SymbolId> {
        if let Some(id) = self.lookup_scopes(name) {
            return Some(id);
        }
        for &t in self.types.iter().rev() {
            if let Some(id) = self.find_member(t, name, 0) {
                return Some(id);
            }
        }
        for &u in &self.usings {
            if self.model.kind_of(u).is_type() {
                if let Some(id) = self.find_member(u, name, 0) {
                    return Some(id);
                }
            }
        }
        self.resolve_type(name)
            .or_else(|| self.model.namespaces_by_name.get(name).and_then(|v| v.first().copied()))
    }

    fn child_named(&self, container: Option<SymbolId>, name: &str, want_type: bool) -> Option<SymbolId> {
        self.model
            .children
            .get(&(container, name.to_string()))?
            .iter()
            .copied()
            .find(|id| !want_type || self.model.kind_of(*id).is_type())
    }

    /// Type lookup: type parameters, nested types, enclosing namespaces, usings, then anywhere.
    fn resolve_type(&self, name: &str) -> Option<SymbolId> {
        if let Some(id) = self.lookup_scopes(name).filter(|id| self.model.kind_of(*id) == SymbolKind::TypeParameter) {
            return Some(id);
        }
        for &t in self.types.iter().rev() {
            if let Some(id) = self.child_named(Some(t), name, true) {
                return Some(id);
            }
        }
        for &ns in self.namespaces.iter().rev() {
            let mut cur = Some(ns);
            while let Some(c) = cur {
                if let Some(id) = self.child_named(Some(c), name, true) {
                    return Some(id);
                }
                cur = self.model.symbols[c.index()].container;
            }
        }
        if let Some(id) = self.child_named(None, name, true) {
            return Some(id);
        }
        for &u in &self.usings {
            if let Some(id) = self.child_named(Some(u), name, true) {
                return Some(id);
            }
        }
        self.model.types_by_name.get(name).and_then(|v| v.first().copied())
    }

    /// Member `name` of type `t`, searching base types by name.
    fn find_member(&self, t: SymbolId, name: &str, depth: usize) -> Option<SymbolId> {
        if depth > MAX_BASE_DEPTH {
            return None;
        }
        if let Some(id) = self.child_named(Some(t), name, false) {
            return Some(id);
        }
        let bases = self.model.bases.get(&t)?;
        bases.iter().find_map(|base| {
            let b = self.model.types_by_name.get(base)?.iter().copied().find(|b| *b != t)?;
            self.find_member(b, name, depth + 1)
        })
    }

    fn base_type_of(&self, t: SymbolId) -> Option<SymbolId> {
        let bases = self.model.bases.get(&t)?;
        bases.iter().find_map(|base| {
            self.model
                .types_by_name
                .get(base)?
                .iter()
                .copied()
                .find(|b| *b != t && self.model.kind_of(*b) != SymbolKind::Interface)
        })
    }

    /// Type whose members a value of symbol `s` exposes.
    fn static_type_of(&self, s: SymbolId) -> Option<SymbolId> {
        let kind = self.model.kind_of(s);
        if kind.is_type() || kind == SymbolKind::Namespace {
            return Some(s);
        }
        let type_name = self.model.value_types.get(&s)?;
        self.resolve_type(type_name)
    }

    /// Resolve a member name against a known receiver type, else any member of that name.
    fn member_of(&mut self, scope_type: Option<SymbolId>, allow_any: bool, name: &str) -> SymbolId {
        let found = match scope_type {
            Some(t) => self.find_member(t, name, 0),
            None if allow_any => self.model.members_by_name.get(name).and_then(|v| v.first().copied()),
            None => None,
        };
        found.unwrap_or_else(|| self.model.external(name, SymbolKind::Member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_of(files: &[(&str, &str)]) -> SourceModel {
        let parsed: Vec<ParsedFile> = files
            .iter()
            .map(|(p, src)| parse_source(PathBuf::from(p), "Test".to_string(), src.to_string()).unwrap())
            .collect();
        build_source_model(&parsed)
    }

    fn symbols_named<'a>(m: &'a SourceModel, name: &str) -> Vec<&'a Symbol> {
        m.symbols.iter().filter(|s| s.name == name).collect()
    }

    fn only<'a>(m: &'a SourceModel, name: &str) -> &'a Symbol {
        let found = symbols_named(m, name);
        assert_eq!(found.len(), 1, "expected exactly one `{name}`, got {found:?}");
        found[0]
    }

    /// Symbol named by the identifier starting at the `nth` occurrence of `needle` (+ `skip` bytes).
    fn symbol_at<'a>(m: &'a SourceModel, doc: usize, needle: &str, skip: usize) -> Option<&'a Symbol> {
        let d = &m.documents[doc];
        let off = d.text.find(needle).expect("needle present") + skip;
        d.occurrence_at(off).map(|o| &m.symbols[o.symbol.index()])
    }

    const GREETER: &str = r#"
namespace App
{
    public class Greeter
    {
        private readonly string _name;

        public Greeter(string name) { _name = name; }

        public string Greet() { return Format(_name); }

        private static string Format(string s) => s;
    }

    public class Program
    {
        public static void Main()
        {
            var g = new Greeter("x");
            g.Greet();
            System.Console.WriteLine(g);
        }
    }
}
"#;

    #[test]
    fn declares_types_and_members_with_containers() {
        let m = model_of(&[("A.cs", "class Foo { void Bar() {} }")]);
        let foo = only(&m, "Foo");
        let bar = only(&m, "Bar");
        assert_eq!(foo.kind, SymbolKind::Class);
        assert_eq!(foo.accessibility, Accessibility::Internal);
        assert_eq!(bar.kind, SymbolKind::Method);
        assert_eq!(bar.accessibility, Accessibility::Private);
        assert_eq!(bar.container, Some(foo.id));
        assert_eq!(bar.locations[0].start.line, 0);
        assert_eq!(bar.locations[0].start.column, 17);
    }

    #[test]
    fn binds_field_method_and_type_references() {
        let m = model_of(&[("G.cs", GREETER)]);
        let field = only(&m, "_name");
        assert_eq!(field.kind, SymbolKind::Field);
        assert_eq!(symbol_at(&m, 0, "Format(_name)", 7).map(|s| s.id), Some(field.id));
        assert_eq!(symbol_at(&m, 0, "Format(_name)", 0).map(|s| s.name.as_str()), Some("Format"));

        let greeter = m.symbols.iter().find(|s| s.name == "Greeter" && s.kind == SymbolKind::Class).unwrap();
        assert_eq!(symbol_at(&m, 0, "new Greeter", 4).map(|s| s.id), Some(greeter.id));

        // `var g = new Greeter(..)` lets `g.Greet` bind to Greeter.Greet.
        let greet = only(&m, "Greet");
        assert_eq!(symbol_at(&m, 0, "g.Greet", 2).map(|s| s.id), Some(greet.id));
        assert_eq!(symbol_at(&m, 0, "g.Greet", 0).map(|s| s.kind), Some(SymbolKind::Local));
    }

    #[test]
    fn unresolved_names_become_metadata_symbols() {
        let m = model_of(&[("G.cs", GREETER)]);
        let write_line = symbol_at(&m, 0, "WriteLine", 0).expect("bound");
        assert!(!write_line.is_in_source());
        assert_eq!(write_line.kind, SymbolKind::Member);
        let console = symbol_at(&m, 0, "Console", 0).expect("bound");
        assert!(!console.is_in_source());
    }

    #[test]
    fn binds_locals_and_parameters() {
        let src = "class C { int Twice(int v) { var r = v * 2; return r; } }";
        let m = model_of(&[("C.cs", src)]);
        let r = symbol_at(&m, 0, "return r", 7).expect("r bound");
        assert_eq!(r.kind, SymbolKind::Local);
        assert_eq!(r.locations[0].start.column as usize, src.find("r =").unwrap());
        let v = symbol_at(&m, 0, "v * 2", 0).expect("v bound");
        assert_eq!(v.kind, SymbolKind::Parameter);
        assert_eq!(v.container, Some(only(&m, "Twice").id));
    }

    #[test]
    fn members_resolve_through_base_types() {
        let src = "class Base { protected int Count; }\nclass Derived : Base { void Tick() { Count++; } }";
        let m = model_of(&[("B.cs", src)]);
        let count = only(&m, "Count");
        assert_eq!(count.accessibility, Accessibility::Protected);
        assert_eq!(symbol_at(&m, 0, "Count++", 0).map(|s| s.id), Some(count.id));
    }

    #[test]
    fn partial_types_merge_across_files() {
        let m = model_of(&[
            ("One.cs", "namespace N { public partial class Widget { void A() {} } }"),
            ("Two.cs", "namespace N { public partial class Widget { void B() {} } }"),
        ]);
        let widget = only(&m, "Widget");
        assert_eq!(widget.locations.len(), 2);
        assert!(widget.locations[0].path.ends_with("One.cs"));
        assert!(widget.locations[1].path.ends_with("Two.cs"));
        assert_eq!(only(&m, "N").locations.len(), 2);
        assert_eq!(only(&m, "B").container, Some(widget.id));
    }

    #[test]
    fn default_accessibility_follows_container() {
        let src = r#"
public interface IShape { double Area(); }
public enum Color { Red, Green }
public class Outer { class Inner {} }
"#;
        let m = model_of(&[("S.cs", src)]);
        assert_eq!(only(&m, "Area").accessibility, Accessibility::Public);
        assert_eq!(only(&m, "Red").accessibility, Accessibility::Public);
        assert_eq!(only(&m, "Red").kind, SymbolKind::EnumMember);
        assert_eq!(only(&m, "Inner").accessibility, Accessibility::Private);
        assert_eq!(only(&m, "Outer").accessibility, Accessibility::Public);
    }

    #[test]
    fn record_positional_parameters_declare_properties() {
        let m = model_of(&[("P.cs", "public record Point(int X, int Y);")]);
        let point = only(&m, "Point");
        let x = only(&m, "X");
        assert_eq!(point.kind, SymbolKind::Record);
        assert_eq!(x.kind, SymbolKind::Property);
        assert_eq!(x.container, Some(point.id));
        assert_eq!(x.accessibility, Accessibility::Public);
    }

    #[test]
    fn syntax_errors_are_counted_not_fatal() {
        let parsed = parse_source(PathBuf::from("E.cs"), "T".into(), "class Broken { void M( }".into()).unwrap();
        assert!(parsed.syntax_errors > 0);
        let m = build_source_model(&[parsed]);
        assert_eq!(only(&m, "Broken").kind, SymbolKind::Class);
    }
}
