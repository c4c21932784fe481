//! Restructuring of a schema-less spec into path-indexed fields.
//!
//! A spec document is first lifted into [`SpecNode`] (scalar, list or map) and
//! then walked by a [`SpecVisitor`]. The [`Restructurer`] visitor produces a
//! [`ParsedSpec`]: every path of the document mapped to a [`ParsedField`].

use serde_json::Value;
use std::collections::BTreeMap;

/// Root segment of every rendered path
pub const SPEC_ROOT: &str = "spec";

/// Typed view of an instance spec
#[derive(Debug, Clone, PartialEq)]
pub enum SpecNode {
    /// String, number, bool or null
    Scalar(Value),
    /// Ordered list of nodes
    List(Vec<SpecNode>),
    /// Map of nodes, ordered by key
    Map(BTreeMap<String, SpecNode>),
}

impl From<&Value> for SpecNode {
    fn from(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.iter().map(|(k, v)| (k.clone(), Self::from(v))).collect()),
            scalar => Self::Scalar(scalar.clone()),
        }
    }
}

impl SpecNode {
    /// Converts the node back to JSON
    pub fn to_value(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Map(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()),
        }
    }

    /// True for a map with at least one child
    pub fn is_populated_map(&self) -> bool {
        matches!(self, Self::Map(map) if !map.is_empty())
    }

    /// Walks the node depth-first, parents before children
    pub fn accept<V: SpecVisitor>(&self, branch: &mut Vec<String>, visitor: &mut V) {
        match self {
            Self::Scalar(value) => visitor.visit_scalar(branch, value),
            Self::List(items) => visitor.visit_list(branch, items),
            Self::Map(map) => {
                visitor.visit_map(branch, self);
                for (key, child) in map {
                    branch.push(key.clone());
                    child.accept(branch, visitor);
                    branch.pop();
                }
            }
        }
    }
}

/// Visitor over a [`SpecNode`] tree
///
/// Lists are handed over whole: the visitor decides how to descend.
pub trait SpecVisitor {
    /// A scalar leaf at `branch`
    fn visit_scalar(&mut self, branch: &[String], value: &Value);
    /// A list at `branch`
    fn visit_list(&mut self, branch: &[String], items: &[SpecNode]);
    /// A map at `branch`, before its children are visited
    fn visit_map(&mut self, branch: &[String], node: &SpecNode);
}

/// A node of the restructured spec
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedField {
    /// Path segments, starting with `spec`
    pub branch: Vec<String>,
    /// Raw value of the node
    pub value: Value,
    /// One field per element when the node is a list
    pub array: Option<Vec<ParsedField>>,
    /// True for maps with children; they exist only to enable calculations
    pub intermediate_node: bool,
}

impl ParsedField {
    /// Dot-joined path (e.g. `spec.skills.cooking`)
    pub fn path(&self) -> String {
        self.branch.join(".")
    }

    /// Default parameter name: upper-cased segments joined by `_`, root dropped
    pub fn default_name(&self) -> String {
        self.branch
            .iter()
            .skip(1)
            .map(|segment| segment.to_uppercase())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// True if any list element is an object
    pub fn has_object_elements(&self) -> bool {
        matches!(&self.value, Value::Array(items) if items.iter().any(Value::is_object))
    }
}

/// Path-indexed view of a spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSpec {
    /// Renderable fields, ordered by path
    fields: BTreeMap<String, ParsedField>,
    /// Fields nested inside list elements; looked up but never rendered
    elements: BTreeMap<String, ParsedField>,
}

impl ParsedSpec {
    /// Restructures a spec document rooted at `spec`
    pub fn parse(spec: &Value) -> Self {
        let node = SpecNode::from(spec);
        let mut restructurer = Restructurer::default();
        let mut branch = vec![SPEC_ROOT.to_string()];
        node.accept(&mut branch, &mut restructurer);
        restructurer.parsed
    }

    /// Renderable fields in lexicographic path order
    ///
    /// A parent path is a prefix of its descendants and therefore always
    /// sorts before them.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &ParsedField)> {
        self.fields.iter()
    }

    /// Looks up any field, including those nested in list elements
    pub fn lookup(&self, path: &str) -> Option<&ParsedField> {
        self.fields.get(path).or_else(|| self.elements.get(path))
    }

    /// Number of renderable fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there are no renderable fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builds a [`ParsedSpec`]
#[derive(Debug, Default)]
struct Restructurer {
    parsed: ParsedSpec,
    /// Depth of list nesting; non-zero means fields go to `elements`
    in_list: usize,
}

impl Restructurer {
    fn insert(&mut self, field: ParsedField) {
        let path = field.path();
        if self.in_list > 0 {
            self.parsed.elements.insert(path, field);
        } else {
            self.parsed.fields.insert(path, field);
        }
    }

    /// Restructures list elements, tagging each with its ordinal
    fn element_fields(&mut self, branch: &[String], items: &[SpecNode]) -> Vec<ParsedField> {
        self.in_list += 1;
        let mut fields = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut element_branch = branch.to_vec();
            element_branch.push(index.to_string());
            fields.push(ParsedField {
                branch: element_branch.clone(),
                value: item.to_value(),
                array: None,
                intermediate_node: item.is_populated_map(),
            });
            // Object elements recurse so their members can be looked up
            if let SpecNode::Map(map) = item {
                for (key, child) in map {
                    element_branch.push(key.clone());
                    child.accept(&mut element_branch, self);
                    element_branch.pop();
                }
            }
        }
        self.in_list -= 1;
        fields
    }
}

impl SpecVisitor for Restructurer {
    fn visit_scalar(&mut self, branch: &[String], value: &Value) {
        if branch.len() > 1 {
            self.insert(ParsedField {
                branch: branch.to_vec(),
                value: value.clone(),
                array: None,
                intermediate_node: false,
            });
        }
    }

    fn visit_list(&mut self, branch: &[String], items: &[SpecNode]) {
        let array = self.element_fields(branch, items);
        if branch.len() > 1 {
            self.insert(ParsedField {
                branch: branch.to_vec(),
                value: Value::Array(items.iter().map(SpecNode::to_value).collect()),
                array: Some(array),
                intermediate_node: false,
            });
        }
    }

    fn visit_map(&mut self, branch: &[String], node: &SpecNode) {
        // The root `spec` map itself is never a field
        if branch.len() > 1 {
            self.insert(ParsedField {
                branch: branch.to_vec(),
                value: node.to_value(),
                array: None,
                intermediate_node: node.is_populated_map(),
            });
        }
    }
}
