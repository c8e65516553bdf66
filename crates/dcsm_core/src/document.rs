use crate::codec;
use crate::diff::{Change, DiffOptions, diff_nodes};
use crate::envelope::Envelope;
use crate::error::{CoreError, Result};
use crate::field_path::{FieldPath, Segment};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The parent container and the target slot must already exist.
    Existing,
    /// Missing intermediate containers are created; sequences may grow by
    /// appending at `index == len`.
    AllowCreate,
}

/// Decoded artifact: the editable tree, the tree as it was decoded (or last
/// committed) and the envelope needed to re-encode it.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveDocument {
    root: Node,
    pristine: Node,
    envelope: Envelope,
}

impl SaveDocument {
    pub fn new(root: Node) -> Self {
        Self::from_parts(root, Envelope::default())
    }

    pub(crate) fn from_parts(root: Node, envelope: Envelope) -> Self {
        Self {
            pristine: root.clone(),
            root,
            envelope,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn pristine(&self) -> &Node {
        &self.pristine
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Node> {
        self.root.get_path(path)
    }

    pub fn read(&self, path: &FieldPath) -> Result<&Node> {
        self.get(path)
            .ok_or_else(|| CoreError::PathNotFound(path.clone()))
    }

    /// Stores `value` at `path` and returns the value it replaced, if any.
    pub fn write(&mut self, path: &FieldPath, value: Node, mode: WriteMode) -> Result<Option<Node>> {
        let Some((parents, last)) = path.split_last() else {
            return Ok(Some(std::mem::replace(&mut self.root, value)));
        };
        let not_found = || CoreError::PathNotFound(path.clone());

        match mode {
            WriteMode::Existing => {
                let parent = self
                    .root
                    .get_path_mut(&FieldPath::new(parents.to_vec()))
                    .ok_or_else(not_found)?;
                assign(parent, last, value, mode).ok_or_else(not_found)
            }
            WriteMode::AllowCreate => {
                // Intermediate containers are built on a copy so a failed
                // write leaves the tree untouched.
                let mut staged = self.root.clone();
                let replaced = create_and_assign(&mut staged, parents, last, value)
                    .ok_or_else(not_found)?;
                self.root = staged;
                Ok(replaced)
            }
        }
    }

    /// Parses `literal` as a JSON value and writes it. The document is left
    /// unchanged when the literal is malformed.
    pub fn write_literal(
        &mut self,
        path: &FieldPath,
        literal: &str,
        mode: WriteMode,
    ) -> Result<Option<Node>> {
        let value = parse_literal(literal)?;
        self.write(path, value, mode)
    }

    pub fn remove(&mut self, path: &FieldPath) -> Result<Node> {
        let not_found = || CoreError::PathNotFound(path.clone());
        let (parents, last) = path.split_last().ok_or_else(|| CoreError::InvalidPath {
            path: String::new(),
            reason: "the root cannot be removed".to_string(),
        })?;
        let parent = self
            .root
            .get_path_mut(&FieldPath::new(parents.to_vec()))
            .ok_or_else(not_found)?;
        match (parent, last) {
            (Node::Mapping(map), Segment::Key(key)) => map.remove(key).ok_or_else(not_found),
            (Node::Sequence(items), segment) => {
                let index = match segment {
                    Segment::Index(index) => Some(*index),
                    Segment::Key(key) => key.parse::<usize>().ok(),
                };
                match index {
                    Some(index) if index < items.len() => Ok(items.remove(index)),
                    _ => Err(not_found()),
                }
            }
            _ => Err(not_found()),
        }
    }

    pub fn diff(&self, other: &SaveDocument) -> Vec<Change> {
        self.diff_with(other, &DiffOptions::default())
    }

    pub fn diff_with(&self, other: &SaveDocument, options: &DiffOptions) -> Vec<Change> {
        diff_nodes(&self.root, &other.root, options)
    }

    /// Pending edits since decode or the last commit.
    pub fn changes(&self) -> Vec<Change> {
        diff_nodes(&self.pristine, &self.root, &DiffOptions::default())
    }

    pub fn is_modified(&self) -> bool {
        self.pristine != self.root
    }

    pub fn commit(&mut self) {
        self.pristine = self.root.clone();
    }

    pub fn revert(&mut self) {
        self.root = self.pristine.clone();
    }
}

/// Parses user input as a JSON literal (`true`, `3`, `"text"`, `{"a":1}`).
pub fn parse_literal(literal: &str) -> Result<Node> {
    codec::parse_json(literal.trim())
        .map_err(|e| CoreError::InvalidValue(format!("{literal:?} is not a JSON value: {e}")))
}

fn create_and_assign(
    root: &mut Node,
    parents: &[Segment],
    last: &Segment,
    value: Node,
) -> Option<Option<Node>> {
    let mut current = root;
    for (i, segment) in parents.iter().enumerate() {
        let next = parents.get(i + 1).unwrap_or(last);
        current = ensure_child(current, segment, next)?;
    }
    assign(current, last, value, WriteMode::AllowCreate)
}

fn ensure_child<'a>(node: &'a mut Node, segment: &Segment, next: &Segment) -> Option<&'a mut Node> {
    match (node, segment) {
        (Node::Mapping(map), Segment::Key(key)) => {
            if !map.contains_key(key) {
                map.insert(key.clone(), Node::container_for(next));
            }
            map.get_mut(key)
        }
        (Node::Sequence(items), Segment::Index(index)) => {
            if *index == items.len() {
                items.push(Node::container_for(next));
            }
            items.get_mut(*index)
        }
        (Node::Sequence(items), Segment::Key(key)) => key
            .parse::<usize>()
            .ok()
            .and_then(move |index| items.get_mut(index)),
        _ => None,
    }
}

fn assign(parent: &mut Node, last: &Segment, value: Node, mode: WriteMode) -> Option<Option<Node>> {
    let index = match (&*parent, last) {
        (Node::Sequence(_), Segment::Index(index)) => Some(*index),
        (Node::Sequence(_), Segment::Key(key)) => Some(key.parse::<usize>().ok()?),
        _ => None,
    };
    match (parent, last) {
        (Node::Mapping(map), Segment::Key(key)) => {
            if mode == WriteMode::Existing && !map.contains_key(key) {
                return None;
            }
            Some(map.insert(key.clone(), value))
        }
        (Node::Sequence(items), _) => {
            let index = index?;
            if index < items.len() {
                Some(Some(std::mem::replace(&mut items[index], value)))
            } else if index == items.len() && mode == WriteMode::AllowCreate {
                items.push(value);
                Some(None)
            } else {
                None
            }
        }
        _ => None,
    }
}
