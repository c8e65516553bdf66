use crate::field_path::FieldPath;
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One difference between two trees. Added and removed subtrees are reported
/// once, at their root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: FieldPath,
    pub old: Option<Node>,
    pub new: Option<Node>,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Path prefixes whose subtrees are skipped.
    pub ignored: Vec<FieldPath>,
}

impl DiffOptions {
    fn is_ignored(&self, path: &FieldPath) -> bool {
        self.ignored.iter().any(|prefix| path.starts_with(prefix))
    }
}

pub fn diff_nodes(old: &Node, new: &Node, options: &DiffOptions) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(old, new, &mut FieldPath::root(), options, &mut changes);
    changes
}

fn walk(
    old: &Node,
    new: &Node,
    path: &mut FieldPath,
    options: &DiffOptions,
    out: &mut Vec<Change>,
) {
    if options.is_ignored(path) {
        return;
    }
    match (old, new) {
        (Node::Mapping(before), Node::Mapping(after)) => {
            for (key, old_child) in before.iter() {
                path.push_key(key);
                match after.get(key) {
                    Some(new_child) => walk(old_child, new_child, path, options, out),
                    None => record(path, Some(old_child), None, options, out),
                }
                path.pop();
            }
            for (key, new_child) in after.iter() {
                if before.contains_key(key) {
                    continue;
                }
                path.push_key(key);
                record(path, None, Some(new_child), options, out);
                path.pop();
            }
        }
        (Node::Sequence(before), Node::Sequence(after)) => {
            for index in 0..before.len().max(after.len()) {
                path.push_index(index);
                match (before.get(index), after.get(index)) {
                    (Some(old_child), Some(new_child)) => {
                        walk(old_child, new_child, path, options, out)
                    }
                    (old_child, new_child) => record(path, old_child, new_child, options, out),
                }
                path.pop();
            }
        }
        _ => {
            if old != new {
                record(path, Some(old), Some(new), options, out);
            }
        }
    }
}

fn record(
    path: &FieldPath,
    old: Option<&Node>,
    new: Option<&Node>,
    options: &DiffOptions,
    out: &mut Vec<Change>,
) {
    if options.is_ignored(path) {
        return;
    }
    out.push(Change {
        path: path.clone(),
        old: old.cloned(),
        new: new.cloned(),
    });
}
