// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;

use crate::schema::{Kind, LogicalType, Schema, Type};
use crate::{NimbleResult, TracedNimbleError};

/// Binds a [`LogicalType`] to stream descriptors. The initial binding
/// assigns offsets densely in pre-order; flat-map children appended
/// later (as the writer observes new keys) take the next free offsets,
/// so earlier descriptors never move.
pub struct SchemaBuilder {
    root: Type,
    next_offset: u32,
    /// Value-subtree template per flat-map node, keyed by its path
    /// (child indexes from the root).
    templates: HashMap<Vec<usize>, LogicalType>,
}

impl SchemaBuilder {
    pub fn new(logical: &LogicalType) -> Self {
        let mut builder = Self {
            root: Type {
                kind: Kind::Row,
                scalar_kind: None,
                name: String::new(),
                offsets: vec![],
                children: vec![],
            },
            next_offset: 0,
            templates: HashMap::new(),
        };
        builder.root = builder.bind(logical, String::new(), &mut vec![]);
        builder
    }

    fn bind(&mut self, logical: &LogicalType, name: String, path: &mut Vec<usize>) -> Type {
        match logical {
            LogicalType::Scalar(scalar_kind) => Type {
                kind: Kind::Scalar,
                scalar_kind: Some(*scalar_kind),
                name,
                offsets: vec![self.allocate()],
                children: vec![],
            },
            LogicalType::Row { names, children } => {
                let offsets = vec![self.allocate()];
                let children = names
                    .iter()
                    .zip(children)
                    .enumerate()
                    .map(|(i, (child_name, child))| {
                        path.push(i);
                        let bound = self.bind(child, child_name.clone(), path);
                        path.pop();
                        bound
                    })
                    .collect();
                Type {
                    kind: Kind::Row,
                    scalar_kind: None,
                    name,
                    offsets,
                    children,
                }
            }
            LogicalType::Array(elements) => {
                let offsets = vec![self.allocate()];
                path.push(0);
                let elements = self.bind(elements, String::new(), path);
                path.pop();
                Type {
                    kind: Kind::Array,
                    scalar_kind: None,
                    name,
                    offsets,
                    children: vec![elements],
                }
            }
            LogicalType::Map { keys, values } => {
                let offsets = vec![self.allocate()];
                path.push(0);
                let keys = self.bind(keys, String::new(), path);
                path.pop();
                path.push(1);
                let values = self.bind(values, String::new(), path);
                path.pop();
                Type {
                    kind: Kind::Map,
                    scalar_kind: None,
                    name,
                    offsets,
                    children: vec![keys, values],
                }
            }
            LogicalType::FlatMap { values } => {
                self.templates.insert(path.clone(), (**values).clone());
                Type {
                    kind: Kind::FlatMap,
                    scalar_kind: None,
                    name,
                    offsets: vec![self.allocate()],
                    children: vec![],
                }
            }
            LogicalType::ArrayWithOffsets(elements) => {
                let offsets = vec![self.allocate(), self.allocate()];
                path.push(0);
                let elements = self.bind(elements, String::new(), path);
                path.pop();
                Type {
                    kind: Kind::ArrayWithOffsets,
                    scalar_kind: None,
                    name,
                    offsets,
                    children: vec![elements],
                }
            }
            LogicalType::SlidingWindowMap { values } => {
                let offsets = vec![self.allocate(), self.allocate()];
                path.push(0);
                let values = self.bind(values, String::new(), path);
                path.pop();
                Type {
                    kind: Kind::SlidingWindowMap,
                    scalar_kind: None,
                    name,
                    offsets,
                    children: vec![values],
                }
            }
        }
    }

    fn allocate(&mut self) -> u32 {
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }

    fn node_mut(&mut self, path: &[usize]) -> NimbleResult<&mut Type> {
        let mut node = &mut self.root;
        for &index in path {
            node = node.children.get_mut(index).ok_or_else(|| {
                TracedNimbleError::invalid_argument(format!("no schema node at path {path:?}"))
            })?;
        }
        Ok(node)
    }

    /// Register a newly observed flat-map key: assigns an in-map
    /// descriptor plus the value subtree's descriptors, and returns
    /// the new child's index within the flat map.
    pub fn add_flat_map_child(&mut self, path: &[usize], key: &str) -> NimbleResult<usize> {
        let template = self
            .templates
            .get(path)
            .ok_or_else(|| {
                TracedNimbleError::invalid_argument(format!(
                    "schema node at {path:?} is not a flat map"
                ))
            })?
            .clone();
        let node = self.node_mut(path)?;
        if node.children.iter().any(|child| child.name == key) {
            return Err(TracedNimbleError::invalid_argument(format!(
                "flat map already has key '{key}'"
            )));
        }
        let in_map_offset = self.allocate();
        let mut scratch_path = vec![];
        let child = self.bind(&template, key.to_string(), &mut scratch_path);

        let node = self.node_mut(path)?;
        node.offsets.push(in_map_offset);
        node.children.push(child);
        Ok(node.children.len() - 1)
    }

    /// Immutable lookup by child-index path from the root.
    pub fn node(&self, path: &[usize]) -> NimbleResult<&Type> {
        let mut node = &self.root;
        for &index in path {
            node = node.children.get(index).ok_or_else(|| {
                TracedNimbleError::invalid_argument(format!("no schema node at path {path:?}"))
            })?;
        }
        Ok(node)
    }

    pub fn stream_count(&self) -> u32 {
        self.next_offset
    }

    pub fn root(&self) -> &Type {
        &self.root
    }

    pub fn schema(&self) -> Schema {
        Schema {
            root: self.root.clone(),
            stream_count: self.next_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarKind;

    #[test]
    fn test_pre_order_assignment() {
        // ROW{a: i32, b: ARRAY<f64>, c: MAP<i64, string>}
        let logical = LogicalType::row(vec![
            ("a", LogicalType::Scalar(ScalarKind::Int32)),
            (
                "b",
                LogicalType::Array(Box::new(LogicalType::Scalar(ScalarKind::Double))),
            ),
            (
                "c",
                LogicalType::Map {
                    keys: Box::new(LogicalType::Scalar(ScalarKind::Int64)),
                    values: Box::new(LogicalType::Scalar(ScalarKind::String)),
                },
            ),
        ]);
        let builder = SchemaBuilder::new(&logical);
        let root = builder.root();
        assert_eq!(root.offsets, vec![0]);
        assert_eq!(root.children[0].offsets, vec![1]);
        assert_eq!(root.children[1].offsets, vec![2]);
        assert_eq!(root.children[1].children[0].offsets, vec![3]);
        assert_eq!(root.children[2].offsets, vec![4]);
        assert_eq!(root.children[2].children[0].offsets, vec![5]);
        assert_eq!(root.children[2].children[1].offsets, vec![6]);
        assert_eq!(builder.stream_count(), 7);
    }

    #[test]
    fn test_flat_map_growth_appends_offsets() {
        let logical = LogicalType::row(vec![(
            "fm",
            LogicalType::FlatMap {
                values: Box::new(LogicalType::Array(Box::new(LogicalType::Scalar(
                    ScalarKind::Float,
                )))),
            },
        )]);
        let mut builder = SchemaBuilder::new(&logical);
        // root nulls = 0, flat map nulls = 1
        assert_eq!(builder.stream_count(), 2);

        let first = builder.add_flat_map_child(&[0], "k1").unwrap();
        assert_eq!(first, 0);
        // in-map = 2, array lengths = 3, elements = 4
        assert_eq!(builder.stream_count(), 5);
        let fm = &builder.root().children[0];
        assert_eq!(fm.offsets, vec![1, 2]);
        assert_eq!(fm.children[0].offsets, vec![3]);

        let second = builder.add_flat_map_child(&[0], "k2").unwrap();
        assert_eq!(second, 1);
        assert_eq!(builder.stream_count(), 8);

        assert!(builder.add_flat_map_child(&[0], "k1").is_err());
        assert!(builder.add_flat_map_child(&[0, 0], "x").is_err());
    }

    #[test]
    fn test_dedup_array_descriptors() {
        let logical = LogicalType::row(vec![(
            "ids",
            LogicalType::ArrayWithOffsets(Box::new(LogicalType::Scalar(ScalarKind::Int64))),
        )]);
        let builder = SchemaBuilder::new(&logical);
        let array = &builder.root().children[0];
        assert_eq!(array.offsets, vec![1, 2]);
        assert_eq!(array.children[0].offsets, vec![3]);
        assert_eq!(builder.stream_count(), 4);
    }
}
