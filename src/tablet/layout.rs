// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;

use crate::schema::{Kind, Schema};
use crate::{NimbleResult, TracedNimbleError};

/// One encoded stream produced for a stripe, tagged with its
/// descriptor offset.
pub struct StreamData {
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Orders streams within a stripe. Pure reordering: the output must be
/// a permutation of the input.
pub trait LayoutPlanner: Send + Sync {
    fn layout(&self, schema: &Schema, streams: Vec<StreamData>) -> NimbleResult<Vec<StreamData>>;
}

/// Keeps the incoming (schema) order.
pub struct IdentityLayoutPlanner;

impl LayoutPlanner for IdentityLayoutPlanner {
    fn layout(&self, _schema: &Schema, streams: Vec<StreamData>) -> NimbleResult<Vec<StreamData>> {
        Ok(streams)
    }
}

/// Clusters flat-map feature streams so reads of selected features
/// touch contiguous regions:
/// 1. the root row's nulls stream,
/// 2. per configured column, the flat map's nulls stream then, for
///    each ordered feature present in the schema, its in-map stream
///    followed by the whole value subtree in pre-order,
/// 3. every remaining stream in schema pre-order (deduplicated).
pub struct FlatMapLayoutPlanner {
    /// `(column name, ordered feature names)` per flat-map column.
    feature_order: Vec<(String, Vec<String>)>,
}

impl FlatMapLayoutPlanner {
    pub fn new(feature_order: Vec<(String, Vec<String>)>) -> Self {
        Self { feature_order }
    }
}

impl LayoutPlanner for FlatMapLayoutPlanner {
    fn layout(&self, schema: &Schema, streams: Vec<StreamData>) -> NimbleResult<Vec<StreamData>> {
        let root = &schema.root;
        if root.kind != Kind::Row {
            return Err(TracedNimbleError::invalid_argument(
                "flat map layout planner requires a row schema root",
            ));
        }

        let mut ordered: Vec<u32> = vec![root.nulls_offset()];
        for (column_name, features) in &self.feature_order {
            let (_, column) = schema.column(column_name).ok_or_else(|| {
                TracedNimbleError::invalid_argument(format!(
                    "column '{column_name}' for feature ordering does not exist"
                ))
            })?;
            if column.kind != Kind::FlatMap {
                return Err(TracedNimbleError::invalid_argument(format!(
                    "column '{column_name}' for feature ordering is not a flat map"
                )));
            }
            ordered.push(column.nulls_offset());

            let named_ordinals: HashMap<&str, usize> = column
                .children
                .iter()
                .enumerate()
                .map(|(i, child)| (child.name.as_str(), i))
                .collect();
            for feature in features {
                // Features never written to this file are simply absent.
                let Some(&ordinal) = named_ordinals.get(feature.as_str()) else {
                    continue;
                };
                ordered.push(column.in_map_offset(ordinal));
                column.children[ordinal].append_nested_streams(&mut ordered);
            }
        }

        // Leftovers in schema pre-order; already-emitted offsets dedup.
        ordered.extend(schema.pre_order_streams());

        let input_count = streams.len();
        let mut by_offset: HashMap<u32, StreamData> = streams
            .into_iter()
            .map(|stream| (stream.offset, stream))
            .collect();
        let mut layout = Vec::with_capacity(input_count);
        for offset in ordered {
            if let Some(stream) = by_offset.remove(&offset) {
                layout.push(stream);
            }
        }
        if layout.len() != input_count {
            return Err(TracedNimbleError::internal(format!(
                "stream count mismatch: input {input_count}, output {}",
                layout.len()
            )));
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogicalType, ScalarKind, SchemaBuilder};

    fn flat_map_schema() -> Schema {
        let logical = LogicalType::row(vec![
            ("id", LogicalType::Scalar(ScalarKind::Int64)),
            (
                "fm",
                LogicalType::FlatMap {
                    values: Box::new(LogicalType::Scalar(ScalarKind::Float)),
                },
            ),
        ]);
        let mut builder = SchemaBuilder::new(&logical);
        for key in ["1", "3", "5"] {
            builder.add_flat_map_child(&[1], key).unwrap();
        }
        builder.schema()
    }

    fn streams_for(schema: &Schema) -> Vec<StreamData> {
        (0..schema.stream_count)
            .map(|offset| StreamData {
                offset,
                data: vec![offset as u8],
            })
            .collect()
    }

    #[test]
    fn test_feature_order_clusters_streams() {
        let schema = flat_map_schema();
        // Streams: 0=root nulls, 1=id, 2=fm nulls, 3=in-map(1),
        // 4=values(1), 5=in-map(3), 6=values(3), 7=in-map(5), 8=values(5)
        let planner =
            FlatMapLayoutPlanner::new(vec![("fm".into(), vec!["5".into(), "1".into()])]);
        let layout = planner.layout(&schema, streams_for(&schema)).unwrap();
        let offsets: Vec<u32> = layout.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 2, 7, 8, 3, 4, 1, 5, 6]);
    }

    #[test]
    fn test_missing_feature_skipped() {
        let schema = flat_map_schema();
        let planner =
            FlatMapLayoutPlanner::new(vec![("fm".into(), vec!["99".into(), "3".into()])]);
        let layout = planner.layout(&schema, streams_for(&schema)).unwrap();
        let offsets: Vec<u32> = layout.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 6, 1, 3, 4, 7, 8]);
    }

    #[test]
    fn test_permutation_preserved_with_sparse_streams() {
        let schema = flat_map_schema();
        // Only a subset of slots carry data this stripe.
        let streams: Vec<StreamData> = [0u32, 2, 5, 6]
            .iter()
            .map(|&offset| StreamData {
                offset,
                data: vec![],
            })
            .collect();
        let planner = FlatMapLayoutPlanner::new(vec![("fm".into(), vec!["3".into()])]);
        let layout = planner.layout(&schema, streams).unwrap();
        let offsets: Vec<u32> = layout.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 6]);
    }

    #[test]
    fn test_unknown_column_rejected() {
        let schema = flat_map_schema();
        let planner = FlatMapLayoutPlanner::new(vec![("nope".into(), vec![])]);
        assert!(planner.layout(&schema, streams_for(&schema)).is_err());
    }
}
