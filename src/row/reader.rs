// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::row::field_readers::{
    collect_offsets, ColumnShaping, FeatureProjection, FieldReader, RowFieldReader, StreamReader,
};
use crate::row::{ScalarVector, Vector};
use crate::schema::{Kind, ScalarKind, Type};
use crate::tablet::TabletReader;
use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Include,
    Exclude,
}

#[derive(Clone, Debug)]
pub struct FeatureSelector {
    pub mode: SelectionMode,
    pub features: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RowReadOptions {
    /// Top-level columns to materialize; `None` selects all. Streams
    /// of unselected columns are never requested.
    pub columns: Option<Vec<String>>,
    pub flat_map_feature_selector: HashMap<String, FeatureSelector>,
    /// Flat-map columns delivered as fixed-field rows. Requires an
    /// `Include` selector so the field set is closed.
    pub read_flat_map_as_struct: HashSet<String>,
    /// Per-column upcast of stored scalar types to wider ones.
    pub column_types: HashMap<String, ScalarKind>,
    /// Route decode work through the blocking pool.
    pub parallel_decoding: bool,
}

struct SelectedColumn {
    ordinal: usize,
    shaping: ColumnShaping,
    upcast: Option<ScalarKind>,
}

/// Decodes a tablet back into row batches with projection, skip and
/// seek. Construct one per scan; state tracks the read position
/// across stripes.
pub struct RowReader {
    tablet: Arc<TabletReader>,
    selected: Vec<SelectedColumn>,
    parallel_decoding: bool,
    current_stripe: u32,
    rows_left: u32,
    accessible_rows: u64,
    state: Option<RowFieldReader>,
}

impl RowReader {
    pub fn new(tablet: Arc<TabletReader>, options: RowReadOptions) -> NimbleResult<Self> {
        let root = &tablet.schema().root;
        if root.kind != Kind::Row {
            return Err(TracedNimbleError::schema_mismatch(
                "tablet schema root is not a row",
            ));
        }

        let ordinals: Vec<usize> = match &options.columns {
            None => (0..root.children.len()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    tablet.schema().column(name).map(|(i, _)| i).ok_or_else(|| {
                        TracedNimbleError::invalid_argument(format!(
                            "projected column '{name}' does not exist"
                        ))
                    })
                })
                .collect::<NimbleResult<_>>()?,
        };

        for (name, selector) in &options.flat_map_feature_selector {
            let (_, column) = tablet.schema().column(name).ok_or_else(|| {
                TracedNimbleError::invalid_argument(format!(
                    "feature selector names unknown column '{name}'"
                ))
            })?;
            if column.kind != Kind::FlatMap {
                return Err(TracedNimbleError::invalid_argument(format!(
                    "feature selector column '{name}' is not a flat map"
                )));
            }
            if selector.mode == SelectionMode::Include && selector.features.is_empty() {
                return Err(TracedNimbleError::invalid_argument(format!(
                    "empty include feature list for column '{name}'"
                )));
            }
        }
        for name in &options.read_flat_map_as_struct {
            match options.flat_map_feature_selector.get(name) {
                Some(selector) if selector.mode == SelectionMode::Include => {}
                _ => {
                    return Err(TracedNimbleError::invalid_argument(format!(
                        "flat map '{name}' read as struct needs an include feature selector"
                    )))
                }
            }
        }

        let mut selected = vec![];
        for ordinal in ordinals {
            let column = &root.children[ordinal];
            let features = match options.flat_map_feature_selector.get(&column.name) {
                Some(selector) => match selector.mode {
                    SelectionMode::Include => {
                        FeatureProjection::Include(selector.features.clone())
                    }
                    SelectionMode::Exclude => {
                        FeatureProjection::Exclude(selector.features.clone())
                    }
                },
                None => FeatureProjection::All,
            };
            let upcast = match options.column_types.get(&column.name) {
                None => None,
                Some(&target) => {
                    let stored = column.scalar_kind.ok_or_else(|| {
                        TracedNimbleError::schema_mismatch(format!(
                            "column '{}' is not a scalar, cannot convert",
                            column.name
                        ))
                    })?;
                    if !upcast_permitted(stored, target) {
                        return Err(TracedNimbleError::schema_mismatch(format!(
                            "column '{}' stored as {stored:?} cannot upcast to {target:?}",
                            column.name
                        )));
                    }
                    (stored != target).then_some(target)
                }
            };
            selected.push(SelectedColumn {
                ordinal,
                shaping: ColumnShaping {
                    features,
                    as_struct: options.read_flat_map_as_struct.contains(&column.name),
                },
                upcast,
            });
        }

        let accessible_rows = (0..tablet.stripe_count())
            .map(|i| tablet.stripe_row_count(i).map(|r| r as u64))
            .sum::<NimbleResult<u64>>()?;
        let rows_left = if tablet.stripe_count() > 0 {
            tablet.stripe_row_count(0)?
        } else {
            0
        };
        Ok(Self {
            tablet,
            selected,
            parallel_decoding: options.parallel_decoding,
            current_stripe: 0,
            rows_left,
            accessible_rows,
            state: None,
        })
    }

    fn schema_root(&self) -> &Type {
        &self.tablet.schema().root
    }

    fn advance_stripe(&mut self) -> NimbleResult<()> {
        self.state = None;
        self.current_stripe += 1;
        self.rows_left = if self.current_stripe < self.tablet.stripe_count() {
            self.tablet.stripe_row_count(self.current_stripe)?
        } else {
            0
        };
        Ok(())
    }

    /// Fetch the selected streams of the current stripe and build the
    /// decoding stack.
    async fn load_stripe(&mut self) -> NimbleResult<()> {
        let root = self.schema_root().clone();
        let mut offsets = vec![root.nulls_offset()];
        for column in &self.selected {
            collect_offsets(
                &root.children[column.ordinal],
                &column.shaping,
                &mut offsets,
            );
        }
        let loaders = self.tablet.load(self.current_stripe, &offsets).await?;
        let streams: HashMap<u32, crate::tablet::StreamLoader> =
            offsets.iter().copied().zip(loaders).collect();

        let mut children = vec![];
        for column in &self.selected {
            let node = &root.children[column.ordinal];
            children.push(FieldReader::build(
                node,
                &streams,
                &column.shaping,
                self.current_stripe,
            )?);
        }
        let root_nulls = streams.get(&root.nulls_offset()).ok_or_else(|| {
            TracedNimbleError::internal("root nulls stream missing from load")
        })?;
        self.state = Some(RowFieldReader {
            nulls: StreamReader::new(root_nulls, self.current_stripe, root.nulls_offset()),
            children,
        });
        Ok(())
    }

    /// Fill `out` with up to `count` rows; stops at the stripe
    /// boundary. Returns false once all rows are consumed.
    pub async fn next(&mut self, count: usize, out: &mut Vector) -> NimbleResult<bool> {
        loop {
            if self.current_stripe >= self.tablet.stripe_count() {
                return Ok(false);
            }
            if self.rows_left == 0 {
                self.advance_stripe()?;
                continue;
            }
            if self.state.is_none() {
                self.load_stripe().await?;
            }
            let take = (count as u64).min(self.rows_left as u64) as u32;

            let mut batch = if self.parallel_decoding {
                let mut root = self.state.take().ok_or_else(|| {
                    TracedNimbleError::internal("stripe state missing after load")
                })?;
                let (root, result) =
                    tokio::task::spawn_blocking(move || {
                        let result = root.read_columns(take);
                        (root, result)
                    })
                    .await
                    .map_err(|e| {
                        TracedNimbleError::internal(format!("decode task failed: {e}"))
                    })?;
                self.state = Some(root);
                result?
            } else {
                self.state
                    .as_mut()
                    .ok_or_else(|| TracedNimbleError::internal("stripe state missing"))?
                    .read_columns(take)?
            };

            if let Vector::Row(row) = &mut batch {
                for (column, child) in self.selected.iter().zip(row.children.iter_mut()) {
                    if let Some(target) = column.upcast {
                        let owned = std::mem::replace(child, Vector::Bool(ScalarVector::new(vec![])));
                        *child = upcast_scalar(owned, target)?;
                    }
                }
            }
            *out = batch;

            self.rows_left -= take;
            if self.rows_left == 0 {
                self.advance_stripe()?;
            }
            return Ok(true);
        }
    }

    /// Skip up to `count` rows, clamped at end of the accessible
    /// range; returns the number actually skipped. Whole unloaded
    /// stripes are skipped without touching their streams.
    pub async fn skip_rows(&mut self, count: u64) -> NimbleResult<u64> {
        let mut remaining = count;
        let mut skipped = 0u64;
        while remaining > 0 {
            if self.current_stripe >= self.tablet.stripe_count() {
                break;
            }
            if self.rows_left == 0 {
                self.advance_stripe()?;
                continue;
            }
            if self.state.is_none() && remaining >= self.rows_left as u64 {
                skipped += self.rows_left as u64;
                remaining -= self.rows_left as u64;
                self.advance_stripe()?;
                continue;
            }
            if self.state.is_none() {
                self.load_stripe().await?;
            }
            let take = remaining.min(self.rows_left as u64) as u32;
            self.state
                .as_mut()
                .ok_or_else(|| TracedNimbleError::internal("stripe state missing"))?
                .skip(take)?;
            self.rows_left -= take;
            skipped += take as u64;
            remaining -= take as u64;
            if self.rows_left == 0 {
                self.advance_stripe()?;
            }
        }
        Ok(skipped)
    }

    /// Reposition to absolute row `row` (clamped to the accessible
    /// row domain); returns the resulting position.
    pub async fn seek_to_row(&mut self, row: u64) -> NimbleResult<u64> {
        self.state = None;
        self.current_stripe = 0;
        self.rows_left = if self.tablet.stripe_count() > 0 {
            self.tablet.stripe_row_count(0)?
        } else {
            0
        };
        let target = row.min(self.accessible_rows);
        self.skip_rows(target).await
    }

    pub fn accessible_rows(&self) -> u64 {
        self.accessible_rows
    }
}

fn upcast_permitted(from: ScalarKind, to: ScalarKind) -> bool {
    use ScalarKind::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Int8, Int16 | Int32 | Int64)
            | (Int16, Int32 | Int64)
            | (Int32, Int64)
            | (Uint8, Uint16 | Uint32 | Uint64)
            | (Uint16, Uint32 | Uint64)
            | (Uint32, Uint64)
            | (Float, Double)
            | (
                Bool,
                Int8 | Uint8 | Int16 | Uint16 | Int32 | Uint32 | Int64 | Uint64
            )
    )
}

/// Widen a scalar vector element-wise into the requested type.
fn upcast_scalar(vector: Vector, to: ScalarKind) -> NimbleResult<Vector> {
    macro_rules! widen {
        ($v:expr, $to_variant:ident, $to_ty:ty) => {
            Vector::$to_variant(ScalarVector {
                values: $v.values.into_iter().map(|x| x as $to_ty).collect(),
                validity: $v.validity,
            })
        };
    }
    macro_rules! widen_bool {
        ($v:expr, $to_variant:ident, $to_ty:ty) => {
            Vector::$to_variant(ScalarVector {
                values: $v.values.into_iter().map(|x| (x as u8) as $to_ty).collect(),
                validity: $v.validity,
            })
        };
    }
    use ScalarKind::*;
    Ok(match (vector, to) {
        (Vector::Int8(v), Int16) => widen!(v, Int16, i16),
        (Vector::Int8(v), Int32) => widen!(v, Int32, i32),
        (Vector::Int8(v), Int64) => widen!(v, Int64, i64),
        (Vector::Int16(v), Int32) => widen!(v, Int32, i32),
        (Vector::Int16(v), Int64) => widen!(v, Int64, i64),
        (Vector::Int32(v), Int64) => widen!(v, Int64, i64),
        (Vector::Uint8(v), Uint16) => widen!(v, Uint16, u16),
        (Vector::Uint8(v), Uint32) => widen!(v, Uint32, u32),
        (Vector::Uint8(v), Uint64) => widen!(v, Uint64, u64),
        (Vector::Uint16(v), Uint32) => widen!(v, Uint32, u32),
        (Vector::Uint16(v), Uint64) => widen!(v, Uint64, u64),
        (Vector::Uint32(v), Uint64) => widen!(v, Uint64, u64),
        (Vector::Float(v), Double) => widen!(v, Double, f64),
        (Vector::Bool(v), Int8) => widen_bool!(v, Int8, i8),
        (Vector::Bool(v), Uint8) => widen_bool!(v, Uint8, u8),
        (Vector::Bool(v), Int16) => widen_bool!(v, Int16, i16),
        (Vector::Bool(v), Uint16) => widen_bool!(v, Uint16, u16),
        (Vector::Bool(v), Int32) => widen_bool!(v, Int32, i32),
        (Vector::Bool(v), Uint32) => widen_bool!(v, Uint32, u32),
        (Vector::Bool(v), Int64) => widen_bool!(v, Int64, i64),
        (Vector::Bool(v), Uint64) => widen_bool!(v, Uint64, u64),
        (vector, to) => {
            return Err(TracedNimbleError::schema_mismatch(format!(
                "cannot upcast {} to {to:?}",
                vector.type_name()
            )))
        }
    })
}
