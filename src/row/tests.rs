// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! End-to-end write/read scenarios over in-memory tablets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitvec::prelude::BitVec;
use bytes::Bytes;

use crate::encodings::CompressionOptions;
use crate::row::{
    CallbackFlushPolicy, FeatureSelector, FlatMapVector, FlushDecision, ListVector, MapVector,
    RowReadOptions, RowReader, RowWriter, ScalarVector, SelectionMode, Vector, WriterOptions,
};
use crate::schema::{Kind, LogicalType, ScalarKind};
use crate::tablet::{ReadableFile, TabletReadOptions, TabletReader, CHUNK_HEADER_SIZE};
use crate::NimbleError;

async fn write_tablet(
    logical: &LogicalType,
    options: WriterOptions,
    stripes: Vec<Vec<Vector>>,
) -> Vec<u8> {
    let mut sink = vec![];
    let mut writer = RowWriter::new(logical, &mut sink, options).unwrap();
    for batches in stripes {
        for batch in batches {
            writer.write(&batch).await.unwrap();
        }
        writer.flush_stripe().await.unwrap();
    }
    writer.close().await.unwrap();
    sink
}

async fn open_reader(bytes: Vec<u8>, options: RowReadOptions) -> (Arc<TabletReader>, RowReader) {
    let tablet = Arc::new(
        TabletReader::open(
            ReadableFile::Memory(Bytes::from(bytes)),
            TabletReadOptions::default(),
        )
        .await
        .unwrap(),
    );
    let reader = RowReader::new(tablet.clone(), options).unwrap();
    (tablet, reader)
}

/// Drain the reader `count` rows at a time, concatenating scalar
/// columns into options form.
async fn collect_i32_column(reader: &mut RowReader, column: usize) -> Vec<Option<i32>> {
    let mut all = vec![];
    let mut out = Vector::batch(vec![]);
    while reader.next(1024, &mut out).await.unwrap() {
        let Vector::Row(row) = &out else { unreachable!() };
        let Vector::Int32(v) = &row.children[column] else {
            unreachable!()
        };
        all.extend(v.to_options());
    }
    all
}

fn scalar_schema() -> LogicalType {
    LogicalType::row(vec![
        ("a", LogicalType::Scalar(ScalarKind::Int32)),
        ("b", LogicalType::Scalar(ScalarKind::Double)),
    ])
}

#[tokio::test]
async fn test_scalar_round_trip_two_stripes() {
    let bytes = write_tablet(
        &scalar_schema(),
        WriterOptions::default(),
        vec![
            vec![Vector::batch(vec![
                Vector::from(vec![1i32, 2, 3]),
                Vector::from(vec![1.1f64, 2.2, 3.3]),
            ])],
            vec![Vector::batch(vec![
                Vector::from(vec![4i32, 5, 6]),
                Vector::from(vec![4.4f64, 5.5, 6.6]),
            ])],
        ],
    )
    .await;

    let (tablet, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    assert_eq!(tablet.stripe_count(), 2);
    assert_eq!(tablet.tablet_row_count(), 6);
    tablet.verify_checksum().await.unwrap();

    let mut a = vec![];
    let mut b = vec![];
    let mut out = Vector::batch(vec![]);
    while reader.next(6, &mut out).await.unwrap() {
        let Vector::Row(row) = &out else { unreachable!() };
        let Vector::Int32(va) = &row.children[0] else {
            unreachable!()
        };
        let Vector::Double(vb) = &row.children[1] else {
            unreachable!()
        };
        a.extend(va.values.iter().copied());
        b.extend(vb.values.iter().copied());
    }
    assert_eq!(a, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(b, vec![1.1, 2.2, 3.3, 4.4, 5.5, 6.6]);

    let mut out = Vector::batch(vec![]);
    assert!(!reader.next(1, &mut out).await.unwrap());
}

#[tokio::test]
async fn test_null_handling() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let input = vec![Some(1i32), None, Some(3), None, Some(5)];
    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![Vector::from(input.clone())])]],
    )
    .await;

    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    assert_eq!(collect_i32_column(&mut reader, 0).await, input);
}

#[tokio::test]
async fn test_constant_column_compresses() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![Vector::from(vec![7i32; 10])])]],
    )
    .await;

    let (tablet, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    // Stream 1 is the values stream; its bytes must beat the raw dump.
    let sizes = tablet.stream_sizes(0).unwrap();
    assert!(sizes[1] > 0);
    assert!((sizes[1] as usize) < 10 * std::mem::size_of::<i32>());
    assert_eq!(
        collect_i32_column(&mut reader, 0).await,
        vec![Some(7); 10]
    );
}

#[tokio::test]
async fn test_string_round_trip_with_long_and_empty_values() {
    let logical = LogicalType::row(vec![("s", LogicalType::Scalar(ScalarKind::String))]);
    let long = "x".repeat(100_000);
    let values = vec![Some("alpha"), None, Some(""), Some(long.as_str()), None];
    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![Vector::from(values.clone())])]],
    )
    .await;

    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(10, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::String(v) = &row.children[0] else {
        unreachable!()
    };
    let decoded: Vec<Option<String>> = v
        .to_options()
        .into_iter()
        .map(|o| o.map(|b| String::from_utf8(b.to_vec()).unwrap()))
        .collect();
    let expected: Vec<Option<String>> = values
        .iter()
        .map(|o| o.map(|s| s.to_string()))
        .collect();
    assert_eq!(decoded, expected);
}

fn feature_batch(rows: usize, keys: &[i32], base: usize) -> Vector {
    // Key `k` is present on rows where (row + k) % 3 == 0.
    let mut in_maps = vec![];
    let mut children = vec![];
    for &key in keys {
        let bits: BitVec<u8, bitvec::order::Lsb0> = (0..rows)
            .map(|row| (base + row + key as usize) % 3 == 0)
            .collect();
        let values: Vec<f32> = (0..rows)
            .filter(|row| (base + row + key as usize) % 3 == 0)
            .map(|row| (base + row) as f32 + key as f32 / 10.0)
            .collect();
        in_maps.push(bits);
        children.push(Vector::from(values));
    }
    Vector::batch(vec![Vector::FlatMap(FlatMapVector {
        rows,
        validity: None,
        keys: keys.iter().map(|k| k.to_string()).collect(),
        in_maps,
        children,
    })])
}

fn flat_map_logical() -> LogicalType {
    LogicalType::row(vec![(
        "fm",
        LogicalType::Map {
            keys: Box::new(LogicalType::Scalar(ScalarKind::Int32)),
            values: Box::new(LogicalType::Scalar(ScalarKind::Float)),
        },
    )])
}

fn flat_map_writer_options() -> WriterOptions {
    WriterOptions {
        flat_map_columns: HashSet::from(["fm".to_string()]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_flat_map_projection_reads_only_selected_streams() {
    let keys: Vec<i32> = (0..10).collect();
    let bytes = write_tablet(
        &flat_map_logical(),
        flat_map_writer_options(),
        vec![vec![feature_batch(500, &keys, 0)]],
    )
    .await;

    let (file, log) = ReadableFile::Memory(Bytes::from(bytes)).traced();
    // Coalescing off so every read maps to exactly one stream.
    let tablet = Arc::new(
        TabletReader::open(
            file,
            TabletReadOptions {
                should_coalesce: false,
                ..Default::default()
            },
        )
        .await
        .unwrap(),
    );
    log.lock().clear();

    let mut reader = RowReader::new(
        tablet.clone(),
        RowReadOptions {
            flat_map_feature_selector: HashMap::from([(
                "fm".to_string(),
                FeatureSelector {
                    mode: SelectionMode::Include,
                    features: vec!["1".into(), "3".into(), "5".into()],
                },
            )]),
            ..Default::default()
        },
    )
    .unwrap();

    let mut out = Vector::batch(vec![]);
    assert!(reader.next(500, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::FlatMap(fm) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(fm.keys, vec!["1", "3", "5"]);
    assert_eq!(fm.rows, 500);
    for (i, key) in [1usize, 3, 5].iter().enumerate() {
        let expected: Vec<f32> = (0..500)
            .filter(|row| (row + key) % 3 == 0)
            .map(|row| row as f32 + *key as f32 / 10.0)
            .collect();
        let Vector::Float(values) = &fm.children[i] else {
            unreachable!()
        };
        assert_eq!(values.values, expected);
    }

    // Every fetched byte range must fall inside a selected stream.
    let schema = tablet.schema().clone();
    let fm_node = &schema.root.children[0];
    assert_eq!(fm_node.kind, Kind::FlatMap);
    let mut allowed: Vec<u32> = vec![schema.root.nulls_offset(), fm_node.nulls_offset()];
    for (i, child) in fm_node.children.iter().enumerate() {
        if ["1", "3", "5"].contains(&child.name.as_str()) {
            allowed.push(fm_node.in_map_offset(i));
            child.append_nested_streams(&mut allowed);
        }
    }
    let stripe_offset = tablet.stripe_offset(0).unwrap();
    let offsets = tablet.stream_offsets(0).unwrap();
    let sizes = tablet.stream_sizes(0).unwrap();
    let allowed_ranges: Vec<(u64, u64)> = allowed
        .iter()
        .filter(|&&id| sizes[id as usize] > 0)
        .map(|&id| {
            let start = stripe_offset + offsets[id as usize] as u64;
            (start, start + sizes[id as usize] as u64)
        })
        .collect();
    for &(read_start, read_len) in log.lock().iter() {
        let read_end = read_start + read_len;
        let contained = allowed_ranges
            .iter()
            .any(|&(start, end)| read_start >= start && read_end <= end);
        assert!(
            contained,
            "read [{read_start}, {read_end}) touches unselected streams"
        );
    }
}

#[tokio::test]
async fn test_flat_map_new_key_mid_stripe_backfills() {
    let bytes = write_tablet(
        &flat_map_logical(),
        flat_map_writer_options(),
        vec![vec![
            feature_batch(6, &[1], 0),
            feature_batch(6, &[1, 2], 6),
        ]],
    )
    .await;

    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(12, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::FlatMap(fm) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(fm.keys, vec!["1", "2"]);
    // Key "2" was first observed at row 6: all earlier rows read as
    // not-in-map.
    let key2 = &fm.in_maps[1];
    assert!(key2[..6].iter().by_vals().all(|bit| !bit));
    let expected_tail: Vec<bool> = (6..12).map(|row| (row + 2) % 3 == 0).collect();
    assert_eq!(key2[6..].iter().by_vals().collect::<Vec<_>>(), expected_tail);
}

#[tokio::test]
async fn test_flat_map_as_struct() {
    let bytes = write_tablet(
        &flat_map_logical(),
        flat_map_writer_options(),
        vec![vec![feature_batch(9, &[0, 1], 0)]],
    )
    .await;

    let (_, mut reader) = open_reader(
        bytes,
        RowReadOptions {
            flat_map_feature_selector: HashMap::from([(
                "fm".to_string(),
                FeatureSelector {
                    mode: SelectionMode::Include,
                    features: vec!["0".into(), "1".into()],
                },
            )]),
            read_flat_map_as_struct: HashSet::from(["fm".to_string()]),
            ..Default::default()
        },
    )
    .await;

    let mut out = Vector::batch(vec![]);
    assert!(reader.next(9, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::Row(fm_struct) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(fm_struct.rows, 9);
    let Vector::Float(key0) = &fm_struct.children[0] else {
        unreachable!()
    };
    let expected: Vec<Option<f32>> = (0..9)
        .map(|row| (row % 3 == 0).then(|| row as f32))
        .collect();
    assert_eq!(key0.to_options(), expected);
}

#[tokio::test]
async fn test_skip_across_stripes_and_seek() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let stripes: Vec<Vec<Vector>> = (0..3)
        .map(|s| {
            vec![Vector::batch(vec![Vector::from(
                (s * 10..s * 10 + 10).collect::<Vec<i32>>(),
            )])]
        })
        .collect();
    let bytes = write_tablet(&logical, WriterOptions::default(), stripes).await;

    let (_, mut reader) = open_reader(bytes.clone(), RowReadOptions::default()).await;
    assert_eq!(reader.skip_rows(12).await.unwrap(), 12);
    let mut collected = vec![];
    let mut out = Vector::batch(vec![]);
    while collected.len() < 10 {
        assert!(reader.next(10 - collected.len(), &mut out).await.unwrap());
        let Vector::Row(row) = &out else { unreachable!() };
        let Vector::Int32(v) = &row.children[0] else {
            unreachable!()
        };
        collected.extend(v.values.iter().copied());
    }
    assert_eq!(collected, (12..22).collect::<Vec<i32>>());

    // Exhaust, then confirm EOF.
    assert_eq!(reader.skip_rows(100).await.unwrap(), 8);
    assert!(!reader.next(1, &mut out).await.unwrap());

    // Seek equivalence: seek(r) then reading matches a fresh scan.
    let (_, mut seeker) = open_reader(bytes, RowReadOptions::default()).await;
    assert_eq!(seeker.seek_to_row(25).await.unwrap(), 25);
    assert!(seeker.next(3, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::Int32(v) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(v.values, vec![25, 26, 27]);
    assert_eq!(seeker.seek_to_row(1000).await.unwrap(), 30);
}

#[tokio::test]
async fn test_nested_array_and_map_round_trip() {
    let logical = LogicalType::row(vec![
        (
            "tags",
            LogicalType::Array(Box::new(LogicalType::Scalar(ScalarKind::Int64))),
        ),
        (
            "attrs",
            LogicalType::Map {
                keys: Box::new(LogicalType::Scalar(ScalarKind::String)),
                values: Box::new(LogicalType::Scalar(ScalarKind::Int32)),
            },
        ),
    ]);

    let tags = Vector::Array(ListVector {
        validity: Some([true, false, true, true].iter().copied().collect()),
        lengths: vec![2, 0, 3],
        elements: Box::new(Vector::from(vec![10i64, 20, 30, 40, 50])),
    });
    let attrs = Vector::Map(MapVector {
        validity: None,
        lengths: vec![1, 2, 0, 1],
        keys: Box::new(Vector::from(vec!["k1", "k2", "k3", "k4"])),
        values: Box::new(Vector::from(vec![1i32, 2, 3, 4])),
    });
    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![tags.clone(), attrs.clone()])]],
    )
    .await;

    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(4, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    assert_eq!(row.children[0], tags);
    assert_eq!(row.children[1], attrs);
}

#[tokio::test]
async fn test_dictionary_array_dedups_consecutive() {
    let logical = LogicalType::row(vec![(
        "ids",
        LogicalType::Array(Box::new(LogicalType::Scalar(ScalarKind::Int32))),
    )]);
    // Three identical arrays in a row, then a different one.
    let list = ListVector {
        validity: None,
        lengths: vec![2, 2, 2, 3],
        elements: Box::new(Vector::from(vec![7i32, 8, 7, 8, 7, 8, 1, 2, 3])),
    };
    let bytes = write_tablet(
        &logical,
        WriterOptions {
            dictionary_array_columns: HashSet::from(["ids".to_string()]),
            ..Default::default()
        },
        vec![vec![Vector::batch(vec![Vector::Array(list.clone())])]],
    )
    .await;

    let (tablet, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    // Deduped elements: only 5 values stored (7, 8, 1, 2, 3).
    let schema = tablet.schema().clone();
    let ids = &schema.root.children[0];
    assert_eq!(ids.kind, Kind::ArrayWithOffsets);

    let mut out = Vector::batch(vec![]);
    assert!(reader.next(4, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::Array(decoded) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(decoded.lengths, list.lengths);
    assert_eq!(*decoded.elements, *list.elements);
}

#[tokio::test]
async fn test_chunked_stream_round_trip() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let mut sink = vec![];
    let mut writer = RowWriter::new(
        &logical,
        &mut sink,
        WriterOptions {
            enable_chunking: true,
            min_chunk_raw_size: 0,
            flush_policy: Box::new(CallbackFlushPolicy::new(|_| FlushDecision::Chunk)),
            ..Default::default()
        },
    )
    .unwrap();
    for batch in 0..5 {
        let values: Vec<i32> = (batch * 100..(batch + 1) * 100).collect();
        writer
            .write(&Vector::batch(vec![Vector::from(values)]))
            .await
            .unwrap();
    }
    writer.close().await.unwrap();

    let (tablet, mut reader) = open_reader(sink, RowReadOptions::default()).await;
    assert_eq!(tablet.stripe_count(), 1);
    let values = collect_i32_column(&mut reader, 0).await;
    assert_eq!(
        values,
        (0..500).map(Some).collect::<Vec<Option<i32>>>()
    );
}

#[tokio::test]
async fn test_parallel_encoding_and_decoding() {
    let logical = scalar_schema();
    let mut sink = vec![];
    let mut writer = RowWriter::new(
        &logical,
        &mut sink,
        WriterOptions {
            parallel_encoding: true,
            ..Default::default()
        },
    )
    .unwrap();
    let a: Vec<i32> = (0..1000).collect();
    let b: Vec<f64> = (0..1000).map(|i| i as f64 / 3.0).collect();
    writer
        .write(&Vector::batch(vec![
            Vector::from(a.clone()),
            Vector::from(b.clone()),
        ]))
        .await
        .unwrap();
    writer.close().await.unwrap();

    let (_, mut reader) = open_reader(
        sink,
        RowReadOptions {
            parallel_decoding: true,
            ..Default::default()
        },
    )
    .await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(1000, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    assert_eq!(row.children[0], Vector::from(a));
    assert_eq!(row.children[1], Vector::from(b));
}

#[tokio::test]
async fn test_projection_and_upcast() {
    let bytes = write_tablet(
        &scalar_schema(),
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![
            Vector::from(vec![1i32, 2, 3]),
            Vector::from(vec![0.5f64, 1.5, 2.5]),
        ])]],
    )
    .await;

    let (_, mut reader) = open_reader(
        bytes.clone(),
        RowReadOptions {
            columns: Some(vec!["a".to_string()]),
            column_types: HashMap::from([("a".to_string(), ScalarKind::Int64)]),
            ..Default::default()
        },
    )
    .await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(3, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    assert_eq!(row.children.len(), 1);
    assert_eq!(row.children[0], Vector::from(vec![1i64, 2, 3]));

    // Downcasts are rejected up front.
    let tablet = Arc::new(
        TabletReader::open(
            ReadableFile::Memory(Bytes::from(bytes)),
            TabletReadOptions::default(),
        )
        .await
        .unwrap(),
    );
    let err = RowReader::new(
        tablet,
        RowReadOptions {
            column_types: HashMap::from([("b".to_string(), ScalarKind::Float)]),
            ..Default::default()
        },
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err.kind(), NimbleError::SchemaMismatch(_)));
}

#[tokio::test]
async fn test_corrupt_chunk_surfaces_after_clean_rows() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let options = WriterOptions {
        compression: CompressionOptions::uncompressed(),
        ..Default::default()
    };
    let stripes: Vec<Vec<Vector>> = (0..2)
        .map(|s| {
            vec![Vector::batch(vec![Vector::from(
                (s * 10..s * 10 + 10).collect::<Vec<i32>>(),
            )])]
        })
        .collect();
    let mut bytes = write_tablet(&logical, options, stripes).await;

    // Flip the encoding-kind byte of stripe 1's values chunk.
    let tablet = TabletReader::open(
        ReadableFile::Memory(Bytes::from(bytes.clone())),
        TabletReadOptions::default(),
    )
    .await
    .unwrap();
    let stripe_offset = tablet.stripe_offset(1).unwrap();
    let stream_offset = tablet.stream_offsets(1).unwrap()[1];
    let position = stripe_offset as usize + stream_offset as usize + CHUNK_HEADER_SIZE;
    bytes[position] ^= 0x7f;

    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    // Stripe 0 decodes untouched.
    assert!(reader.next(10, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    assert_eq!(
        row.children[0],
        Vector::from((0..10).collect::<Vec<i32>>())
    );
    // Stripe 1 surfaces corruption, never partial rows.
    let err = reader.next(10, &mut out).await.unwrap_err();
    assert!(matches!(err.kind(), NimbleError::CorruptFormat(_)));
}

#[tokio::test]
async fn test_flat_map_feature_order_layout() {
    let keys: Vec<i32> = (0..4).collect();
    let bytes = write_tablet(
        &flat_map_logical(),
        WriterOptions {
            flat_map_columns: HashSet::from(["fm".to_string()]),
            flat_map_feature_order: vec![(
                "fm".to_string(),
                vec!["3".to_string(), "1".to_string()],
            )],
            ..Default::default()
        },
        vec![vec![feature_batch(30, &keys, 0)]],
    )
    .await;

    let tablet = TabletReader::open(
        ReadableFile::Memory(Bytes::from(bytes)),
        TabletReadOptions::default(),
    )
    .await
    .unwrap();
    let schema = tablet.schema().clone();
    let fm = &schema.root.children[0];
    let ordinal_of = |name: &str| {
        fm.children
            .iter()
            .position(|child| child.name == name)
            .unwrap()
    };
    let offsets = tablet.stream_offsets(0).unwrap();
    let in_map_3 = offsets[fm.in_map_offset(ordinal_of("3")) as usize];
    let values_3 = offsets[fm.children[ordinal_of("3")].offsets[0] as usize];
    let in_map_1 = offsets[fm.in_map_offset(ordinal_of("1")) as usize];
    let in_map_0 = offsets[fm.in_map_offset(ordinal_of("0")) as usize];
    // Ordered features cluster at the front of the stripe.
    assert!(in_map_3 < values_3);
    assert!(values_3 < in_map_1);
    assert!(in_map_1 < in_map_0);
}

#[tokio::test]
async fn test_file_backed_round_trip() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("rows.nimble");

    let logical = scalar_schema();
    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut writer = RowWriter::new(&logical, file, WriterOptions::default()).unwrap();
    writer
        .write(&Vector::batch(vec![
            Vector::from(vec![9i32, 8, 7]),
            Vector::from(vec![0.1f64, 0.2, 0.3]),
        ]))
        .await
        .unwrap();
    let file_size = writer.close().await.unwrap();
    assert_eq!(
        file_size,
        tokio::fs::metadata(&path).await.unwrap().len()
    );

    let tablet = Arc::new(
        TabletReader::open_path(&path, TabletReadOptions::default())
            .await
            .unwrap(),
    );
    tablet.verify_checksum().await.unwrap();
    let mut reader = RowReader::new(tablet, RowReadOptions::default()).unwrap();
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(3, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    assert_eq!(row.children[0], Vector::from(vec![9i32, 8, 7]));
}

#[tokio::test]
async fn test_randomized_round_trip() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x2333);
    let logical = LogicalType::row(vec![
        ("sparse", LogicalType::Scalar(ScalarKind::Int64)),
        ("dense", LogicalType::Scalar(ScalarKind::Uint16)),
    ]);
    let sparse: Vec<Option<i64>> = (0..2000)
        .map(|_| rng.gen_bool(0.7).then(|| rng.gen_range(-50i64..50)))
        .collect();
    let dense: Vec<u16> = (0..2000).map(|_| rng.gen_range(1000..1016)).collect();

    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![
            Vector::from(sparse.clone()),
            Vector::from(dense.clone()),
        ])]],
    )
    .await;
    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(2000, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::Int64(decoded_sparse) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(decoded_sparse.to_options(), sparse);
    let Vector::Uint16(decoded_dense) = &row.children[1] else {
        unreachable!()
    };
    assert_eq!(decoded_dense.values, dense);
}

#[tokio::test]
async fn test_metadata_round_trip() {
    let bytes = write_tablet(
        &scalar_schema(),
        WriterOptions {
            metadata: HashMap::from([("writer.host".to_string(), "test".to_string())]),
            ..Default::default()
        },
        vec![vec![Vector::batch(vec![
            Vector::from(vec![1i32]),
            Vector::from(vec![2.0f64]),
        ])]],
    )
    .await;
    let (tablet, _) = open_reader(bytes, RowReadOptions::default()).await;
    assert_eq!(
        tablet.metadata().get("writer.host"),
        Some(&"test".to_string())
    );
}

#[tokio::test]
async fn test_all_null_column_file() {
    let logical = LogicalType::row(vec![("v", LogicalType::Scalar(ScalarKind::Int32))]);
    let input: Vec<Option<i32>> = vec![None; 16];
    let bytes = write_tablet(
        &logical,
        WriterOptions::default(),
        vec![vec![Vector::batch(vec![Vector::from(input.clone())])]],
    )
    .await;
    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    assert_eq!(collect_i32_column(&mut reader, 0).await, input);
}

#[tokio::test]
async fn test_empty_flat_map() {
    let bytes = write_tablet(
        &flat_map_logical(),
        flat_map_writer_options(),
        vec![vec![Vector::batch(vec![Vector::FlatMap(FlatMapVector {
            rows: 5,
            validity: None,
            keys: vec![],
            in_maps: vec![],
            children: vec![],
        })])]],
    )
    .await;
    let (_, mut reader) = open_reader(bytes, RowReadOptions::default()).await;
    let mut out = Vector::batch(vec![]);
    assert!(reader.next(5, &mut out).await.unwrap());
    let Vector::Row(row) = &out else { unreachable!() };
    let Vector::FlatMap(fm) = &row.children[0] else {
        unreachable!()
    };
    assert_eq!(fm.rows, 5);
    assert!(fm.keys.is_empty());
}

#[tokio::test]
async fn test_selector_validation() {
    let bytes = write_tablet(
        &flat_map_logical(),
        flat_map_writer_options(),
        vec![vec![feature_batch(3, &[1], 0)]],
    )
    .await;
    let tablet = Arc::new(
        TabletReader::open(
            ReadableFile::Memory(Bytes::from(bytes)),
            TabletReadOptions::default(),
        )
        .await
        .unwrap(),
    );

    let empty_include = RowReader::new(
        tablet.clone(),
        RowReadOptions {
            flat_map_feature_selector: HashMap::from([(
                "fm".to_string(),
                FeatureSelector {
                    mode: SelectionMode::Include,
                    features: vec![],
                },
            )]),
            ..Default::default()
        },
    );
    assert!(matches!(
        empty_include.map(|_| ()).unwrap_err().kind(),
        NimbleError::InvalidArgument(_)
    ));

    let unknown_column = RowReader::new(
        tablet,
        RowReadOptions {
            columns: Some(vec!["nope".to_string()]),
            ..Default::default()
        },
    );
    assert!(unknown_column.is_err());
}

#[test]
fn test_reader_is_send() {
    // Decode state hops threads when parallel decoding is on.
    fn assert_send<T: Send>() {}
    assert_send::<RowReader>();
}

#[tokio::test]
async fn test_scalar_vector_helpers_in_batches() {
    let vector = ScalarVector::from_options(vec![Some(1u8), None, Some(3)]);
    assert_eq!(vector.rows(), 3);
    assert_eq!(Vector::Uint8(vector).rows(), 3);
}
