//! Book-keeping invariants, write-equivalence, and randomized round
//! trips over the fragment format.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tessera::{
    Array, ArraySchema, ArrayType, AttrBuffer, Attribute, CellValNum, Context, Datatype,
    Dimension, Domain, Layout, Query, QueryMode, QueryStatus, Subarray,
};
use tessera_storage::fragment::{self, FragmentMetadata};

fn ctx() -> Context {
    Context::new().unwrap()
}

fn sparse_schema() -> ArraySchema {
    ArraySchema::new(
        ArrayType::Sparse,
        Layout::RowMajor,
        Layout::RowMajor,
        3,
        Domain::new(
            Datatype::Int64,
            vec![
                Dimension::new("rows", 1, 8, 4),
                Dimension::new("cols", 1, 8, 4),
            ],
        ),
        vec![
            Attribute::new("a", Datatype::Int32),
            Attribute::new("tag", Datatype::Char).with_cell_val_num(CellValNum::Var),
        ],
    )
    .unwrap()
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn coords_bytes(coords: &[(i64, i64)]) -> Vec<u8> {
    coords
        .iter()
        .flat_map(|&(r, c)| r.to_le_bytes().into_iter().chain(c.to_le_bytes()))
        .collect()
}

/// Write cells with an i32 attribute and a var-char tag per cell.
fn write_cells(ctx: &Context, uri: &str, cells: &[(i64, i64, i32, &str)]) {
    let coords: Vec<(i64, i64)> = cells.iter().map(|&(r, c, ..)| (r, c)).collect();
    let values: Vec<i32> = cells.iter().map(|&(.., v, _)| v).collect();
    let mut offsets = Vec::new();
    let mut tags = Vec::new();
    for &(.., tag) in cells {
        offsets.push(tags.len() as u64);
        tags.extend_from_slice(tag.as_bytes());
    }

    let array = Arc::new(Array::open(ctx, uri, QueryMode::Write).unwrap());
    let mut query = Query::new(ctx, array, QueryMode::Write).unwrap();
    query.set_layout(Layout::Unordered).unwrap();
    query
        .set_buffer("a", AttrBuffer::fixed(i32_bytes(&values)))
        .unwrap();
    query.set_buffer("tag", AttrBuffer::var(offsets, tags)).unwrap();
    query
        .set_coords_buffer(AttrBuffer::fixed(coords_bytes(&coords)))
        .unwrap();
    query.submit().unwrap();
    query.finalize().unwrap();
}

fn read_everything(ctx: &Context, uri: &str) -> Vec<(i64, i64, i32, String)> {
    let array = Arc::new(Array::open(ctx, uri, QueryMode::Read).unwrap());
    let whole = array.schema().domain.whole();
    let mut query = Query::new(ctx, array, QueryMode::Read).unwrap();
    query.set_layout(Layout::GlobalOrder).unwrap();
    query.set_subarray(whole).unwrap();
    query.set_buffer("a", AttrBuffer::reading(1 << 20)).unwrap();
    query
        .set_buffer("tag", AttrBuffer::reading_var(1 << 16, 1 << 20))
        .unwrap();
    query
        .set_coords_buffer(AttrBuffer::reading(1 << 20))
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Complete);

    let n = query.result_cell_count() as usize;
    let coords = query.coords_buffer().unwrap().data().to_vec();
    let values = query.buffer("a").unwrap().data().to_vec();
    let tag_buffer = query.buffer("tag").unwrap();
    let tag_offsets = tag_buffer.offsets().unwrap().to_vec();
    let tag_data = tag_buffer.data().to_vec();

    (0..n)
        .map(|i| {
            let r = i64::from_le_bytes(coords[i * 16..i * 16 + 8].try_into().unwrap());
            let c = i64::from_le_bytes(coords[i * 16 + 8..i * 16 + 16].try_into().unwrap());
            let v = i32::from_le_bytes(values[i * 4..i * 4 + 4].try_into().unwrap());
            let start = tag_offsets[i] as usize;
            let end = tag_offsets
                .get(i + 1)
                .map(|&o| o as usize)
                .unwrap_or(tag_data.len());
            let tag = String::from_utf8(tag_data[start..end].to_vec()).unwrap();
            (r, c, v, tag)
        })
        .collect()
}

fn only_fragment_meta(ctx: &Context, uri: &str, schema: &ArraySchema) -> (String, FragmentMetadata) {
    let dirs = fragment::list_fragment_dirs(ctx.vfs(), uri).unwrap();
    assert_eq!(dirs.len(), 1);
    let frag_uri = dirs[0].1.clone();
    let meta = FragmentMetadata::load(ctx.vfs(), schema, &frag_uri).unwrap();
    (frag_uri, meta)
}

// ============================================================================
// Book-keeping invariants
// ============================================================================

#[test]
fn mbrs_contain_their_cells() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("s").to_string_lossy().into_owned();
    let ctx = ctx();
    let schema = sparse_schema();
    Array::create(&ctx, &uri, &schema).unwrap();
    write_cells(
        &ctx,
        &uri,
        &[
            (1, 1, 1, "a"),
            (2, 7, 2, "bb"),
            (5, 5, 3, ""),
            (8, 1, 4, "dddd"),
            (8, 8, 5, "e"),
            (3, 3, 6, "f"),
            (6, 2, 7, "gg"),
        ],
    );

    let (_, meta) = only_fragment_meta(&ctx, &uri, &schema);
    let dt = schema.coord_type();
    let cells = read_everything(&ctx, &uri);
    assert_eq!(cells.len(), 7);

    // Every written coordinate falls inside exactly the MBRs that claim
    // to cover it, and every MBR contains at least one coordinate.
    for mbr in &meta.mbrs {
        let covered = cells
            .iter()
            .filter(|(r, c, ..)| mbr.contains(dt, &[*r as u64, *c as u64]))
            .count();
        assert!(covered > 0, "empty MBR {mbr:?}");
    }
    for (r, c, ..) in &cells {
        let claiming = meta
            .mbrs
            .iter()
            .filter(|mbr| mbr.contains(dt, &[*r as u64, *c as u64]))
            .count();
        assert!(claiming >= 1, "cell ({r}, {c}) in no MBR");
    }
}

#[test]
fn compressed_sizes_sum_to_file_sizes() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("s").to_string_lossy().into_owned();
    let ctx = ctx();
    let schema = sparse_schema();
    Array::create(&ctx, &uri, &schema).unwrap();
    write_cells(
        &ctx,
        &uri,
        &[(1, 1, 1, "x"), (2, 2, 2, "yy"), (7, 7, 3, "zzz"), (8, 8, 4, "w")],
    );

    let (frag_uri, meta) = only_fragment_meta(&ctx, &uri, &schema);
    let vfs = ctx.vfs();

    let fixed_a = fragment::attr_file(&frag_uri, "a");
    assert_eq!(
        meta.attrs[0].fixed.total_size(),
        vfs.file_size(&fixed_a).unwrap()
    );
    let fixed_tag = fragment::attr_file(&frag_uri, "tag");
    assert_eq!(
        meta.attrs[1].fixed.total_size(),
        vfs.file_size(&fixed_tag).unwrap()
    );
    let var_tag = fragment::attr_var_file(&frag_uri, "tag");
    assert_eq!(
        meta.attrs[1].var.as_ref().unwrap().total_size(),
        vfs.file_size(&var_tag).unwrap()
    );
    let coords = fragment::coords_file(&frag_uri);
    assert_eq!(
        meta.coords.as_ref().unwrap().total_size(),
        vfs.file_size(&coords).unwrap()
    );

    // Every attribute file carries the same tile count.
    assert_eq!(meta.attrs[0].fixed.offsets.len() as u64, meta.tile_count);
    assert_eq!(meta.attrs[1].fixed.offsets.len() as u64, meta.tile_count);
    assert_eq!(meta.mbrs.len() as u64, meta.tile_count);
}

#[test]
fn var_offsets_round_trip_monotonically() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("s").to_string_lossy().into_owned();
    let ctx = ctx();
    let schema = sparse_schema();
    Array::create(&ctx, &uri, &schema).unwrap();
    write_cells(
        &ctx,
        &uri,
        &[(1, 1, 1, "alpha"), (1, 2, 2, ""), (2, 1, 3, "c"), (5, 5, 4, "delta")],
    );

    let cells = read_everything(&ctx, &uri);
    let tags: Vec<&str> = cells.iter().map(|(.., t)| t.as_str()).collect();
    assert_eq!(tags, vec!["alpha", "", "c", "delta"]);
}

// ============================================================================
// Latest-timestamp-wins
// ============================================================================

#[test]
fn younger_fragment_wins_on_collision() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("s").to_string_lossy().into_owned();
    let ctx = ctx();
    let schema = sparse_schema();
    Array::create(&ctx, &uri, &schema).unwrap();

    write_cells(&ctx, &uri, &[(2, 2, 1, "old"), (3, 3, 10, "keep")]);
    write_cells(&ctx, &uri, &[(2, 2, 2, "new")]);

    let cells = read_everything(&ctx, &uri);
    assert_eq!(
        cells,
        vec![
            (2, 2, 2, "new".to_string()),
            (3, 3, 10, "keep".to_string()),
        ]
    );
}

// ============================================================================
// Ordered-write equivalence
// ============================================================================

fn dense_schema() -> ArraySchema {
    ArraySchema::new(
        ArrayType::Dense,
        Layout::RowMajor,
        Layout::RowMajor,
        0,
        Domain::new(
            Datatype::Int64,
            vec![
                Dimension::new("rows", 1, 4, 2),
                Dimension::new("cols", 1, 4, 2),
            ],
        ),
        vec![Attribute::new("a", Datatype::Int32)],
    )
    .unwrap()
}

fn read_dense_full(ctx: &Context, uri: &str) -> Vec<i32> {
    let array = Arc::new(Array::open(ctx, uri, QueryMode::Read).unwrap());
    let whole = array.schema().domain.whole();
    let mut query = Query::new(ctx, array, QueryMode::Read).unwrap();
    query.set_layout(Layout::RowMajor).unwrap();
    query.set_subarray(whole).unwrap();
    query.set_buffer("a", AttrBuffer::reading(1 << 16)).unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Complete);
    query
        .buffer("a")
        .unwrap()
        .data()
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[test]
fn row_major_write_equals_global_write() {
    let dir = TempDir::new().unwrap();
    let ctx = ctx();
    let uri_ordered = dir.path().join("ordered").to_string_lossy().into_owned();
    let uri_global = dir.path().join("global").to_string_lossy().into_owned();
    Array::create(&ctx, &uri_ordered, &dense_schema()).unwrap();
    Array::create(&ctx, &uri_global, &dense_schema()).unwrap();

    // Row-major write into the whole domain.
    let row_major: Vec<i32> = (1..=16).collect();
    {
        let array = Arc::new(Array::open(&ctx, &uri_ordered, QueryMode::Write).unwrap());
        let mut query = Query::new(&ctx, array, QueryMode::Write).unwrap();
        query.set_layout(Layout::RowMajor).unwrap();
        query
            .set_subarray(Subarray::new(vec![(1, 4), (1, 4)]))
            .unwrap();
        query
            .set_buffer("a", AttrBuffer::fixed(i32_bytes(&row_major)))
            .unwrap();
        query.submit().unwrap();
        query.finalize().unwrap();
    }

    // The same cells reordered by hand into global order.
    let global_sequence = [
        1, 2, 5, 6, 3, 4, 7, 8, 9, 10, 13, 14, 11, 12, 15, 16,
    ];
    {
        let array = Arc::new(Array::open(&ctx, &uri_global, QueryMode::Write).unwrap());
        let mut query = Query::new(&ctx, array, QueryMode::Write).unwrap();
        query.set_layout(Layout::GlobalOrder).unwrap();
        query
            .set_buffer("a", AttrBuffer::fixed(i32_bytes(&global_sequence)))
            .unwrap();
        query.submit().unwrap();
        query.finalize().unwrap();
    }

    assert_eq!(read_dense_full(&ctx, &uri_ordered), read_dense_full(&ctx, &uri_global));
}

#[test]
fn unaligned_ordered_write_round_trips() {
    let dir = TempDir::new().unwrap();
    let ctx = ctx();
    let uri = dir.path().join("a").to_string_lossy().into_owned();
    Array::create(&ctx, &uri, &dense_schema()).unwrap();

    // A subarray that crosses all four space tiles.
    {
        let array = Arc::new(Array::open(&ctx, &uri, QueryMode::Write).unwrap());
        let mut query = Query::new(&ctx, array, QueryMode::Write).unwrap();
        query.set_layout(Layout::RowMajor).unwrap();
        query
            .set_subarray(Subarray::new(vec![(2, 3), (2, 3)]))
            .unwrap();
        query
            .set_buffer("a", AttrBuffer::fixed(i32_bytes(&[21, 22, 23, 24])))
            .unwrap();
        query.submit().unwrap();
        query.finalize().unwrap();
    }

    let full = read_dense_full(&ctx, &uri);
    let fill = i32::MAX;
    assert_eq!(
        full,
        vec![
            fill, fill, fill, fill,
            fill, 21, 22, fill,
            fill, 23, 24, fill,
            fill, fill, fill, fill,
        ]
    );
}

// ============================================================================
// Nullable attributes
// ============================================================================

#[test]
fn nullable_cells_round_trip() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("s").to_string_lossy().into_owned();
    let ctx = ctx();
    let schema = ArraySchema::new(
        ArrayType::Sparse,
        Layout::RowMajor,
        Layout::RowMajor,
        4,
        Domain::new(Datatype::Int64, vec![Dimension::new("d", 0, 15, 4)]),
        vec![Attribute::new("a", Datatype::Float64).nullable()],
    )
    .unwrap();
    Array::create(&ctx, &uri, &schema).unwrap();

    let coords: Vec<u8> = [2i64, 5, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
    let values: Vec<u8> = [1.5f64, 0.0, 2.5]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    {
        let array = Arc::new(Array::open(&ctx, &uri, QueryMode::Write).unwrap());
        let mut query = Query::new(&ctx, array, QueryMode::Write).unwrap();
        query.set_layout(Layout::Unordered).unwrap();
        query
            .set_buffer(
                "a",
                AttrBuffer::fixed(values).with_validity(vec![1, 0, 1]),
            )
            .unwrap();
        query
            .set_coords_buffer(AttrBuffer::fixed(coords))
            .unwrap();
        query.submit().unwrap();
        query.finalize().unwrap();
    }

    let array = Arc::new(Array::open(&ctx, &uri, QueryMode::Read).unwrap());
    let mut query = Query::new(&ctx, array, QueryMode::Read).unwrap();
    query.set_layout(Layout::GlobalOrder).unwrap();
    query.set_subarray(Subarray::new(vec![(0, 15)])).unwrap();
    query
        .set_buffer(
            "a",
            AttrBuffer::reading(1 << 12).collecting_validity(),
        )
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Complete);

    let buffer = query.buffer("a").unwrap();
    assert_eq!(buffer.validity().unwrap(), &[1, 0, 1]);
    let read: Vec<f64> = buffer
        .data()
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(read[0], 1.5);
    assert_eq!(read[2], 2.5);
}

// ============================================================================
// Randomized round trip
// ============================================================================

#[test]
fn random_sparse_cell_sets_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x7e55e7a);
    let ctx = ctx();
    for round in 0..8 {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("s").to_string_lossy().into_owned();
        let schema = sparse_schema();
        Array::create(&ctx, &uri, &schema).unwrap();

        // Random distinct coordinates with random values.
        let mut model: BTreeMap<(i64, i64), (i32, String)> = BTreeMap::new();
        let count = rng.gen_range(1..40);
        for _ in 0..count {
            let r = rng.gen_range(1..=8);
            let c = rng.gen_range(1..=8);
            let v = rng.gen_range(-1000..1000);
            let tag = format!("t{v}");
            model.insert((r, c), (v, tag));
        }
        let cells: Vec<(i64, i64, i32, &str)> = model
            .iter()
            .map(|(&(r, c), (v, tag))| (r, c, *v, tag.as_str()))
            .collect();
        write_cells(&ctx, &uri, &cells);

        let mut read_back: Vec<(i64, i64, i32, String)> = read_everything(&ctx, &uri);
        read_back.sort_by_key(|&(r, c, ..)| (r, c));
        let expected: Vec<(i64, i64, i32, String)> = model
            .into_iter()
            .map(|((r, c), (v, tag))| (r, c, v, tag))
            .collect();
        assert_eq!(read_back, expected, "round {round}");
    }
}
