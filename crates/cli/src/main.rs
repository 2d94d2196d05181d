//! tessera CLI: reference command-line tool for the array engine.
//!
//! Exit codes: 0 success, 1 argument error, 2 I/O error, 3 schema or
//! format error, 4 overflow (incomplete read in single-submission mode).

mod cells;
mod commands;

use anyhow::{anyhow, bail};
use clap::ArgMatches;
use std::process;
use std::sync::Arc;
use tessera::{
    consolidate, group_create, object_ls, object_move, object_remove, object_walk, Array,
    AttrBuffer, CellValNum, Context, Error, Layout, Query, QueryMode, QueryStatus, SchemaDesc,
    WalkOrder,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TESSERA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = match commands::build_cli().try_get_matches() {
        Ok(m) => m,
        Err(e) if e.use_stderr() => {
            eprintln!("{e}");
            process::exit(1);
        }
        Err(e) => {
            // --help / --version
            print!("{e}");
            process::exit(0);
        }
    };

    match run(&matches) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(exit_code(&e));
        }
    }
}

/// Map failures onto the documented exit codes.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<Error>() {
        Some(Error::Schema(_)) | Some(Error::Format(_)) | Some(Error::Compression(_)) => 3,
        Some(Error::BufferOverflow) => 4,
        Some(Error::Io(_))
        | Some(Error::NotFound(_))
        | Some(Error::AlreadyExists(_))
        | Some(Error::PermissionDenied(_))
        | Some(Error::Internal(_))
        | Some(Error::Cancelled) => 2,
        Some(Error::Query { source, .. }) => match source.as_ref() {
            Error::Format(_) | Error::Compression(_) => 3,
            _ => 2,
        },
        Some(_) | None => 1,
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let ctx = Context::new()?;
    match matches.subcommand() {
        Some(("create", m)) => cmd_create(&ctx, m),
        Some(("write", m)) => cmd_write(&ctx, m),
        Some(("read", m)) => cmd_read(&ctx, m),
        Some(("consolidate", m)) => {
            consolidate(&ctx, arg(m, "uri")?)?;
            Ok(0)
        }
        Some(("group-create", m)) => {
            group_create(&ctx, arg(m, "uri")?)?;
            Ok(0)
        }
        Some(("ls", m)) => cmd_ls(&ctx, m),
        Some(("mv", m)) => {
            object_move(
                &ctx,
                arg(m, "src")?,
                arg(m, "dst")?,
                m.get_flag("overwrite"),
            )?;
            Ok(0)
        }
        Some(("rm", m)) => {
            object_remove(&ctx, arg(m, "uri")?)?;
            Ok(0)
        }
        Some(("version", _)) => {
            println!("tessera {}", tessera::constants::VERSION);
            Ok(0)
        }
        _ => bail!("unknown command"),
    }
}

fn arg<'a>(m: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    m.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument `{name}`"))
}

fn cmd_create(ctx: &Context, m: &ArgMatches) -> anyhow::Result<i32> {
    let uri = arg(m, "uri")?;
    let json = std::fs::read_to_string(arg(m, "schema-file")?)
        .map_err(|e| anyhow::Error::new(Error::from(e)))?;
    let schema = SchemaDesc::from_json(&json)?.build()?;
    Array::create(ctx, uri, &schema)?;
    Ok(0)
}

fn cmd_write(ctx: &Context, m: &ArgMatches) -> anyhow::Result<i32> {
    let uri = arg(m, "uri")?;
    let layout = Layout::from_name(arg(m, "layout")?)?;
    let array = Arc::new(Array::open(ctx, uri, QueryMode::Write)?);
    let schema = Arc::clone(array.schema());

    // Coordinates accompany every write that produces a sparse fragment.
    let with_coords =
        schema.array_type == tessera::ArrayType::Sparse || layout == Layout::Unordered;
    let text = std::fs::read_to_string(arg(m, "csv")?)
        .map_err(|e| anyhow::Error::new(Error::from(e)))?;
    let loaded = cells::load_csv(&schema, &text, with_coords)?;

    let mut query = Query::new(ctx, array, QueryMode::Write)?;
    query.set_layout(layout)?;
    if let Some(text) = m.get_one::<String>("subarray") {
        query.set_subarray(cells::parse_subarray(&schema, text)?)?;
    }
    for (attr, buffer) in schema.attributes.iter().zip(loaded.buffers) {
        query.set_buffer(&attr.name, buffer)?;
    }
    if let Some(coords) = loaded.coords {
        query.set_coords_buffer(AttrBuffer::fixed(coords))?;
    }
    query.submit()?;
    query.finalize()?;
    Ok(0)
}

fn cmd_read(ctx: &Context, m: &ArgMatches) -> anyhow::Result<i32> {
    let uri = arg(m, "uri")?;
    let layout = Layout::from_name(arg(m, "layout")?)?;
    let array = Arc::new(Array::open(ctx, uri, QueryMode::Read)?);
    let schema = Arc::clone(array.schema());
    let sparse = schema.array_type == tessera::ArrayType::Sparse;

    let attrs: Vec<String> = match m.get_one::<String>("attributes") {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => schema.attributes.iter().map(|a| a.name.clone()).collect(),
    };

    let single = m.get_one::<usize>("buffer-size").copied();
    let capacity = single.unwrap_or(1 << 20);

    let mut query = Query::new(ctx, array, QueryMode::Read)?;
    query.set_layout(layout)?;
    query.set_subarray(cells::parse_subarray(&schema, arg(m, "subarray")?)?)?;
    for name in &attrs {
        let attr = &schema.attributes[schema.attribute_id(name)?];
        let mut buffer = match attr.cell_val_num {
            CellValNum::Var => AttrBuffer::reading_var(capacity / 8, capacity),
            CellValNum::Fixed(_) => AttrBuffer::reading(capacity),
        };
        if attr.nullable {
            buffer = buffer.collecting_validity();
        }
        query.set_buffer(name, buffer)?;
    }
    if sparse {
        query.set_coords_buffer(AttrBuffer::reading(capacity))?;
    }

    loop {
        let status = query.submit()?;
        cells::print_results(&schema, &attrs, &query)?;
        match status {
            QueryStatus::Complete => return Ok(0),
            QueryStatus::Incomplete if single.is_some() => return Ok(4),
            QueryStatus::Incomplete => continue,
            other => bail!("unexpected query status {other:?}"),
        }
    }
}

fn cmd_ls(ctx: &Context, m: &ArgMatches) -> anyhow::Result<i32> {
    let uri = arg(m, "uri")?;
    let listing = match m.get_one::<String>("walk").map(String::as_str) {
        None => object_ls(ctx, uri)?,
        Some("pre") => object_walk(ctx, uri, WalkOrder::Preorder)?,
        Some("post") => object_walk(ctx, uri, WalkOrder::Postorder)?,
        Some(other) => bail!("unknown walk order `{other}` (use pre or post)"),
    };
    for (path, object_type) in listing {
        println!("{path}\t{}", object_type.name());
    }
    Ok(0)
}
