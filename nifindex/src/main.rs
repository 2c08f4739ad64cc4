#![forbid(unused_must_use)]

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};
use bstr::ByteSlice;
use clap::Parser;

/// Validates (and optionally rewrites) the trailing `.index` of a `.nif` file.
///
/// Reads the file, recomputes the index from the exportable `SymbolDef`s actually present in the
/// body, and compares it against whatever `.index` (if any) was already on disk. Exits
/// non-zero on mismatch unless `--write` is given, in which case the file is rewritten in place
/// with a fresh index and a patched `.indexat`.
#[derive(clap::Parser)]
struct Args {
    /// The `.nif` file to check.
    path: PathBuf,

    /// Rewrite the file in place with a freshly computed index.
    #[arg(long)]
    write: bool,

    /// Treat conditions the format allows as warnings (an `.indexat`/`.index` offset mismatch, an
    /// unrecognized directive) as fatal errors instead.
    #[arg(long)]
    strict: bool,

    /// Reduce logging to just warnings and errors.
    #[arg(long)]
    quiet: bool,

    /// Turn on debug-level logging.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    configure_tracing(&args);

    let bytes = fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;

    let filename = args
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let options = nif::ParseOptions {
        filename,
        module_suffix: None,
        strict: args.strict,
    };

    let output = nif::parse(&bytes, &options).with_context(|| format!("parsing {}", args.path.display()))?;
    for warning in &output.warnings {
        tracing::warn!(%warning, "non-fatal issue while parsing");
    }

    let recomputed = nif::write_to_vec(
        &output.module,
        &nif::WriteOptions {
            emit_index: true,
            visibility: nif::VisibilityMap::new(),
        },
    )?;
    let reparsed = nif::parse(&recomputed, &options)?;

    let matches = indexes_equal(output.module.index.as_ref(), reparsed.module.index.as_ref());
    if matches {
        tracing::info!(path = %args.path.display(), "index is up to date");
    } else {
        tracing::warn!(path = %args.path.display(), "on-disk index does not match recomputed index");
        for entry in reparsed.module.index.iter().flat_map(|idx| &idx.entries) {
            tracing::debug!(
                symbol = %describe_symbol(&entry.symbol),
                offset = entry.offset,
                "recomputed index entry"
            );
        }
    }

    if args.write {
        fs::write(&args.path, &recomputed)
            .with_context(|| format!("writing {}", args.path.display()))?;
        tracing::info!(path = %args.path.display(), "rewrote with fresh index");
        return Ok(());
    }

    if !matches {
        bail!("index mismatch in {}", args.path.display());
    }
    Ok(())
}

fn indexes_equal(a: Option<&nif::Index>, b: Option<&nif::Index>) -> bool {
    let empty = nif::Index::default();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    a.entries.len() == b.entries.len()
        && a.entries.iter().zip(&b.entries).all(|(x, y)| {
            x.visibility == y.visibility && x.symbol == y.symbol && x.offset == y.offset
        })
}

fn describe_symbol(bytes: &[u8]) -> String {
    bytes.as_bstr().to_string()
}

fn configure_tracing(args: &Args) {
    use tracing_subscriber::filter::LevelFilter;

    let max_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt().with_max_level(max_level).init();
}
