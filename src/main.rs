use std::path::{Path, PathBuf};
use std::process::ExitCode;

use appendcrop::bounding_boxes::DEFAULT_RESOLUTION;
use appendcrop::crop_params::{parse_margins, parse_rectangle};
use appendcrop::{CropError, CropOptions, MarginPolicy, MarginQuad, Rectangle, crop_file, plan_file};
use clap::{ArgAction, CommandFactory, Parser};
use glob::glob;
use tracing_subscriber::EnvFilter;

/// Crop PDFs by appending an incremental update instead of rewriting them
#[derive(Parser, Debug)]
#[command(name = "appendcrop", version, about = "Crop PDFs by appending instead of rewriting")]
struct Args {
    /// Input PDF files; glob patterns are expanded
    inputs: Vec<String>,
    /// Ghostscript bounding box resolution
    #[arg(short, long, default_value_t = DEFAULT_RESOLUTION)]
    resolution: u32,
    /// Manually set bounding box for all pages: "<x1> <y1> <x2> <y2>"
    #[arg(short, long, value_parser = rect_arg, allow_hyphen_values = true)]
    bbox: Option<Rectangle>,
    /// Read bounding boxes from a file in Ghostscript bbox format
    #[arg(short = 'B', long, value_name = "FILE")]
    bbox_file: Option<PathBuf>,
    /// Ghostscript executable used for bounding box detection
    #[arg(long, default_value = "gs", value_name = "PATH")]
    ghostscript: PathBuf,
    /// Output file (default is to append to the input)
    #[arg(short, long, value_name = "FILE")]
    outfile: Option<PathBuf>,
    /// Pad bounding box with extra margins: "<l> [<b> [<r> [<t>]]]"
    #[arg(short, long, default_value = "0", value_parser = margin_arg, allow_hyphen_values = true)]
    margin: MarginQuad,
    /// Margins for the 1st, 3rd, 5th... page (default: same as --margin)
    #[arg(short, long, value_parser = margin_arg, allow_hyphen_values = true)]
    alt_margin: Option<MarginQuad>,
    /// Password for encrypted documents (the empty password is always tried first)
    #[arg(short, long)]
    password: Option<String>,
    /// Print the planned crop boxes as JSON and leave the files alone
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// More logging
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn rect_arg(s: &str) -> Result<Rectangle, String> {
    parse_rectangle(s).map_err(|e| e.to_string())
}

fn margin_arg(s: &str) -> Result<MarginQuad, String> {
    parse_margins(s).map_err(|e| e.to_string())
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Expand patterns like `scans/*.pdf`; anything else (or a pattern with no match) is kept as-is.
fn expand_inputs(raw: &[String]) -> Result<Vec<PathBuf>, CropError> {
    let mut out = Vec::new();
    for s in raw {
        if !s.contains(['*', '?', '[']) {
            out.push(PathBuf::from(s));
            continue;
        }
        let mut matched: Vec<PathBuf> = glob(s)?.filter_map(|e| e.ok()).collect();
        if matched.is_empty() {
            out.push(PathBuf::from(s));
        } else {
            matched.sort();
            out.append(&mut matched);
        }
    }
    Ok(out)
}

fn report(input: &Path, err: &CropError) {
    tracing::error!(input = %input.display(), "{err}");
    if let CropError::DetectionFailed { diagnostics, .. } = err {
        if !diagnostics.is_empty() {
            eprintln!("--- detector output for {} ---\n{diagnostics}", input.display());
        }
    }
}

fn options(args: &Args) -> Result<CropOptions, CropError> {
    let geometry = CropOptions::geometry(
        args.bbox,
        args.bbox_file.clone(),
        args.ghostscript.clone(),
        args.resolution,
    )?;
    Ok(CropOptions {
        geometry,
        margins: MarginPolicy::new(args.margin, args.alt_margin),
        outfile: args.outfile.clone(),
        password: args.password.clone(),
    })
}

fn process(input: &Path, opts: &CropOptions, dry_run: bool) -> Result<(), CropError> {
    if dry_run {
        let plan = plan_file(input, opts)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    let summary = crop_file(input, opts)?;
    tracing::info!(
        input = %input.display(),
        output = %summary.output.display(),
        pages = summary.pages,
        appended = summary.appended,
        prev_xref = summary.prev_xref,
        "cropped"
    );
    Ok(())
}

/// Process every input in turn; a failed input is reported and the rest still run.
/// Returns how many inputs failed.
fn run(inputs: &[PathBuf], opts: &CropOptions, dry_run: bool) -> usize {
    let mut failed = 0usize;
    for input in inputs {
        if let Err(e) = process(input, opts, dry_run) {
            report(input, &e);
            failed += 1;
        }
    }
    failed
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    if args.inputs.is_empty() {
        // nothing to do: show usage and leave every file alone
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    }

    let prepared = expand_inputs(&args.inputs).and_then(|inputs| {
        let opts = options(&args)?;
        opts.validate(&inputs)?;
        Ok((inputs, opts))
    });
    let (inputs, opts) = match prepared {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(2);
        }
    };

    let failed = run(&inputs, &opts, args.dry_run);
    if failed > 0 {
        tracing::error!(failed, total = inputs.len(), "some inputs were not cropped");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
