//! Command-line front end: generate C code from a CDDL document, or convert
//! data between CBOR, YAML, and JSON using a CDDL document for validation.

use clap::{ArgEnum, ArgGroup, Args, Parser, Subcommand};
use cddl_forge::{bridge, cbor, compile, Mode, Schema, DEFAULT_MAX_QTY};
use log::{debug, info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::error::Error;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(name = "cddl-forge", version, about = "Compile CDDL schemas to C codecs or use them to convert data")]
struct Cli {
    /// Path to the CDDL document.
    #[clap(short = 'c', long, value_name = "FILE")]
    cddl: PathBuf,

    /// Maximum number of repetitions for unbounded quantifiers.
    #[clap(long, default_value_t = DEFAULT_MAX_QTY, value_name = "N")]
    default_max_qty: u64,

    /// Print debug information while working.
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate C encoding or decoding sources.
    Code(CodeArgs),
    /// Convert data between CBOR, YAML, and JSON.
    Convert(ConvertArgs),
}

#[derive(Args)]
#[clap(group = ArgGroup::new("mode").required(true))]
struct CodeArgs {
    /// Path for the generated C file.
    #[clap(long = "output-c", value_name = "FILE")]
    output_c: PathBuf,

    /// Path for the generated header file.
    #[clap(long = "output-h", value_name = "FILE")]
    output_h: PathBuf,

    /// Path for the generated types header.  Defaults to the header file
    /// name with "_types" inserted.
    #[clap(long = "output-h-types", value_name = "FILE")]
    output_h_types: Option<PathBuf>,

    /// Names of the rules to generate public API functions for.
    #[clap(short = 't', long = "entry-types", required = true, value_name = "RULE")]
    entry_types: Vec<String>,

    /// Generate decoding code.
    #[clap(short, long, group = "mode")]
    decode: bool,

    /// Generate encoding code.
    #[clap(short, long, group = "mode")]
    encode: bool,
}

#[derive(Args)]
struct ConvertArgs {
    /// Path to the input data.
    #[clap(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Input format.  Inferred from the file extension when omitted.
    #[clap(long = "input-as", arg_enum, value_name = "FORMAT")]
    input_as: Option<DataFormat>,

    /// Path for the output data.
    #[clap(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Output format.  Inferred from the file extension when omitted.
    #[clap(long = "output-as", arg_enum, value_name = "FORMAT")]
    output_as: Option<DataFormat>,

    /// Variable name to use for c_code output.
    #[clap(long = "c-code-var-name", value_name = "NAME")]
    c_code_var_name: Option<String>,

    /// Name of the rule to validate against.
    #[clap(short = 't', long = "entry-type", value_name = "RULE")]
    entry_type: String,
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Yaml,
    Json,
    Cbor,
    Cborhex,
    #[clap(name = "c_code")]
    CCode,
}

fn infer_format(path: &Path) -> DataFormat {
    match path.extension().and_then(OsStr::to_str) {
        Some("yaml") | Some("yml") => DataFormat::Yaml,
        Some("json") => DataFormat::Json,
        Some("cborhex") => DataFormat::Cborhex,
        Some("c") | Some("h") | Some("c_code") => DataFormat::CCode,
        _ => DataFormat::Cbor,
    }
}

fn run_code(schema: &Schema, args: &CodeArgs) -> Result<(), Box<dyn Error>> {
    let mode = if args.decode { Mode::Decode } else { Mode::Encode };
    let types_path = match &args.output_h_types {
        Some(path) => path.clone(),
        None => {
            let stem = args
                .output_h
                .file_stem()
                .and_then(OsStr::to_str)
                .unwrap_or("codec");
            args.output_h.with_file_name(format!("{}_types.h", stem))
        }
    };
    let h_name = file_name(&args.output_h);
    let types_name = file_name(&types_path);
    info!(
        "generating {} code for {}",
        mode.label(),
        args.entry_types.join(", ")
    );
    let code = schema.generate(mode, &args.entry_types, &h_name, &types_name)?;
    fs::write(&args.output_c, code.c_file)?;
    fs::write(&args.output_h, code.h_file)?;
    fs::write(&types_path, code.types_file)?;
    Ok(())
}

fn run_convert(schema: &Schema, args: &ConvertArgs) -> Result<(), Box<dyn Error>> {
    let in_format = args.input_as.unwrap_or_else(|| infer_format(&args.input));
    let out_format = args.output_as.unwrap_or_else(|| infer_format(&args.output));
    debug!("converting {:?} -> {:?}", in_format, out_format);

    let value = match in_format {
        DataFormat::Yaml => bridge::yaml_str_to_value(&fs::read_to_string(&args.input)?)?,
        DataFormat::Json => bridge::json_str_to_value(&fs::read_to_string(&args.input)?)?,
        DataFormat::Cbor => cbor::decode(&fs::read(&args.input)?)?,
        DataFormat::Cborhex => {
            let text: String = fs::read_to_string(&args.input)?
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            cbor::decode(&hex::decode(&text)?)?
        }
        DataFormat::CCode => return Err("c_code is an output-only format".into()),
    };

    // Round-tripping through the structured form exercises both directions
    // of the schema, not just validation.
    let structured = {
        let bytes = cbor::encode(&value)?;
        schema.decode_cbor(&args.entry_type, &bytes)?
    };
    let bytes = schema.encode_cbor(&args.entry_type, &structured)?;
    let value = cbor::decode(&bytes)?;

    match out_format {
        DataFormat::Yaml => fs::write(&args.output, bridge::value_to_yaml_str(&value)?)?,
        DataFormat::Json => fs::write(&args.output, bridge::value_to_json_str(&value)?)?,
        DataFormat::Cbor => fs::write(&args.output, &bytes)?,
        DataFormat::Cborhex => fs::write(&args.output, split_hex(&hex::encode(&bytes)))?,
        DataFormat::CCode => {
            let var_name = args
                .c_code_var_name
                .clone()
                .unwrap_or_else(|| args.entry_type.to_lowercase());
            fs::write(&args.output, cbor::to_c_array(&bytes, &var_name))?;
        }
    }
    Ok(())
}

// Break hex output into 64-character lines.
fn split_hex(hex: &str) -> String {
    let mut out = String::with_capacity(hex.len() + hex.len() / 64 + 1);
    for (i, c) in hex.chars().enumerate() {
        if i > 0 && i % 64 == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out.push('\n');
    out
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("codec.h")
        .to_string()
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let cddl = fs::read_to_string(&cli.cddl)?;
    let schema = compile(&cddl, cli.default_max_qty)?;

    match &cli.command {
        Command::Code(args) => run_code(&schema, args),
        Command::Convert(args) => run_convert(&schema, args),
    }
}
