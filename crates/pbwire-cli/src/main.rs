//! pbwire - Inspect Protocol Buffers wire-format data
//!
//! This tool dumps encoded messages with or without a compiled schema and
//! checks that they survive a decode/encode round trip unchanged.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pbwire_core::codec::{DEFAULT_RECURSION_LIMIT, DEFAULT_SIZE_LIMIT};
use pbwire_core::{
    CodedReader, DescriptorPool, DynamicMessage, ExtensionRegistry, FieldValue, MessageBuilder,
    MessageDescriptor, MessageLite, MessageStreamIterator, ReaderConfig, UnknownFieldSet,
    UnknownFieldSetBuilder, Value,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Inspect Protocol Buffers wire-format data
#[derive(Parser, Debug)]
#[command(name = "pbwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the fields of a message without a schema
    DecodeRaw {
        #[command(flatten)]
        common: CommonArgs,

        /// Read a stream of length-delimited messages framed as field 1
        #[arg(long)]
        stream: bool,
    },

    /// Decode a message with a compiled schema
    Decode {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Fail when required fields are missing
        #[arg(long)]
        check: bool,
    },

    /// Decode and re-encode, verifying the bytes are unchanged
    Roundtrip {
        #[command(flatten)]
        common: CommonArgs,

        /// Compiled FileDescriptorSet to decode with instead of raw fields
        #[arg(long, requires = "message")]
        descriptor_set: Option<PathBuf>,

        /// Fully-qualified message type to decode as
        #[arg(short, long, requires = "descriptor_set")]
        message: Option<String>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[command(flatten)]
    input: InputMode,

    /// Maximum bytes read per message from a stream
    #[arg(long, default_value_t = DEFAULT_SIZE_LIMIT)]
    size_limit: usize,

    /// Maximum nesting depth of messages and groups
    #[arg(long, default_value_t = DEFAULT_RECURSION_LIMIT)]
    recursion_limit: usize,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file of encoded data
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of encoded files to process
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Compiled FileDescriptorSet (protoc --descriptor_set_out)
    #[arg(long)]
    descriptor_set: PathBuf,

    /// Fully-qualified message type to decode as
    #[arg(short, long)]
    message: String,
}

impl CommonArgs {
    fn reader_config(&self) -> ReaderConfig {
        ReaderConfig::new()
            .size_limit(self.size_limit)
            .recursion_limit(self.recursion_limit)
    }

    fn reader<'a>(&self, data: &'a [u8]) -> CodedReader<'a> {
        CodedReader::new(data).with_config(self.reader_config())
    }
}

/// A message type resolved from a descriptor set, with its extensions
struct Schema {
    descriptor: MessageDescriptor,
    registry: ExtensionRegistry,
}

impl Schema {
    fn load(path: &Path, message: &str) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read descriptor set: {}", path.display()))?;
        let pool = DescriptorPool::decode(&bytes)
            .with_context(|| format!("Failed to load descriptor set: {}", path.display()))?;
        let Some(descriptor) = pool.get_message_by_name(message) else {
            bail!("Message type {} not found in {}", message, path.display());
        };

        let mut registry = ExtensionRegistry::new();
        registry.add_all_from_pool(&pool)?;
        debug!(
            "Loaded {} with {} registered extension(s)",
            descriptor.full_name(),
            registry.len()
        );
        Ok(Self {
            descriptor,
            registry,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(&cli.command, &mut out)
}

/// Executes a subcommand, writing its report to `out`
fn run(command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::DecodeRaw { common, stream } => {
            for_each_input(&common.input, |path| {
                write_header(common, path, out)?;
                decode_raw(common, path, *stream, out)
            })
        }
        Command::Decode {
            common,
            schema,
            check,
        } => {
            let loaded = Schema::load(&schema.descriptor_set, &schema.message)?;
            for_each_input(&common.input, |path| {
                write_header(common, path, out)?;
                decode(common, &loaded, *check, path, out)
            })
        }
        Command::Roundtrip {
            common,
            descriptor_set,
            message,
        } => {
            let loaded = match (descriptor_set, message) {
                (Some(descriptor_set), Some(message)) => Some(Schema::load(descriptor_set, message)?),
                _ => None,
            };
            for_each_input(&common.input, |path| {
                roundtrip(common, loaded.as_ref(), path, out)
            })
        }
    }
}

/// Runs `process` on the single input file or on every file under the input
/// directory.
///
/// In directory mode a failing file is reported and skipped; the run fails
/// at the end if any file did.
fn for_each_input(input: &InputMode, mut process: impl FnMut(&Path) -> Result<()>) -> Result<()> {
    if let Some(file) = &input.file {
        if !file.exists() {
            bail!("Input file does not exist: {}", file.display());
        }
        if !file.is_file() {
            bail!("Input path is not a file: {}", file.display());
        }
        return process(file);
    }

    let Some(directory) = &input.directory else {
        bail!("Either --file or --directory must be specified");
    };
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut processed = 0;
    let mut failed = 0;
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || is_hidden(path) {
            trace!("Skipping {}", path.display());
            continue;
        }

        debug!("Processing {}", path.display());
        if let Err(e) = process(path) {
            warn!("Error processing {}: {:#}", path.display(), e);
            failed += 1;
        }
        processed += 1;
    }

    info!("Processed {} file(s), {} failed", processed, failed);
    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, processed);
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn write_header(common: &CommonArgs, path: &Path, out: &mut impl Write) -> Result<()> {
    if common.input.directory.is_some() {
        writeln!(out, "# {}", path.display())?;
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    trace!("Reading {}", path.display());
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
    trace!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

fn decode_raw(common: &CommonArgs, path: &Path, stream: bool, out: &mut impl Write) -> Result<()> {
    if !stream {
        let data = read_input(path)?;
        let fields = parse_raw(common, &data)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        write_unknown_fields(out, &fields, 0, common.recursion_limit)?;
        return Ok(());
    }

    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let reader = CodedReader::from_stream_with_config(file, common.reader_config());
    let messages =
        MessageStreamIterator::new(reader, UnknownFieldSetBuilder::new(), ExtensionRegistry::empty());
    for (index, message) in messages.enumerate() {
        let message = message.with_context(|| {
            format!("Failed to decode message {} of {}", index, path.display())
        })?;
        writeln!(out, "message {} {{", index)?;
        write_unknown_fields(out, &message, 1, common.recursion_limit)?;
        writeln!(out, "}}")?;
    }
    Ok(())
}

fn decode(
    common: &CommonArgs,
    schema: &Schema,
    check: bool,
    path: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let data = read_input(path)?;
    let message = parse_with_schema(common, schema, &data).with_context(|| {
        format!(
            "Failed to decode {} as {}",
            path.display(),
            schema.descriptor.full_name()
        )
    })?;
    write_message(out, &message, 0, common.recursion_limit)?;

    if check {
        let missing = message.initialization_errors();
        if !missing.is_empty() {
            bail!(
                "{} is missing required field(s): {}",
                path.display(),
                missing.join(", ")
            );
        }
    }
    Ok(())
}

fn roundtrip(
    common: &CommonArgs,
    schema: Option<&Schema>,
    path: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let data = read_input(path)?;
    let encoded = match schema {
        Some(schema) => parse_with_schema(common, schema, &data)
            .and_then(|message| message.to_bytes()),
        None => parse_raw(common, &data).and_then(|fields| fields.to_bytes()),
    }
    .with_context(|| format!("Failed to decode {}", path.display()))?;

    if let Some(offset) = first_difference(&data, &encoded) {
        bail!(
            "{}: re-encoded bytes differ at offset {} ({} bytes in, {} bytes out)",
            path.display(),
            offset,
            data.len(),
            encoded.len()
        );
    }
    writeln!(out, "{}: ok ({} bytes)", path.display(), data.len())?;
    Ok(())
}

fn parse_raw(common: &CommonArgs, data: &[u8]) -> pbwire_core::Result<UnknownFieldSet> {
    let mut reader = common.reader(data);
    let mut builder = UnknownFieldSetBuilder::new();
    builder.merge_from(&mut reader)?;
    reader.check_last_tag_was(None)?;
    Ok(builder.build())
}

fn parse_with_schema(
    common: &CommonArgs,
    schema: &Schema,
    data: &[u8],
) -> pbwire_core::Result<DynamicMessage> {
    let mut reader = common.reader(data);
    let mut builder = MessageBuilder::new(&schema.descriptor);
    builder.merge_from(&mut reader, &schema.registry)?;
    reader.check_last_tag_was(None)?;
    Ok(builder.build_partial())
}

/// Offset of the first byte where `a` and `b` disagree, counting a length
/// difference as a disagreement at the end of the shorter one
fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn write_unknown_fields(
    out: &mut impl Write,
    fields: &UnknownFieldSet,
    depth: usize,
    recursion_limit: usize,
) -> io::Result<()> {
    let pad = indent(depth);
    for (number, field) in fields.iter() {
        for value in field.varint_list() {
            writeln!(out, "{pad}{number}: {value}")?;
        }
        for value in field.fixed32_list() {
            writeln!(out, "{pad}{number}: 0x{value:08x}")?;
        }
        for value in field.fixed64_list() {
            writeln!(out, "{pad}{number}: 0x{value:016x}")?;
        }
        for value in field.length_delimited_list() {
            write_payload(out, &number.to_string(), value, depth, recursion_limit)?;
        }
        for group in field.group_list() {
            writeln!(out, "{pad}{number} {{")?;
            write_unknown_fields(out, group, depth + 1, recursion_limit)?;
            writeln!(out, "{pad}}}")?;
        }
    }
    Ok(())
}

/// Renders a length-delimited payload as text when it is printable, else as
/// a nested message when it parses as one, else as hex
fn write_payload(
    out: &mut impl Write,
    label: &str,
    payload: &[u8],
    depth: usize,
    recursion_limit: usize,
) -> io::Result<()> {
    let pad = indent(depth);
    if let Some(text) = printable(payload) {
        return writeln!(out, "{pad}{label}: {text:?}");
    }
    if depth < recursion_limit {
        if let Ok(nested) = parse_nested(payload, recursion_limit - depth) {
            writeln!(out, "{pad}{label} {{")?;
            write_unknown_fields(out, &nested, depth + 1, recursion_limit)?;
            return writeln!(out, "{pad}}}");
        }
    }
    writeln!(out, "{pad}{label}: <{}>", hex(payload))
}

fn parse_nested(payload: &[u8], recursion_limit: usize) -> pbwire_core::Result<UnknownFieldSet> {
    let mut reader =
        CodedReader::new(payload).with_config(ReaderConfig::new().recursion_limit(recursion_limit));
    let mut builder = UnknownFieldSetBuilder::new();
    builder.merge_from(&mut reader)?;
    reader.check_last_tag_was(None)?;
    Ok(builder.build())
}

fn printable(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()
        .filter(|text| !text.chars().any(|c| c.is_control() && !c.is_whitespace()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn write_message(
    out: &mut impl Write,
    message: &DynamicMessage,
    depth: usize,
    recursion_limit: usize,
) -> io::Result<()> {
    for (field, value) in message.fields().iter() {
        let label = if field.is_extension() {
            format!("[{}]", field.full_name())
        } else {
            field.name().to_owned()
        };
        match value {
            FieldValue::Single(value) => write_value(out, &label, value, depth, recursion_limit)?,
            FieldValue::Repeated(values) => {
                for value in values {
                    write_value(out, &label, value, depth, recursion_limit)?;
                }
            }
        }
    }
    write_unknown_fields(out, message.unknown_fields(), depth, recursion_limit)
}

fn write_value(
    out: &mut impl Write,
    label: &str,
    value: &Value,
    depth: usize,
    recursion_limit: usize,
) -> io::Result<()> {
    let pad = indent(depth);
    match value {
        Value::Message(message) => {
            writeln!(out, "{pad}{label} {{")?;
            write_message(out, message, depth + 1, recursion_limit)?;
            writeln!(out, "{pad}}}")
        }
        Value::String(text) => writeln!(out, "{pad}{label}: {text:?}"),
        Value::Bytes(bytes) => match printable(bytes) {
            Some(text) => writeln!(out, "{pad}{label}: {text:?}"),
            None => writeln!(out, "{pad}{label}: <{}>", hex(bytes)),
        },
        Value::Enum(value) => writeln!(out, "{pad}{label}: {}", value.name()),
        Value::Bool(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::I32(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::I64(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::U32(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::U64(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::F32(v) => writeln!(out, "{pad}{label}: {v}"),
        Value::F64(v) => writeln!(out, "{pad}{label}: {v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
    use tempfile::TempDir;

    const SAMPLE: &[u8] = b"\x08\x96\x01\x12\x05hello\x1a\x02\x08\x01\x25\x01\x00\x00\x00\x2a\x02\xff\x00";

    fn run_args(args: &[&str]) -> (Result<()>, String) {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut out = Vec::new();
        let result = run(&cli.command, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    fn field(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_owned()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn write_descriptor_set(dir: &Path) -> PathBuf {
        let set = FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("demo.proto".to_owned()),
                package: Some("demo".to_owned()),
                syntax: Some("proto2".to_owned()),
                message_type: vec![DescriptorProto {
                    name: Some("Item".to_owned()),
                    field: vec![
                        field("name", 1, Label::Required, Type::String),
                        field("count", 2, Label::Optional, Type::Int32),
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        let path = dir.join("demo.desc");
        fs::write(&path, set.encode_to_vec()).unwrap();
        path
    }

    #[test]
    fn test_decode_raw_renders_tree() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("sample.bin");
        fs::write(&input, SAMPLE).unwrap();

        let (result, out) = run_args(&["pbwire", "decode-raw", "--file", input.to_str().unwrap()]);
        result.unwrap();
        assert_eq!(
            out,
            "1: 150\n2: \"hello\"\n3 {\n  1: 1\n}\n4: 0x00000001\n5: <ff00>\n"
        );
    }

    #[test]
    fn test_decode_raw_stream() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("stream.bin");
        fs::write(&input, b"\x0a\x02\x08\x01\x0a\x02\x08\x02").unwrap();

        let (result, out) = run_args(&[
            "pbwire",
            "decode-raw",
            "--stream",
            "--file",
            input.to_str().unwrap(),
        ]);
        result.unwrap();
        assert_eq!(out, "message 0 {\n  1: 1\n}\nmessage 1 {\n  1: 2\n}\n");
    }

    #[test]
    fn test_decode_with_schema() {
        let dir = TempDir::new().unwrap();
        let descriptor_set = write_descriptor_set(dir.path());
        let input = dir.path().join("item.bin");
        fs::write(&input, b"\x0a\x03box\x10\x05\x18\x07").unwrap();

        let (result, out) = run_args(&[
            "pbwire",
            "decode",
            "--descriptor-set",
            descriptor_set.to_str().unwrap(),
            "--message",
            "demo.Item",
            "--check",
            "--file",
            input.to_str().unwrap(),
        ]);
        result.unwrap();
        assert_eq!(out, "name: \"box\"\ncount: 5\n3: 7\n");
    }

    #[test]
    fn test_decode_check_reports_missing_fields() {
        let dir = TempDir::new().unwrap();
        let descriptor_set = write_descriptor_set(dir.path());
        let input = dir.path().join("item.bin");
        fs::write(&input, b"\x10\x05").unwrap();

        let (result, _) = run_args(&[
            "pbwire",
            "decode",
            "--descriptor-set",
            descriptor_set.to_str().unwrap(),
            "-m",
            "demo.Item",
            "--check",
            "-f",
            input.to_str().unwrap(),
        ]);
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("missing required field(s): name"), "{message}");
    }

    #[test]
    fn test_roundtrip_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.bin"), SAMPLE).unwrap();
        fs::write(dir.path().join("b.bin"), b"\x0a\x05ab").unwrap();
        fs::write(dir.path().join(".hidden"), b"\xff").unwrap();

        let (result, out) = run_args(&[
            "pbwire",
            "roundtrip",
            "--directory",
            dir.path().to_str().unwrap(),
        ]);
        assert!(result.unwrap_err().to_string().contains("1 of 2 file(s) failed"));
        assert!(out.contains("a.bin: ok (23 bytes)"), "{out}");
    }

    #[test]
    fn test_roundtrip_reports_reordering() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("unordered.bin");
        fs::write(&input, b"\x10\x01\x08\x01").unwrap();

        let (result, _) = run_args(&["pbwire", "roundtrip", "-f", input.to_str().unwrap()]);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("differ at offset 0"), "{message}");
    }

    #[test]
    fn test_recursion_limit_flag() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("deep.bin");
        // Three nested groups in field 1
        fs::write(&input, b"\x0b\x0b\x0b\x0c\x0c\x0c").unwrap();

        let (result, _) = run_args(&[
            "pbwire",
            "decode-raw",
            "--recursion-limit",
            "2",
            "-f",
            input.to_str().unwrap(),
        ]);
        assert!(result.is_err());

        let (result, out) = run_args(&["pbwire", "decode-raw", "-f", input.to_str().unwrap()]);
        result.unwrap();
        assert_eq!(out, "1 {\n  1 {\n    1 {\n    }\n  }\n}\n");
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abc", b"abd"), Some(2));
        assert_eq!(first_difference(b"ab", b"abc"), Some(2));
    }

    #[test]
    fn test_printable() {
        assert_eq!(printable(b"hi there\n"), Some("hi there\n"));
        assert_eq!(printable(b"\x08\x01"), None);
        assert_eq!(printable(b"\xff"), None);
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/tmp/.git")));
        assert!(!is_hidden(Path::new("/tmp/data.bin")));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
