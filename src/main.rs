use clap::Parser as _;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Read, Write};
use std::path::PathBuf;

use ksh_grammar::compiled;
use ksh_grammar::config::{LintPolicy, ParseOptions};
use ksh_grammar::xref::CsvXref;
use ksh_grammar::{ParseError, Parser, Program};

#[derive(clap::Parser)]
#[command(name = "shcomp")]
#[command(about = "Compile a ksh script into its binary form")]
#[command(version)]
struct Cli {
    /// Report obsolete and suspicious constructs
    #[arg(short = 'n')]
    lint: bool,

    /// Write the syntax tree as JSON instead of the binary form
    #[arg(short = 'D')]
    dump: bool,

    /// More log output; repeat for token tracing
    #[arg(short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q')]
    quiet: bool,

    /// POSIX mode: leading zeros mean octal
    #[arg(long = "posix")]
    posix: bool,

    /// TOML file with parse options
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Write cross-reference records to FILE
    #[arg(long = "xref", value_name = "FILE")]
    xref: Option<PathBuf>,

    /// Script to compile; standard input if omitted
    #[arg()]
    infile: Option<PathBuf>,

    /// Output file; standard output if omitted
    #[arg()]
    outfile: Option<PathBuf>,
}

/// Log records go to standard error as `shcomp: level: message`.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("shcomp: {}: {}", record.level().as_str().to_lowercase(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

enum Failure {
    Syntax(String),
    Resource(String),
}

impl Failure {
    fn exit_code(&self) -> i32 {
        match self {
            Failure::Syntax(_) => 1,
            Failure::Resource(_) => 2,
        }
    }
}

impl From<ParseError> for Failure {
    fn from(e: ParseError) -> Self {
        if e.is_syntax() {
            Failure::Syntax(e.to_string())
        } else {
            Failure::Resource(e.to_string())
        }
    }
}

impl From<io::Error> for Failure {
    fn from(e: io::Error) -> Self {
        Failure::Resource(e.to_string())
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, 0) => log::LevelFilter::Warn,
        (false, 1) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }

    if let Err(failure) = run(&cli) {
        match &failure {
            Failure::Syntax(message) | Failure::Resource(message) => eprintln!("shcomp: {}", message),
        }
        std::process::exit(failure.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let mut options = match &cli.config {
        Some(path) => ParseOptions::from_file(path).map_err(|e| Failure::Resource(e.to_string()))?,
        None => ParseOptions::default(),
    };
    if cli.posix {
        options.posix = true;
    }
    if cli.lint && options.lint == LintPolicy::Off {
        options.lint = LintPolicy::Warn;
    }

    let (bytes, script) = match &cli.infile {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|e| Failure::Resource(format!("{}: {}", path.display(), e)))?;
            (bytes, path.display().to_string())
        }
        None => {
            let mut bytes = Vec::new();
            io::stdin().read_to_end(&mut bytes)?;
            (bytes, "-".to_string())
        }
    };

    let mut parser = Parser::with_options(options);
    parser.check_input_size(bytes.len()).map_err(ParseError::from)?;
    if let Some(path) = &cli.xref {
        let file = File::create(path).map_err(|e| Failure::Resource(format!("{}: {}", path.display(), e)))?;
        parser.set_xref(Box::new(CsvXref::new(BufWriter::new(file))), &script)?;
    }

    let program = compiled::parse_bytes(&mut parser, &bytes)?;
    parser.finish_xref()?;
    log::debug!("{}: {} nodes, {} warnings", script, parser.arena_stats().peak, parser.diagnostics().len());

    match &cli.outfile {
        Some(path) => {
            let file = File::create(path).map_err(|e| Failure::Resource(format!("{}: {}", path.display(), e)))?;
            write_output(cli, &program, BufWriter::new(file))
        }
        None => {
            let stdout = io::stdout();
            if !cli.dump && stdout.is_terminal() {
                return Err(Failure::Resource("cannot write binary output to a terminal".to_string()));
            }
            write_output(cli, &program, stdout.lock())
        }
    }
}

fn write_output<W: Write>(cli: &Cli, program: &Program, mut out: W) -> Result<(), Failure> {
    if cli.dump {
        serde_json::to_writer_pretty(&mut out, program).map_err(|e| Failure::Resource(e.to_string()))?;
        writeln!(out)?;
        out.flush()?;
        return Ok(());
    }
    compiled::save_program(program, out).map_err(ParseError::from)?;
    Ok(())
}
