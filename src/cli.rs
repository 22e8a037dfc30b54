use clap::{App, Arg, ArgMatches};
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

// Exit codes for different types of errors
pub const ERR_BAD_ARGS: i32 = 1;
pub const ERR_BUILD_ERROR: i32 = 2;
pub const ERR_GEN_ERROR: i32 = 3;
pub const ERR_IO_ERROR: i32 = 4;

pub fn configure_cli() -> clap::App<'static, 'static> {
    let app = App::new("Rill Backend")
        .version("0.4.0")
        .about("Lowers Rill quad IR into x86 assembly for use by the NASM assembler")
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .required(true)
                .help("Name the output file that the assembly will be written to"),
        )
        .arg(
            Arg::with_name("platform")
                .short("p")
                .long("platform")
                .possible_values(&["x86-64", "x86-32"])
                .takes_value(true)
                .required(true)
                .help("The processor mode that code will be generated for"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .help("Seed for the built-in unit generator, so a run can be reproduced"),
        )
        .arg(
            Arg::with_name("routines")
                .long("routines")
                .takes_value(true)
                .help("How many routines the generated unit will contain"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .possible_values(&["info", "debug", "trace"])
                .takes_value(true)
                .help("Print a log of the passes as they run. Trace level includes every allocation decision the generator makes."),
        );
    app
}

pub fn get_log_level(args: &ArgMatches) -> Option<LevelFilter> {
    args.value_of("log").map(|level| match level {
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    })
}

pub fn configure_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
}
