pub mod cookies;
pub mod forward_auth;
pub mod jwt;
pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SEED: &str = "seed";
pub const ARG_MAX_CONNECTIONS: &str = "max-connections";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("portcullis")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("PORTCULLIS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Datastore connection string")
                .long_help(
                    "Datastore connection string. `postgres://...` uses PostgreSQL; `memory://` keeps everything in process memory (optionally loaded from --seed).",
                )
                .env("PORTCULLIS_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SEED)
                .long(ARG_SEED)
                .help("JSON file with users and roles loaded into the memory datastore")
                .env("PORTCULLIS_SEED"),
        )
        .arg(
            Arg::new(ARG_MAX_CONNECTIONS)
                .long(ARG_MAX_CONNECTIONS)
                .help("Maximum PostgreSQL pool size")
                .env("PORTCULLIS_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        );

    let command = jwt::with_args(command);
    let command = cookies::with_args(command);
    let command = forward_auth::with_args(command);
    logging::with_args(command)
}
