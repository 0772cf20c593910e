mod command;
mod flags;
mod handler;
mod registry;
mod source;

use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
};

use clap::{crate_version, Arg, Command};

pub const APP_NAME: &str = "explorer-api";

#[tokio::main]
async fn main() -> io::Result<()> {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Serves address data of EVM chains from the Avalanche Data API")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .arg(
            Arg::new("HTTP_HOST")
                .long("http-host")
                .help("Sets the HTTP host/port to serve (0.0.0.0:3032 to open to all)")
                .required(false)
                .num_args(1)
                .default_value("127.0.0.1:3032"),
        )
        .arg(
            Arg::new("CHAINS_FILE")
                .long("chains-file")
                .help("Sets the YAML file of known chains (written with the built-in C-Chain entries if missing)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("DATA_API_URL")
                .long("data-api-url")
                .help("Sets the Avalanche Data API (Glacier) base URL")
                .required(false)
                .num_args(1)
                .default_value(source::DEFAULT_DATA_API_URL),
        )
        .arg(
            Arg::new("DATA_API_KEY")
                .long("data-api-key")
                .help("Sets the Data API key (sent as 'x-glacier-api-key')")
                .required(false)
                .num_args(1),
        )
        .get_matches();

    println!("{} version: {}", APP_NAME, crate_version!());

    let http_host = matches
        .get_one::<String>("HTTP_HOST")
        .unwrap_or(&String::from("127.0.0.1:3032"))
        .clone();
    let http_host: SocketAddr = http_host.parse().map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid http host '{http_host}' ({e})"),
        )
    })?;

    command::execute(flags::Options {
        log_level: matches
            .get_one::<String>("LOG_LEVEL")
            .unwrap_or(&String::from("info"))
            .clone(),
        http_host,
        chains_file: matches.get_one::<String>("CHAINS_FILE").cloned(),
        data_api_url: matches
            .get_one::<String>("DATA_API_URL")
            .unwrap_or(&String::from(source::DEFAULT_DATA_API_URL))
            .clone(),
        data_api_key: matches.get_one::<String>("DATA_API_KEY").cloned(),
    })
    .await
}
