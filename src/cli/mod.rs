mod run;
mod serve;
mod services;

use anyhow::Result;
use console::style;

use crate::core::signer;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Service")
        .entry("serve [--api-host H] [--api-port P]", "Run the API and scheduler until Ctrl+C")
        .print();

    GuideSection::new("Tasks")
        .entry("run --code <auth_code>", "Run one reading session now")
        .print();

    GuideSection::new("Diagnostics")
        .entry("digest <text>", "Print the signature digest of a string")
        .entry("help", "Show this message")
        .print();

    println!(
        " {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("wxread").green()
    );
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> (Option<String>, Option<u16>) {
    let mut api_host = None;
    let mut api_port = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub(crate) fn parse_run_code(args: &[String], start: usize) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--code" | "-c" => {
                return args
                    .get(i + 1)
                    .map(|code| code.trim().to_string())
                    .filter(|code| !code.is_empty());
            }
            _ => i += 1,
        }
    }
    None
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => {
            let (api_host, api_port) = parse_serve_flags(&args, 2);
            serve::run_serve(api_host, api_port).await
        }
        "run" => match parse_run_code(&args, 2) {
            Some(code) => run::run_once(&code).await,
            None => {
                print_error("Error: --code is required for run.");
                print_help();
                Ok(())
            }
        },
        "digest" => {
            let text = args[2..].join(" ");
            println!("{}", signer::digest(&text));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
