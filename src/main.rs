use std::sync::Arc;

use anyhow::Context;

const HELP: &str = "Otogram TUI - Watch, reply to and manage short videos from the terminal.

  --version, -V            Show version and exit
  --help,    -h            Show this help message
  --download <url> <id>    Save one video to the downloads folder and exit

Logging is off unless OTOGRAM_LOG is set (e.g. OTOGRAM_LOG=debug).";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match handle_cli_flags(&args) {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }

    if let Err(err) = otogram_tui::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String]) -> anyhow::Result<bool> {
    let mut saw_flag = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Otogram TUI {}", otogram_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            "--download" => {
                let (Some(url), Some(id)) = (iter.next(), iter.next()) else {
                    anyhow::bail!("usage: --download <url> <id>");
                };
                download_once(url, id)?;
                saw_flag = true;
            }
            other if other.starts_with('-') => anyhow::bail!("unknown flag {other}; see --help"),
            _ => {}
        }
    }
    Ok(saw_flag)
}

fn download_once(url: &str, id: &str) -> anyhow::Result<()> {
    use otogram_tui::{config, download, storage};

    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let downloader = download::Downloader::new(
        store,
        download::Config {
            dir: cfg.downloads.dir.clone(),
            user_agent: cfg.api.user_agent.clone(),
            ..download::Config::default()
        },
    )?;
    let request = download::Request {
        video_id: id.to_string(),
        url: otogram_tui::assets::resolve(&cfg.api.base_url, url),
    };
    let record = download::run_with_progress_bar(&downloader, &request)?;
    println!("Saved {}", record.file_path);
    Ok(())
}
