use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use creator::{BingImageCreator, ProgressContext, get_valid_ipv4, parse_inline_generative_image};
use log::{info, warn};

mod cli;
mod config;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;
    let args = Cli::parse();

    match &args.command {
        Command::Inline { message } => {
            match parse_inline_generative_image(message.as_str()) {
                Some(prompt) => println!("{prompt}"),
                None => println!("No inline image request found"),
            }
            return Ok(());
        }
        Command::Ip { spec } => {
            let ip = get_valid_ipv4(spec)
                .ok_or(eyre!("Not an IPv4 address or CIDR range: {spec}"))?;
            println!("{ip}");
            return Ok(());
        }
        _ => {}
    }

    let bic = BingImageCreator::new(config::load_options(&args)?)?;
    let message_id = uuid::Uuid::new_v4().to_string();

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Cancelling after the current poll");
                cancelled.store(true, Ordering::Relaxed);
            }
        });
    }
    let on_progress = |ctx: &ProgressContext| {
        if let Some(iframe) = &ctx.content_iframe {
            info!("Creation page: {iframe}");
        }
        if let Some(start) = ctx.polling_start_time {
            let secs = start.elapsed().unwrap_or_default().as_secs();
            info!("Still generating ({secs}s)");
        }
        cancelled.load(Ordering::Relaxed)
    };

    match args.command {
        Command::List { prompt, full_size } => {
            let urls = bic
                .gen_image_list(&prompt, &message_id, full_size, on_progress)
                .await?;
            if urls.is_empty() {
                warn!("The service returned no images");
            }
            for url in urls {
                println!("{url}");
            }
        }
        Command::Ssr { prompt } => {
            println!(
                "{}",
                bic.gen_image_iframe_ssr(&prompt, &message_id, on_progress)
                    .await?
            );
        }
        Command::SsrLite { prompt } => {
            println!(
                "{}",
                bic.gen_image_iframe_ssr_lite(&prompt, &message_id, on_progress)
                    .await?
            );
        }
        Command::Csr { prompt } => {
            println!("{}", bic.gen_image_iframe_csr(&prompt, &message_id)?);
        }
        Command::Inline { .. } | Command::Ip { .. } => unreachable!("handled above"),
    }

    Ok(())
}
