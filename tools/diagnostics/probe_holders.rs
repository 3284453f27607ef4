/// Page through the holders of one asset using the configured providers.
///
/// Useful to check an API key, a network name, or how large a collection
/// really is before it ends up in an analysis.
///
///   probe-holders nft 0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d --network ETH_MAINNET
///   probe-holders poap 12345 --show 20
///   probe-holders erc20 0x833589fcd6edb6e08f4c7c32d4f71b54bda02913 --max-holders 5000

use clap::{Parser, ValueEnum};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use ghostcontext::config::{init_global_config, Settings};
use ghostcontext::holders::{collect_holders, FetchLimits, FetchStatus, HolderSources};
use ghostcontext::telemetry::{init_tracing, TelemetryConfig};
use ghostcontext::types::{AssetRef, Erc20Ref, NftRef, PoapRef};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Nft,
    Poap,
    Erc20,
}

#[derive(Parser, Debug)]
#[clap(name = "probe-holders")]
#[clap(about = "Fetch the holder list of one NFT collection, POAP event or ERC-20 token", long_about = None)]
struct Args {
    /// Asset class
    #[clap(value_enum)]
    kind: Kind,

    /// Contract address, or POAP event id
    id: String,

    /// Network for NFTs and ERC-20 tokens (ETH_MAINNET, BASE_MAINNET, ...)
    #[clap(long, default_value = "ETH_MAINNET")]
    network: String,

    /// Stop once more than this many holders were collected
    #[clap(long)]
    max_holders: Option<usize>,

    /// Per-page timeout in seconds
    #[clap(long)]
    page_timeout: Option<u64>,

    /// Print the first N holders
    #[clap(long, default_value_t = 10)]
    show: usize,

    /// Configuration file
    #[clap(long, default_value = "config.toml")]
    config: String,
}

fn asset_ref(args: &Args) -> AssetRef {
    match args.kind {
        Kind::Nft => AssetRef::Nft(NftRef {
            network: args.network.clone(),
            address: args.id.clone(),
            name: String::new(),
        }),
        Kind::Poap => AssetRef::Poap(PoapRef {
            event_id: args.id.trim().to_string(),
            name: String::new(),
        }),
        Kind::Erc20 => AssetRef::Erc20(Erc20Ref {
            network: args.network.clone(),
            address: args.id.clone(),
            symbol: String::new(),
            name: String::new(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_global_config(&args.config)?;
    init_tracing(TelemetryConfig::default())?;

    let settings = Settings::from_global()?;
    let sources = HolderSources::from_settings(&settings)?;

    let asset = asset_ref(&args);
    let source = sources.for_class(asset.class());
    let limits = FetchLimits {
        max_holders: args.max_holders.unwrap_or(settings.analysis.max_holders_per_asset),
        page_timeout: Duration::from_secs(
            args.page_timeout.unwrap_or(settings.analysis.page_timeout_secs),
        ),
    };

    println!("Asset:    {}", asset.identity());
    println!("Provider: {}", source.name());
    println!("Cap:      {} holders", limits.max_holders);

    // Ctrl-C stops after the page in flight
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let started = Instant::now();
    let fetch = collect_holders(source.as_ref(), &asset, limits, &cancel).await;
    let elapsed = started.elapsed();

    let mut distinct = fetch.addresses.clone();
    distinct.sort_unstable();
    distinct.dedup();

    println!();
    println!("Status:   {}", fetch.status.label());
    if let FetchStatus::Partial(reason) | FetchStatus::Failed(reason) = &fetch.status {
        println!("Reason:   {}", reason);
    }
    println!("Pages:    {}", fetch.pages);
    println!("Holders:  {} ({} distinct)", fetch.addresses.len(), distinct.len());
    println!("Elapsed:  {:.1}s", elapsed.as_secs_f64());

    if args.show > 0 && !distinct.is_empty() {
        println!();
        for address in distinct.iter().take(args.show) {
            println!("  {}", address);
        }
        if distinct.len() > args.show {
            println!("  ... {} more", distinct.len() - args.show);
        }
    }

    if matches!(fetch.status, FetchStatus::Failed(_)) {
        std::process::exit(1);
    }
    Ok(())
}
