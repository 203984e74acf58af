//! `streamfi` command line entry-point.
//!
//! 1. Parse arguments, load `config/streamfi.json` (or defaults) and
//!    initialise tracing.
//! 2. Build the wallet backend: an EIP-1193 JSON-RPC endpoint wrapped in the
//!    retrying [`ResilientBackend`].
//! 3. Connect the wallet when the command needs an account, then dispatch.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ethers::types::Address;
use streamfi_client::{
    annotations::{AnnotationStore, DurationPreset},
    blockchain::{ChainBackend, ResilientBackend, RpcBackend},
    config::Config,
    exchange::{AdminPanel, Currency, ExchangePanel, ExchangeRequest, QuoteEngine, RequestList},
    metrics,
    poller::PollSchedule,
    retry::RetryPolicy,
    streams::{RecipientInput, StreamComposer, StreamDraft, StreamSnapshot, StreamStats, StreamSynchronizer},
    token::{format_token_amount, TokenClient},
};

#[derive(Parser, Debug)]
#[command(name = "streamfi", author, version, about = "StreamFi payment streams and fiat exchange client", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config/streamfi.json")]
    config: PathBuf,

    /// Overrides `rpc_url` from the configuration.
    #[arg(long)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect the wallet and show the token balance.
    Connect,
    /// Send tokens to an address.
    Transfer { to: Address, amount: String },
    /// List streams created by or paying the connected account.
    Streams {
        /// Include hidden streams.
        #[arg(long)]
        all: bool,
    },
    /// Poll streams and exchange requests until Ctrl-C or the deadline.
    Watch {
        #[arg(long, default_value_t = 60)]
        secs: u64,
    },
    /// Create a new stream.
    CreateStream(StreamArgs),
    /// Show what a stream would cost without submitting it.
    Preview(StreamArgs),
    /// Fund a stream, approving the token first if needed.
    Fund { stream_id: u64 },
    /// Claim the accrued reward of a stream.
    Claim { stream_id: u64 },
    /// Stream statistics.
    Analytics {
        /// Every stream instead of the ones created by this account.
        #[arg(long)]
        overall: bool,
    },
    /// Toggle the local pause marker of an active stream.
    Pause { stream_id: u64 },
    /// Toggle whether a stream is hidden from listings.
    Hide { stream_id: u64 },
    /// Toggle the local removed marker of a recipient of an inactive stream.
    RemoveRecipient { stream_id: u64, recipient: Address },
    #[command(subcommand)]
    AddressBook(AddressBookCommand),
    #[command(subcommand)]
    Templates(TemplateCommand),
    /// Quote a buy or sell without touching the chain.
    Quote {
        #[arg(value_parser = ["buy", "sell"])]
        side: String,
        amount: String,
        currency: Currency,
    },
    /// Request tokens for fiat.
    Buy {
        amount: String,
        currency: Currency,
        /// Wallet to receive the tokens. Defaults to the connected account.
        #[arg(long)]
        recipient: Option<String>,
    },
    /// Request fiat for tokens.
    Sell {
        amount: String,
        currency: Currency,
        mobile_number: String,
    },
    /// Cancel one of your pending exchange requests.
    Cancel { request_id: u64 },
    /// List your exchange requests.
    Requests,
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Print the Prometheus metrics of this process.
    Metrics,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// `ADDRESS` or `ADDRESS:RATE`; repeat for every recipient.
    #[arg(long = "recipient", required = true)]
    recipients: Vec<String>,
    /// Default hourly rate for recipients without their own.
    #[arg(long)]
    rate: Option<String>,
    /// week, month, quarter, year or custom.
    #[arg(long)]
    preset: Option<DurationPreset>,
    /// Duration in hours (with `--preset custom` or alone).
    #[arg(long)]
    hours: Option<u64>,
    /// Template id or name supplying rate and duration.
    #[arg(long)]
    template: Option<String>,
}

#[derive(Subcommand, Debug)]
enum AddressBookCommand {
    List,
    Add { name: String, address: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
    List,
    Save {
        name: String,
        #[arg(long)]
        rate: Decimal,
        #[arg(long, default_value = "month")]
        preset: DurationPreset,
        #[arg(long)]
        hours: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    Pending,
    Approve {
        request_id: u64,
        #[arg(long)]
        notes: Option<String>,
    },
    Reject {
        request_id: u64,
        #[arg(long)]
        notes: Option<String>,
    },
}

struct App {
    config: Config,
    backend: Arc<dyn ChainBackend>,
    token: TokenClient,
    annotations: Arc<AnnotationStore>,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let rpc = RpcBackend::new(&config.rpc_url).wrap_err("Failed to create wallet backend")?;
        let backend: Arc<dyn ChainBackend> =
            Arc::new(ResilientBackend::new(Arc::new(rpc), RetryPolicy::from(&config.retry)));
        let annotations = Arc::new(match &config.annotations_path {
            Some(path) => AnnotationStore::open(path).await,
            None => AnnotationStore::in_memory(),
        });
        let token = TokenClient::new(Some(backend.clone()), &config);
        Ok(Self {
            config,
            backend,
            token,
            annotations,
        })
    }

    async fn account(&self) -> Result<Address> {
        Ok(self.token.connect().await.map_err(user_facing)?)
    }

    async fn synchronizer(&self) -> Result<Arc<StreamSynchronizer>> {
        let account = self.account().await?;
        let sync = StreamSynchronizer::initialize(self.backend.clone(), &self.config, account, self.annotations.clone())
            .await
            .map_err(user_facing)?;
        Ok(sync)
    }

    async fn snapshot(&self) -> Result<(Arc<StreamSynchronizer>, StreamSnapshot)> {
        let sync = self.synchronizer().await?;
        sync.sync_once().await;
        let snapshot = sync
            .snapshot()
            .await
            .ok_or_else(|| eyre::eyre!("No stream data available"))?;
        if let Some(error) = &snapshot.error {
            eyre::bail!("{}", error);
        }
        Ok((sync, snapshot))
    }

    async fn composer(&self) -> Result<StreamComposer> {
        let sync = self.synchronizer().await?;
        let decimals = self.token.decimals().await;
        Ok(
            StreamComposer::new(self.backend.clone(), &self.config, sync.account(), decimals, self.annotations.clone())
                .with_synchronizer(sync),
        )
    }

    async fn exchange(&self) -> Result<ExchangePanel> {
        let account = self.account().await?;
        Ok(ExchangePanel::connect(self.backend.clone(), &self.config, account)
            .await
            .map_err(user_facing)?)
    }

    async fn admin(&self) -> Result<AdminPanel> {
        let account = self.account().await?;
        let panel = AdminPanel::connect(self.backend.clone(), &self.config, account)
            .await
            .map_err(user_facing)?;
        if !panel.is_admin() {
            eyre::bail!("Access denied: {:?} is not the contract admin ({:?})", account, panel.admin());
        }
        Ok(panel)
    }

    fn symbol(&self) -> &str {
        &self.config.token.symbol
    }
}

fn user_facing(err: streamfi_client::ClientError) -> eyre::Report {
    eyre::eyre!(err.user_message())
}

fn parse_recipient(raw: &str) -> RecipientInput {
    match raw.split_once(':') {
        Some((address, rate)) => RecipientInput {
            address: address.to_string(),
            hourly_rate: Some(rate.to_string()),
        },
        None => RecipientInput {
            address: raw.to_string(),
            hourly_rate: None,
        },
    }
}

async fn draft_from_args(app: &App, args: &StreamArgs) -> Result<StreamDraft> {
    let mut default_rate = args.rate.clone();
    let mut duration_hours = match args.preset {
        Some(DurationPreset::Custom) | None => args.hours,
        Some(preset) => preset.hours(),
    };

    if let Some(wanted) = &args.template {
        let doc = app.annotations.snapshot().await;
        let template = doc
            .templates
            .iter()
            .find(|t| &t.id == wanted || t.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| eyre::eyre!("Unknown template: {}", wanted))?;
        default_rate = default_rate.or_else(|| Some(template.hourly_rate.to_string()));
        duration_hours = duration_hours.or(Some(template.duration()));
    }

    Ok(StreamDraft {
        default_rate,
        duration_hours: duration_hours.unwrap_or(0),
        recipients: args.recipients.iter().map(|r| parse_recipient(r)).collect(),
    })
}

fn print_snapshot(snapshot: &StreamSnapshot, hidden: &BTreeSet<u64>, show_hidden: bool, decimals: u8, symbol: &str) {
    let now = Utc::now().timestamp().max(0) as u64;
    let visible = |id: u64| show_hidden || !hidden.contains(&id);

    println!("Created by you:");
    for stream in snapshot.created_by_me().filter(|s| visible(s.id)) {
        println!(
            "  {} | remaining {} {} | {}s left",
            stream.summary(decimals, symbol),
            format_token_amount(stream.remaining(), decimals),
            symbol,
            stream.time_remaining(now)
        );
    }
    println!("Paying you:");
    for stream in snapshot.receiving().filter(|s| visible(s.id)) {
        let accrued = stream
            .accrued
            .map(|a| format!("{} {}", format_token_amount(a, decimals), symbol))
            .unwrap_or_else(|| "-".to_string());
        println!("  {} | claimable {}", stream.summary(decimals, symbol), accrued);
    }
}

fn print_requests(list: &RequestList) {
    if let Some(error) = &list.error {
        println!("! {}", error);
    }
    if list.requests.is_empty() {
        println!("No requests.");
    }
    for r in &list.requests {
        print_request(r);
    }
}

fn print_request(r: &ExchangeRequest) {
    println!(
        "#{} {:?} {} {} [{}] user {:?} wallet {:?} mobile '{}' notes '{}'",
        r.id,
        r.kind(),
        r.amount_display(),
        r.currency,
        r.status,
        r.user,
        r.recipient_wallet,
        r.mobile_number,
        r.admin_notes
    );
}

fn print_stats(stats: &StreamStats, decimals: u8, symbol: &str) {
    println!("Streams: {} total, {} active, {} paused, {} inactive", stats.total, stats.active, stats.paused, stats.inactive);
    println!(
        "Funded {} {} / distributed {} {} / remaining {} {}",
        format_token_amount(stats.total_funded, decimals),
        symbol,
        format_token_amount(stats.total_distributed, decimals),
        symbol,
        format_token_amount(stats.total_remaining, decimals),
        symbol
    );
    println!(
        "Recipients {} (unique {}), creators {}, average value {} {}, average recipients {:.2}, distributed {:.2}%",
        stats.total_recipients,
        stats.unique_recipients,
        stats.unique_creators,
        format_token_amount(stats.average_value, decimals),
        symbol,
        stats.average_recipients,
        stats.distribution_rate
    );
    println!(
        "Started: {} in 24h, {} in 7d, {} in 30d",
        stats.recent.last_24h, stats.recent.last_7d, stats.recent.last_30d
    );
}

async fn watch(app: &App, secs: u64) -> Result<()> {
    let sync = app.synchronizer().await?;
    let exchange = app.exchange().await?;
    let polling = &app.config.polling;

    let _streams = sync.start_polling(PollSchedule::new(polling.stream_initial_delay(), polling.stream_interval()));
    let _requests = exchange.start_polling(PollSchedule::new(Duration::ZERO, polling.exchange_interval()));
    info!(secs, "Watching streams and exchange requests");

    let decimals = app.token.decimals().await;
    let mut report = tokio::time::interval(polling.stream_interval());
    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
            _ = report.tick() => {
                let hidden = app.annotations.snapshot().await.hidden_streams;
                match sync.snapshot().await {
                    Some(snapshot) => {
                        if let Some(error) = &snapshot.error {
                            warn!(%error, "Latest stream cycle failed");
                        }
                        print_snapshot(&snapshot, &hidden, false, decimals, app.symbol());
                    }
                    None => println!("Streams loading..."),
                }
                print_requests(&exchange.requests().await);
            }
        }
    }

    print!("{}", metrics::render());
    Ok(())
}

async fn run(app: App, command: Command) -> Result<()> {
    match command {
        Command::Connect => {
            app.account().await?;
            let session = app.token.session().await;
            println!("Account: {:?}", session.account.unwrap_or_default());
            println!("Chain:   {}", session.chain_id.unwrap_or_default());
            if let Some(info) = &session.token_info {
                println!("Token:   {} ({}), {} decimals", info.name, info.symbol, info.decimals);
            }
            match (&session.balance_display, &session.error) {
                (Some(balance), _) => println!("Balance: {} {}", balance, app.symbol()),
                (None, Some(error)) => println!("Balance unavailable: {}", error),
                (None, None) => {}
            }
        }
        Command::Transfer { to, amount } => {
            app.account().await?;
            let tx_hash = app.token.transfer(to, &amount).await.map_err(user_facing)?;
            println!("Transfer confirmed: {:?}", tx_hash);
        }
        Command::Streams { all } => {
            let (_, snapshot) = app.snapshot().await?;
            let hidden = app.annotations.snapshot().await.hidden_streams;
            print_snapshot(&snapshot, &hidden, all, app.token.decimals().await, app.symbol());
        }
        Command::Watch { secs } => watch(&app, secs).await?,
        Command::Preview(args) => {
            let draft = draft_from_args(&app, &args).await?;
            let decimals = app.config.token.decimals;
            match draft.preview(decimals, Utc::now()) {
                Some(preview) => {
                    for (recipient, total) in draft.recipients.iter().zip(&preview.recipient_totals) {
                        println!("  {} -> {} {}", recipient.address, format_token_amount(*total, decimals), app.symbol());
                    }
                    println!(
                        "Total {} {} over {} h, ends {} (valid: {})",
                        format_token_amount(preview.total_amount, decimals),
                        app.symbol(),
                        preview.duration_hours,
                        preview.ends_at.to_rfc3339(),
                        preview.is_valid
                    );
                }
                None => println!("Nothing to preview: {}", draft.plan(decimals).err().map(|e| e.to_string()).unwrap_or_default()),
            }
        }
        Command::CreateStream(args) => {
            let draft = draft_from_args(&app, &args).await?;
            let composer = app.composer().await?;
            let plan = draft.plan(composer.decimals()).map_err(user_facing)?;
            let created = composer.create_stream(&plan).await.map_err(user_facing)?;
            println!(
                "Stream created successfully! Now fund it to activate. (stream #{}, tx {:?})",
                created.stream_id, created.tx_hash
            );
        }
        Command::Fund { stream_id } => {
            let composer = app.composer().await?;
            let receipt = composer.fund_stream(stream_id).await.map_err(user_facing)?;
            let decimals = composer.decimals();
            println!(
                "Stream #{} funded with {} {} (tx {:?}, block {})",
                receipt.stream_id,
                format_token_amount(receipt.amount, decimals),
                app.symbol(),
                receipt.tx_hash,
                receipt.block_number.map(|b| b.to_string()).unwrap_or_else(|| "?".into())
            );
            for (recipient, rate) in &receipt.recipient_rates {
                println!("  {:?} at {} {}/h", recipient, format_token_amount(*rate, decimals), app.symbol());
            }
        }
        Command::Claim { stream_id } => {
            let composer = app.composer().await?;
            let tx_hash = composer.claim_reward(stream_id).await.map_err(user_facing)?;
            println!("Reward claimed: {:?}", tx_hash);
        }
        Command::Analytics { overall } => {
            let (_, snapshot) = app.snapshot().await?;
            let doc = app.annotations.snapshot().await;
            let now = Utc::now().timestamp().max(0) as u64;
            let stats = if overall {
                StreamStats::overall(&snapshot.streams, &doc.paused_streams, now)
            } else {
                StreamStats::for_creator(&snapshot.streams, &doc.hidden_streams, &doc.paused_streams, now)
            };
            print_stats(&stats, app.token.decimals().await, app.symbol());
        }
        Command::Pause { stream_id } => {
            let (_, snapshot) = app.snapshot().await?;
            let active = snapshot.get(stream_id).map(|s| s.is_active()).unwrap_or(false);
            let paused = app
                .annotations
                .toggle_pause(stream_id, active, Utc::now().timestamp())
                .await
                .map_err(user_facing)?;
            println!("Stream #{} {}", stream_id, if paused { "paused" } else { "resumed" });
        }
        Command::Hide { stream_id } => {
            let hidden = app.annotations.toggle_hidden(stream_id).await.map_err(user_facing)?;
            println!("Stream #{} {}", stream_id, if hidden { "hidden" } else { "visible" });
        }
        Command::RemoveRecipient { stream_id, recipient } => {
            let (_, snapshot) = app.snapshot().await?;
            let stream = snapshot
                .get(stream_id)
                .ok_or_else(|| eyre::eyre!("Stream #{} not found", stream_id))?;
            let removed = app
                .annotations
                .toggle_removed_recipient(stream_id, recipient, stream.is_active())
                .await
                .map_err(user_facing)?;
            println!("Recipient {:?} {}", recipient, if removed { "marked removed" } else { "restored" });
        }
        Command::AddressBook(cmd) => match cmd {
            AddressBookCommand::List => {
                for entry in app.annotations.snapshot().await.recipients {
                    println!("{}  {}  {}", entry.id, entry.name, entry.address);
                }
            }
            AddressBookCommand::Add { name, address } => {
                let entry = app
                    .annotations
                    .add_address_book_entry(&name, &address, Utc::now())
                    .await
                    .map_err(user_facing)?;
                println!("Added {} ({})", entry.name, entry.id);
            }
            AddressBookCommand::Delete { id } => {
                let removed = app.annotations.delete_address_book_entry(&id).await.map_err(user_facing)?;
                println!("{}", if removed { "Deleted" } else { "No such entry" });
            }
        },
        Command::Templates(cmd) => match cmd {
            TemplateCommand::List => {
                for t in app.annotations.snapshot().await.templates {
                    println!("{}  {}  {} {}/h for {} h  {}", t.id, t.name, t.hourly_rate, app.symbol(), t.duration(), t.description);
                }
            }
            TemplateCommand::Save { name, rate, preset, hours } => {
                let template = app
                    .annotations
                    .save_template(&name, Some(rate), preset, hours, Utc::now())
                    .await
                    .map_err(user_facing)?;
                println!("Saved template {} ({})", template.name, template.id);
            }
        },
        Command::Quote { side, amount, currency } => {
            let engine = QuoteEngine::new(app.config.exchange.clone());
            let amount: Decimal = amount.trim().parse().wrap_err("Please enter a valid amount")?;
            if side == "buy" {
                match engine.buy(amount, currency).map_err(user_facing)? {
                    Some(q) => println!(
                        "{} {} = {:.2} USD = {:.6} {}, fee {:.6}, you receive {:.6} {}",
                        q.fiat_amount, q.currency, q.usd_equivalent, q.token_amount, app.symbol(), q.fee, q.tokens_received, app.symbol()
                    ),
                    None => println!("Enter a positive amount"),
                }
            } else {
                match engine.sell(amount, currency).map_err(user_facing)? {
                    Some(q) => println!(
                        "{} {} = {:.2} USD, fee {:.2} USD, you receive {:.2} {}",
                        q.token_amount, app.symbol(), q.usd_equivalent, q.fee, q.fiat_received, q.currency
                    ),
                    None => println!("Enter a positive amount"),
                }
            }
        }
        Command::Buy { amount, currency, recipient } => {
            let panel = app.exchange().await?;
            let submitted = panel
                .submit_buy(&amount, currency, recipient.as_deref())
                .await
                .map_err(user_facing)?;
            println!("{}", submitted.message);
        }
        Command::Sell { amount, currency, mobile_number } => {
            let panel = app.exchange().await?;
            let submitted = panel
                .submit_sell(&amount, currency, &mobile_number)
                .await
                .map_err(user_facing)?;
            println!("{}", submitted.message);
        }
        Command::Cancel { request_id } => {
            let panel = app.exchange().await?;
            let submitted = panel.cancel(request_id).await.map_err(user_facing)?;
            println!("{}", submitted.message);
        }
        Command::Requests => {
            let panel = app.exchange().await?;
            panel.refresh_requests().await;
            print_requests(&panel.requests().await);
        }
        Command::Admin(cmd) => {
            let admin = app.admin().await?;
            match cmd {
                AdminCommand::Pending => {
                    admin.refresh_pending().await;
                    print_requests(&admin.pending().await);
                }
                AdminCommand::Approve { request_id, notes } => {
                    let tx_hash = admin.approve(request_id, notes.as_deref()).await.map_err(user_facing)?;
                    println!("Request #{} approved ({:?})", request_id, tx_hash);
                }
                AdminCommand::Reject { request_id, notes } => {
                    let tx_hash = admin.reject(request_id, notes.as_deref()).await.map_err(user_facing)?;
                    println!("Request #{} rejected ({:?})", request_id, tx_hash);
                }
            }
        }
        Command::Metrics => print!("{}", metrics::render()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config).await?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }

    // Keep ethers' transport chatter out of the client's own logs.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level))
        .add_directive("ethers_providers=warn".parse()?)
        .add_directive("ethers=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(config = %cli.config.display(), rpc = %config.rpc_url, "Starting streamfi");

    let app = App::build(config).await?;
    run(app, cli.command).await
}
