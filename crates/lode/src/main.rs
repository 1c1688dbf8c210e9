use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands::*, TraceLevel};
use dotenv::{dotenv, var};
use lode_chat::{convo::Message, ChatClient};
use lode_warehouse::{api, endp::eodhd::Eodhd, sync::Pipeline};
use tokio_postgres::{self as pg, NoTls};
use tokio_stream::{self as stream, StreamExt};
use tracing::{error, info, subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod ui;

fn preprocess(trace_level: Level) {
    dotenv().ok();
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber).expect("set subscriber");
}

/// Open both pipeline collaborators: the shared HTTP client and the
/// warehouse connection (driven on its own task).
async fn connect() -> Result<Pipeline> {
    let (pg_client, pg_conn) = pg::connect(&var("POSTGRES_URL")?, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = pg_conn.await {
            error!("connection error: {e}");
        }
    });

    let http_client = api::build_client()?;
    Pipeline::new(http_client, pg_client, Eodhd::from_env()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.trace {
        TraceLevel::DEBUG => Level::DEBUG,
        TraceLevel::INFO => Level::INFO,
        TraceLevel::WARN => Level::WARN,
        TraceLevel::ERROR => Level::ERROR,
    };

    preprocess(log_level);
    trace!("Command line input recorded: {cli:#?}");

    ////////////////////////////////////////////////////////////////////////////////////////////////////

    // cli framework:
    // "> lode <COMMAND>"
    match &cli.command {
        // "> lode sync MSFT AAPL"
        // sync named tickers one at a time; each ticker's errors surface here
        Sync { tickers } => {
            let time = std::time::Instant::now();
            let pipeline = connect().await?;

            let pb = ui::single_pb(tickers.len() as u64);
            let mut stream = stream::iter(tickers);
            while let Some(ticker) = stream.next().await {
                match pipeline.sync_one(ticker).await {
                    Ok(summary) => trace!(
                        "[{ticker}] synced: {} quarterly, {} annual",
                        summary.quarterly,
                        summary.annual,
                    ),
                    Err(e) => error!("[{ticker}] sync failed: {e}"),
                }
                pb.inc(1);
            }
            pb.finish();

            info!("elapsed time: {} ms", time.elapsed().as_millis());
        }

        // "> lode sync-all tickers.csv"
        // the full bulk pipeline over a ticker-list file
        SyncAll { file } => {
            let tickers = lode_util::read_tickers(file).await?;
            info!("{} tickers read from {file}", tickers.len());

            let pipeline = connect().await?;
            let report = pipeline.sync_all(&tickers).await;

            info!(
                "{} chunks ({} failed), {} payloads, {} tickers skipped; elapsed time: {} ms",
                report.chunks.len(),
                report.failed_chunks,
                report.fetched(),
                report.skipped(),
                report.elapsed.as_millis(),
            );
        }

        // "> lode ask how did MSFT's last quarter look"
        Ask { prompt } => {
            let http_client = api::build_client()?;
            let mut assistant = ChatClient::from_env(http_client)?;
            let reply = assistant.complete(vec![Message::user(prompt.join(" "))]).await?;
            println!("[{}] {}", reply.model, reply.content);
        }
    }

    Ok(())
}
