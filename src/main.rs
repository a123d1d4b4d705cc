use std::{io::Read, sync::Arc};

use clap::{Parser, Subcommand};
use eyre::Context;
use ordercheck::{
    config::Config,
    consumer::Consumer,
    event::{SendRequest, SendResponse, SqsEvent, VerifyRequest},
    log::SqliteLog,
    poller::Poller,
    policy::FailurePolicy,
    producer::Producer,
    queue::SqsQueue,
    verifier::Verifier,
};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue numbered messages for every group and log them as sent.
    ///
    /// Reads a `{"perGroupCount", "groups"}` request from stdin when no
    /// flags are given.
    Send {
        #[arg(long, value_delimiter = ',', requires = "count")]
        groups: Vec<String>,
        #[arg(long, requires = "groups")]
        count: Option<i64>,
    },
    /// Process one batch event read from stdin and print the batch response.
    Consume {
        #[arg(long)]
        policy: Option<FailurePolicy>,
    },
    /// Receive batches from the queue until interrupted.
    Poll {
        #[arg(long)]
        policy: Option<FailurePolicy>,
    },
    /// Compare sent and received order for a group.
    ///
    /// Reads a `{"group"}` request from stdin when no flag is given.
    Verify {
        #[arg(long)]
        group: Option<String>,
    },
}

fn read_stdin<T: DeserializeOwned>() -> eyre::Result<T> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    serde_json::from_str(&input).wrap_err("Invalid JSON on stdin")
}

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    ordercheck::init_tracing()?;

    let cli = Cli::parse();
    let config = Config::load()?;

    let log = Arc::new(SqliteLog::connect(&config).await?);

    match cli.command {
        Command::Send { groups, count } => {
            let request = match count {
                Some(per_group_count) => SendRequest {
                    per_group_count,
                    groups,
                },
                None => read_stdin::<SendRequest>()?,
            };

            let queue = Arc::new(SqsQueue::from_config(&config).await?);
            let producer = Producer::new(log, queue);

            let (sent, result) = producer
                .send(request.groups, request.per_group_count)
                .await?
                .into_result();

            print_json::<SendResponse>(&sent)?;
            result?;
        }
        Command::Consume { policy } => {
            let event = read_stdin::<SqsEvent>()?;
            let queue = Arc::new(SqsQueue::from_config(&config).await?);

            let consumer = Consumer::builder()
                .log(log)
                .queue(queue)
                .policy(policy.unwrap_or(config.failure_policy()))
                .processing_delay(config.processing_delay())
                .build();

            print_json(&consumer.handle_event(event).await?)?;
        }
        Command::Poll { policy } => {
            let queue = SqsQueue::from_config(&config).await?;

            let consumer = Consumer::builder()
                .log(log)
                .queue(Arc::new(queue.clone()))
                .policy(policy.unwrap_or(config.failure_policy()))
                .processing_delay(config.processing_delay())
                .build();

            Poller::builder()
                .consumer(consumer)
                .queue(queue)
                .batch_size(config.batch_size())
                .wait_time_seconds(config.wait_time_seconds())
                .build()
                .run()
                .await?;
        }
        Command::Verify { group } => {
            let group = match group {
                Some(group) => group,
                None => read_stdin::<VerifyRequest>()?.group,
            };

            let verification = Verifier::new(log).verify(&group).await?;
            print_json(&verification)?;
        }
    }

    Ok(())
}
