//! Runs a 3 replica cluster on localhost in a single process, replicates a few entries and
//! prints what every replica commits.
//!
//! Set `RAFT_LOG_DIR` to write each replica's info log to a timestamped file in that directory
//! instead of the terminal.

use bytes::Bytes;
use chrono::Utc;
use replicated_log::{
    try_create_raft_client, EnqueueEntryError, EnqueueEntryInput, RaftClient, RaftClientConfig, RaftElectionState,
    RaftEvent, RaftMemberInfo, RaftOptions,
};
use slog::Drain;
use std::error::Error;
use std::fs::OpenOptions;
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::time::{sleep, Duration};

const NUM_MEMBERS: u16 = 3;
const PORT_BASE: u16 = 24100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cluster_members: Vec<RaftMemberInfo> = (1..=NUM_MEMBERS)
        .map(|n| RaftMemberInfo {
            replica_id: format!("replica-{}", n),
            ip_addr: Ipv4Addr::LOCALHOST,
            raft_rpc_port: PORT_BASE + n,
        })
        .collect();

    let mut clients = Vec::with_capacity(cluster_members.len());
    for member in cluster_members.iter() {
        let info_logger = match std::env::var("RAFT_LOG_DIR") {
            Ok(directory) => create_root_logger_for_file(Path::new(&directory), &member.replica_id)?,
            Err(_) => create_root_logger_for_stdout(),
        };

        let client = try_create_raft_client(RaftClientConfig {
            my_replica_id: member.replica_id.clone(),
            cluster_members: cluster_members.clone(),
            storage_directory: None,
            info_logger,
            options: RaftOptions::default(),
        })
        .await?;
        clients.push(client);
    }

    let leader = wait_for_leader(&mut clients).await;
    println!("Leader is {}", cluster_members[leader].replica_id);

    for word in ["hello", "replicated", "world"].iter() {
        let input = EnqueueEntryInput {
            data: Bytes::from(word.to_string()),
        };
        match clients[leader].replicated_log.enqueue_entry(input).await {
            Ok(output) => println!("Enqueued {:?} as {:?}", word, output.entry_id),
            Err(EnqueueEntryError::LeaderRedirect(leader_info)) => {
                println!("Leadership moved to {:?}, giving up", leader_info);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    for (client, member) in clients.iter_mut().zip(cluster_members.iter()) {
        for _ in 0..3 {
            if let Some(committed) = client.commit_stream.next().await {
                println!(
                    "{} committed {:?}: {}",
                    member.replica_id,
                    committed.entry_id,
                    String::from_utf8_lossy(&committed.data)
                );
            }
        }
    }

    // Let the slog-async drains flush.
    sleep(Duration::from_millis(100)).await;
    Ok(())
}

async fn wait_for_leader(clients: &mut [RaftClient]) -> usize {
    loop {
        for (i, client) in clients.iter().enumerate() {
            if client.event_listener.current_election_state() == RaftElectionState::Leader {
                return i;
            }
        }
        if let Some(RaftEvent::Election(state)) = clients[0].event_listener.next_event().await {
            println!("replica-1 is now {:?}", state);
        }
    }
}

fn create_root_logger_for_file(directory: &Path, replica_id: &str) -> Result<slog::Logger, Box<dyn Error>> {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let log_path = directory.join(format!("{}_{}_info.log", replica_id, now));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
