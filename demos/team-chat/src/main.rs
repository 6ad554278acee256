//! Team chat over netplay.
//!
//! ```text
//! team-chat server [addr]          # default 0.0.0.0:9000
//! team-chat client <ws-url> <name> # e.g. ws://127.0.0.1:9000 ann
//! ```
//!
//! Each client is put on a team when it connects. Lines typed into a client
//! are relayed by the server to everyone, tagged with the author's team.

use std::error::Error;
use std::fmt;

use netplay::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Lobby state
// ---------------------------------------------------------------------------

/// What a client shows the user.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Welcome { team: Team, players: Vec<(Team, String)> },
    Joined { team: Team, name: String },
    Said { team: Team, name: String, text: String },
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEvent::Welcome { team, players } => {
                write!(f, "* you are on {team}, {} in lobby", players.len())
            }
            ChatEvent::Joined { team, name } => write!(f, "* {name} joined {team}"),
            ChatEvent::Said { team, name, text } => write!(f, "[{team}] {name}: {text}"),
        }
    }
}

/// A player who has said hello.
#[derive(Debug, Clone)]
struct Member {
    address: PeerAddress,
    team: Team,
    name: String,
}

/// Shared by both roles: the server keeps the roster, clients forward
/// what they receive to `events`.
#[derive(Debug)]
pub struct Lobby {
    roster: Vec<Member>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl Lobby {
    pub fn new(events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self {
            roster: Vec::new(),
            events,
        }
    }

    fn name_of(&self, address: PeerAddress) -> Option<&str> {
        self.roster
            .iter()
            .find(|m| m.address == address)
            .map(|m| m.name.as_str())
    }

    /// Forgets members whose connection is gone.
    fn prune(&mut self, live: &[PeerAddress]) {
        self.roster.retain(|m| live.contains(&m.address));
    }

    fn players(&self) -> Vec<(Team, String)> {
        let mut players: Vec<(Team, String)> = self
            .roster
            .iter()
            .map(|m| (m.team, m.name.clone()))
            .collect();
        players.sort_by_key(|(team, _)| team.slot());
        players
    }

    fn emit(&self, event: ChatEvent) {
        // Nobody listening on the server side.
        let _ = self.events.send(event);
    }
}

const MAX_NAME_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Client → server, once after connecting.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub name: String,
}

impl Message for Hello {
    const TYPE: u8 = 1;

    fn important(&self) -> bool {
        true
    }
}

impl Handler<Lobby> for Hello {
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Lobby>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        let name = self.name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(NetplayError::handler(format!("bad name {:?}", self.name)));
        }

        let live = live_addresses(cx);
        let lobby = cx.context_mut();
        lobby.prune(&live);
        lobby.roster.retain(|m| m.address != sender.address);
        lobby.roster.push(Member {
            address: sender.address,
            team: sender.team,
            name: name.to_string(),
        });
        tracing::info!(%sender, name, "player said hello");

        let players = cx.context().players();
        cx.send_game_message_to(
            Welcome {
                team: sender.team,
                players,
            },
            sender.address,
        )?;
        cx.send_game_message_except(
            Joined {
                team: sender.team,
                name: name.to_string(),
            },
            sender.address,
        )
    }
}

/// Server → the new player.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub team: Team,
    pub players: Vec<(Team, String)>,
}

impl Message for Welcome {
    const TYPE: u8 = 2;

    fn important(&self) -> bool {
        true
    }
}

impl Handler<Lobby> for Welcome {
    fn handle_client(self, cx: &mut HandlerContext<'_, Lobby>) -> Result<(), NetplayError> {
        cx.context().emit(ChatEvent::Welcome {
            team: self.team,
            players: self.players,
        });
        Ok(())
    }
}

/// Server → everyone else when a player says hello.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Joined {
    pub team: Team,
    pub name: String,
}

impl Message for Joined {
    const TYPE: u8 = 3;
}

impl Handler<Lobby> for Joined {
    fn handle_client(self, cx: &mut HandlerContext<'_, Lobby>) -> Result<(), NetplayError> {
        cx.context().emit(ChatEvent::Joined {
            team: self.team,
            name: self.name,
        });
        Ok(())
    }
}

/// Client → server: one line of chat.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Say {
    pub text: String,
}

impl Message for Say {
    const TYPE: u8 = 4;
}

impl Handler<Lobby> for Say {
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Lobby>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        let Some(name) = cx.context().name_of(sender.address).map(str::to_string) else {
            return Err(NetplayError::handler("chat before hello"));
        };
        cx.send_game_message(Said {
            team: sender.team,
            name,
            text: self.text,
        })
    }
}

/// Server → everyone: a relayed chat line.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Said {
    pub team: Team,
    pub name: String,
    pub text: String,
}

impl Message for Said {
    const TYPE: u8 = 5;
}

impl Handler<Lobby> for Said {
    fn handle_client(self, cx: &mut HandlerContext<'_, Lobby>) -> Result<(), NetplayError> {
        cx.context().emit(ChatEvent::Said {
            team: self.team,
            name: self.name,
            text: self.text,
        });
        Ok(())
    }
}

fn live_addresses(cx: &HandlerContext<'_, Lobby>) -> Vec<PeerAddress> {
    cx.registry().players().map(|p| p.address).collect()
}

fn builder() -> SessionBuilder<Lobby> {
    SessionBuilder::new()
        .register::<Hello>()
        .register::<Welcome>()
        .register::<Joined>()
        .register::<Say>()
        .register::<Said>()
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

const USAGE: &str = "usage: team-chat server [addr] | team-chat client <ws-url> <name>";

async fn run_server(addr: &str) -> Result<(), Box<dyn Error>> {
    let transport = WebSocketTransport::listen(addr).await?;
    let (events, _) = mpsc::unbounded_channel();
    let handle = builder().server().build(transport, Lobby::new(events)).spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.stop();
    handle.join().await?;
    Ok(())
}

async fn run_client(url: &str, name: &str) -> Result<(), Box<dyn Error>> {
    let transport = WebSocketTransport::connect(url).await?;
    let (events, mut received) = mpsc::unbounded_channel();
    let handle = builder().client().build(transport, Lobby::new(events)).spawn();

    let outbound = handle.outbound();
    outbound.enqueue(Hello {
        name: name.to_string(),
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) if !text.trim().is_empty() => {
                    outbound.enqueue(Say { text });
                }
                Some(_) => {}
                None => break,
            },
            Some(event) = received.recv() => println!("{event}"),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.stop();
    handle.join().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["server"] => run_server("0.0.0.0:9000").await,
        ["server", addr] => run_server(addr).await,
        ["client", url, name] => run_client(url, name).await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
