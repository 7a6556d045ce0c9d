//! Line-oriented front end for `tuner run`.
//!
//! Reads one instruction per stdin line.  Playback instructions go to the
//! local player in Player mode and over TCP to the peer in Remote mode, so
//! both paths share the command vocabulary and the reply format.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tuner_proto::protocol::Command;
use tuner_proto::settings::OperatingMode;
use tuner_proto::stations::Station;

use crate::controller::ModeController;
use crate::listener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(Command),
    Mode(OperatingMode),
    Peer(String),
    Idle(bool),
    Stations,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  ping | state | mute | unmute | select <n> | test <url>
  mode <player|remote>   switch role
  peer <address>         set the player address used in remote mode
  idle <on|off>          pause remote state polling
  stations | help | quit";

pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty line".to_string());
    };
    let arg = words.next();

    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("ping", None) => ConsoleCommand::Send(Command::Ping),
        ("state", None) => ConsoleCommand::Send(Command::GetState),
        ("mute", None) => ConsoleCommand::Send(Command::Mute),
        ("unmute", None) => ConsoleCommand::Send(Command::Unmute),
        ("select", Some(n)) => {
            let index = n.parse().map_err(|_| format!("not a station number: {}", n))?;
            ConsoleCommand::Send(Command::SelectStation { index })
        }
        ("test", Some(url)) => ConsoleCommand::Send(Command::TestUrl {
            url: url.to_string(),
        }),
        ("mode", Some("player")) => ConsoleCommand::Mode(OperatingMode::Player),
        ("mode", Some("remote")) => ConsoleCommand::Mode(OperatingMode::Remote),
        ("peer", Some(address)) => ConsoleCommand::Peer(address.to_string()),
        ("idle", Some("on")) => ConsoleCommand::Idle(true),
        ("idle", Some("off")) => ConsoleCommand::Idle(false),
        ("stations", None) => ConsoleCommand::Stations,
        ("help", _) | ("?", _) => ConsoleCommand::Help,
        ("quit", _) | ("exit", _) => ConsoleCommand::Quit,
        _ => return Err(format!("unrecognised: {}", line.trim())),
    };
    Ok(command)
}

pub struct Console {
    controller: ModeController,
    idle_tx: watch::Sender<bool>,
    stations: Vec<Station>,
}

impl Console {
    pub fn new(controller: ModeController, idle_tx: watch::Sender<bool>, stations: Vec<Station>) -> Self {
        Self {
            controller,
            idle_tx,
            stations,
        }
    }

    /// Run until `quit` or end of input.  The active role is stopped on the
    /// way out.
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("tuner in {} mode; type `help` for commands", self.controller.mode());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(command) => self.execute(command).await?,
                Err(e) => println!("{}", e),
            }
        }

        self.controller.stop().await;
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> anyhow::Result<()> {
        match command {
            ConsoleCommand::Send(cmd) => {
                let reply = self.send(&cmd).await;
                println!("{}", reply);
            }
            ConsoleCommand::Mode(mode) => {
                self.controller.switch(mode).await?;
                match self.controller.listener_addr() {
                    Some(addr) => println!("player mode, listening on {}", addr),
                    None => println!("{} mode", mode),
                }
            }
            ConsoleCommand::Peer(address) => {
                self.controller.set_player_address(&address).await?;
                let reachable = self
                    .controller
                    .remote_client()
                    .test_connection(&address)
                    .await;
                println!("{}: {}", address, if reachable { "OK" } else { "Error" });
            }
            ConsoleCommand::Idle(idle) => {
                self.idle_tx.send_replace(idle);
            }
            ConsoleCommand::Stations => {
                for (i, station) in self.stations.iter().enumerate() {
                    println!("{:>3}  {}", i, station.name);
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    async fn send(&self, command: &Command) -> String {
        match self.controller.mode() {
            OperatingMode::Player => listener::dispatch(&command.encode(), self.controller.player())
                .await
                .encode(),
            OperatingMode::Remote => {
                let address = self.controller.player_address().await;
                if address.is_empty() {
                    return "ERROR:No player address (use `peer <address>`)".to_string();
                }
                self.controller
                    .remote_client()
                    .send_command(&address, command)
                    .await
            }
        }
    }
}
