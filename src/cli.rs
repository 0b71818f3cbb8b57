use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::negotiation::TokioTimer;
use crate::rtc::{SampleTrackDevices, WebRtcConnector};
use crate::session::{SessionController, SessionEvent, SessionSettings, TokenOutcome};
use crate::signaller::Token;
use crate::Result;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Log more; repeat for trace output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a room and print its token
    Host,
    /// Join the room behind a token and print the answer token
    Join { token: String },
}

const HELP: &str = "/video, /audio and /screen toggle outgoing media, /token shows your token \
again, /leave hangs up; pasted tokens are accepted, anything else is sent as chat";

pub async fn run(args: Args, config: Config) -> Result<()> {
    let connector = WebRtcConnector::new(WebRtcConnector::make_config(&config.ice_servers))?;
    let devices = SampleTrackDevices::new(&config.media);
    let (controller, mut events) = SessionController::new(
        Arc::new(connector),
        Arc::new(devices),
        SessionSettings::from(&config),
        Box::new(TokioTimer),
    );
    let controller = Arc::new(controller);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe(&event) {
                println!("{}", line);
            }
        }
    });

    match args.command {
        Command::Host => {
            let token = controller.create_room().await?;
            announce(&controller);
            print_token("Send this room token to your guest:", &token);
            println!("Paste the answer token you get back:");
        }
        Command::Join { token } => {
            let outcome = controller.submit_token(&token).await?;
            announce(&controller);
            report_outcome(&outcome);
        }
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&controller, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.leave_room().await;
    Ok(())
}

/// Returns false once the user hangs up.
async fn handle_line(controller: &SessionController, line: &str) -> bool {
    match line {
        "" => {}
        "/leave" => return false,
        "/video" => report_toggle("video", controller.toggle_video()),
        "/audio" => report_toggle("audio", controller.toggle_audio()),
        "/screen" => match controller.toggle_screen_share().await {
            Ok(true) => println!("* sharing your screen"),
            Ok(false) => println!("* back to the camera"),
            // already published as an event
            Err(_) => {}
        },
        "/token" => match controller.token() {
            Some(token) => print_token("Your token:", &token),
            None => println!("! no token yet"),
        },
        _ if Token::looks_like(line) => match controller.submit_token(line).await {
            Ok(outcome) => report_outcome(&outcome),
            Err(err) => println!("! {}", err),
        },
        _ => {
            if let Err(err) = controller.send_chat(line).await {
                println!("! {}", err);
            }
        }
    }
    true
}

fn announce(controller: &SessionController) {
    if let Some(id) = controller.session_id() {
        match controller.room_id() {
            Some(room) => println!("* session {} in room {}", id, room),
            None => println!("* session {}", id),
        }
    }
    if let Some(media) = controller.local_media() {
        println!(
            "* sending {} with {} local tracks",
            media.source(),
            media.tracks().len()
        );
    }
}

fn print_token(intro: &str, token: &Token) {
    println!("{}\n\n{}\n", intro, token);
    if token.is_legacy() {
        println!("! this token carries no checksum");
    }
}

fn report_outcome(outcome: &TokenOutcome) {
    match outcome {
        TokenOutcome::Joined(answer) => {
            print_token("Send this answer token back to the host:", answer)
        }
        TokenOutcome::Accepted(report) => println!(
            "* answer accepted, {} candidates applied, {} skipped",
            report.applied, report.skipped
        ),
    }
}

fn report_toggle(kind: &str, enabled: Option<bool>) {
    match enabled {
        Some(true) => println!("* {} on", kind),
        Some(false) => println!("* {} off", kind),
        None => println!("! no local {}", kind),
    }
}

fn describe(event: &SessionEvent) -> Option<String> {
    Some(match event {
        SessionEvent::StateChanged(_) => return None,
        SessionEvent::Status(status) => format!("* {}", status),
        SessionEvent::RemoteTrack(kind) => format!("* receiving remote {}", kind),
        SessionEvent::ChannelOpen => "* chat is ready".to_string(),
        SessionEvent::Chat { local: true, .. } => return None,
        SessionEvent::Chat { message, .. } => {
            format!("[{}] {}: {}", message.timestamp, message.sender, message.text)
        }
        SessionEvent::Error(err) => format!("! {}", err),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::negotiation::testing::{FakeConnector, FakeDevices, PeerScript};
    use crate::negotiation::{ConnectionStatus, NegotiationState, Role};
    use crate::rtc::TrackKind;
    use crate::session::ChatMessage;

    fn controller(
        connector: &Arc<FakeConnector>,
    ) -> (SessionController, UnboundedReceiver<SessionEvent>) {
        let settings = SessionSettings {
            token_secret: "test-secret".into(),
            candidate_window: Duration::from_secs(3),
            display_name: "tester".into(),
            channel_label: "chat".into(),
        };
        SessionController::new(
            connector.clone(),
            Arc::new(FakeDevices::default()),
            settings,
            Box::new(TokioTimer),
        )
    }

    #[test]
    fn parses_subcommands() {
        let args = Args::try_parse_from(["mira_p2p", "join", "ROOM_abc_def"]).unwrap();
        assert_eq!(
            args.command,
            Command::Join {
                token: "ROOM_abc_def".into()
            }
        );
        assert_eq!(args.verbose, 0);

        let args = Args::try_parse_from(["mira_p2p", "-vv", "--config", "x.toml", "host"]).unwrap();
        assert_eq!(args.command, Command::Host);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));

        assert!(Args::try_parse_from(["mira_p2p", "join"]).is_err());
    }

    #[test]
    fn describes_events() {
        assert_eq!(
            describe(&SessionEvent::Status(ConnectionStatus::ConnectionLost)).as_deref(),
            Some("* connection lost")
        );
        assert_eq!(
            describe(&SessionEvent::RemoteTrack(TrackKind::Video)).as_deref(),
            Some("* receiving remote video")
        );
        let message = ChatMessage {
            sender: "guest".into(),
            text: "hi".into(),
            timestamp: "10:00:00".into(),
        };
        assert_eq!(
            describe(&SessionEvent::Chat {
                message: message.clone(),
                local: false
            })
            .as_deref(),
            Some("[10:00:00] guest: hi")
        );
        assert!(describe(&SessionEvent::Chat {
            message,
            local: true
        })
        .is_none());
        assert!(describe(&SessionEvent::StateChanged(NegotiationState::Gathering)).is_none());
    }

    #[tokio::test]
    async fn pasted_tokens_drive_the_handshake() {
        let host_peers = FakeConnector::new("host", PeerScript::gathering(&["h1"]));
        let guest_peers = FakeConnector::new("guest", PeerScript::gathering(&["g1"]));
        let (host, _host_events) = controller(&host_peers);
        let (guest, _guest_events) = controller(&guest_peers);

        let room = host.create_room().await.unwrap();
        assert!(handle_line(&guest, room.as_str()).await);
        assert_eq!(guest.role(), Role::Guest);
        let answer = guest.token().unwrap();

        // a guest pasting a token again is refused and stays put
        assert!(handle_line(&guest, room.as_str()).await);
        assert_eq!(guest.state(), NegotiationState::Negotiating);

        assert!(handle_line(&host, answer.as_str()).await);
        assert_eq!(host.state(), NegotiationState::Negotiating);
        assert_eq!(host_peers.last_peer().applied(), vec!["g1"]);

        assert!(!handle_line(&host, "/leave").await);
        host.leave_room().await;
        guest.leave_room().await;
    }

    #[tokio::test]
    async fn chat_lines_are_not_taken_for_tokens() {
        let host_peers = FakeConnector::new("host", PeerScript::gathering(&["h1"]));
        let (host, _events) = controller(&host_peers);
        host.create_room().await.unwrap();

        assert!(handle_line(&host, "ANSWER is coming").await);
        assert_eq!(host.state(), NegotiationState::TokenReady);
        assert!(host_peers.last_peer().applied().is_empty());
        host.leave_room().await;
    }
}
