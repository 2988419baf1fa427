use std::time::Duration;

use anyhow::{Context, Result};
use jitsi_xmpp_parsers::jingle::Jingle;
use lib_jitsi_signal::{
  init_tracing, ColibriChannel, CodecType, ConferenceEvent, Connection, JingleSession,
  JoinOptions,
};
use structopt::StructOpt;
use tokio::{signal::ctrl_c, sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
  name = "jitsi-signal",
  about = "Join the signalling plane of a Jitsi Meet conference."
)]
struct Opt {
  #[structopt(long)]
  web_socket_url: String,
  #[structopt(long)]
  xmpp_domain: String,
  #[structopt(long)]
  room_name: String,
  #[structopt(long, default_value = "jitsi-signal")]
  nick: String,
  #[structopt(long, default_value = "vp8")]
  video_codec: String,
  #[structopt(long)]
  last_n: Option<i32>,
  #[structopt(long)]
  start_muted_audio: bool,
  #[structopt(long)]
  start_muted_video: bool,
  #[structopt(long)]
  tls_insecure: bool,
  #[structopt(short, long, parse(from_occurrences))]
  verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
  let opt = Opt::from_args();

  init_tracing(match opt.verbose {
    0 => tracing::Level::INFO,
    1 => tracing::Level::DEBUG,
    _ => tracing::Level::TRACE,
  });

  // Reject a bad codec before connecting.
  let video_codec_type = CodecType::from_payload_name(&opt.video_codec)
    .filter(|codec_type| codec_type.media_type() == lib_jitsi_signal::MediaType::Video)
    .with_context(|| format!("invalid video codec: {}", opt.video_codec))?;

  let (connection, background) = Connection::new(
    &opt.web_socket_url,
    &opt.xmpp_domain,
    &opt.room_name,
    opt.tls_insecure,
  )
  .await
  .context("failed to connect")?;

  tokio::spawn(background);

  let negotiation = connection.connect().await?;
  for service in &negotiation.external_services {
    debug!("external service: {:?}", service);
  }

  let mut events = connection
    .join_conference(JoinOptions {
      nick: opt.nick.clone(),
      video_codec_type,
      audio_muted: opt.start_muted_audio,
      video_muted: opt.start_muted_video,
    })
    .await
    .context("failed to join conference")?;

  let mut session: Option<JingleSession> = None;
  let mut colibri: Option<ColibriChannel> = None;

  loop {
    tokio::select! {
      res = ctrl_c() => {
        res.context("failed to listen for Ctrl-C")?;
        info!("Exiting...");
        match timeout(Duration::from_secs(10), connection.leave()).await {
          Ok(Ok(_)) => {},
          Ok(Err(e)) => warn!("Error leaving conference: {:?}", e),
          Err(_) => warn!("Timed out leaving conference"),
        }
        break;
      },
      event = events.recv() => {
        let event = match event {
          Some(event) => event,
          None => {
            warn!("Conference ended");
            break;
          },
        };
        match event {
          ConferenceEvent::ParticipantJoined(participant) => {
            info!("New participant: {:?}", participant);
          },
          ConferenceEvent::ParticipantLeft(participant) => {
            info!("Participant left: {:?}", participant);
          },
          ConferenceEvent::MuteStateChanged { participant, is_audio, muted } => {
            info!(
              "{} {} {}",
              participant.nick,
              if muted { "muted" } else { "unmuted" },
              if is_audio { "audio" } else { "video" },
            );
          },
          ConferenceEvent::JingleInitiate(jingle) => {
            let new_session = match session_from_initiate(jingle, video_codec_type) {
              Some(new_session) => new_session,
              None => continue,
            };
            info!("Session offered with codecs: {:?}", new_session.codecs());
            if colibri.is_none() {
              if let Some(url) = new_session.colibri_url() {
                match open_colibri(url, opt.tls_insecure, opt.last_n).await {
                  Ok(channel) => colibri = Some(channel),
                  Err(e) => warn!("Colibri unavailable: {:?}", e),
                }
              }
            }
            // Accepting needs ICE and DTLS material, which this tool does not produce.
            info!("No media plane available, leaving the session pending");
            session = Some(new_session);
          },
          ConferenceEvent::JingleSourceAdd(jingle) => match session.as_mut() {
            Some(session) => {
              session.source_add(&jingle);
              debug!("remote sources: {:?}", session.remote_ssrc_map());
            },
            None => warn!("source-add before session-initiate"),
          },
          ConferenceEvent::JingleAccepted(success) => {
            info!("session-accept acknowledged by focus: {}", success);
          },
        }
      },
    }
  }

  Ok(())
}

/// A bad offer from the focus is logged and skipped; it never ends the process.
fn session_from_initiate(jingle: Jingle, video_codec_type: CodecType) -> Option<JingleSession> {
  match JingleSession::initiate(jingle, video_codec_type) {
    Ok(session) => Some(session),
    Err(e) => {
      warn!("ignoring invalid session-initiate: {:?}", e);
      None
    },
  }
}

async fn open_colibri(url: &str, tls_insecure: bool, last_n: Option<i32>) -> Result<ColibriChannel> {
  let channel = ColibriChannel::connect(url, tls_insecure).await?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  channel.subscribe(tx).await;
  tokio::spawn(async move {
    while let Some(message) = rx.recv().await {
      info!("Colibri message: {:?}", message);
    }
  });

  if let Some(last_n) = last_n {
    channel.set_last_n(last_n).await?;
  }
  Ok(channel)
}

#[cfg(test)]
mod tests {
  use jitsi_xmpp_parsers::jingle::Action;

  use super::*;

  #[test]
  fn offer_without_initiator_is_skipped() {
    let jingle = Jingle::new(Action::SessionInitiate, "s1");
    assert!(session_from_initiate(jingle, CodecType::Vp8).is_none());

    let jingle =
      Jingle::new(Action::SessionInitiate, "s1").with_initiator("focus@auth.example.org/focus");
    assert!(session_from_initiate(jingle, CodecType::Vp8).is_some());
  }
}
