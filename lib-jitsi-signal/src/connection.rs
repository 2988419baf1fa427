//! Async driver: one XMPP WebSocket feeding the bootstrap negotiator, then the conference.

use std::{fmt, future::Future, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use futures::{
  sink::{Sink, SinkExt},
  stream::{Stream, StreamExt, TryStreamExt},
};
use jitsi_xmpp_parsers::jingle::Jingle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::{
  client::IntoClientRequest,
  http::{HeaderValue, Uri},
  Message,
};
use tracing::{debug, error, info, warn};

use crate::{
  codec::CodecType,
  conference::{Conference, ConferenceCallbacks, ConferenceConfig, Participant},
  negotiator::{NegotiationResult, Negotiator, NegotiatorCallbacks},
  pinger::Pinger,
  source::MediaType,
  stanza::Step,
  tls::wss_connector,
  xmpp::extdisco::Service,
};

/// What happened in the conference, in the order it was signalled.
#[derive(Debug, Clone)]
pub enum ConferenceEvent {
  ParticipantJoined(Participant),
  ParticipantLeft(Participant),
  MuteStateChanged {
    participant: Participant,
    is_audio: bool,
    muted: bool,
  },
  JingleInitiate(Jingle),
  JingleSourceAdd(Jingle),
  JingleAccepted(bool),
}

/// How to present ourselves in the conference.
#[derive(Debug, Clone)]
pub struct JoinOptions {
  pub nick: String,
  pub video_codec_type: CodecType,
  pub audio_muted: bool,
  pub video_muted: bool,
}

/// Queues serialised stanzas for the write loop.
#[derive(Debug, Clone)]
pub(crate) struct XmppSender {
  tx: mpsc::UnboundedSender<String>,
}

impl NegotiatorCallbacks for XmppSender {
  fn send_payload(&mut self, payload: &str) -> Result<()> {
    self
      .tx
      .send(payload.to_owned())
      .map_err(|_| anyhow!("XMPP write loop has stopped"))
  }
}

pub(crate) struct ConferenceSender {
  xmpp: XmppSender,
  events: mpsc::UnboundedSender<ConferenceEvent>,
}

impl ConferenceSender {
  fn emit(&self, event: ConferenceEvent) -> bool {
    if self.events.send(event).is_err() {
      debug!("conference event receiver dropped");
      return false;
    }
    true
  }
}

impl ConferenceCallbacks for ConferenceSender {
  fn send_payload(&mut self, payload: &str) -> Result<()> {
    self.xmpp.send_payload(payload)
  }

  fn on_jingle_initiate(&mut self, jingle: Jingle) -> bool {
    self.emit(ConferenceEvent::JingleInitiate(jingle))
  }

  fn on_jingle_add_source(&mut self, jingle: Jingle) -> bool {
    self.emit(ConferenceEvent::JingleSourceAdd(jingle))
  }

  fn on_jingle_accepted(&mut self, success: bool) {
    self.emit(ConferenceEvent::JingleAccepted(success));
  }

  fn on_participant_joined(&mut self, participant: &Participant) {
    self.emit(ConferenceEvent::ParticipantJoined(participant.clone()));
  }

  fn on_participant_left(&mut self, participant: &Participant) {
    self.emit(ConferenceEvent::ParticipantLeft(participant.clone()));
  }

  fn on_mute_state_changed(&mut self, participant: &Participant, is_audio: bool, muted: bool) {
    self.emit(ConferenceEvent::MuteStateChanged {
      participant: participant.clone(),
      is_audio,
      muted,
    });
  }
}

enum ConnectionState {
  Negotiating(Negotiator<XmppSender>),
  Connected,
  InConference(Conference<ConferenceSender>),
}

pub(crate) struct ConnectionInner {
  state: ConnectionState,
  negotiation: Option<NegotiationResult>,
  /// Text received after the negotiation finished and before a conference exists.
  unprocessed: String,
  connected_tx: Option<oneshot::Sender<()>>,
  joined_tx: Option<oneshot::Sender<()>>,
  pinger: Option<Pinger>,
}

impl fmt::Debug for ConnectionInner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match &self.state {
      ConnectionState::Negotiating(_) => "negotiating",
      ConnectionState::Connected => "connected",
      ConnectionState::InConference(_) => "in conference",
    };
    f.debug_struct("ConnectionInner")
      .field("state", &state)
      .field("negotiation", &self.negotiation)
      .finish()
  }
}

impl ConnectionInner {
  fn feed(&mut self, xml: &str) -> Result<()> {
    let negotiated = match &mut self.state {
      ConnectionState::Negotiating(negotiator) => {
        if negotiator.feed(xml)? == Step::Done {
          let result = negotiator
            .result()
            .context("negotiation finished without a jid")?;
          Some((result, negotiator.take_unprocessed()))
        }
        else {
          None
        }
      },
      ConnectionState::Connected => {
        self.unprocessed.push_str(xml);
        None
      },
      ConnectionState::InConference(conference) => {
        conference.feed(xml)?;
        if conference.is_joined() {
          if let Some(tx) = self.joined_tx.take() {
            tx.send(()).map_err(|_| anyhow!("join_conference() is no longer waiting"))?;
          }
        }
        None
      },
    };
    if let Some((result, unprocessed)) = negotiated {
      info!("Connected as {}", result.jid);
      self.negotiation = Some(result);
      self.unprocessed = unprocessed;
      self.state = ConnectionState::Connected;
      if let Some(tx) = self.connected_tx.take() {
        tx.send(()).map_err(|_| anyhow!("connect() is no longer waiting"))?;
      }
    }
    Ok(())
  }

  pub(crate) fn conference_mut(&mut self) -> Option<&mut Conference<ConferenceSender>> {
    match &mut self.state {
      ConnectionState::InConference(conference) => Some(conference),
      _ => None,
    }
  }
}

/// An XMPP connection to a Jitsi Meet deployment over WebSocket.
#[derive(Debug, Clone)]
pub struct Connection {
  tx: mpsc::UnboundedSender<String>,
  room: String,
  inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
  /// Opens `<websocket_url>?room=<room>`.
  ///
  /// The returned future runs the read and write loops and must be polled (typically
  /// spawned) for the connection to make progress.
  pub async fn new(
    websocket_url: &str,
    xmpp_domain: &str,
    room: &str,
    tls_insecure: bool,
  ) -> Result<(Connection, impl Future<Output = ()>)> {
    let separator = if websocket_url.contains('?') { '&' } else { '?' };
    let websocket_url: Uri = format!("{}{}room={}", websocket_url, separator, room)
      .parse()
      .context("invalid WebSocket URL")?;

    info!("Connecting XMPP WebSocket to {}", websocket_url);
    let mut request = websocket_url.into_client_request()?;
    request
      .headers_mut()
      .insert("sec-websocket-protocol", HeaderValue::from_static("xmpp"));
    let (websocket, _response) = tokio_tungstenite::connect_async_tls_with_config(
      request,
      None,
      false,
      Some(wss_connector(tls_insecure).context("failed to build TLS connector")?),
    )
    .await
    .context("failed to connect XMPP WebSocket")?;
    let (sink, stream) = websocket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let negotiator = Negotiator::new(xmpp_domain, XmppSender { tx: tx.clone() })?;
    let inner = Arc::new(Mutex::new(ConnectionInner {
      state: ConnectionState::Negotiating(negotiator),
      negotiation: None,
      unprocessed: String::new(),
      connected_tx: None,
      joined_tx: None,
      pinger: None,
    }));

    let connection = Connection {
      tx,
      room: room.to_owned(),
      inner: inner.clone(),
    };

    let writer = Connection::write_loop(rx, sink);
    let reader = Connection::read_loop(inner, stream);

    let background = async move {
      tokio::select! {
        res = reader => if let Err(e) = res { error!("fatal (in read loop): {:?}", e) },
        res = writer => if let Err(e) = res { error!("fatal (in write loop): {:?}", e) },
      }
    };

    Ok((connection, background))
  }

  /// Runs the bootstrap negotiation, returning once we are bound and discovered.
  pub async fn connect(&self) -> Result<NegotiationResult> {
    let (tx, rx) = oneshot::channel();
    {
      let mut locked_inner = self.inner.lock().await;
      match &mut locked_inner.state {
        ConnectionState::Negotiating(negotiator) => negotiator.start()?,
        _ => bail!("already connected"),
      }
      locked_inner.connected_tx = Some(tx);
    }
    rx.await.context("XMPP negotiation failed")?;
    self
      .inner
      .lock()
      .await
      .negotiation
      .clone()
      .context("negotiation result missing")
  }

  /// Joins the room given to [`Connection::new`], returning the conference's events.
  #[tracing::instrument(level = "debug", err)]
  pub async fn join_conference(
    &self,
    options: JoinOptions,
  ) -> Result<mpsc::UnboundedReceiver<ConferenceEvent>> {
    let (joined_tx, joined_rx) = oneshot::channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    {
      let mut locked_inner = self.inner.lock().await;
      if !matches!(locked_inner.state, ConnectionState::Connected) {
        bail!("not connected, or already in a conference");
      }
      let jid = locked_inner
        .negotiation
        .as_ref()
        .context("not connected (no jid)")?
        .jid
        .clone();
      let config = ConferenceConfig {
        jid,
        room: self.room.clone(),
        nick: options.nick,
        video_codec_type: options.video_codec_type,
        audio_muted: options.audio_muted,
        video_muted: options.video_muted,
      };
      let callbacks = ConferenceSender {
        xmpp: XmppSender {
          tx: self.tx.clone(),
        },
        events: event_tx,
      };
      let mut conference = Conference::new(config, callbacks)?;
      conference.start()?;
      let unprocessed = std::mem::take(&mut locked_inner.unprocessed);
      if !unprocessed.trim().is_empty() {
        conference.feed(&unprocessed)?;
      }
      locked_inner.state = ConnectionState::InConference(conference);
      locked_inner.joined_tx = Some(joined_tx);
      locked_inner.pinger = Some(Pinger::new(Arc::downgrade(&self.inner)));
    }
    joined_rx.await.context("conference setup failed")?;
    info!("Joined conference {}", self.room);
    Ok(event_rx)
  }

  pub async fn jid(&self) -> Option<xmpp_parsers::FullJid> {
    Some(self.inner.lock().await.negotiation.as_ref()?.jid.clone())
  }

  /// STUN/TURN services offered by the server.
  pub async fn external_services(&self) -> Vec<Service> {
    self
      .inner
      .lock()
      .await
      .negotiation
      .as_ref()
      .map(|negotiation| negotiation.external_services.clone())
      .unwrap_or_default()
  }

  pub async fn participants(&self) -> Result<Vec<Participant>> {
    self
      .with_conference(|conference| Ok(conference.participants().values().cloned().collect()))
      .await
  }

  pub async fn set_muted(&self, media_type: MediaType, muted: bool) -> Result<()> {
    self
      .with_conference(|conference| conference.set_muted(media_type, muted))
      .await
  }

  pub async fn send_jingle_accept(&self, jingle: Jingle) -> Result<()> {
    self
      .with_conference(|conference| conference.send_jingle_accept(jingle))
      .await
  }

  /// Leaves the conference and stops pinging.
  pub async fn leave(&self) -> Result<()> {
    let mut locked_inner = self.inner.lock().await;
    locked_inner.pinger = None;
    locked_inner
      .conference_mut()
      .context("not in a conference")?
      .leave()
  }

  async fn with_conference<T>(
    &self,
    f: impl FnOnce(&mut Conference<ConferenceSender>) -> Result<T>,
  ) -> Result<T> {
    let mut locked_inner = self.inner.lock().await;
    f(locked_inner.conference_mut().context("not in a conference")?)
  }

  async fn write_loop<S>(rx: mpsc::UnboundedReceiver<String>, mut sink: S) -> Result<()>
  where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut rx = UnboundedReceiverStream::new(rx);
    while let Some(xml) = rx.next().await {
      debug!("XMPP    >>> {}", xml);
      sink.send(Message::Text(xml)).await?;
    }
    Ok(())
  }

  async fn read_loop<S>(inner: Arc<Mutex<ConnectionInner>>, stream: S) -> Result<()>
  where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
  {
    let result = Connection::read_frames(&inner, stream).await;
    // wake connect() and join_conference() with an error
    let mut locked_inner = inner.lock().await;
    locked_inner.connected_tx = None;
    locked_inner.joined_tx = None;
    locked_inner.pinger = None;
    result
  }

  async fn read_frames<S>(inner: &Mutex<ConnectionInner>, mut stream: S) -> Result<()>
  where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
  {
    loop {
      let message = stream
        .try_next()
        .await?
        .ok_or_else(|| anyhow!("unexpected EOF"))?;
      let xml = match message {
        Message::Text(xml) => xml,
        Message::Close(_) => {
          info!("XMPP WebSocket closed");
          return Ok(());
        },
        Message::Ping(_) | Message::Pong(_) => continue,
        message => {
          warn!(
            "unexpected non-text message on XMPP WebSocket stream: {:?}",
            message
          );
          continue;
        },
      };
      debug!("XMPP    <<< {}", xml);
      inner.lock().await.feed(&xml)?;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inner(tx: mpsc::UnboundedSender<String>) -> ConnectionInner {
    let mut negotiator = Negotiator::new("example.org", XmppSender { tx }).unwrap();
    negotiator.start().unwrap();
    ConnectionInner {
      state: ConnectionState::Negotiating(negotiator),
      negotiation: None,
      unprocessed: String::new(),
      connected_tx: None,
      joined_tx: None,
      pinger: None,
    }
  }

  #[test]
  fn negotiation_hands_over_trailing_text() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (connected_tx, mut connected_rx) = oneshot::channel();
    let mut inner = inner(tx);
    inner.connected_tx = Some(connected_tx);
    let stanzas = [
      r#"<open xmlns="urn:ietf:params:xml:ns:xmpp-framing" from="example.org"/>"#,
      "<features/>",
      "<success/>",
      "<open/>",
      r#"<iq id="iq_1" type="result"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><jid>abcd-1234@example.org/res</jid></bind></iq>"#,
      r#"<iq id="iq_2" type="result"/>"#,
    ];
    for stanza in stanzas.iter() {
      inner.feed(stanza).unwrap();
    }
    inner
      .feed(r#"<iq id="iq_3" type="result"><services xmlns="urn:xmpp:extdisco:2"/></iq><presence/>"#)
      .unwrap();
    assert!(matches!(inner.state, ConnectionState::Connected));
    assert_eq!(inner.unprocessed, "<presence/>");
    assert!(connected_rx.try_recv().is_ok());
    assert_eq!(
      inner.negotiation.unwrap().jid.to_string(),
      "abcd-1234@example.org/res"
    );

    let mut sent = 0;
    while rx.try_recv().is_ok() {
      sent += 1;
    }
    assert_eq!(sent, 6);
  }

  #[test]
  fn events_are_forwarded() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut sender = ConferenceSender {
      xmpp: XmppSender { tx },
      events: event_tx,
    };
    let participant = Participant {
      participant_id: "efgh".to_owned(),
      nick: "Alice".to_owned(),
      audio_muted: true,
      video_muted: true,
    };
    sender.on_participant_joined(&participant);
    sender.on_mute_state_changed(&participant, true, false);
    assert!(matches!(
      event_rx.try_recv().unwrap(),
      ConferenceEvent::ParticipantJoined(p) if p == participant
    ));
    assert!(matches!(
      event_rx.try_recv().unwrap(),
      ConferenceEvent::MuteStateChanged { is_audio: true, muted: false, .. }
    ));

    drop(event_rx);
    assert!(!sender.on_jingle_add_source(Jingle::new(
      jitsi_xmpp_parsers::jingle::Action::SourceAdd,
      "s1"
    )));
  }

  #[test]
  fn send_fails_once_writer_is_gone() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let mut sender = XmppSender { tx };
    assert!(sender.send_payload("<presence/>").is_err());
  }
}
