use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::{
  sink::{Sink, SinkExt},
  stream::{Stream, StreamExt, TryStreamExt},
};
use serde::{Deserialize, Serialize};
use tokio::{
  sync::{mpsc, Mutex},
  time::sleep,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::{
  self,
  client::IntoClientRequest,
  http::{HeaderValue, Uri},
  Message,
};
use tracing::{debug, error, info, warn};

use crate::tls::wss_connector;

const MAX_CONNECT_ATTEMPTS: u8 = 4;
const CONNECT_RETRY_SLEEP: Duration = Duration::from_secs(3);

/// Messages exchanged with the bridge over its Colibri WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "colibriClass")]
pub enum ColibriMessage {
  #[serde(rename_all = "camelCase")]
  ReceiverVideoConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    last_n: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    selected_endpoints: Vec<String>,
  },
  #[serde(rename_all = "camelCase")]
  DominantSpeakerEndpointChangeEvent {
    dominant_speaker_endpoint: String,
  },
  #[serde(rename_all = "camelCase")]
  EndpointMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    msg_payload: serde_json::Value,
  },
  ServerHello {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
  },
  /// Any class we do not model.
  #[serde(other)]
  Unknown,
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ColibriMessage>>>>;

/// Connection to the bridge's Colibri WebSocket.
#[derive(Debug, Clone)]
pub struct ColibriChannel {
  send_tx: mpsc::Sender<ColibriMessage>,
  subscribers: Subscribers,
}

impl ColibriChannel {
  /// Connects, retrying a few times, and spawns the read and write loops.
  #[tracing::instrument(level = "debug", err)]
  pub async fn connect(url: &str, tls_insecure: bool) -> Result<ColibriChannel> {
    let uri: Uri = url.parse().context("invalid Colibri WebSocket URL")?;
    let origin = format!(
      "https://{}",
      uri.host().context("invalid Colibri WebSocket URL: missing host")?
    );

    let mut attempt = 1;
    let websocket = loop {
      let mut request = uri.clone().into_client_request()?;
      // the bridge checks the origin even for non-browser clients
      request
        .headers_mut()
        .insert("origin", HeaderValue::from_str(&origin)?);
      let connector = wss_connector(tls_insecure).context("failed to build TLS connector")?;
      match tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
        .await
      {
        Ok((websocket, _)) => break websocket,
        Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
          warn!("Colibri WebSocket attempt {} failed, will retry: {:?}", attempt, e);
          sleep(CONNECT_RETRY_SLEEP).await;
          attempt += 1;
        },
        Err(e) => return Err(e).context("failed to connect Colibri WebSocket"),
      }
    };
    info!("Connected Colibri WebSocket");

    let (sink, stream) = websocket.split();
    let (send_tx, send_rx) = mpsc::channel(8);
    let subscribers = Subscribers::default();

    let reader = read_loop(subscribers.clone(), stream);
    let writer = write_loop(send_rx, sink);
    tokio::spawn(async move {
      tokio::select! {
        res = reader => if let Err(e) = res { error!("colibri read loop: {:?}", e) },
        res = writer => if let Err(e) = res { error!("colibri write loop: {:?}", e) },
      }
    });

    Ok(ColibriChannel {
      send_tx,
      subscribers,
    })
  }

  /// Delivers every message received from now on to `tx`.
  pub async fn subscribe(&self, tx: mpsc::UnboundedSender<ColibriMessage>) {
    self.subscribers.lock().await.push(tx);
  }

  pub async fn send(&self, msg: ColibriMessage) -> Result<()> {
    self
      .send_tx
      .send(msg)
      .await
      .context("colibri write loop has stopped")
  }

  /// Limits the number of video streams the bridge forwards to us.
  pub async fn set_last_n(&self, last_n: i32) -> Result<()> {
    self
      .send(ColibriMessage::ReceiverVideoConstraints {
        last_n: Some(last_n),
        selected_endpoints: vec![],
      })
      .await
  }
}

async fn read_loop<S>(subscribers: Subscribers, mut stream: S) -> Result<()>
where
  S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
  while let Some(message) = stream.try_next().await? {
    let text = match message {
      Message::Text(text) => text,
      Message::Close(_) => {
        debug!("Colibri WebSocket closed by the bridge");
        break;
      },
      Message::Binary(data) => {
        debug!("ignoring {} byte binary frame on Colibri WebSocket", data.len());
        continue;
      },
      _ => continue,
    };
    debug!("Colibri <<< {}", text);
    match serde_json::from_str::<ColibriMessage>(&text) {
      Ok(message) => subscribers
        .lock()
        .await
        .retain(|tx| tx.send(message.clone()).is_ok()),
      Err(e) => warn!("dropping unparsable Colibri frame: {:?}", e),
    }
  }
  Ok(())
}

async fn write_loop<S>(rx: mpsc::Receiver<ColibriMessage>, mut sink: S) -> Result<()>
where
  S: Sink<Message> + Unpin,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let mut rx = ReceiverStream::new(rx);
  while let Some(message) = rx.next().await {
    let json = serde_json::to_string(&message)?;
    debug!("Colibri >>> {}", json);
    sink.send(Message::Text(json)).await?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn last_n_message() {
    let msg = ColibriMessage::ReceiverVideoConstraints {
      last_n: Some(5),
      selected_endpoints: vec![],
    };
    assert_eq!(
      serde_json::to_value(&msg).unwrap(),
      json!({"colibriClass": "ReceiverVideoConstraints", "lastN": 5})
    );
  }

  #[test]
  fn inbound_messages() {
    let msg: ColibriMessage = serde_json::from_str(
      r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent","dominantSpeakerEndpoint":"efgh"}"#,
    )
    .unwrap();
    assert_eq!(
      msg,
      ColibriMessage::DominantSpeakerEndpointChangeEvent {
        dominant_speaker_endpoint: "efgh".to_owned()
      }
    );

    let msg: ColibriMessage =
      serde_json::from_str(r#"{"colibriClass":"ServerHello","version":"2.3"}"#).unwrap();
    assert_eq!(
      msg,
      ColibriMessage::ServerHello {
        version: Some("2.3".to_owned())
      }
    );

    let msg: ColibriMessage =
      serde_json::from_str(r#"{"colibriClass":"SenderVideoConstraints","videoConstraints":{}}"#)
        .unwrap();
    assert_eq!(msg, ColibriMessage::Unknown);
    assert!(serde_json::from_str::<ColibriMessage>(r#"{"lastN":5}"#).is_err());
  }
}
