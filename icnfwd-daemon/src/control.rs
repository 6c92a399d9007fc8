//! Control-plane socket.
//!
//! A local TCP listener (default port 2001) accepts length-prefixed
//! frames, one command line per frame, and answers each with an
//! `ack[:payload]` or `nack:<reason>` frame. Commands are applied on the
//! dispatcher thread; the client task just shuttles frames.

use crate::dispatcher::Event;
use crate::io::{read_frame, write_frame, Listener};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

/// Commands are short lines; anything bigger is a framing error.
const MAX_CONTROL_FRAME: usize = 16 * 1024;

/// The dispatcher's answer to one control command.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    Ack(Option<String>),
    Nack(String),
}

impl ControlReply {
    pub fn ack() -> Self {
        ControlReply::Ack(None)
    }

    pub fn ack_with(payload: impl Into<String>) -> Self {
        ControlReply::Ack(Some(payload.into()))
    }

    pub fn nack(reason: impl Into<String>) -> Self {
        ControlReply::Nack(reason.into())
    }

    /// The reply's wire form.
    pub fn to_frame(&self) -> Bytes {
        let text = match self {
            ControlReply::Ack(None) => "ack".to_string(),
            ControlReply::Ack(Some(payload)) => format!("ack:{}", payload),
            ControlReply::Nack(reason) => format!("nack:{}", reason),
        };
        Bytes::from(text)
    }
}

pub struct ControlListener {
    inner: tokio::net::TcpListener,
    events: mpsc::Sender<Event>,
}

pub fn bind_control(addr: SocketAddr, events: mpsc::Sender<Event>) -> Result<ControlListener> {
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("binding control socket {}", addr))?;
    listener.set_nonblocking(true)?;
    Ok(ControlListener {
        inner: tokio::net::TcpListener::from_std(listener)?,
        events,
    })
}

#[async_trait(?Send)]
impl Listener for ControlListener {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr().expect("listener is bound")
    }

    async fn run(self: Box<Self>) {
        loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    debug!("control client {}", peer);
                    serve_client(stream, self.events.clone());
                }
                Err(err) => {
                    warn!("control accept failed: {}", err);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

fn serve_client(stream: tokio::net::TcpStream, events: mpsc::Sender<Event>) {
    tokio::task::spawn_local(async move {
        let (mut reader, mut writer) = stream.into_split();
        loop {
            let frame = match read_frame(&mut reader, MAX_CONTROL_FRAME).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    debug!("control client read error: {}", err);
                    break;
                }
            };
            let line = String::from_utf8_lossy(&frame).into_owned();

            let (reply_tx, reply_rx) = oneshot::channel();
            if events
                .send(Event::Control {
                    line,
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                break;
            }
            let reply = reply_rx
                .await
                .unwrap_or_else(|_| ControlReply::nack("forwarder unavailable"));
            if write_frame(&mut writer, &reply.to_frame()).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_frames() {
        assert_eq!(ControlReply::ack().to_frame().as_ref(), b"ack");
        assert_eq!(
            ControlReply::ack_with("{\"x\":1}").to_frame().as_ref(),
            b"ack:{\"x\":1}"
        );
        assert_eq!(
            ControlReply::nack("bad verb").to_frame().as_ref(),
            b"nack:bad verb"
        );
    }
}
