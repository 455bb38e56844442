//! # TCP Connection Abstraction
//!
//! Wraps a TCP stream with message framing for the dispatcher/worker RPC.
//!
//! ## Wire Protocol
//!
//! ```text
//! [4 bytes: message length] [N bytes: JSON message data]
//! ```
//!
//! The prefix is big-endian, the same as the client-facing frame codec.

use anyhow::Result;
use log::error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::messages::Message;

/// TCP connection wrapper with message framing support.
pub struct Connection {
    stream: TcpStream,
    /// Largest message accepted from the peer
    max_message_bytes: usize,
}

impl Connection {
    /// Create a Connection that rejects messages larger than `max_message_bytes`.
    pub fn with_limit(stream: TcpStream, max_message_bytes: usize) -> Self {
        Self {
            stream,
            max_message_bytes,
        }
    }

    /// Read a message from the connection.
    ///
    /// # Returns
    /// - `Ok(Some(Message))`: Successfully read and deserialized a message
    /// - `Ok(None)`: Connection closed, message too large, or deserialization failed
    /// - `Err`: I/O error in the middle of a message
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        // First, read 4-byte length prefix that tells us the message size
        let mut length_buf = [0u8; 4];

        match self.stream.read_exact(&mut length_buf).await {
            Ok(_) => {
                let length = u32::from_be_bytes(length_buf) as usize;

                if length > self.max_message_bytes {
                    error!(
                        "❌ Message too large: {} bytes (max: {} bytes)",
                        length, self.max_message_bytes
                    );
                    return Ok(None);
                }

                let mut data = vec![0u8; length];
                self.stream.read_exact(&mut data).await?;

                match Message::from_bytes(&data) {
                    Ok(msg) => Ok(Some(msg)),
                    Err(e) => {
                        error!("❌ Failed to deserialize message: {}", e);
                        Ok(None)
                    }
                }
            }
            Err(_) => Ok(None), // Connection closed cleanly
        }
    }

    /// Write a message to the connection and flush it.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let data = message.to_bytes()?;
        let length = u32::try_from(data.len())
            .map_err(|_| anyhow::anyhow!("message of {} bytes is too large", data.len()))?;

        // Send: [4 bytes length][message data]
        self.stream.write_all(&length.to_be_bytes()).await?;
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;

        Ok(())
    }
}
