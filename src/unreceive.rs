use tracing::warn;

use crate::connection::Connection;
use crate::error::StompError;
use crate::frame::Frame;
use crate::protocol::Version;

/// Options for [`Connection::unreceive`].
#[derive(Debug, Clone)]
pub struct UnreceiveOptions {
    /// Destination poisoned messages land on once redeliveries run out.
    pub dead_letter_queue: String,
    /// Redelivery budget; the attempt that would exceed it goes to the DLQ.
    pub max_redeliveries: u32,
    /// ACK the original message even when the subscription is not
    /// client-acknowledged.
    pub force_client_ack: bool,
}

impl Default for UnreceiveOptions {
    fn default() -> Self {
        Self {
            dead_letter_queue: "/queue/DLQ".to_string(),
            max_redeliveries: 6,
            force_client_ack: false,
        }
    }
}

impl Connection {
    /// Hand back a consumed message: retry it on its original destination,
    /// or dead-letter it once the redelivery budget is spent.
    ///
    /// The whole exchange runs inside a broker transaction named
    /// `transaction-<message-id>-<retry-count>`: the original message is
    /// ACKed there when the subscription is client-acknowledged (or
    /// `force_client_ack` is set), the message is republished with an
    /// incremented `retry_count`, and the transaction commits. Any failure
    /// aborts the transaction and re-raises, leaving the broker state
    /// untouched.
    pub async fn unreceive(
        &self,
        message: &Frame,
        options: &UnreceiveOptions,
    ) -> Result<(), StompError> {
        let message_id = message
            .get_header("message-id")
            .ok_or(StompError::MessageIdRequired("unreceive"))?
            .to_string();
        let destination = message
            .get_header("destination")
            .ok_or_else(|| StompError::Protocol("message has no destination header".to_string()))?
            .to_string();
        let retry_count: u32 = message
            .get_header("retry_count")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let transaction = format!("transaction-{}-{}", message_id, retry_count);

        self.begin(&transaction, Vec::new()).await?;
        let outcome = self
            .redeliver(message, options, &transaction, &message_id, &destination, retry_count + 1)
            .await;
        match outcome {
            Ok(()) => self.commit(&transaction, Vec::new()).await,
            Err(e) => {
                if let Err(abort_err) = self.abort(&transaction, Vec::new()).await {
                    warn!(transaction = %transaction, error = %abort_err, "abort after unreceive failure also failed");
                }
                Err(e)
            }
        }
    }

    async fn redeliver(
        &self,
        message: &Frame,
        options: &UnreceiveOptions,
        transaction: &str,
        message_id: &str,
        destination: &str,
        new_count: u32,
    ) -> Result<(), StompError> {
        if options.force_client_ack || self.subscription_uses_client_ack(message) {
            let ack_id = if self.protocol() == Version::V1_2 {
                message.get_header("ack").unwrap_or(message_id)
            } else {
                message_id
            };
            let mut ack_headers = vec![("transaction".to_string(), transaction.to_string())];
            if let Some(sub) = message.get_header("subscription") {
                ack_headers.push(("subscription".to_string(), sub.to_string()));
            }
            self.ack(ack_id, ack_headers).await?;
        }

        if new_count <= options.max_redeliveries {
            self.publish(
                destination,
                message.body.clone(),
                vec![
                    ("transaction".to_string(), transaction.to_string()),
                    ("retry_count".to_string(), new_count.to_string()),
                ],
            )
            .await
        } else {
            self.publish(
                &options.dead_letter_queue,
                message.body.clone(),
                vec![
                    ("original_destination".to_string(), destination.to_string()),
                    ("persistent".to_string(), "true".to_string()),
                    ("transaction".to_string(), transaction.to_string()),
                ],
            )
            .await
        }
    }

    fn subscription_uses_client_ack(&self, message: &Frame) -> bool {
        message
            .get_header("subscription")
            .and_then(|id| self.subscription_headers(id))
            .map(|headers| {
                headers
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case("ack") && v == "client")
            })
            .unwrap_or(false)
    }
}
