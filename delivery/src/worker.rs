//! Alerts-queue handler: executes one `send-alert` job.
//!
//! Fail-closed rules:
//! - a payload that does not parse can never succeed → permanent
//! - a channel with no configured sender can never succeed → permanent
//! - permanent send failures flip the record to failed and are not retried
//! - transient send failures bump the attempt counter and let the harness
//!   back off; the record flips to failed only once attempts are exhausted
//!
//! Completion is a compare-and-set from queued to sent. Losing that race
//! means another worker already finished the record (at-least-once
//! delivery); the job still completes, it just does not double-count.

use std::sync::Arc;

use tracing::{debug, warn};

use common::time::now_ms;
use jobs::{Job, JobError, JobHandler, JobSummary};

use crate::channel::{ChannelRouter, SendFailure};
use crate::model::DeliveryStatus;
use crate::scheduler::SendAlertJob;
use crate::store::DeliveryStore;

pub struct SendAlertHandler {
    deliveries: Arc<dyn DeliveryStore>,
    senders: ChannelRouter,
}

impl SendAlertHandler {
    pub fn new(deliveries: Arc<dyn DeliveryStore>, senders: ChannelRouter) -> Self {
        Self { deliveries, senders }
    }
}

#[async_trait::async_trait]
impl JobHandler for SendAlertHandler {
    async fn handle(&self, job: &Job) -> Result<JobSummary, JobError> {
        let send: SendAlertJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Permanent(format!("malformed send-alert payload: {e}")))?;

        let Some(sender) = self.senders.get(send.channel) else {
            return Err(JobError::Permanent(format!(
                "no sender configured for channel {}",
                send.channel
            )));
        };

        self.deliveries
            .record_attempt(send.delivery_id)
            .await
            .map_err(|e| JobError::Transient(format!("delivery store unavailable: {e}")))?;

        match sender.send(&send.recipient, &send.payload).await {
            Ok(()) => {
                let claimed = self
                    .deliveries
                    .transition(
                        send.delivery_id,
                        DeliveryStatus::Queued,
                        DeliveryStatus::Sent,
                        None,
                        now_ms(),
                    )
                    .await
                    .map_err(|e| JobError::Transient(format!("delivery store unavailable: {e}")))?;

                if !claimed {
                    warn!(
                        delivery_id = %send.delivery_id,
                        "record already finished elsewhere; duplicate send"
                    );
                }

                debug!(delivery_id = %send.delivery_id, channel = %send.channel, "alert sent");
                Ok(JobSummary {
                    processed: 1,
                    ..Default::default()
                })
            }

            Err(SendFailure::Permanent(reason)) => {
                let _ = self
                    .deliveries
                    .transition(
                        send.delivery_id,
                        DeliveryStatus::Queued,
                        DeliveryStatus::Failed,
                        Some(&reason),
                        now_ms(),
                    )
                    .await;

                Err(JobError::Permanent(reason))
            }

            Err(SendFailure::Transient(reason)) => {
                if job.is_final_attempt() {
                    let _ = self
                        .deliveries
                        .transition(
                            send.delivery_id,
                            DeliveryStatus::Queued,
                            DeliveryStatus::Failed,
                            Some(&reason),
                            now_ms(),
                        )
                        .await;
                }

                Err(JobError::Transient(reason))
            }
        }
    }
}
