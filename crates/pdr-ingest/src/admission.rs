//! Admission control for workflow starts
//!
//! Moves messages from a queue into executions of a state machine while
//! keeping at most `max_concurrent` executions running. A message is deleted
//! only after its execution started; a failed start leaves it for redelivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sfn::config::{BehaviorVersion, Region};
use aws_sdk_sfn::types::ExecutionStatus;
use aws_sdk_sfn::Client as SfnClient;
use aws_sdk_sqs::Client;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::dispatch::sqs_client;

/// Largest batch a single receive may return
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Pause after a cycle that started at least one execution
pub const ACTIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a cycle that started nothing
pub const IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Workflow whose executions are being throttled
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    async fn running_count(&self) -> Result<usize>;

    /// Start one execution; returns its identifier
    async fn start(&self, params: serde_json::Value) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    pub receipt_handle: String,
}

/// Queue the execution parameters are read from
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub running: usize,
    pub received: usize,
    pub started: usize,
}

pub struct AdmissionController<T, S> {
    target: T,
    source: S,
    max_concurrent: usize,
}

impl<T: ExecutionTarget, S: MessageSource> AdmissionController<T, S> {
    pub fn new(target: T, source: S, max_concurrent: usize) -> Self {
        Self {
            target,
            source,
            max_concurrent,
        }
    }

    /// Run one admission cycle
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let running = self
            .target
            .running_count()
            .await
            .context("Failed to count running executions")?;

        let capacity = self.max_concurrent.saturating_sub(running);
        if capacity == 0 {
            debug!(running, max = self.max_concurrent, "At capacity");
            return Ok(CycleReport {
                running,
                ..Default::default()
            });
        }

        let messages = self
            .source
            .receive(capacity.min(MAX_RECEIVE_BATCH))
            .await
            .context("Failed to receive messages")?;
        let received = messages.len();

        if received > 0 {
            info!("Starting {} executions", received);
        }

        let started: Vec<bool> = stream::iter(messages)
            .map(|message| self.admit(message))
            .buffer_unordered(MAX_RECEIVE_BATCH)
            .collect()
            .await;

        Ok(CycleReport {
            running,
            received,
            started: started.into_iter().filter(|s| *s).count(),
        })
    }

    async fn admit(&self, message: QueueMessage) -> bool {
        let params = match serde_json::from_str::<serde_json::Value>(&message.body) {
            Ok(params) => params,
            Err(e) => {
                error!(message_id = %message.id, "Message body is not JSON: {}", e);
                return false;
            },
        };

        match self.target.start(params).await {
            Ok(execution) => {
                debug!(message_id = %message.id, execution = %execution, "Execution started");
                if let Err(e) = self.source.delete(&message.receipt_handle).await {
                    warn!(message_id = %message.id, "Failed to delete message: {:#}", e);
                }
                true
            },
            Err(e) => {
                error!(message_id = %message.id, "Failed to start execution: {:#}", e);
                false
            },
        }
    }

    /// Cycle until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let pause = match self.run_cycle().await {
                Ok(report) if report.started > 0 => ACTIVE_INTERVAL,
                Ok(_) => IDLE_INTERVAL,
                Err(e) => {
                    error!("Admission cycle failed: {:#}", e);
                    IDLE_INTERVAL
                },
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Admission loop stopped");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// SQS-backed [`MessageSource`]
pub struct SqsMessageSource {
    client: Client,
    queue_url: String,
}

impl SqsMessageSource {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn from_config(config: &QueueConfig, queue_url: impl Into<String>) -> Self {
        Self::new(sqs_client(config), queue_url)
    }
}

#[async_trait]
impl MessageSource for SqsMessageSource {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
        let capped = max.clamp(1, MAX_RECEIVE_BATCH) as i32;

        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("SQS receive failed: {e:?}"))?;

        Ok(response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                Some(QueueMessage {
                    id: message.message_id().unwrap_or("unknown").to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                    receipt_handle: message.receipt_handle()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("SQS delete failed: {e:?}"))?;
        Ok(())
    }
}

/// Build a Step Functions client from the shared AWS settings
pub fn sfn_client(config: &QueueConfig) -> SfnClient {
    let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());

    let mut builder = aws_sdk_sfn::Config::builder()
        .region(Region::new(region))
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&config.access_key, &config.secret_key) {
        builder = builder.credentials_provider(Credentials::new(key_id, secret, None, None, "pdr-sfn"));
    }

    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder.endpoint_url(endpoint);
    }

    SfnClient::from_conf(builder.build())
}

/// Execution name and input document for one queued message
///
/// A body with an `input` key is a full set of execution parameters; any
/// other body is the input itself.
fn execution_request(params: &serde_json::Value) -> (Option<String>, String) {
    match params.get("input") {
        Some(input) => {
            let name = params.get("name").and_then(|n| n.as_str()).map(str::to_string);
            let input = match input.as_str() {
                Some(text) => text.to_string(),
                None => input.to_string(),
            };
            (name, input)
        },
        None => (None, params.to_string()),
    }
}

/// [`ExecutionTarget`] backed by a Step Functions state machine
pub struct SfnExecutionTarget {
    client: SfnClient,
    state_machine_arn: String,
}

impl SfnExecutionTarget {
    pub fn new(client: SfnClient, state_machine_arn: impl Into<String>) -> Self {
        Self {
            client,
            state_machine_arn: state_machine_arn.into(),
        }
    }

    pub fn from_config(config: &QueueConfig, state_machine_arn: impl Into<String>) -> Self {
        Self::new(sfn_client(config), state_machine_arn)
    }
}

#[async_trait]
impl ExecutionTarget for SfnExecutionTarget {
    async fn running_count(&self) -> Result<usize> {
        let mut count = 0;
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_executions()
                .state_machine_arn(&self.state_machine_arn)
                .status_filter(ExecutionStatus::Running)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Step Functions list failed: {e:?}"))?;

            count += response.executions().len();

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(count)
    }

    async fn start(&self, params: serde_json::Value) -> Result<String> {
        let (name, input) = execution_request(&params);

        let response = self
            .client
            .start_execution()
            .state_machine_arn(&self.state_machine_arn)
            .set_name(name)
            .input(input)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Step Functions start failed: {e:?}"))?;

        Ok(response.execution_arn().to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Target {
        running: usize,
        fail_bodies: Vec<String>,
        started: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl ExecutionTarget for Target {
        async fn running_count(&self) -> Result<usize> {
            Ok(self.running)
        }

        async fn start(&self, params: serde_json::Value) -> Result<String> {
            if self.fail_bodies.contains(&params.to_string()) {
                anyhow::bail!("throttled");
            }
            let mut started = self.started.lock().unwrap();
            started.push(params);
            Ok(format!("execution-{}", started.len()))
        }
    }

    #[derive(Default)]
    struct Queue {
        messages: Mutex<Vec<QueueMessage>>,
        requested: Mutex<Vec<usize>>,
        deleted: Mutex<Vec<String>>,
    }

    impl Queue {
        fn with_messages(count: usize) -> Self {
            let queue = Queue::default();
            {
                let mut messages = queue.messages.lock().unwrap();
                for i in 0..count {
                    messages.push(QueueMessage {
                        id: format!("m{}", i),
                        body: format!(r#"{{"n":{}}}"#, i),
                        receipt_handle: format!("r{}", i),
                    });
                }
            }
            queue
        }
    }

    #[async_trait]
    impl MessageSource for Queue {
        async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
            self.requested.lock().unwrap().push(max);
            let mut messages = self.messages.lock().unwrap();
            let take = max.min(messages.len());
            Ok(messages.drain(..take).collect())
        }

        async fn delete(&self, receipt_handle: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_starts_at_most_remaining_capacity() {
        let target = Target {
            running: 7,
            ..Default::default()
        };
        let controller = AdmissionController::new(target, Queue::with_messages(20), 10);

        let report = controller.run_cycle().await.unwrap();
        assert_eq!(report.started, 3);
        assert_eq!(*controller.source.requested.lock().unwrap(), vec![3]);
        assert_eq!(controller.source.deleted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let controller = AdmissionController::new(Target::default(), Queue::with_messages(50), 100);

        let report = controller.run_cycle().await.unwrap();
        assert_eq!(report.received, MAX_RECEIVE_BATCH);
        assert_eq!(*controller.source.requested.lock().unwrap(), vec![MAX_RECEIVE_BATCH]);
    }

    #[tokio::test]
    async fn test_at_capacity_receives_nothing() {
        let target = Target {
            running: 10,
            ..Default::default()
        };
        let controller = AdmissionController::new(target, Queue::with_messages(5), 10);

        let report = controller.run_cycle().await.unwrap();
        assert_eq!(report.started, 0);
        assert!(controller.source.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_keeps_message() {
        let target = Target {
            fail_bodies: vec![r#"{"n":1}"#.to_string()],
            ..Default::default()
        };
        let controller = AdmissionController::new(target, Queue::with_messages(3), 10);

        let report = controller.run_cycle().await.unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(report.started, 2);

        let mut deleted = controller.source.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["r0", "r2"]);
    }

    #[test]
    fn test_execution_request_shapes() {
        let params = serde_json::json!({"name": "pdr-a", "input": {"pdr": "a.PDR"}});
        assert_eq!(
            execution_request(&params),
            (Some("pdr-a".to_string()), r#"{"pdr":"a.PDR"}"#.to_string())
        );

        let params = serde_json::json!({"input": "{\"pdr\":\"b.PDR\"}"});
        assert_eq!(execution_request(&params), (None, r#"{"pdr":"b.PDR"}"#.to_string()));

        let params = serde_json::json!({"pdr": "c.PDR"});
        assert_eq!(execution_request(&params), (None, r#"{"pdr":"c.PDR"}"#.to_string()));
    }

    #[test]
    fn test_sfn_target_from_config() {
        let config = QueueConfig {
            region: Some("us-west-2".to_string()),
            endpoint: Some("http://localhost:4566".to_string()),
            ..Default::default()
        };
        let arn = "arn:aws:states:us-west-2:000000000000:stateMachine:ParsePdr";
        let target = SfnExecutionTarget::from_config(&config, arn);
        assert_eq!(target.state_machine_arn, arn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let controller = AdmissionController::new(Target::default(), Queue::with_messages(25), 100);

        controller.run(tokio::time::sleep(Duration::from_millis(2500))).await;

        // cycles at t=0, 1s, 2s drain 10 + 10 + 5 messages
        assert_eq!(controller.target.started.lock().unwrap().len(), 25);
        assert_eq!(*controller.source.requested.lock().unwrap(), vec![10, 10, 10]);
    }
}
