//! Wildcard viewer-token generation for one published stream.
//!
//! A published stream is viewable over several downstream protocols, each
//! gated by its own token variant. Preparing a stream for viewing is one
//! atomic step built from several independent issuance calls: they fan out
//! concurrently, and either every token lands in the stream URI or the whole
//! step fails with the first error seen.

use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::WILDCARD_REQUESTER;
use crate::engine::TokenIssuer;
use crate::shared::{RoomCastError, Status};
use crate::stream::{StreamDescriptor, TokenField};

/// Capabilities that make a publisher eligible for a live-stream token.
const STREAMING_TYPE_CAPABILITIES: [&str; 2] = ["streaming", "rtmp"];

/// Result of one generation run. `status != ok` carries no stream: partial
/// token sets never escape.
#[derive(Debug, Clone)]
pub struct TokenGenerationOutcome {
    pub status: Status,
    pub stream: Option<StreamDescriptor>,
}

#[derive(Clone)]
pub struct WildcardTokenManager {
    issuer: Arc<dyn TokenIssuer>,
}

impl WildcardTokenManager {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { issuer }
    }

    /// The token variants owed to a publisher with the given capabilities.
    fn plan(publisher_capabilities: &[String]) -> Vec<(Vec<String>, TokenField)> {
        let mut requests = vec![
            (Vec::new(), TokenField::RealTime),
            (vec!["broadcast".to_string()], TokenField::Broadcast),
        ];

        let streaming_capabilities: Vec<String> = publisher_capabilities
            .iter()
            .filter(|c| STREAMING_TYPE_CAPABILITIES.contains(&c.as_str()))
            .cloned()
            .collect();

        if !streaming_capabilities.is_empty() {
            requests.push((streaming_capabilities, TokenField::LiveStream));
        }

        if publisher_capabilities.iter().any(|c| c == "drm") {
            requests.push((
                vec!["streaming".to_string(), "drm-open-access".to_string()],
                TokenField::DrmOpenAccess,
            ));
            requests.push((
                vec!["streaming".to_string(), "drm-hollywood".to_string()],
                TokenField::DrmHollywood,
            ));
        }

        requests
    }

    /// Generates every token variant and embeds each into the stream URI.
    ///
    /// All issuances run concurrently. The first failure — transport error or
    /// non-ok grant — cancels the rest and becomes the single reported
    /// outcome. Dropping the returned future cancels all in-flight issuances.
    #[instrument(skip(self, stream), fields(stream_id = %stream_id))]
    pub async fn generate(
        &self,
        publisher_capabilities: &[String],
        stream_id: &str,
        additional_stream_ids: &[String],
        stream: StreamDescriptor,
    ) -> Result<TokenGenerationOutcome, RoomCastError> {
        let requests = Self::plan(publisher_capabilities);

        debug!(
            request_count = requests.len(),
            additional = additional_stream_ids.len(),
            "Generating wildcard viewer stream tokens"
        );

        let tokenized = Arc::new(Mutex::new(stream));

        let issuances = requests.into_iter().map(|(capabilities, field)| {
            let issuer = self.issuer.clone();
            let tokenized = tokenized.clone();

            async move {
                let grant = issuer
                    .create_stream_token_for_subscribing(
                        WILDCARD_REQUESTER,
                        &capabilities,
                        stream_id,
                        additional_stream_ids,
                    )
                    .await
                    .map_err(IssuanceFailure::Error)?;

                if !grant.status.is_ok() {
                    return Err(IssuanceFailure::Status(grant.status));
                }

                let token = grant
                    .stream_token
                    .ok_or_else(|| IssuanceFailure::Error(RoomCastError::transport(
                        "token grant without token",
                    )))?;

                tokenized.lock().unwrap().append_token(field, &token);

                Ok::<(), IssuanceFailure>(())
            }
        });

        match try_join_all(issuances).await {
            Ok(_) => {
                let stream = tokenized.lock().unwrap().clone();

                Ok(TokenGenerationOutcome {
                    status: Status::Ok,
                    stream: Some(stream),
                })
            }
            Err(IssuanceFailure::Error(error)) => Err(error),
            Err(IssuanceFailure::Status(status)) => Ok(TokenGenerationOutcome {
                status,
                stream: None,
            }),
        }
    }

    /// Runs a generation in the background, returning a cancelable handle.
    pub fn spawn_generate(
        &self,
        publisher_capabilities: Vec<String>,
        stream_id: String,
        additional_stream_ids: Vec<String>,
        stream: StreamDescriptor,
    ) -> TokenGeneration {
        let manager = self.clone();

        TokenGeneration {
            handle: tokio::spawn(async move {
                manager
                    .generate(
                        &publisher_capabilities,
                        &stream_id,
                        &additional_stream_ids,
                        stream,
                    )
                    .await
            }),
        }
    }
}

enum IssuanceFailure {
    Error(RoomCastError),
    Status(Status),
}

/// A background token generation. Cancel disposes all pending issuances; a
/// canceled generation delivers no outcome.
pub struct TokenGeneration {
    handle: JoinHandle<Result<TokenGenerationOutcome, RoomCastError>>,
}

impl TokenGeneration {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// The single final outcome, or `None` when the generation was canceled.
    pub async fn outcome(self) -> Option<Result<TokenGenerationOutcome, RoomCastError>> {
        match self.handle.await {
            Ok(result) => Some(result),
            Err(join_error) if join_error.is_cancelled() => None,
            Err(_) => Some(Err(RoomCastError::transport("token generation panicked"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::engine::TokenGrant;
    use crate::stream::StreamType;

    /// Issuer that counts calls; optionally fails one capability set and
    /// stalls every other request forever.
    struct ScriptedIssuer {
        started: AtomicUsize,
        completed: AtomicUsize,
        fail_capability: Option<String>,
        stall_others: bool,
    }

    impl ScriptedIssuer {
        fn counting() -> Self {
            Self {
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                fail_capability: None,
                stall_others: false,
            }
        }

        fn failing_on(capability: &str) -> Self {
            Self {
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                fail_capability: Some(capability.to_string()),
                stall_others: true,
            }
        }

        fn stalling() -> Self {
            Self {
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                fail_capability: None,
                stall_others: true,
            }
        }
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn create_stream_token_for_subscribing(
            &self,
            _requester_pattern: &str,
            capabilities: &[String],
            _stream_id: &str,
            _additional_stream_ids: &[String],
        ) -> Result<TokenGrant, RoomCastError> {
            self.started.fetch_add(1, Ordering::SeqCst);

            let fails = self
                .fail_capability
                .as_ref()
                .is_some_and(|c| capabilities.contains(c));

            if fails {
                return Ok(TokenGrant {
                    status: Status::Unauthorized,
                    stream_token: None,
                });
            }

            if self.stall_others {
                // Never resolves; only cancellation ends this call.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            self.completed.fetch_add(1, Ordering::SeqCst);

            Ok(TokenGrant {
                status: Status::Ok,
                stream_token: Some(format!("token-{}", capabilities.join("+"))),
            })
        }
    }

    fn user_stream() -> StreamDescriptor {
        StreamDescriptor::new("cast://stream-1", StreamType::User)
    }

    #[rstest::rstest]
    #[case(vec![], 2)]
    #[case(vec!["rtmp"], 3)]
    #[case(vec!["drm"], 4)]
    #[case(vec!["streaming", "drm"], 5)]
    #[tokio::test]
    async fn issuance_counts_follow_publisher_capabilities(
        #[case] capabilities: Vec<&str>,
        #[case] expected_requests: usize,
    ) {
        let issuer = Arc::new(ScriptedIssuer::counting());
        let manager = WildcardTokenManager::new(issuer.clone());
        let capabilities: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();

        manager
            .generate(&capabilities, "stream-1", &[], user_stream())
            .await
            .unwrap();

        assert_eq!(issuer.started.load(Ordering::SeqCst), expected_requests);
    }

    #[tokio::test]
    async fn success_embeds_every_token_variant_into_the_uri() {
        let issuer = Arc::new(ScriptedIssuer::counting());
        let manager = WildcardTokenManager::new(issuer);

        let outcome = manager
            .generate(
                &["streaming".to_string()],
                "stream-1",
                &[],
                user_stream(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, Status::Ok);
        let stream = outcome.stream.unwrap();
        assert!(stream.token(TokenField::RealTime).is_some());
        assert!(stream.token(TokenField::Broadcast).is_some());
        assert!(stream.token(TokenField::LiveStream).is_some());
        assert!(stream.token(TokenField::DrmOpenAccess).is_none());
    }

    #[tokio::test]
    async fn first_failure_cancels_the_rest_and_reports_once() {
        let issuer = Arc::new(ScriptedIssuer::failing_on("broadcast"));
        let manager = WildcardTokenManager::new(issuer.clone());

        let outcome = manager
            .generate(
                &["streaming".to_string(), "drm".to_string()],
                "stream-1",
                &[],
                user_stream(),
            )
            .await
            .unwrap();

        // The one failing issuance decides the outcome; nothing partial leaks
        // and none of the stalled issuances ever completes.
        assert_eq!(outcome.status, Status::Unauthorized);
        assert!(outcome.stream.is_none());
        assert_eq!(issuer.completed.load(Ordering::SeqCst), 0);
        assert!(issuer.started.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancellation_suppresses_the_outcome() {
        let issuer = Arc::new(ScriptedIssuer::stalling());
        let manager = WildcardTokenManager::new(issuer.clone());

        let generation = manager.spawn_generate(
            Vec::new(),
            "stream-1".to_string(),
            Vec::new(),
            user_stream(),
        );

        tokio::task::yield_now().await;
        generation.cancel();

        assert!(generation.outcome().await.is_none());
        assert_eq!(issuer.completed.load(Ordering::SeqCst), 0);
    }
}
