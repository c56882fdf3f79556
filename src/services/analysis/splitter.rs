//! Batch Splitter
//!
//! Retries a batch that is too large by halving it until the halves fit.
//! Results of the halves are merged into one JSON array.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use chronicle_core::ConversationPayload;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{AnalysisError, AnalysisResult};
use super::mapper::extract_results;
use super::payload::ItemFailure;
use crate::utils::error::AppError;

/// Output of a possibly-split batch run
#[derive(Debug, Default)]
pub struct SplitOutcome {
    /// Raw backend output, or the merged result array after a split
    pub output: String,
    /// Items of sub-batches that failed after the batch was split
    pub failures: Vec<ItemFailure>,
    /// Backend invocations made
    pub invocations: usize,
}

type SubResult<'a> = Pin<Box<dyn Future<Output = AnalysisResult<SplitPart>> + Send + 'a>>;

#[derive(Default)]
struct SplitPart {
    results: Vec<Value>,
    failures: Vec<ItemFailure>,
    invocations: usize,
}

/// Run `execute` over `payloads`, halving on `PayloadTooLarge`.
///
/// Any other error of the unsplit batch is returned as is. Once split, a
/// failing half only fails its own items.
pub async fn run_with_adaptive_split<F, Fut>(
    payloads: Vec<ConversationPayload>,
    execute: F,
) -> AnalysisResult<SplitOutcome>
where
    F: Fn(Vec<ConversationPayload>) -> Fut + Send + Sync,
    Fut: Future<Output = AnalysisResult<String>> + Send,
{
    if payloads.is_empty() {
        return Ok(SplitOutcome {
            output: "[]".to_string(),
            ..Default::default()
        });
    }

    match execute(payloads.clone()).await {
        Ok(output) => Ok(SplitOutcome {
            output,
            failures: Vec::new(),
            invocations: 1,
        }),
        Err(e) if e.is_payload_too_large() && payloads.len() == 1 => Ok(SplitOutcome {
            output: "[]".to_string(),
            failures: vec![ItemFailure::new(&payloads[0].id, e.to_string())],
            invocations: 1,
        }),
        Err(e) if e.is_payload_too_large() => {
            debug!(items = payloads.len(), "[BatchSplitter] Batch too large, splitting");
            let part = split_and_run(payloads, &execute).await?;
            let output = serde_json::to_string(&Value::Array(part.results)).map_err(AppError::from)?;
            Ok(SplitOutcome {
                output,
                failures: part.failures,
                invocations: part.invocations + 1,
            })
        }
        Err(e) => Err(e),
    }
}

fn split_and_run<'a, F, Fut>(payloads: Vec<ConversationPayload>, execute: &'a F) -> SubResult<'a>
where
    F: Fn(Vec<ConversationPayload>) -> Fut + Send + Sync,
    Fut: Future<Output = AnalysisResult<String>> + Send + 'a,
{
    Box::pin(async move {
        let mut part = SplitPart::default();
        let mut right = payloads;
        let left: Vec<ConversationPayload> = right.drain(..right.len() / 2).collect();

        for half in [left, right] {
            let ids: HashSet<String> = half.iter().map(|p| p.id.clone()).collect();
            part.invocations += 1;

            match execute(half.clone()).await {
                Ok(raw) => match extract_results(&raw, &ids) {
                    Ok(results) => part.results.extend(results),
                    Err(e) => fail_all(&mut part, &half, &e),
                },
                Err(e) if e.is_payload_too_large() && half.len() > 1 => {
                    let sub = split_and_run(half, execute).await?;
                    part.results.extend(sub.results);
                    part.failures.extend(sub.failures);
                    part.invocations += sub.invocations;
                }
                Err(AnalysisError::Storage(e)) => return Err(AnalysisError::Storage(e)),
                Err(e) => {
                    warn!(items = half.len(), error = %e, "[BatchSplitter] Sub-batch failed");
                    fail_all(&mut part, &half, &e);
                }
            }
        }

        Ok(part)
    })
}

fn fail_all(part: &mut SplitPart, half: &[ConversationPayload], err: &AnalysisError) {
    let reason = err.to_string();
    part.failures
        .extend(half.iter().map(|p| ItemFailure::new(&p.id, &reason)));
}
