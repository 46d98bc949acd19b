//! Batch/bulk orchestration: `Parsing -> Per-item Executing -> Aggregating ->
//! Responding`. Items execute sequentially, in request order, so a caller
//! can rely on `outcomes[i]` corresponding to `items[i]`. The HTTP status is
//! always 207 Multi-Status; per-item status lives in the body.

use std::future::Future;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ItemOutcome<T: Serialize> {
    pub index: usize,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs `op` over `items` sequentially, stopping only for a batch-wide
/// rejection (the cap check); individual item failures are captured as
/// outcomes, not propagated.
pub async fn execute_sequential<I, T, F, Fut>(items: Vec<I>, cap: usize, op: F) -> Result<Vec<ItemOutcome<T>>, ApiError>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    T: Serialize,
{
    if items.len() > cap {
        return Err(ApiError::InvalidInput(format!("batch of {} items exceeds the cap of {cap}", items.len())));
    }
    let mut outcomes = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match op(item).await {
            Ok(data) => outcomes.push(ItemOutcome { index, status: 200, data: Some(data), error: None }),
            Err(e) => outcomes.push(ItemOutcome { index, status: e.status().as_u16(), data: None, error: Some(e.to_string()) }),
        }
    }
    Ok(outcomes)
}

pub fn respond<T: Serialize>(outcomes: Vec<ItemOutcome<T>>) -> (StatusCode, Json<Vec<ItemOutcome<T>>>) {
    (StatusCode::MULTI_STATUS, Json(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_batch_is_rejected_before_executing() {
        let items = vec![1, 2, 3];
        let err = execute_sequential(items, 2, |i: i32| async move { Ok::<_, ApiError>(i) }).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn partial_failure_preserves_order_and_status() {
        let items = vec![1, 2, 3];
        let outcomes = execute_sequential(items, 10, |i: i32| async move {
            if i == 2 { Err(ApiError::NotFound("x".to_string())) } else { Ok(i) }
        })
        .await
        .unwrap();
        assert_eq!(outcomes[0].status, 200);
        assert_eq!(outcomes[1].status, 404);
        assert_eq!(outcomes[2].status, 200);
    }
}
